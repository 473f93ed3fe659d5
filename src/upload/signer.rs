//! Request signing for cloud storage.
//!
//! The client never holds the storage secret. It builds the canonical string
//! describing a request and asks the origin service to sign it; the returned
//! value is used verbatim as the `Authorization` header.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::debug;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::Method;
use serde::Deserialize;
use serde_json::json;

use crate::api::{self, OriginApi};
use crate::constants::{AMZ_DATE_FORMAT, SIGNING_ALGORITHM};
use crate::error::UploadError;
use crate::transport::OutgoingRequest;
use crate::upload::descriptor::CloudTarget;
use crate::Result;

pub const HEADER_CONTENT_SHA256: &str = "x-amz-content-sha256";
pub const HEADER_AMZ_DATE: &str = "x-amz-date";

#[derive(Debug, Deserialize)]
struct SignResponse {
    #[serde(default)]
    authorization: String,
}

/// Build the string the origin service signs for one cloud request.
///
/// `headers` must already carry the content hash and date headers; every
/// header whose name starts with `x-` is signed along with `host`.
pub fn canonical_string(
    target: &CloudTarget,
    method: &Method,
    query: &str,
    headers: &HeaderMap,
    payload_hash: &str,
    amz_date: &str,
) -> String {
    let signed: BTreeMap<&str, &str> = headers
        .iter()
        .filter(|(name, _)| name.as_str().starts_with("x-"))
        .map(|(name, value)| (name.as_str(), value.to_str().unwrap_or_default()))
        .collect();

    let mut signed_names: Vec<&str> = signed.keys().copied().collect();
    signed_names.push("host");
    signed_names.sort_unstable();

    let day = amz_date.get(..8).unwrap_or(amz_date);
    let mut lines = vec![
        SIGNING_ALGORITHM.to_string(),
        amz_date.to_string(),
        format!("{}/{}/s3/aws4_request", day, target.region),
        method.as_str().to_string(),
        format!("/{}/{}", target.bucket, target.key),
        query.to_string(),
        format!("host:{}", target.host),
    ];
    lines.extend(signed.iter().map(|(name, value)| format!("{}:{}", name, value)));
    lines.push(String::new());
    lines.push(signed_names.join(";"));
    lines.push(payload_hash.to_string());

    lines.join("\n")
}

/// URL of a cloud storage request against `target`.
pub fn target_url(target: &CloudTarget, query: &str) -> String {
    let mut url = format!("https://{}/{}/{}", target.host, target.bucket, target.key);
    if !query.is_empty() {
        url.push('?');
        url.push_str(query);
    }
    url
}

/// Signs cloud storage requests through the origin service.
#[derive(Clone)]
pub struct CloudSigner {
    api: Arc<dyn OriginApi>,
    target: CloudTarget,
}

impl CloudSigner {
    pub fn new(api: Arc<dyn OriginApi>, target: CloudTarget) -> Self {
        Self { api, target }
    }

    pub fn target(&self) -> &CloudTarget {
        &self.target
    }

    /// Sign a request for the current time.
    ///
    /// Returns a request carrying the URL and every header; the caller attaches
    /// the body whose hash is `payload_hash`.
    pub async fn sign(
        &self,
        method: Method,
        query: &str,
        headers: HeaderMap,
        payload_hash: &str,
    ) -> Result<OutgoingRequest> {
        self.sign_at(method, query, headers, payload_hash, Utc::now())
            .await
    }

    pub async fn sign_at(
        &self,
        method: Method,
        query: &str,
        mut headers: HeaderMap,
        payload_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<OutgoingRequest> {
        let amz_date = now.format(AMZ_DATE_FORMAT).to_string();
        headers.insert(HEADER_CONTENT_SHA256, header_value(payload_hash)?);
        headers.insert(HEADER_AMZ_DATE, header_value(&amz_date)?);

        let canonical = canonical_string(&self.target, &method, query, &headers, payload_hash, &amz_date);
        let path = format!("Cloud/Aws/Bucket/Upload/{}:signV4", self.target.upload_ref);
        let signed: SignResponse =
            api::apply(self.api.as_ref(), &path, Method::POST, json!({ "headers": canonical })).await?;

        if signed.authorization.is_empty() {
            return Err(UploadError::Protocol(
                "signing service returned no authorization".to_string(),
            ));
        }
        headers.insert(AUTHORIZATION, header_value(&signed.authorization)?);
        debug!("Signed {} {} for {}", method, query, self.target.key);

        let mut request = OutgoingRequest::new(method, target_url(&self.target, query));
        request.headers = headers;
        Ok(request)
    }
}

fn header_value(value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value)
        .map_err(|e| UploadError::Protocol(format!("invalid header value: {}", e)))
}
