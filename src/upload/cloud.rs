//! Cloud storage multipart calls.
//!
//! Every call is signed through [`CloudSigner`] and sent over the raw
//! [`HttpTransport`]. Responses with a status of 400 or above are errors
//! carrying the status and body.

use std::sync::Arc;

use bytes::Bytes;
use log::debug;
use regex::Regex;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::Method;

use crate::constants::EMPTY_PAYLOAD_SHA256;
use crate::error::UploadError;
use crate::transport::{HttpTransport, RequestBody, TransportResponse};
use crate::upload::signer::CloudSigner;
use crate::upload::spool::PartSpool;
use crate::upload::stall::{watch_transfer, StallSettings, TransferProgress};
use crate::utils::hash::sha256_hex;
use crate::Result;

/// Multipart upload session calls against one cloud target.
#[derive(Clone)]
pub struct CloudStorage {
    signer: CloudSigner,
    transport: Arc<dyn HttpTransport>,
}

impl CloudStorage {
    pub fn new(signer: CloudSigner, transport: Arc<dyn HttpTransport>) -> Self {
        Self { signer, transport }
    }

    async fn send(
        &self,
        method: Method,
        query: &str,
        headers: HeaderMap,
        payload_hash: &str,
        body: RequestBody,
    ) -> Result<TransportResponse> {
        let request = self
            .signer
            .sign(method, query, headers, payload_hash)
            .await?
            .body(body);

        check_status(self.transport.send(request).await?)
    }

    /// Start a multipart upload and return its upload id.
    pub async fn initiate(&self, mime_type: &str) -> Result<String> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, mime_header(mime_type)?);
        headers.insert("x-amz-acl", HeaderValue::from_static("private"));

        let response = self
            .send(Method::POST, "uploads=", headers, EMPTY_PAYLOAD_SHA256, RequestBody::Empty)
            .await?;
        let xml = String::from_utf8_lossy(&response.body);
        let upload_id = extract_xml_tag(&xml, "UploadId")
            .ok_or_else(|| UploadError::Protocol("failed to read upload id".to_string()))?;

        debug!("Started multipart upload with ID: {} for {}", upload_id, self.signer.target().key);
        Ok(upload_id)
    }

    /// Upload one spooled part and return its completion tag.
    ///
    /// A success without an `ETag` header is reported as a retryable status
    /// error so the part is never recorded untagged.
    pub async fn upload_part(
        &self,
        upload_id: &str,
        part_number: u32,
        spool: &PartSpool,
        stall: StallSettings,
    ) -> Result<String> {
        let query = format!("partNumber={}&uploadId={}", part_number, upload_id);
        let payload_hash = spool.sha256_hex().await?;
        let progress = TransferProgress::new();
        let request = self
            .signer
            .sign(Method::PUT, &query, HeaderMap::new(), &payload_hash)
            .await?
            .body(spool.body(&progress).await?);

        let response = watch_transfer(stall, spool.len(), &progress, self.transport.send(request)).await?;
        let response = check_status(response)?;
        match response.header("etag") {
            Some(tag) if !tag.is_empty() => Ok(tag.to_string()),
            _ => Err(UploadError::Status {
                status: response.status,
                body: format!("part {} response carried no ETag", part_number),
            }),
        }
    }

    /// Assemble the uploaded parts, listed in ascending part order.
    pub async fn finalize(&self, upload_id: &str, parts: &[(u32, String)]) -> Result<()> {
        let xml = complete_multipart_xml(parts);
        let payload_hash = sha256_hex(xml.as_bytes());
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/xml"));

        let query = format!("uploadId={}", upload_id);
        self.send(
            Method::POST,
            &query,
            headers,
            &payload_hash,
            RequestBody::Bytes(Bytes::from(xml)),
        )
        .await?;
        debug!("Completed multipart upload {} ({} parts)", upload_id, parts.len());
        Ok(())
    }

    /// Discard a multipart upload and the parts stored so far.
    pub async fn abort(&self, upload_id: &str) -> Result<()> {
        let query = format!("uploadId={}", upload_id);
        self.send(Method::DELETE, &query, HeaderMap::new(), EMPTY_PAYLOAD_SHA256, RequestBody::Empty)
            .await?;
        debug!("Aborted multipart upload {}", upload_id);
        Ok(())
    }
}

fn check_status(response: TransportResponse) -> Result<TransportResponse> {
    if response.status >= 400 {
        return Err(UploadError::Status {
            status: response.status,
            body: String::from_utf8_lossy(&response.body).into_owned(),
        });
    }
    Ok(response)
}

fn mime_header(mime_type: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(mime_type)
        .map_err(|_| UploadError::InvalidRequest(format!("invalid content type {:?}", mime_type)))
}

/// Body of the multipart completion request.
pub fn complete_multipart_xml(parts: &[(u32, String)]) -> String {
    let mut xml = String::from("<CompleteMultipartUpload>");
    for (part_number, tag) in parts {
        xml.push_str(&format!(
            "<Part><PartNumber>{}</PartNumber><ETag>{}</ETag></Part>",
            part_number, tag
        ));
    }
    xml.push_str("</CompleteMultipartUpload>");
    xml
}

/// Text content of the first `<tag>` element in `xml`, if any.
pub fn extract_xml_tag(xml: &str, tag: &str) -> Option<String> {
    let pattern = format!(r"<{}[^>]*>([^<]*)</{}>", regex::escape(tag), regex::escape(tag));
    let re = Regex::new(&pattern).ok()?;
    let text = re.captures(xml)?.get(1)?.as_str().trim();
    if text.is_empty() {
        None
    } else {
        Some(text.to_string())
    }
}
