use std::time::Instant;

use async_trait::async_trait;
use log::debug;
use reqwest::Method;
use serde_json::Value;

use crate::api::{ApiResponse, OriginApi};
use crate::config::ApiConfig;
use crate::constants::REST_PATH_PREFIX;
use crate::error::UploadError;
use crate::Result;

/// HTTP client for the origin service's JSON envelope API.
///
/// The underlying `reqwest::Client` pools connections and is shared by every
/// concurrent call, including signature requests issued by parallel parts.
pub struct RestClient {
    http: reqwest::Client,
    config: ApiConfig,
}

impl RestClient {
    pub fn new(config: ApiConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(UploadError::from)?;
        Ok(Self { http, config })
    }

    /// Full URL of a REST endpoint.
    pub fn endpoint(&self, path: &str) -> String {
        format!(
            "{}://{}{}{}",
            self.config.scheme,
            self.config.host,
            REST_PATH_PREFIX,
            path.trim_start_matches('/')
        )
    }

    fn build(&self, path: &str, method: &Method, params: &Value) -> Result<reqwest::RequestBuilder> {
        let url = self.endpoint(path);
        let builder = match method.as_str() {
            "GET" | "HEAD" | "OPTIONS" => self
                .http
                .request(method.clone(), url)
                .query(&[("_", params.to_string())]),
            "PUT" | "POST" | "PATCH" => self.http.request(method.clone(), url).json(params),
            "DELETE" => self.http.request(method.clone(), url),
            other => {
                return Err(UploadError::InvalidRequest(format!(
                    "invalid request method {}",
                    other
                )))
            }
        };

        let builder = builder.header("Sec-Rest-Http", "false");
        Ok(match &self.config.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        })
    }
}

#[async_trait]
impl OriginApi for RestClient {
    async fn request(&self, path: &str, method: Method, params: Value) -> Result<ApiResponse> {
        let request = self.build(path, &method, &params)?;
        let started = Instant::now();

        let response = request.send().await?;
        let status = response.status();
        let body = response.bytes().await?;

        let envelope: ApiResponse = match serde_json::from_slice(&body) {
            Ok(envelope) => envelope,
            Err(_) if status.as_u16() >= 400 => {
                return Err(UploadError::Http {
                    status: status.as_u16(),
                    body: String::from_utf8_lossy(&body).into_owned(),
                });
            }
            Err(e) => return Err(UploadError::Json(e)),
        };

        debug!("[rest] {} {} => {:?}", method, path, started.elapsed());
        envelope.into_result()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> RestClient {
        RestClient::new(ApiConfig {
            scheme: "http".to_string(),
            host: "localhost:8080".to_string(),
            token: Some("tok".to_string()),
            timeout_secs: 5,
        })
        .unwrap()
    }

    #[test]
    fn test_endpoint_formatting() {
        let client = client();
        assert_eq!(
            client.endpoint("Misc/Debug:testUpload"),
            "http://localhost:8080/_special/rest/Misc/Debug:testUpload"
        );
        assert_eq!(
            client.endpoint("/Cloud/Aws/Bucket/Upload/abc:signV4"),
            "http://localhost:8080/_special/rest/Cloud/Aws/Bucket/Upload/abc:signV4"
        );
    }

    #[test]
    fn test_get_params_go_to_query() {
        let client = client();
        let request = client
            .build("Thing:get", &Method::GET, &serde_json::json!({"a": 1}))
            .unwrap()
            .build()
            .unwrap();
        let query = request.url().query().unwrap();
        assert!(query.starts_with("_="));
        assert_eq!(request.headers()["Sec-Rest-Http"], "false");
        assert_eq!(request.headers()["Authorization"], "Bearer tok");
    }

    #[test]
    fn test_post_params_go_to_body() {
        let client = client();
        let request = client
            .build("Thing:upload", &Method::POST, &serde_json::json!({"filename": "a.bin"}))
            .unwrap()
            .build()
            .unwrap();
        assert!(request.url().query().is_none());
        assert_eq!(request.headers()["Content-Type"], "application/json");
        let body = request.body().and_then(|b| b.as_bytes()).unwrap();
        assert_eq!(body, br#"{"filename":"a.bin"}"#);
    }

    #[test]
    fn test_unsupported_method_rejected() {
        let client = client();
        let result = client.build("x", &Method::TRACE, &Value::Null);
        assert!(matches!(result, Err(UploadError::InvalidRequest(_))));
    }
}
