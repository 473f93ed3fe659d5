//! Boundary to the origin REST service.
//!
//! The upload engine talks to the origin service for four things: the initial
//! upload query that yields the descriptor, delegated request signatures for
//! cloud storage, the completion callback, and nothing else. All of them go
//! through [`OriginApi`] so the engine can run against any envelope
//! implementation; [`RestClient`] is the HTTP one.

use async_trait::async_trait;
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;

use crate::error::UploadError;
use crate::Result;

pub mod client;

pub use client::RestClient;

/// A call into the origin service's JSON envelope API.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OriginApi: Send + Sync {
    /// Run `method` against endpoint `path` with `params` and return the
    /// successful envelope. Error and redirect envelopes become errors.
    async fn request(&self, path: &str, method: Method, params: Value) -> Result<ApiResponse>;
}

/// Call an endpoint and deserialize its `data` into `T`.
pub async fn apply<T: DeserializeOwned>(
    api: &dyn OriginApi,
    path: &str,
    method: Method,
    params: Value,
) -> Result<T> {
    let response = api.request(path, method, params).await?;
    response.apply()
}

/// Response envelope returned by every REST endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApiResponse {
    /// "success", "error" or "redirect"
    pub result: String,
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub code: Option<u16>,
    #[serde(default)]
    pub extra: Option<String>,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub exception: Option<String>,
    #[serde(default)]
    pub redirect_url: Option<String>,
    #[serde(default)]
    pub redirect_code: Option<u16>,
}

impl ApiResponse {
    pub fn success(data: Value) -> Self {
        Self {
            result: "success".to_string(),
            data,
            ..Default::default()
        }
    }

    /// Look up a slash-separated path inside `data`.
    pub fn get(&self, path: &str) -> Option<&Value> {
        path.split('/')
            .filter(|segment| !segment.is_empty())
            .try_fold(&self.data, |current, segment| current.as_object()?.get(segment))
    }

    pub fn get_string(&self, path: &str) -> Option<&str> {
        self.get(path).and_then(Value::as_str)
    }

    pub fn apply<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(self.data.clone())?)
    }

    /// Turn error and redirect envelopes into errors.
    pub fn into_result(self) -> Result<Self> {
        match self.result.as_str() {
            "error" => {
                if self.token.as_deref() == Some("invalid_request_token")
                    && self.extra.as_deref() == Some("token_expired")
                {
                    return Err(UploadError::Api {
                        message: "access token expired".to_string(),
                        code: self.code,
                    });
                }
                Err(UploadError::Api {
                    message: self.error.unwrap_or_else(|| "unknown error".to_string()),
                    code: self.code,
                })
            }
            "redirect" => {
                if self.exception.as_deref() == Some("Exception\\Login") {
                    return Err(UploadError::LoginRequired);
                }
                Err(UploadError::Redirect {
                    url: self.redirect_url.unwrap_or_default(),
                    code: self.redirect_code.unwrap_or(302),
                })
            }
            _ => Ok(self),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(body: Value) -> ApiResponse {
        serde_json::from_value(body).unwrap()
    }

    #[test]
    fn test_get_nested_path() {
        let response = ApiResponse::success(json!({
            "Blob__": "blob-123",
            "Info": {"SHA256": "abc", "Size": 12}
        }));
        assert_eq!(response.get_string("Blob__"), Some("blob-123"));
        assert_eq!(response.get_string("/Info/SHA256"), Some("abc"));
        assert_eq!(response.get("Info/Size"), Some(&json!(12)));
        assert!(response.get("Info/Missing").is_none());
        assert!(response.get_string("Info/Size").is_none());
        assert!(response.get("Blob__/deeper").is_none());
    }

    #[test]
    fn test_success_envelope_passes() {
        let response = parse(json!({"result": "success", "data": {"PUT": "https://x"}}));
        let response = response.into_result().unwrap();
        assert_eq!(response.get_string("PUT"), Some("https://x"));
    }

    #[test]
    fn test_error_envelope() {
        let response = parse(json!({"result": "error", "error": "not allowed", "code": 403}));
        match response.into_result() {
            Err(UploadError::Api { message, code }) => {
                assert_eq!(message, "not allowed");
                assert_eq!(code, Some(403));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_expired_token_envelope() {
        let response = parse(json!({
            "result": "error",
            "token": "invalid_request_token",
            "extra": "token_expired"
        }));
        let err = response.into_result().unwrap_err();
        assert!(err.to_string().contains("expired"));
    }

    #[test]
    fn test_redirect_envelopes() {
        let login = parse(json!({"result": "redirect", "exception": "Exception\\Login"}));
        assert!(matches!(login.into_result(), Err(UploadError::LoginRequired)));

        let moved = parse(json!({
            "result": "redirect",
            "redirect_url": "https://elsewhere/",
            "redirect_code": 307
        }));
        match moved.into_result() {
            Err(UploadError::Redirect { url, code }) => {
                assert_eq!(url, "https://elsewhere/");
                assert_eq!(code, 307);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_apply_deserializes_data() {
        #[derive(Deserialize)]
        struct Auth {
            authorization: String,
        }
        let response = ApiResponse::success(json!({"authorization": "AWS4 sig"}));
        let auth: Auth = response.apply().unwrap();
        assert_eq!(auth.authorization, "AWS4 sig");
    }
}
