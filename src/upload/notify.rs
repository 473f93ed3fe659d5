//! Completion callback to the origin service.

use log::debug;
use reqwest::Method;
use serde_json::json;

use crate::api::{ApiResponse, OriginApi};
use crate::Result;

/// Tell the origin service the payload is stored.
///
/// The envelope it returns is the result of the whole upload.
pub async fn complete(api: &dyn OriginApi, complete_url: &str) -> Result<ApiResponse> {
    debug!("Calling upload completion endpoint {}", complete_url);
    api.request(complete_url, Method::POST, json!({})).await
}
