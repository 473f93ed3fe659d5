//! Upload descriptor returned by the origin service's upload query.

use serde_json::{Map, Value};

use crate::error::UploadError;
use crate::Result;

/// Where a multipart upload lands in cloud storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloudTarget {
    /// Origin-side reference of the upload, used for delegated signing
    pub upload_ref: String,
    pub key: String,
    pub region: String,
    pub bucket: String,
    pub host: String,
}

/// How and where one payload should be uploaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadDescriptor {
    pub put_url: String,
    pub complete_url: String,
    pub block_size: Option<u64>,
    pub cloud: Option<CloudTarget>,
}

impl UploadDescriptor {
    /// Parse the descriptor object.
    ///
    /// Only `PUT` and `Complete` are required. `Blocksize` and the cloud
    /// group are optional and read independently of each other; a group that
    /// is incomplete or has the wrong types is ignored.
    pub fn parse(value: &Value) -> Result<Self> {
        let fields = value
            .as_object()
            .ok_or_else(|| UploadError::Descriptor("expected a JSON object".to_string()))?;

        let put_url = required_str(fields, "PUT")?;
        let complete_url = required_str(fields, "Complete")?;

        let block_size = fields
            .get("Blocksize")
            .and_then(Value::as_f64)
            .filter(|size| *size >= 1.0)
            .map(|size| size as u64);

        Ok(Self {
            put_url,
            complete_url,
            block_size,
            cloud: parse_cloud_target(fields),
        })
    }
}

fn required_str(fields: &Map<String, Value>, name: &str) -> Result<String> {
    fields
        .get(name)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| UploadError::Descriptor(format!("required parameter {} not found", name)))
}

fn parse_cloud_target(fields: &Map<String, Value>) -> Option<CloudTarget> {
    let text = |value: Option<&Value>| value.and_then(Value::as_str).map(str::to_string);
    let endpoint = fields.get("Bucket_Endpoint")?.as_object()?;

    Some(CloudTarget {
        upload_ref: text(fields.get("Cloud_Aws_Bucket_Upload__"))?,
        key: text(fields.get("Key"))?,
        region: text(endpoint.get("Region"))?,
        bucket: text(endpoint.get("Name"))?,
        host: text(endpoint.get("Host"))?,
    })
}
