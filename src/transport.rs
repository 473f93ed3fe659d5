//! Raw HTTP transport used for data-carrying requests.
//!
//! Part uploads, single-shot PUTs and cloud storage calls all go through
//! [`HttpTransport`]. Unlike the origin API these requests carry large
//! streaming bodies and their responses are plain HTTP, not JSON envelopes.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_LENGTH};
use reqwest::Method;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_util::io::ReaderStream;

use crate::constants::{DEFAULT_CONNECT_TIMEOUT_SECS, SPOOL_COPY_BUFFER_SIZE};
use crate::error::UploadError;
use crate::Result;

/// Body of an outgoing request.
pub enum RequestBody {
    /// Explicit zero-length body
    Empty,
    Bytes(Bytes),
    /// Streaming body of a known length
    Reader {
        reader: Box<dyn AsyncRead + Send + Sync + Unpin>,
        len: u64,
    },
}

impl RequestBody {
    pub fn len(&self) -> u64 {
        match self {
            RequestBody::Empty => 0,
            RequestBody::Bytes(bytes) => bytes.len() as u64,
            RequestBody::Reader { len, .. } => *len,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Read the whole body into memory.
    pub async fn into_bytes(self) -> Result<Bytes> {
        match self {
            RequestBody::Empty => Ok(Bytes::new()),
            RequestBody::Bytes(bytes) => Ok(bytes),
            RequestBody::Reader { mut reader, len } => {
                let mut buf = Vec::with_capacity(len.min(64 * 1024 * 1024) as usize);
                reader
                    .read_to_end(&mut buf)
                    .await
                    .map_err(UploadError::from_io)?;
                Ok(Bytes::from(buf))
            }
        }
    }
}

impl std::fmt::Debug for RequestBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RequestBody::Empty => write!(f, "Empty"),
            RequestBody::Bytes(bytes) => write!(f, "Bytes({})", bytes.len()),
            RequestBody::Reader { len, .. } => write!(f, "Reader({})", len),
        }
    }
}

#[derive(Debug)]
pub struct OutgoingRequest {
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
    pub body: RequestBody,
}

impl OutgoingRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: HeaderMap::new(),
            body: RequestBody::Empty,
        }
    }

    pub fn header(mut self, name: &str, value: &str) -> Result<Self> {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| UploadError::InvalidRequest(format!("header name {}: {}", name, e)))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| UploadError::InvalidRequest(format!("header {}: {}", name, e)))?;
        self.headers.insert(name, value);
        Ok(self)
    }

    pub fn body(mut self, body: RequestBody) -> Self {
        self.body = body;
        self
    }

    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

/// Fully read response of a transport call.
#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl TransportResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Map any non-2xx status to [`UploadError::Status`].
    pub fn error_for_status(self) -> Result<Self> {
        if (200..300).contains(&self.status) {
            Ok(self)
        } else {
            Err(UploadError::Status {
                status: self.status,
                body: String::from_utf8_lossy(&self.body).into_owned(),
            })
        }
    }
}

#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Send the request and read its response to the end.
    async fn send(&self, request: OutgoingRequest) -> Result<TransportResponse>;
}

/// [`HttpTransport`] backed by a pooled `reqwest::Client`.
///
/// There is no overall request timeout: a part may legitimately take a long
/// time. Transfers are bounded by the stall watcher in
/// [`watch_transfer`](crate::upload::stall::watch_transfer) instead, and
/// connection setup by a connect timeout.
#[derive(Clone)]
pub struct ReqwestTransport {
    http: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new() -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS))
            .build()?;
        Ok(Self { http })
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: OutgoingRequest) -> Result<TransportResponse> {
        let OutgoingRequest { method, url, headers, body } = request;
        let builder = self.http.request(method, &url).headers(headers);

        // zero-length streaming bodies are sent as an explicit empty body
        let builder = match body {
            RequestBody::Empty => builder.header(CONTENT_LENGTH, 0).body(Vec::<u8>::new()),
            RequestBody::Bytes(bytes) => builder.header(CONTENT_LENGTH, bytes.len()).body(bytes),
            RequestBody::Reader { len: 0, .. } => {
                builder.header(CONTENT_LENGTH, 0).body(Vec::<u8>::new())
            }
            RequestBody::Reader { reader, len } => builder
                .header(CONTENT_LENGTH, len)
                .body(reqwest::Body::wrap_stream(ReaderStream::with_capacity(
                    reader,
                    SPOOL_COPY_BUFFER_SIZE,
                ))),
        };

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let headers = response.headers().clone();
        // read full response so the upload is known to be complete
        let body = response.bytes().await?;

        Ok(TransportResponse { status, headers, body })
    }
}
