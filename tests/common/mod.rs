//! In-memory stand-ins for the origin service and the storage backend.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::HeaderMap;
use reqwest::Method;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use tokio::io::{AsyncRead, ReadBuf};
use tokio::time::Sleep;

use restupload::api::{ApiResponse, OriginApi};
use restupload::config::UploadConfig;
use restupload::transport::{HttpTransport, OutgoingRequest, RequestBody, TransportResponse};
use restupload::upload::Uploader;
use restupload::{Result, UploadError};

pub const UPLOAD_PATH: &str = "Test/Upload:create";
pub const COMPLETE_PATH: &str = "Test/Upload/upl-1:handleComplete";
pub const PUT_URL: &str = "https://upload.test/put/abc";
pub const BUCKET_HOST: &str = "media.storage.test";
pub const OBJECT_URL: &str = "https://media.storage.test/media/incoming/object.bin";

pub fn sha256(data: &[u8]) -> String {
    format!("{:x}", Sha256::digest(data))
}

/// Deterministic payload of `len` bytes.
pub fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| ((i * 31 + i / 251) % 256) as u8).collect()
}

pub fn put_descriptor() -> Value {
    json!({"PUT": PUT_URL, "Complete": COMPLETE_PATH})
}

pub fn chunked_descriptor(block_size: u64) -> Value {
    json!({"PUT": PUT_URL, "Complete": COMPLETE_PATH, "Blocksize": block_size})
}

pub fn cloud_descriptor() -> Value {
    json!({
        "PUT": PUT_URL,
        "Complete": COMPLETE_PATH,
        "Cloud_Aws_Bucket_Upload__": "upl-1",
        "Key": "incoming/object.bin",
        "Bucket_Endpoint": {"Region": "us-east-1", "Name": "media", "Host": BUCKET_HOST}
    })
}

/// Small, fast settings for tests.
pub fn test_config() -> UploadConfig {
    UploadConfig {
        parallel_uploads: 3,
        max_part_size: 256 * 1024,
        multipart_step: 64 * 1024,
        min_part_size: 1,
        stall_timeout_ms: 5_000,
        stall_threshold: 1024,
        max_attempts: 5,
        retry_base_delay_ms: 1,
        retry_max_delay_ms: 20,
        copy_buffer_size: 8 * 1024,
    }
}

pub fn uploader(origin: &Arc<FakeOrigin>, storage: &Arc<FakeStorage>, config: UploadConfig) -> Uploader {
    Uploader::new(origin.clone(), storage.clone(), config)
}

#[derive(Debug, Clone)]
pub struct ApiCall {
    pub path: String,
    pub method: Method,
    pub params: Value,
}

/// Origin service answering the upload query, signing requests and
/// acknowledging completion.
pub struct FakeOrigin {
    descriptor: Value,
    calls: Mutex<Vec<ApiCall>>,
}

impl FakeOrigin {
    pub fn new(descriptor: Value) -> Arc<Self> {
        Arc::new(Self {
            descriptor,
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> Vec<ApiCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn completions(&self) -> usize {
        self.calls().iter().filter(|call| call.path == COMPLETE_PATH).count()
    }

    /// Canonical strings sent for signing, in order.
    pub fn signed_strings(&self) -> Vec<String> {
        self.calls()
            .iter()
            .filter(|call| call.path.ends_with(":signV4"))
            .filter_map(|call| call.params["headers"].as_str().map(str::to_string))
            .collect()
    }
}

pub fn signature_for(canonical: &str) -> String {
    format!("AWS4-HMAC-SHA256 Signature={}", sha256(canonical.as_bytes()))
}

#[async_trait]
impl OriginApi for FakeOrigin {
    async fn request(&self, path: &str, method: Method, params: Value) -> Result<ApiResponse> {
        self.calls.lock().unwrap().push(ApiCall {
            path: path.to_string(),
            method,
            params: params.clone(),
        });

        if path == "Cloud/Aws/Bucket/Upload/upl-1:signV4" {
            let canonical = params["headers"].as_str().unwrap_or_default();
            return Ok(ApiResponse::success(json!({"authorization": signature_for(canonical)})));
        }
        if path == COMPLETE_PATH {
            return Ok(ApiResponse::success(json!({"Blob__": "blb-1", "status": "complete"})));
        }
        if path == UPLOAD_PATH {
            return Ok(ApiResponse::success(self.descriptor.clone()));
        }
        Err(UploadError::Api {
            message: format!("unknown endpoint {}", path),
            code: Some(404),
        })
    }
}

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
    pub body_was_empty_variant: bool,
    pub body: Bytes,
}

impl RecordedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn query(&self) -> &str {
        self.url.split_once('?').map(|(_, q)| q).unwrap_or("")
    }
}

#[derive(Default)]
struct StorageState {
    requests: Vec<RecordedRequest>,
    single: Option<Bytes>,
    ranges: Vec<(u64, Bytes)>,
    parts: BTreeMap<u32, Bytes>,
    completion_order: Vec<u32>,
    finalize_body: Option<String>,
    aborts: usize,
    attempts: HashMap<u32, u32>,
}

/// Storage backend for all three protocols.
///
/// Parts are identified by their number: the `partNumber` query for cloud
/// parts, the `Content-Range` start divided by the block size for chunked
/// ones.
#[derive(Default)]
pub struct FakeStorage {
    state: Mutex<StorageState>,
    block_size: u64,
    delays: HashMap<u32, Duration>,
    default_delay: Duration,
    failures: Mutex<HashMap<u32, u32>>,
    stalls: Mutex<HashMap<u32, u32>>,
    stalled: Mutex<HashMap<u32, u32>>,
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl FakeStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_block_size(mut self, block_size: u64) -> Self {
        self.block_size = block_size;
        self
    }

    pub fn with_delay(mut self, part: u32, delay: Duration) -> Self {
        self.delays.insert(part, delay);
        self
    }

    pub fn with_default_delay(mut self, delay: Duration) -> Self {
        self.default_delay = delay;
        self
    }

    /// Answer the first `count` attempts of `part` with a 500.
    pub fn failing(self, part: u32, count: u32) -> Self {
        self.failures.lock().unwrap().insert(part, count);
        self
    }

    /// Never read the body of the first `count` attempts of `part`.
    pub fn stalling(self, part: u32, count: u32) -> Self {
        self.stalls.lock().unwrap().insert(part, count);
        self
    }

    pub fn build(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state.lock().unwrap().requests.clone()
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn aborts(&self) -> usize {
        self.state.lock().unwrap().aborts
    }

    pub fn attempts(&self, part: u32) -> u32 {
        self.state.lock().unwrap().attempts.get(&part).copied().unwrap_or(0)
    }

    /// Attempts of `part` whose body was never read.
    pub fn stalled_attempts(&self, part: u32) -> u32 {
        self.stalled.lock().unwrap().get(&part).copied().unwrap_or(0)
    }

    pub fn completion_order(&self) -> Vec<u32> {
        self.state.lock().unwrap().completion_order.clone()
    }

    pub fn finalize_body(&self) -> Option<String> {
        self.state.lock().unwrap().finalize_body.clone()
    }

    pub fn single_body(&self) -> Option<Bytes> {
        self.state.lock().unwrap().single.clone()
    }

    pub fn content_ranges(&self) -> Vec<String> {
        self.requests()
            .iter()
            .filter_map(|r| r.header("content-range").map(str::to_string))
            .collect()
    }

    /// Chunked payload reassembled by range start.
    pub fn assembled_ranges(&self) -> Vec<u8> {
        let mut ranges = self.state.lock().unwrap().ranges.clone();
        ranges.sort_by_key(|(start, _)| *start);
        ranges.iter().flat_map(|(_, data)| data.iter().copied()).collect()
    }

    /// Cloud payload reassembled by part number.
    pub fn assembled_parts(&self) -> Vec<u8> {
        let parts = self.state.lock().unwrap().parts.clone();
        parts.values().flat_map(|data| data.iter().copied()).collect()
    }

    fn part_of(&self, request: &OutgoingRequest) -> u32 {
        if let Some(part) = request
            .url
            .split_once('?')
            .and_then(|(_, query)| query.strip_prefix("partNumber="))
            .and_then(|rest| rest.split('&').next())
            .and_then(|n| n.parse().ok())
        {
            return part;
        }
        let part: u64 = match (request.header_value("content-range"), self.block_size) {
            (Some(range), block) if block > 0 => range_start(range) / block + 1,
            _ => 1,
        };
        part.try_into().unwrap_or(1)
    }

    async fn handle(&self, request: OutgoingRequest) -> Result<TransportResponse> {
        let part = self.part_of(&request);
        let is_part = request.method == Method::PUT;

        if is_part && self.take_stall(part) {
            *self.stalled.lock().unwrap().entry(part).or_default() += 1;
            std::future::pending::<()>().await;
        }

        if is_part {
            let delay = self.delays.get(&part).copied().unwrap_or(self.default_delay);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        }

        let OutgoingRequest { method, url, headers, body } = request;
        let body_was_empty_variant = matches!(body, RequestBody::Empty);
        let body = body.into_bytes().await?;

        let mut state = self.state.lock().unwrap();
        state.requests.push(RecordedRequest {
            method: method.clone(),
            url: url.clone(),
            headers: headers.clone(),
            body_was_empty_variant,
            body: body.clone(),
        });

        if is_part {
            *state.attempts.entry(part).or_default() += 1;
            let mut failures = self.failures.lock().unwrap();
            if let Some(remaining) = failures.get_mut(&part) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Ok(response(500, HeaderMap::new(), "injected failure"));
                }
            }
        }

        if url == PUT_URL {
            match headers.get("content-range").and_then(|v| v.to_str().ok()) {
                Some(range) => state.ranges.push((range_start(range), body)),
                None => state.single = Some(body),
            }
            state.completion_order.push(part);
            return Ok(response(200, HeaderMap::new(), ""));
        }

        if !url.starts_with(OBJECT_URL) || headers.get("authorization").is_none() {
            return Ok(response(403, HeaderMap::new(), "<Error>AccessDenied</Error>"));
        }
        let query = url.split_once('?').map(|(_, q)| q.to_string()).unwrap_or_default();

        if method == Method::POST && query == "uploads=" {
            let xml = "<InitiateMultipartUploadResult><Bucket>media</Bucket>\
                       <Key>incoming/object.bin</Key><UploadId>mpu-77</UploadId>\
                       </InitiateMultipartUploadResult>";
            return Ok(response(200, HeaderMap::new(), xml));
        }
        if method == Method::PUT {
            state.parts.insert(part, body);
            state.completion_order.push(part);
            let mut headers = HeaderMap::new();
            headers.insert("etag", format!("\"etag-{}\"", part).parse().unwrap());
            return Ok(response(200, headers, ""));
        }
        if method == Method::POST {
            state.finalize_body = Some(String::from_utf8_lossy(&body).into_owned());
            return Ok(response(200, HeaderMap::new(), "<CompleteMultipartUploadResult/>"));
        }
        if method == Method::DELETE {
            state.aborts += 1;
            return Ok(response(204, HeaderMap::new(), ""));
        }
        Ok(response(400, HeaderMap::new(), "unexpected request"))
    }
}

impl FakeStorage {
    fn take_stall(&self, part: u32) -> bool {
        let mut stalls = self.stalls.lock().unwrap();
        match stalls.get_mut(&part) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                true
            }
            _ => false,
        }
    }
}

fn range_start(range: &str) -> u64 {
    range
        .trim_start_matches("bytes ")
        .split('-')
        .next()
        .and_then(|start| start.parse().ok())
        .unwrap_or(0)
}

fn response(status: u16, headers: HeaderMap, body: &str) -> TransportResponse {
    TransportResponse {
        status,
        headers,
        body: Bytes::from(body.to_string()),
    }
}

#[async_trait]
impl HttpTransport for FakeStorage {
    async fn send(&self, request: OutgoingRequest) -> Result<TransportResponse> {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        let _active = ActiveGuard(&self.active);
        self.handle(request).await
    }
}

/// Leaves the active count when a request finishes or is dropped.
struct ActiveGuard<'a>(&'a AtomicUsize);

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Non-seekable source handing out at most `chunk` bytes per read and
/// pausing once, after `pause_at` bytes.
pub struct PausingReader {
    data: Vec<u8>,
    pos: usize,
    chunk: usize,
    pause_at: usize,
    pause: Duration,
    sleep: Option<Pin<Box<Sleep>>>,
    paused: bool,
}

impl PausingReader {
    pub fn new(data: Vec<u8>, chunk: usize) -> Self {
        Self {
            data,
            pos: 0,
            chunk: chunk.max(1),
            pause_at: usize::MAX,
            pause: Duration::ZERO,
            sleep: None,
            paused: false,
        }
    }

    pub fn pause_after(mut self, pause_at: usize, pause: Duration) -> Self {
        self.pause_at = pause_at;
        self.pause = pause;
        self
    }
}

impl AsyncRead for PausingReader {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();

        if !this.paused && this.pos >= this.pause_at {
            let pause = this.pause;
            let sleep = this.sleep.get_or_insert_with(|| Box::pin(tokio::time::sleep(pause)));
            if sleep.as_mut().poll(cx).is_pending() {
                return Poll::Pending;
            }
            this.paused = true;
            this.sleep = None;
        }

        let limit = if this.paused { this.data.len() } else { this.pause_at.min(this.data.len()) };
        let n = (limit - this.pos).min(this.chunk).min(buf.remaining());
        buf.put_slice(&this.data[this.pos..this.pos + n]);
        this.pos += n;
        Poll::Ready(Ok(()))
    }
}
