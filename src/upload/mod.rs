//! Upload engine.
//!
//! [`Uploader::upload`] asks the origin service where to put a payload,
//! picks a wire protocol from the returned descriptor and the payload length,
//! streams the payload and finally calls the completion endpoint.
//!
//! Three protocols are supported:
//! - a single PUT of the whole payload, for known lengths up to 5GB
//! - chunked PUT, fixed-size parts sent with a `Content-Range`
//! - cloud multipart, parts of growing size signed through the origin service

use std::fmt;
use std::io::SeekFrom;
use std::sync::Arc;

use log::{info, warn};
use reqwest::Method;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncSeek, AsyncSeekExt};
use tokio_util::sync::CancellationToken;

use crate::api::{ApiResponse, OriginApi};
use crate::config::UploadConfig;
use crate::error::UploadError;
use crate::transport::HttpTransport;
use crate::Result;

pub mod chunked;
pub mod cloud;
pub mod descriptor;
pub mod dispatch;
pub mod gate;
pub mod multipart;
pub mod notify;
pub mod retry;
pub mod signer;
pub mod single;
pub mod spool;
pub mod stall;
pub mod strategy;
pub mod tags;

pub use descriptor::{CloudTarget, UploadDescriptor};
pub use gate::ConcurrencyGate;
pub use strategy::UploadStrategy;

/// Called with the number of newly confirmed bytes after each part.
pub type ProgressFn = Arc<dyn Fn(u64) + Send + Sync>;

/// Caller-side hooks of one upload.
#[derive(Clone, Default)]
pub struct UploadOptions {
    pub progress: Option<ProgressFn>,
    /// Cancelling stops reads, requests and retry sleeps
    pub cancel: CancellationToken,
}

impl UploadOptions {
    pub fn with_progress(mut self, progress: ProgressFn) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub(crate) fn report(&self, bytes: u64) {
        if let Some(progress) = &self.progress {
            progress(bytes);
        }
    }
}

impl fmt::Debug for UploadOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadOptions")
            .field("progress", &self.progress.is_some())
            .field("cancel", &self.cancel.is_cancelled())
            .finish()
    }
}

/// Byte source accepted by the engine.
pub trait UploadSource: AsyncRead + Send + Sync + Unpin + 'static {}

impl<T: AsyncRead + Send + Sync + Unpin + 'static> UploadSource for T {}

/// Entry point of the upload engine.
#[derive(Clone)]
pub struct Uploader {
    api: Arc<dyn OriginApi>,
    transport: Arc<dyn HttpTransport>,
    config: UploadConfig,
}

impl Uploader {
    pub fn new(api: Arc<dyn OriginApi>, transport: Arc<dyn HttpTransport>, config: UploadConfig) -> Self {
        Self { api, transport, config }
    }

    /// Query `path` for a descriptor, then upload `source` as it says.
    ///
    /// `length` is `None` when the size of the source is unknown. Returns the
    /// response of the completion endpoint.
    #[allow(clippy::too_many_arguments)]
    pub async fn upload<R: UploadSource>(
        &self,
        path: &str,
        method: Method,
        params: Value,
        source: R,
        mime_type: &str,
        length: Option<u64>,
        options: &UploadOptions,
    ) -> Result<ApiResponse> {
        let descriptor = match self.api.request(path, method, params).await {
            Ok(response) => response,
            Err(e) => {
                warn!("Initial upload query to {} failed: {}", path, e);
                return Err(e);
            }
        };

        let session = self.prepare(&descriptor.data, length)?;
        session.run(source, mime_type, options).await
    }

    /// Like [`upload`](Self::upload), taking the length from a seekable
    /// source.
    ///
    /// The payload is everything from the current position to the end; the
    /// source is left at that position before the upload starts.
    pub async fn upload_seekable<R: UploadSource + AsyncSeek>(
        &self,
        path: &str,
        method: Method,
        params: Value,
        mut source: R,
        mime_type: &str,
        options: &UploadOptions,
    ) -> Result<ApiResponse> {
        let position = source.stream_position().await?;
        let end = source.seek(SeekFrom::End(0)).await?;
        source.seek(SeekFrom::Start(position)).await?;
        let length = end.saturating_sub(position);

        self.upload(path, method, params, source, mime_type, Some(length), options)
            .await
    }

    /// Parse a descriptor and pick the protocol for a payload of `length`.
    pub fn prepare(&self, descriptor: &Value, length: Option<u64>) -> Result<UploadSession> {
        let descriptor = UploadDescriptor::parse(descriptor)?;
        let strategy = UploadStrategy::select(&descriptor, length)?;

        Ok(UploadSession {
            descriptor,
            strategy,
            length,
            api: Arc::clone(&self.api),
            transport: Arc::clone(&self.transport),
            config: self.config.clone(),
        })
    }
}

/// One upload with its protocol already chosen.
pub struct UploadSession {
    descriptor: UploadDescriptor,
    strategy: UploadStrategy,
    length: Option<u64>,
    api: Arc<dyn OriginApi>,
    transport: Arc<dyn HttpTransport>,
    config: UploadConfig,
}

impl UploadSession {
    pub fn strategy(&self) -> UploadStrategy {
        self.strategy
    }

    pub fn descriptor(&self) -> &UploadDescriptor {
        &self.descriptor
    }

    /// Stream `source` with the selected protocol and call the completion
    /// endpoint.
    pub async fn run<R: UploadSource>(
        self,
        source: R,
        mime_type: &str,
        options: &UploadOptions,
    ) -> Result<ApiResponse> {
        info!("Uploading with {} to {}", self.strategy, self.descriptor.put_url);

        match self.strategy {
            UploadStrategy::SinglePut => {
                let length = self.length.ok_or_else(|| {
                    UploadError::Configuration("single PUT needs a known length".to_string())
                })?;
                single::upload(
                    self.transport.as_ref(),
                    &self.descriptor.put_url,
                    source,
                    length,
                    mime_type,
                    &self.config,
                    options,
                )
                .await?;
            }
            UploadStrategy::ChunkedPut { block_size } => {
                chunked::upload(
                    Arc::clone(&self.transport),
                    &self.descriptor.put_url,
                    block_size,
                    source,
                    mime_type,
                    &self.config,
                    options,
                )
                .await?;
            }
            UploadStrategy::CloudMultipart => {
                let target = self.descriptor.cloud.clone().ok_or_else(|| {
                    UploadError::Configuration("descriptor has no cloud target".to_string())
                })?;
                multipart::upload(
                    Arc::clone(&self.api),
                    Arc::clone(&self.transport),
                    target,
                    source,
                    mime_type,
                    &self.config,
                    options,
                )
                .await?;
            }
        }

        notify::complete(self.api.as_ref(), &self.descriptor.complete_url).await
    }
}
