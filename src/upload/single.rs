//! Single PUT of the whole payload.

use log::debug;
use reqwest::Method;
use tokio::io::AsyncReadExt;

use crate::config::UploadConfig;
use crate::error::UploadError;
use crate::transport::{HttpTransport, OutgoingRequest, RequestBody};
use crate::upload::stall::{watch_transfer, CountingReader, TransferProgress};
use crate::upload::{UploadOptions, UploadSource};
use crate::Result;

/// PUT `length` bytes of `source` to `put_url` in one request.
///
/// The source is streamed as is and cannot be replayed, so there is no retry.
/// A source or connection that moves too little data within the stall window
/// fails the upload with [`UploadError::Stalled`].
pub async fn upload<R: UploadSource>(
    transport: &dyn HttpTransport,
    put_url: &str,
    source: R,
    length: u64,
    mime_type: &str,
    config: &UploadConfig,
    options: &UploadOptions,
) -> Result<()> {
    let progress = TransferProgress::new();
    let body = if length == 0 {
        RequestBody::Empty
    } else {
        RequestBody::Reader {
            reader: Box::new(CountingReader::new(source.take(length), progress.clone())),
            len: length,
        }
    };

    let request = OutgoingRequest::new(Method::PUT, put_url)
        .header("content-type", mime_type)?
        .body(body);

    debug!("Uploading {} bytes with a single PUT", length);
    let response = tokio::select! {
        biased;
        _ = options.cancel.cancelled() => return Err(UploadError::Cancelled),
        response = watch_transfer(config.stall_settings(), length, &progress, transport.send(request)) => response?,
    };
    response.error_for_status()?;

    options.report(length);
    Ok(())
}
