//! Chunked PUT: fixed-size parts, each sent with a `Content-Range`.
//!
//! Part `n` covers bytes `(n-1)*block_size` onwards. The read loop stops at
//! the first short part. An empty part is only sent when it is the first one,
//! so an empty payload still produces exactly one request.

use std::sync::Arc;

use log::debug;
use reqwest::Method;
use tokio_util::sync::CancellationToken;

use crate::config::UploadConfig;
use crate::error::UploadError;
use crate::transport::{HttpTransport, OutgoingRequest};
use crate::upload::dispatch::PartDispatcher;
use crate::upload::gate::ConcurrencyGate;
use crate::upload::spool::PartSpool;
use crate::upload::stall::{watch_transfer, StallDetectReader, TransferProgress};
use crate::upload::{UploadOptions, UploadSource};
use crate::Result;

/// `Content-Range` of a part of `len` bytes starting at `start`.
///
/// The end is inclusive, so an empty first part reads `bytes 0--1/*`.
pub fn content_range(start: u64, len: u64) -> String {
    let end = start as i128 + len as i128 - 1;
    format!("bytes {}-{}/*", start, end)
}

pub async fn upload<R: UploadSource>(
    transport: Arc<dyn HttpTransport>,
    put_url: &str,
    block_size: u64,
    source: R,
    mime_type: &str,
    config: &UploadConfig,
    options: &UploadOptions,
) -> Result<()> {
    let cancel = options.cancel.child_token();
    let gate = ConcurrencyGate::new(config.parallel_uploads);
    let mut dispatcher = PartDispatcher::new(gate, cancel.clone());
    let mut source = StallDetectReader::new(source, config.stall_settings());

    let mut part_number = 0u32;
    let read_loop = async {
        loop {
            let permit = dispatcher.reserve().await?;
            part_number += 1;

            let spool = PartSpool::fill_from(&mut source, part_number, block_size, config, &cancel).await?;
            let len = spool.len();
            if len == 0 && part_number > 1 {
                break;
            }

            let part = ChunkPart {
                transport: Arc::clone(&transport),
                put_url: put_url.to_string(),
                mime_type: mime_type.to_string(),
                part_number,
                start: (part_number as u64 - 1) * block_size,
                spool,
                config: config.clone(),
                options: options.clone(),
            };
            dispatcher.dispatch(permit, part_number, part.send(cancel.clone()));

            if len < block_size {
                break;
            }
        }
        Ok::<(), UploadError>(())
    }
    .await;

    if let Err(e) = read_loop {
        dispatcher.shutdown().await;
        return Err(e);
    }
    let parts = dispatcher.dispatched();
    dispatcher.finish().await?;
    debug!("Chunked upload finished in {} parts", parts);
    Ok(())
}

struct ChunkPart {
    transport: Arc<dyn HttpTransport>,
    put_url: String,
    mime_type: String,
    part_number: u32,
    start: u64,
    spool: PartSpool,
    config: UploadConfig,
    options: UploadOptions,
}

impl ChunkPart {
    async fn send(self, cancel: CancellationToken) -> Result<()> {
        let len = self.spool.len();
        let range = content_range(self.start, len);
        let stall = self.config.stall_settings();
        let part = &self;
        let range = range.as_str();

        self.config
            .retry_policy()
            .run("upload", self.part_number, &cancel, move |_| async move {
                let progress = TransferProgress::new();
                let request = OutgoingRequest::new(Method::PUT, part.put_url.as_str())
                    .header("content-type", &part.mime_type)?
                    .header("content-range", range)?
                    .body(part.spool.body(&progress).await?);
                watch_transfer(stall, len, &progress, part.transport.send(request))
                    .await?
                    .error_for_status()
            })
            .await?;

        debug!("Uploaded part {} ({})", self.part_number, range);
        self.options.report(len);
        Ok(())
    }
}
