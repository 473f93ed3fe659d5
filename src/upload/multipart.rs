//! Cloud storage multipart upload.
//!
//! Initiate, upload parts of growing size, then finalize with the part tags
//! in ascending order. Once a multipart upload exists, any failure aborts it
//! before the error is returned.

use std::sync::Arc;

use log::{debug, info, warn};
use tokio_util::sync::CancellationToken;

use crate::api::OriginApi;
use crate::config::UploadConfig;
use crate::error::UploadError;
use crate::transport::HttpTransport;
use crate::upload::cloud::CloudStorage;
use crate::upload::descriptor::CloudTarget;
use crate::upload::dispatch::PartDispatcher;
use crate::upload::gate::ConcurrencyGate;
use crate::upload::signer::CloudSigner;
use crate::upload::spool::PartSpool;
use crate::upload::stall::StallDetectReader;
use crate::upload::tags::PartTagTable;
use crate::upload::{UploadOptions, UploadSource};
use crate::Result;

pub async fn upload<R: UploadSource>(
    api: Arc<dyn OriginApi>,
    transport: Arc<dyn HttpTransport>,
    target: CloudTarget,
    source: R,
    mime_type: &str,
    config: &UploadConfig,
    options: &UploadOptions,
) -> Result<()> {
    let storage = CloudStorage::new(CloudSigner::new(api, target), transport);

    let upload_id = tokio::select! {
        biased;
        _ = options.cancel.cancelled() => return Err(UploadError::Cancelled),
        upload_id = storage.initiate(mime_type) => upload_id?,
    };

    match upload_parts(&storage, &upload_id, source, config, options).await {
        Ok(parts) => {
            info!("Multipart upload {} finalized with {} parts", upload_id, parts);
            Ok(())
        }
        Err(e) => {
            warn!("Multipart upload {} failed, aborting: {}", upload_id, e);
            if let Err(abort_err) = storage.abort(&upload_id).await {
                warn!("Failed to abort multipart upload {}: {}", upload_id, abort_err);
            }
            Err(e)
        }
    }
}

/// Upload every part and finalize; returns the number of parts.
async fn upload_parts<R: UploadSource>(
    storage: &CloudStorage,
    upload_id: &str,
    source: R,
    config: &UploadConfig,
    options: &UploadOptions,
) -> Result<u32> {
    let cancel = options.cancel.child_token();
    let gate = ConcurrencyGate::new(config.parallel_uploads);
    let mut dispatcher = PartDispatcher::new(gate, cancel.clone());
    let mut source = StallDetectReader::new(source, config.stall_settings());
    let tags = Arc::new(PartTagTable::new());

    let mut part_number = 0u32;
    let read_loop = async {
        loop {
            let permit = dispatcher.reserve().await?;
            part_number += 1;

            let limit = config.multipart_part_size(part_number);
            let spool = PartSpool::fill_from(&mut source, part_number, limit, config, &cancel).await?;
            let len = spool.len();
            if len == 0 && part_number > 1 {
                break;
            }

            let part = CloudPart {
                storage: storage.clone(),
                upload_id: upload_id.to_string(),
                part_number,
                spool,
                tags: Arc::clone(&tags),
                config: config.clone(),
                options: options.clone(),
            };
            dispatcher.dispatch(permit, part_number, part.send(cancel.clone()));

            if len < limit {
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

    let ordered = tags.ordered_parts(parts)?;
    tokio::select! {
        biased;
        _ = options.cancel.cancelled() => return Err(UploadError::Cancelled),
        finalized = storage.finalize(upload_id, &ordered) => finalized?,
    }
    Ok(parts)
}

struct CloudPart {
    storage: CloudStorage,
    upload_id: String,
    part_number: u32,
    spool: PartSpool,
    tags: Arc<PartTagTable>,
    config: UploadConfig,
    options: UploadOptions,
}

impl CloudPart {
    async fn send(self, cancel: CancellationToken) -> Result<()> {
        let stall = self.config.stall_settings();
        let part = &self;

        let tag = self
            .config
            .retry_policy()
            .run("upload", self.part_number, &cancel, move |_| async move {
                part.storage
                    .upload_part(&part.upload_id, part.part_number, &part.spool, stall)
                    .await
            })
            .await?;

        debug!("Uploaded part {} ({} bytes, tag {})", self.part_number, self.spool.len(), tag);
        self.tags.record(self.part_number, tag)?;
        self.options.report(self.spool.len());
        Ok(())
    }
}
