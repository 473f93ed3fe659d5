//! Disk-backed buffers holding one part each.
//!
//! A part is copied from the source into an anonymous temporary file before
//! it is sent, so retries re-read the spool and never the source, and large
//! parts do not sit in memory. The file is unlinked as soon as it is created
//! (`tempfile::tempfile`), which means closing the last handle, on success,
//! error or crash, deletes it.

use std::io::SeekFrom;

use log::{debug, warn};
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

use crate::config::UploadConfig;
use crate::constants::EMPTY_PAYLOAD_SHA256;
use crate::error::UploadError;
use crate::transport::RequestBody;
use crate::upload::stall::{CountingReader, StallDetectReader, TransferProgress};
use crate::utils::hash::sha256_reader;
use crate::Result;

pub struct PartSpool {
    file: File,
    len: u64,
}

impl PartSpool {
    /// Create an empty spool.
    pub fn create() -> Result<Self> {
        let file = tempfile::tempfile()?;
        Ok(Self {
            file: File::from_std(file),
            len: 0,
        })
    }

    /// Copy up to `limit` bytes of `source` into a new spool.
    ///
    /// Fewer than `limit` bytes means the source reached its end. A stalled
    /// source read is retried at once, keeping what was already copied, until
    /// `max_attempts` consecutive stalls; any other read error is fatal.
    pub async fn fill_from<R: AsyncRead + Unpin>(
        source: &mut StallDetectReader<R>,
        part_number: u32,
        limit: u64,
        config: &UploadConfig,
        cancel: &CancellationToken,
    ) -> Result<Self> {
        let mut spool = Self::create()?;
        let mut buffer = vec![0u8; config.copy_buffer_size];
        let mut stalls = 0u32;

        source.reset_window();
        while spool.len < limit {
            let want = (limit - spool.len).min(buffer.len() as u64) as usize;
            let read = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(UploadError::Cancelled),
                read = source.read(&mut buffer[..want]) => read,
            };

            match read {
                Ok(0) => break,
                Ok(n) => {
                    spool.file.write_all(&buffer[..n]).await?;
                    spool.len += n as u64;
                    stalls = 0;
                }
                Err(e) => {
                    let err = UploadError::from_io(e);
                    if !err.is_stalled() {
                        return Err(err);
                    }
                    stalls += 1;
                    if stalls >= config.max_attempts {
                        return Err(UploadError::RetriesExhausted {
                            operation: "read",
                            part: part_number,
                            attempts: stalls,
                            source: Box::new(err),
                        });
                    }
                    warn!(
                        "Source stalled while reading part {} ({} bytes so far), retrying read",
                        part_number, spool.len
                    );
                }
            }
        }

        spool.file.flush().await?;
        debug!("Spooled part {} ({} bytes)", part_number, spool.len);
        Ok(spool)
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// A fresh handle positioned at the start of the spool.
    async fn rewound(&self) -> Result<File> {
        let mut reader = self.file.try_clone().await?;
        reader.seek(SeekFrom::Start(0)).await?;
        Ok(reader)
    }

    /// Request body over the whole spool.
    ///
    /// Every call starts again from the first byte. Bytes pulled by the
    /// transport are counted into `progress`.
    pub async fn body(&self, progress: &TransferProgress) -> Result<RequestBody> {
        if self.len == 0 {
            return Ok(RequestBody::Empty);
        }
        let reader = self.rewound().await?.take(self.len);
        Ok(RequestBody::Reader {
            reader: Box::new(CountingReader::new(reader, progress.clone())),
            len: self.len,
        })
    }

    /// Hex SHA-256 of the spooled bytes.
    pub async fn sha256_hex(&self) -> Result<String> {
        if self.len == 0 {
            return Ok(EMPTY_PAYLOAD_SHA256.to_string());
        }
        let mut reader = self.rewound().await?.take(self.len);
        Ok(sha256_reader(&mut reader).await?)
    }
}
