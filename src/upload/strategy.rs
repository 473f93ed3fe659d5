//! Choice of wire protocol for one upload.

use std::fmt;

use crate::constants::{MULTIPART_THRESHOLD, SINGLE_PUT_MAX_SIZE};
use crate::error::UploadError;
use crate::upload::descriptor::UploadDescriptor;
use crate::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadStrategy {
    /// Whole payload in one PUT
    SinglePut,
    /// Fixed-size parts PUT with a `Content-Range`
    ChunkedPut { block_size: u64 },
    /// Cloud storage multipart upload
    CloudMultipart,
}

impl fmt::Display for UploadStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UploadStrategy::SinglePut => write!(f, "single PUT"),
            UploadStrategy::ChunkedPut { block_size } => {
                write!(f, "chunked PUT ({} byte blocks)", block_size)
            }
            UploadStrategy::CloudMultipart => write!(f, "cloud multipart"),
        }
    }
}

impl UploadStrategy {
    /// Pick the protocol for a payload of `length` bytes (`None` if unknown).
    ///
    /// A block size always wins. A cloud target is used for large or unknown
    /// lengths. Anything else needs a known length a single PUT can carry.
    pub fn select(descriptor: &UploadDescriptor, length: Option<u64>) -> Result<Self> {
        if let Some(block_size) = descriptor.block_size {
            return Ok(UploadStrategy::ChunkedPut { block_size });
        }

        if descriptor.cloud.is_some() && length.map_or(true, |len| len > MULTIPART_THRESHOLD) {
            return Ok(UploadStrategy::CloudMultipart);
        }

        match length {
            Some(len) if len <= SINGLE_PUT_MAX_SIZE => Ok(UploadStrategy::SinglePut),
            _ => Err(UploadError::Configuration(
                "cannot upload using PUT method without a known length of less than 5GB"
                    .to_string(),
            )),
        }
    }
}
