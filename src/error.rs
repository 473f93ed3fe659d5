//! Error taxonomy for the upload engine.
//!
//! Every failure surfaces to the caller as one [`UploadError`]. The variants
//! follow how the engine reacts to them: descriptor and configuration errors
//! are fatal before anything is sent, transport and status errors are retried
//! with backoff, stalls are retried at once, and cancellation always stops the
//! upload.

use std::io;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum UploadError {
    /// The origin service returned a descriptor without a required field
    #[error("invalid upload descriptor: {0}")]
    Descriptor(String),

    /// The descriptor cannot carry this stream (length/strategy mismatch)
    #[error("upload configuration error: {0}")]
    Configuration(String),

    /// Connection level failure talking to a remote endpoint
    #[error("transport error: {message}")]
    Transport { message: String, timeout: bool },

    /// The remote endpoint answered with a non-success status
    #[error("request failed with status {status}: {body}")]
    Status { status: u16, body: String },

    /// Too little data moved within the stall window
    #[error("upload stalled: transferred less than {threshold} bytes in {window_secs} seconds")]
    Stalled { threshold: u64, window_secs: u64 },

    /// The caller cancelled the upload
    #[error("upload cancelled")]
    Cancelled,

    /// A part kept failing until the attempt budget ran out
    #[error("{operation} of part {part} failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        operation: &'static str,
        part: u32,
        attempts: u32,
        #[source]
        source: Box<UploadError>,
    },

    /// The origin service reported an error in its response envelope
    #[error("error from server: {message}")]
    Api { message: String, code: Option<u16> },

    /// The origin service asked for a redirect instead of answering
    #[error("redirect to {url} ({code})")]
    Redirect { url: String, code: u16 },

    /// The origin service requires a logged in user
    #[error("login required")]
    LoginRequired,

    /// HTTP failure whose body was not a response envelope
    #[error("HTTP error {status}: {body}")]
    Http { status: u16, body: String },

    /// A remote answer did not follow the expected protocol
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The request could not be built
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Local spool or source I/O failure
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl UploadError {
    /// Whether another attempt of the same operation may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            UploadError::Transport { .. } | UploadError::Status { .. } | UploadError::Stalled { .. }
        )
    }

    /// Retryable conditions that skip the backoff delay.
    pub fn is_immediate_retry(&self) -> bool {
        matches!(
            self,
            UploadError::Stalled { .. } | UploadError::Transport { timeout: true, .. }
        )
    }

    pub fn is_stalled(&self) -> bool {
        matches!(self, UploadError::Stalled { .. })
    }

    /// Build the stalled error carried inside an `io::Error`.
    pub(crate) fn stalled_io(threshold: u64, window_secs: u64) -> io::Error {
        io::Error::new(
            io::ErrorKind::TimedOut,
            UploadError::Stalled { threshold, window_secs },
        )
    }

    /// Recover engine errors that travelled through an `io::Error`.
    pub(crate) fn from_io(err: io::Error) -> Self {
        let is_engine_error = err
            .get_ref()
            .map(|inner| inner.is::<UploadError>())
            .unwrap_or(false);
        if is_engine_error {
            if let Some(inner) = err.into_inner() {
                if let Ok(engine) = inner.downcast::<UploadError>() {
                    return *engine;
                }
            }
            return UploadError::Protocol("unreadable engine error".to_string());
        }
        UploadError::Io(err)
    }
}

impl From<reqwest::Error> for UploadError {
    fn from(err: reqwest::Error) -> Self {
        UploadError::Transport {
            message: err.to_string(),
            timeout: err.is_timeout(),
        }
    }
}
