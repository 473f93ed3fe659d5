//! Stall detection for byte sources and outgoing transfers.
//!
//! [`StallDetectReader`] wraps an `AsyncRead` and races every read against a
//! timer. Progress is counted per window; a read that waits out the timer
//! while the window has seen fewer bytes than the threshold fails with
//! [`UploadError::Stalled`] instead of hanging.
//!
//! A request body is only polled when the connection can take more data, so
//! a peer that stops reading never wakes a timer inside the body. Outgoing
//! transfers are therefore watched from outside: the body is wrapped in a
//! [`CountingReader`] and [`watch_transfer`] races the send against the
//! pulled byte count.
//!
//! A losing inner read is abandoned by not polling it again: it keeps its
//! place in the wrapped source, so the next read after a stall picks up where
//! the source is and no byte is dropped. Dropping the detector drops both the
//! source and the timer.

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use log::warn;
use tokio::io::{AsyncRead, ReadBuf};
use tokio::time::{sleep_until, Instant, Sleep};

use crate::constants::{DEFAULT_STALL_THRESHOLD, DEFAULT_STALL_TIMEOUT_SECS};
use crate::error::UploadError;
use crate::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StallSettings {
    pub timeout: Duration,
    /// Bytes that must move within one window
    pub threshold: u64,
}

impl Default for StallSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_STALL_TIMEOUT_SECS),
            threshold: DEFAULT_STALL_THRESHOLD,
        }
    }
}

pub struct StallDetectReader<R> {
    inner: R,
    settings: StallSettings,
    timer: Pin<Box<Sleep>>,
    window_start: Instant,
    bytes_in_window: u64,
    read_in_progress: bool,
    stall_pending: bool,
}

impl<R> StallDetectReader<R> {
    pub fn new(inner: R, settings: StallSettings) -> Self {
        let now = Instant::now();
        Self {
            inner,
            settings,
            timer: Box::pin(sleep_until(now + settings.timeout)),
            window_start: now,
            bytes_in_window: 0,
            read_in_progress: false,
            stall_pending: false,
        }
    }

    /// Start a fresh progress window.
    ///
    /// Callers that leave the source idle on purpose (waiting for an upload
    /// slot, for instance) reset the window before reading again.
    pub fn reset_window(&mut self) {
        let now = Instant::now();
        self.window_start = now;
        self.bytes_in_window = 0;
        self.timer.as_mut().reset(now + self.settings.timeout);
    }

    fn stalled(&mut self) -> io::Error {
        warn!(
            "Read stalled: {} bytes in the last {:?} (threshold {})",
            self.bytes_in_window, self.settings.timeout, self.settings.threshold
        );
        self.read_in_progress = false;
        self.reset_window();
        UploadError::stalled_io(self.settings.threshold, self.settings.timeout.as_secs())
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for StallDetectReader<R> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();

        if this.stall_pending {
            this.stall_pending = false;
            return Poll::Ready(Err(this.stalled()));
        }

        if !this.read_in_progress {
            let deadline = Instant::now() + this.settings.timeout;
            this.timer.as_mut().reset(deadline);
        }

        let before = buf.filled().len();
        match Pin::new(&mut this.inner).poll_read(cx, buf) {
            Poll::Ready(Ok(())) => {
                this.read_in_progress = false;
                let n = (buf.filled().len() - before) as u64;
                this.bytes_in_window += n;

                if this.window_start.elapsed() >= this.settings.timeout {
                    if n > 0 && this.bytes_in_window < this.settings.threshold {
                        // hand out the bytes now, report the slow window next
                        this.stall_pending = true;
                    } else {
                        this.reset_window();
                    }
                }
                Poll::Ready(Ok(()))
            }
            Poll::Ready(Err(e)) => {
                this.read_in_progress = false;
                Poll::Ready(Err(e))
            }
            Poll::Pending => {
                this.read_in_progress = true;
                loop {
                    match this.timer.as_mut().poll(cx) {
                        Poll::Pending => return Poll::Pending,
                        Poll::Ready(()) => {
                            if this.bytes_in_window < this.settings.threshold {
                                return Poll::Ready(Err(this.stalled()));
                            }
                            // enough progress this window, keep waiting
                            this.reset_window();
                        }
                    }
                }
            }
        }
    }
}

/// Bytes pulled from a request body, shared with the watcher.
#[derive(Debug, Clone, Default)]
pub struct TransferProgress {
    pulled: Arc<AtomicU64>,
}

impl TransferProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pulled(&self) -> u64 {
        self.pulled.load(Ordering::Relaxed)
    }

    fn add(&self, bytes: u64) {
        self.pulled.fetch_add(bytes, Ordering::Relaxed);
    }
}

/// Reader that records every byte handed out into a [`TransferProgress`].
pub struct CountingReader<R> {
    inner: R,
    progress: TransferProgress,
}

impl<R> CountingReader<R> {
    pub fn new(inner: R, progress: TransferProgress) -> Self {
        Self { inner, progress }
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for CountingReader<R> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let before = buf.filled().len();
        let result = Pin::new(&mut this.inner).poll_read(cx, buf);
        if let Poll::Ready(Ok(())) = result {
            this.progress.add((buf.filled().len() - before) as u64);
        }
        result
    }
}

/// Run `transfer` while watching how fast its body of `total` bytes is pulled.
///
/// Each window must see at least `threshold` bytes leave the body, including
/// the first one, so a transfer that never starts pulling stalls as well.
/// Once the whole body has been pulled, waiting for the response is not
/// counted as a stall.
pub async fn watch_transfer<T, F>(
    settings: StallSettings,
    total: u64,
    progress: &TransferProgress,
    transfer: F,
) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::pin!(transfer);
    let mut window_start = progress.pulled();
    let mut deadline = Instant::now() + settings.timeout;

    loop {
        tokio::select! {
            biased;
            result = &mut transfer => return result,
            _ = sleep_until(deadline), if window_start < total => {
                let pulled = progress.pulled();
                if pulled < total && pulled - window_start < settings.threshold {
                    warn!(
                        "Transfer stalled: {} bytes sent in the last {:?} ({} of {} total)",
                        pulled - window_start, settings.timeout, pulled, total
                    );
                    return Err(UploadError::Stalled {
                        threshold: settings.threshold,
                        window_secs: settings.timeout.as_secs(),
                    });
                }
                window_start = pulled;
                deadline += settings.timeout;
            }
        }
    }
}
