//! Retry with exponential backoff for part uploads.

use std::future::Future;
use std::time::Duration;

use log::{debug, warn};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::constants::{MAX_UPLOAD_ATTEMPTS, RETRY_BASE_DELAY_MS, RETRY_MAX_DELAY_SECS};
use crate::error::UploadError;
use crate::Result;

/// Retry configuration for one part upload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts in total, first try included
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: MAX_UPLOAD_ATTEMPTS,
            base_delay: Duration::from_millis(RETRY_BASE_DELAY_MS),
            max_delay: Duration::from_secs(RETRY_MAX_DELAY_SECS),
        }
    }
}

impl RetryPolicy {
    /// Delay before the next attempt once `attempt` attempts have failed.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        2u32.checked_pow(attempt)
            .and_then(|factor| self.base_delay.checked_mul(factor))
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Run `op` until it succeeds, fails for good, or the attempt budget is
    /// spent.
    ///
    /// `op` receives the 1-based attempt number and must rebuild its request
    /// from scratch each time. Stalls and timeouts are retried at once, other
    /// transient errors after [`backoff_delay`](Self::backoff_delay).
    /// Cancellation wins over both the attempt and the backoff sleep.
    pub async fn run<T, F, Fut>(
        &self,
        operation: &'static str,
        part: u32,
        cancel: &CancellationToken,
        mut op: F,
    ) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;

            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(UploadError::Cancelled),
                result = op(attempt) => result,
            };

            let err = match result {
                Ok(value) => {
                    if attempt > 1 {
                        debug!("{} of part {} succeeded on attempt {}", operation, part, attempt);
                    }
                    return Ok(value);
                }
                Err(err) => err,
            };

            if !err.is_retryable() {
                return Err(err);
            }
            if attempt >= self.max_attempts {
                return Err(UploadError::RetriesExhausted {
                    operation,
                    part,
                    attempts: attempt,
                    source: Box::new(err),
                });
            }

            if err.is_immediate_retry() {
                warn!(
                    "{} of part {} attempt {} failed, retrying immediately: {}",
                    operation, part, attempt, err
                );
                continue;
            }

            let delay = self.backoff_delay(attempt);
            warn!(
                "{} of part {} attempt {} failed, retrying in {:?}: {}",
                operation, part, attempt, delay, err
            );
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(UploadError::Cancelled),
                _ = sleep(delay) => {}
            }
        }
    }
}
