//! Bounded dispatch of part uploads.
//!
//! The read loop reserves a slot before reading each part, so at most
//! `capacity` spools exist and at most `capacity` parts are in flight. Part
//! tasks run on a `JoinSet`; the first failure among them stops the read loop
//! at its next reservation and the remaining tasks are aborted.

use std::future::Future;

use log::debug;
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;

use crate::error::UploadError;
use crate::upload::gate::{ConcurrencyGate, SlotPermit};
use crate::Result;

pub struct PartDispatcher {
    gate: ConcurrencyGate,
    tasks: JoinSet<Result<()>>,
    cancel: CancellationToken,
    dispatched: u32,
}

impl PartDispatcher {
    pub fn new(gate: ConcurrencyGate, cancel: CancellationToken) -> Self {
        Self {
            gate,
            tasks: JoinSet::new(),
            cancel,
            dispatched: 0,
        }
    }

    /// Parts handed to [`dispatch`](Self::dispatch) so far.
    pub fn dispatched(&self) -> u32 {
        self.dispatched
    }

    /// Wait for a free slot.
    ///
    /// Fails with the error of a finished part, or on cancellation.
    pub async fn reserve(&mut self) -> Result<SlotPermit> {
        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(UploadError::Cancelled),
                Some(joined) = self.tasks.join_next(), if !self.tasks.is_empty() => {
                    part_outcome(joined)?;
                }
                permit = self.gate.acquire() => return permit,
            }
        }
    }

    /// Run `part` on its own task while it holds `permit`.
    pub fn dispatch<F>(&mut self, permit: SlotPermit, part_number: u32, part: F)
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        self.dispatched += 1;
        debug!("Dispatching part {} ({} in flight)", part_number, self.gate.active());
        self.tasks.spawn(async move {
            let result = part.await;
            drop(permit);
            result
        });
    }

    /// Wait for every dispatched part, then for every slot to be free.
    ///
    /// On the first failure the other parts are aborted.
    pub async fn finish(mut self) -> Result<()> {
        let joined = self.join_all().await;
        if joined.is_err() {
            self.shutdown().await;
            return joined;
        }
        self.gate.drain().await
    }

    async fn join_all(&mut self) -> Result<()> {
        loop {
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(UploadError::Cancelled),
                next = self.tasks.join_next() => next,
            };
            match next {
                Some(joined) => part_outcome(joined)?,
                None => return Ok(()),
            }
        }
    }

    /// Abort every part still running and refuse new slots.
    pub async fn shutdown(&mut self) {
        self.cancel.cancel();
        self.gate.close();
        self.tasks.shutdown().await;
    }
}

fn part_outcome(joined: std::result::Result<Result<()>, JoinError>) -> Result<()> {
    match joined {
        Ok(result) => result,
        Err(e) if e.is_cancelled() => Err(UploadError::Cancelled),
        Err(e) => Err(UploadError::Protocol(format!("part task failed: {}", e))),
    }
}
