//! Bounded slot pool limiting how many parts upload at once.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::error::UploadError;
use crate::Result;

/// Counting gate over a fixed number of upload slots.
///
/// A part holds one [`SlotPermit`] while it is in flight. `acquire` waits for a
/// free slot, dropping or [`release`](ConcurrencyGate::release)-ing the permit
/// frees it, and [`drain`](ConcurrencyGate::drain) waits until every slot is
/// free again. The gate also records how many slots are taken and the highest
/// number ever taken at once.
#[derive(Clone)]
pub struct ConcurrencyGate {
    semaphore: Arc<Semaphore>,
    capacity: usize,
    active: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

/// One taken slot; released on drop.
#[derive(Debug)]
pub struct SlotPermit {
    _permit: OwnedSemaphorePermit,
    active: Arc<AtomicUsize>,
}

impl Drop for SlotPermit {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

impl ConcurrencyGate {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
            active: Arc::new(AtomicUsize::new(0)),
            peak: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Wait for a free slot.
    ///
    /// Fails with [`UploadError::Cancelled`] once the gate is closed.
    pub async fn acquire(&self) -> Result<SlotPermit> {
        let permit = Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .map_err(|_| UploadError::Cancelled)?;

        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        Ok(SlotPermit {
            _permit: permit,
            active: Arc::clone(&self.active),
        })
    }

    pub fn release(&self, permit: SlotPermit) {
        drop(permit);
    }

    /// Wait until no slot is taken.
    pub async fn drain(&self) -> Result<()> {
        let all = self
            .semaphore
            .acquire_many(self.capacity as u32)
            .await
            .map_err(|_| UploadError::Cancelled)?;
        drop(all);
        Ok(())
    }

    /// Refuse new slots and wake everyone waiting for one.
    pub fn close(&self) {
        self.semaphore.close();
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}
