//! Backpressure management for the worker pool
//!
//! The pool admits at most `queue_capacity + worker_count` tasks at a time:
//! up to `worker_count` executing and up to `queue_capacity` waiting. A
//! capacity of zero therefore means synchronous hand-off, a submission only
//! completes once a worker is free to take it.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};

use crate::error::PoolError;

/// Admission state for a worker pool
///
/// Slots are semaphore permits, so blocked submitters are woken in FIFO
/// order as tasks finish.
#[derive(Debug)]
pub(crate) struct BackpressureState {
    slots: Arc<Semaphore>,
    max_load: usize,
    current_load: AtomicUsize,
}

impl BackpressureState {
    /// Create a new backpressure state
    pub fn new(worker_count: usize, queue_capacity: usize) -> Self {
        let max_load = worker_count + queue_capacity;
        Self {
            slots: Arc::new(Semaphore::new(max_load)),
            max_load,
            current_load: AtomicUsize::new(0),
        }
    }

    /// Wait for a free slot
    ///
    /// Fails with [`PoolError::Closed`] once admission has been closed,
    /// including for callers that were already waiting.
    pub async fn acquire(&self) -> Result<OwnedSemaphorePermit, PoolError> {
        self.slots
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| PoolError::Closed)
    }

    /// Take a free slot without waiting
    pub fn try_acquire(&self) -> Result<OwnedSemaphorePermit, PoolError> {
        self.slots
            .clone()
            .try_acquire_owned()
            .map_err(|e| match e {
                TryAcquireError::Closed => PoolError::Closed,
                TryAcquireError::NoPermits => PoolError::QueueFull,
            })
    }

    /// Stop handing out slots
    pub fn close(&self) {
        self.slots.close();
    }

    /// Get the number of queued and executing tasks
    pub fn current_load(&self) -> usize {
        self.current_load.load(Ordering::Acquire)
    }

    /// Get the maximum number of admitted tasks
    pub fn max_load(&self) -> usize {
        self.max_load
    }

    /// Get the number of available slots
    pub fn available_slots(&self) -> usize {
        self.slots.available_permits()
    }

    /// Check if a submission would currently proceed without waiting
    pub fn is_accepting(&self) -> bool {
        !self.slots.is_closed() && self.available_slots() > 0
    }
}

/// An occupied slot, released when the task is dropped after its last attempt
#[derive(Debug)]
pub(crate) struct Slot {
    _permit: OwnedSemaphorePermit,
    state: Arc<BackpressureState>,
}

impl Slot {
    /// Record that an admitted task now occupies `permit`
    pub(crate) fn occupy(state: &Arc<BackpressureState>, permit: OwnedSemaphorePermit) -> Self {
        state.current_load.fetch_add(1, Ordering::AcqRel);
        Self {
            _permit: permit,
            state: Arc::clone(state),
        }
    }
}

impl Drop for Slot {
    fn drop(&mut self) {
        self.state.current_load.fetch_sub(1, Ordering::AcqRel);
    }
}
