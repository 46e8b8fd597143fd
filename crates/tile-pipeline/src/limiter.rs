//! Concurrency limiter shared by pipeline fan-out points.

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// A counting semaphore bounding in-flight work.
///
/// Dropping the returned permit releases the slot.
#[derive(Clone)]
pub struct ConcLimiter {
    permits: Arc<Semaphore>,
}

impl ConcLimiter {
    pub fn new(limit: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(limit.max(1))),
        }
    }

    pub async fn acquire(&self) -> OwnedSemaphorePermit {
        // The semaphore is never closed, so acquisition cannot fail.
        self.permits
            .clone()
            .acquire_owned()
            .await
            .expect("limiter semaphore closed")
    }

    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }
}
