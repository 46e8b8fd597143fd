//! Per-request coordination: cancellation, error collection, metrics.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::watch;

use crate::error::PipelineError;

/// Counters accumulated across pipeline stages for one request.
#[derive(Debug, Default)]
pub struct RequestMetrics {
    pub index_files: AtomicI64,
    pub granules: AtomicI64,
    pub worker_bytes_read: AtomicI64,
    pub worker_user_time: AtomicI64,
    pub worker_sys_time: AtomicI64,
}

impl RequestMetrics {
    pub fn add_worker(&self, metrics: &warp_rpc::WorkerMetrics) {
        self.worker_bytes_read
            .fetch_add(metrics.bytes_read, Ordering::Relaxed);
        self.worker_user_time
            .fetch_add(metrics.user_time, Ordering::Relaxed);
        self.worker_sys_time
            .fetch_add(metrics.sys_time, Ordering::Relaxed);
    }
}

struct ContextInner {
    cancel_tx: watch::Sender<bool>,
    cancel_rx: watch::Receiver<bool>,
    /// First error wins; later errors are discarded.
    error: Mutex<Option<PipelineError>>,
    metrics: RequestMetrics,
}

/// Shared handle carried by every stage of one request.
///
/// Stages observe cancellation at queue boundaries, stop accepting new
/// work, drain in-flight items and close their output; error recording
/// is non-blocking and idempotent.
#[derive(Clone)]
pub struct RequestContext {
    inner: Arc<ContextInner>,
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestContext {
    pub fn new() -> Self {
        let (cancel_tx, cancel_rx) = watch::channel(false);
        Self {
            inner: Arc::new(ContextInner {
                cancel_tx,
                cancel_rx,
                error: Mutex::new(None),
                metrics: RequestMetrics::default(),
            }),
        }
    }

    /// Signal cancellation to every stage of the request.
    pub fn cancel(&self) {
        let _ = self.inner.cancel_tx.send(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.inner.cancel_rx.borrow()
    }

    /// Record an error; only the first one is retained.
    pub fn send_error(&self, err: PipelineError) {
        let mut slot = self.inner.error.lock().unwrap();
        if slot.is_none() {
            *slot = Some(err);
        }
    }

    /// Take the recorded error, leaving the sink empty.
    pub fn take_error(&self) -> Option<PipelineError> {
        self.inner.error.lock().unwrap().take()
    }

    pub fn has_error(&self) -> bool {
        self.inner.error.lock().unwrap().is_some()
    }

    /// Stage check at queue boundaries: stop on cancellation or once a
    /// fatal error is pending.
    pub fn check_cancellation(&self) -> bool {
        if self.is_cancelled() {
            return true;
        }
        let slot = self.inner.error.lock().unwrap();
        matches!(&*slot, Some(err) if err.is_fatal())
    }

    /// Wait until the request is cancelled.
    pub async fn cancelled(&self) {
        let mut rx = self.inner.cancel_rx.clone();
        while !*rx.borrow_and_update() {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    pub fn metrics(&self) -> &RequestMetrics {
        &self.inner.metrics
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_error_wins() {
        let ctx = RequestContext::new();
        ctx.send_error(PipelineError::Validation("first".to_string()));
        ctx.send_error(PipelineError::Validation("second".to_string()));

        let err = ctx.take_error().unwrap();
        assert!(err.to_string().contains("first"));
        assert!(ctx.take_error().is_none());
    }

    #[test]
    fn test_transient_error_does_not_stop_stages() {
        let ctx = RequestContext::new();
        ctx.send_error(PipelineError::Worker("node down".to_string()));
        assert!(!ctx.check_cancellation());

        ctx.send_error(PipelineError::Validation("bad".to_string()));
        // the transient error is still the retained one
        assert!(!ctx.check_cancellation());
    }

    #[test]
    fn test_fatal_error_stops_stages() {
        let ctx = RequestContext::new();
        ctx.send_error(PipelineError::Selection("bad step".to_string()));
        assert!(ctx.check_cancellation());
    }

    #[tokio::test]
    async fn test_cancellation_wakes_waiters() {
        let ctx = RequestContext::new();
        assert!(!ctx.is_cancelled());

        let waiter = {
            let ctx = ctx.clone();
            tokio::spawn(async move { ctx.cancelled().await })
        };
        ctx.cancel();
        waiter.await.unwrap();
        assert!(ctx.is_cancelled());
        assert!(ctx.check_cancellation());
    }
}
