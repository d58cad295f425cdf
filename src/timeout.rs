//! Shared deadline, cancellation signal, and budget predicates for one
//! agent run, generalized into a standalone controller so providers and
//! tools can all race against the same clock.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;

use crate::error::TimeoutError;

/// Minimum time a new iteration needs to be worth starting. Below this
/// remaining budget the loop terminates gracefully instead of risking a
/// mid-iteration hard timeout.
pub const MIN_ITERATION_TIME_MS: u64 = 30_000;

struct Inner {
    start: Instant,
    limit: Duration,
    cancelled: AtomicBool,
    notify: Notify,
}

/// Arms a single deadline for a run and exposes cancellation plumbing that
/// providers and long-running tools can observe.
#[derive(Clone)]
pub struct TimeoutController {
    inner: Arc<Inner>,
}

impl TimeoutController {
    /// Constructs a controller with a total budget. Does not start the
    /// clock — call [`Self::start`] to arm the deadline.
    pub fn new(budget_ms: u64) -> Self {
        Self {
            inner: Arc::new(Inner {
                start: Instant::now(),
                limit: Duration::from_millis(budget_ms),
                cancelled: AtomicBool::new(false),
                notify: Notify::new(),
            }),
        }
    }

    /// Arming is idempotent in the sense that the deadline is fixed at
    /// construction; `start` exists as an explicit lifecycle hook for
    /// callers that want to log when the clock conceptually began.
    pub fn start(&self) {
        tracing::debug!(limit_ms = self.inner.limit.as_millis() as u64, "timeout controller armed");
    }

    /// Idempotent: calling stop more than once is a no-op.
    pub fn stop(&self) {
        tracing::debug!("timeout controller stopped");
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.inner.start.elapsed().as_millis() as u64
    }

    pub fn remaining_ms(&self) -> u64 {
        self.inner.limit.as_millis() as u64
            - self.elapsed_ms().min(self.inner.limit.as_millis() as u64)
    }

    pub fn is_timed_out(&self) -> bool {
        self.inner.start.elapsed() >= self.inner.limit
    }

    /// True if an operation estimated to take `estimated_ms` could still
    /// complete inside the remaining budget.
    pub fn has_time_for(&self, estimated_ms: u64) -> bool {
        self.remaining_ms() >= estimated_ms
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Fires the cancellation signal immediately. Best-effort: operations
    /// that do not poll `is_cancelled()` are only bounded by their own
    /// per-call timeout.
    pub fn abort(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    /// Resolves once [`Self::abort`] is called. Useful for `select!`-ing
    /// against cancellation inside a tool executor.
    pub async fn cancelled(&self) {
        if self.is_cancelled() {
            return;
        }
        self.inner.notify.notified().await;
    }

    /// Fails with a [`TimeoutError`] carrying `{elapsed, limit, context}`
    /// when the deadline has already passed.
    pub fn checkpoint(&self, context: impl Into<String>) -> Result<(), TimeoutError> {
        if self.is_timed_out() {
            Err(TimeoutError {
                elapsed_ms: self.elapsed_ms(),
                limit_ms: self.inner.limit.as_millis() as u64,
                context: context.into(),
            })
        } else {
            Ok(())
        }
    }

    /// Races `op` against `ms` milliseconds (capped by the controller's
    /// own remaining budget). The losing operation's cancellation is
    /// best-effort: dropping the future is all tokio guarantees here.
    pub async fn with_timeout<F, T>(&self, op: F, ms: u64, context: &str) -> Result<T, TimeoutError>
    where
        F: std::future::Future<Output = T>,
    {
        let bound = ms.min(self.remaining_ms().max(1));
        match tokio::time::timeout(Duration::from_millis(bound), op).await {
            Ok(value) => Ok(value),
            Err(_) => Err(TimeoutError {
                elapsed_ms: self.elapsed_ms(),
                limit_ms: self.inner.limit.as_millis() as u64,
                context: context.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn has_time_for_respects_budget() {
        let ctl = TimeoutController::new(1_000);
        assert!(ctl.has_time_for(500));
        assert!(!ctl.has_time_for(2_000));
    }

    #[tokio::test]
    async fn checkpoint_fails_after_deadline() {
        let ctl = TimeoutController::new(10);
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(ctl.is_timed_out());
        assert!(ctl.checkpoint("test").is_err());
    }

    #[tokio::test]
    async fn with_timeout_loses_race() {
        let ctl = TimeoutController::new(5_000);
        let result = ctl
            .with_timeout(tokio::time::sleep(Duration::from_millis(200)), 20, "slow op")
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn abort_wakes_cancelled_waiters() {
        let ctl = TimeoutController::new(5_000);
        let waiter = ctl.clone();
        let handle = tokio::spawn(async move {
            waiter.cancelled().await;
        });
        ctl.abort();
        handle.await.unwrap();
        assert!(ctl.is_cancelled());
    }
}
