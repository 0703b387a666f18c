//! Non-blocking one-shot timers with cancellation.
//!
//! Tasks execute on the same `tokio` runtime that drives the orchestrator;
//! the scheduler only chooses when. Resolution is whatever `tokio::time`
//! gives us, comfortably under the 100ms the core requires.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

/// A handle to a scheduled task. Cancellation is idempotent and tolerates a
/// task that has already fired.
#[derive(Debug, Clone)]
pub struct Handle(CancellationToken);

impl Handle {
    pub fn cancel(&self) {
        self.0.cancel();
    }
}

/// Schedules delayed, cancellable tasks.
#[derive(Debug, Default, Clone)]
pub struct Scheduler;

impl Scheduler {
    pub fn new() -> Self {
        Self
    }

    /// Run `task` after `delay`, unless cancelled first.
    pub fn schedule<F>(&self, delay: Duration, task: F) -> Handle
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let token = CancellationToken::new();
        let guard = token.clone();

        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => task.await,
                _ = guard.cancelled() => {}
            }
        });

        Handle(token)
    }

    /// Cancel a scheduled task. No-op if it already fired or was cancelled.
    pub fn cancel(&self, handle: &Handle) {
        handle.cancel();
    }
}
