//! Restartable background timer with deterministic, blocking stop.
//!
//! The task waits on a cancellable delay (`select!` over the token and a
//! sleep) instead of polling.  `stop()` cancels the token and then awaits the
//! task, so once it returns no callback is running or pending.  A callback
//! that has not finished when the token fires is dropped at its next await
//! point; this keeps `stop()` from deadlocking against a callback that waits
//! for a lock held by the caller.

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerMode {
    /// Fire every interval until stopped.
    Repeating,
    /// Fire once after the interval unless stopped first.
    OneShot,
}

/// Handle to one running timer task.  Handles are not reused: `stop`
/// consumes the handle and a restart builds a fresh one.
pub struct Timer {
    name: &'static str,
    mode: TimerMode,
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl Timer {
    /// Spawn the timer task.  Must be called from within a tokio runtime.
    ///
    /// A callback returning `Err` ends the task: a repeating timer degrades to
    /// stopped, a one-shot timer reports the failure once.
    pub fn start<F, Fut>(
        name: &'static str,
        interval: Duration,
        mode: TimerMode,
        mut callback: F,
    ) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let token = CancellationToken::new();
        let task_token = token.clone();

        debug!("timer {}: start ({:?}, every {:?})", name, mode, interval);
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = task_token.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {}
                }

                let result = tokio::select! {
                    biased;
                    _ = task_token.cancelled() => break,
                    result = callback() => result,
                };

                if let Err(e) = result {
                    warn!("timer {}: callback failed: {:#}", name, e);
                    break;
                }
                if mode == TimerMode::OneShot {
                    break;
                }
            }
            debug!("timer {}: task exiting", name);
        });

        Self {
            name,
            mode,
            token,
            handle,
        }
    }

    /// True while the background task is alive.  A one-shot timer that has
    /// already fired reports false.
    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }

    pub fn mode(&self) -> TimerMode {
        self.mode
    }

    /// Cancel and wait for the task to terminate.
    pub async fn stop(mut self) {
        self.token.cancel();
        if let Err(e) = (&mut self.handle).await {
            if e.is_panic() {
                warn!("timer {}: task panicked", self.name);
            }
        }
        debug!("timer {}: stopped", self.name);
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        self.token.cancel();
    }
}
