//! Cooperative cancellation for long-running component loops.
//!
//! A [`Worker`] is the handle shared between a component's loop and the
//! outside world. The loop checks it at every protocol step and every idle
//! wait; anyone holding a clone may [`kill`](Worker::kill) the loop or
//! [`notify`](Worker::notify) it that new work is waiting.
//!
//! Cancellation surfaces as the distinct [`Cancelled`] error so loops can
//! tell "asked to stop" apart from a real failure:
//!
//! ```
//! use doorkeep_runtime::{Cancelled, Worker};
//! use std::time::Duration;
//!
//! # async fn example() {
//! let worker = Worker::new("door_up");
//! let handle = worker.clone();
//! handle.kill();
//! assert_eq!(worker.wait(Duration::from_secs(60)).await, Err(Cancelled));
//! # }
//! ```

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

/// Length of one idle tick; cancellation is re-checked at least this often.
pub const TICK: Duration = Duration::from_secs(1);

/// The worker was asked to stop.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("worker cancelled")]
pub struct Cancelled;

#[derive(Debug, Clone)]
pub struct Worker {
    name: Arc<str>,
    token: CancellationToken,
    wakeup: Arc<Notify>,
}

impl Worker {
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self::with_token(name, CancellationToken::new())
    }

    /// A worker that is also cancelled when `parent` is.
    pub fn child_of(name: impl Into<Arc<str>>, parent: &CancellationToken) -> Self {
        Self::with_token(name, parent.child_token())
    }

    fn with_token(name: impl Into<Arc<str>>, token: CancellationToken) -> Self {
        Worker {
            name: name.into(),
            token,
            wakeup: Arc::new(Notify::new()),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Request cancellation and wake every waiter.
    pub fn kill(&self) {
        self.token.cancel();
        self.wakeup.notify_waiters();
    }

    #[must_use]
    pub fn is_killed(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Return `Err(Cancelled)` if the worker has been killed.
    pub fn check_kill(&self) -> Result<(), Cancelled> {
        if self.token.is_cancelled() {
            Err(Cancelled)
        } else {
            Ok(())
        }
    }

    /// Wake the loop from [`wait`](Self::wait).
    ///
    /// A notification sent while nobody waits is kept for the next `wait`.
    pub fn notify(&self) {
        self.wakeup.notify_one();
    }

    /// Block until notified, killed or `timeout` elapses.
    ///
    /// Checks cancellation before blocking and again right after waking.
    pub async fn wait(&self, timeout: Duration) -> Result<(), Cancelled> {
        self.check_kill()?;
        tokio::select! {
            _ = self.token.cancelled() => {}
            _ = self.wakeup.notified() => {}
            _ = tokio::time::sleep(timeout) => {}
        }
        self.check_kill()
    }

    /// Completes when a notification arrives. Does not consider cancellation.
    pub async fn notified(&self) {
        self.wakeup.notified().await;
    }

    /// Sleep `secs` seconds in one-second ticks, checking cancellation on
    /// every tick.
    pub async fn delay(&self, secs: u64) -> Result<(), Cancelled> {
        for _ in 0..secs {
            self.check_kill()?;
            tokio::select! {
                _ = self.token.cancelled() => {}
                _ = tokio::time::sleep(TICK) => {}
            }
        }
        self.check_kill()
    }

    /// Run `fut` unless the worker is killed first.
    pub async fn guard<F: Future>(&self, fut: F) -> Result<F::Output, Cancelled> {
        self.check_kill()?;
        tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(Cancelled),
            out = fut => Ok(out),
        }
    }
}
