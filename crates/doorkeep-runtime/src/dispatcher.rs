//! Single-consumer deferred-call queue.
//!
//! Components never call back into each other while holding their own
//! lock. Instead they hand a closure to the [`Dispatcher`], which runs it
//! later on its own task with no component lock held.
//!
//! Calls become due at their submission time or after a delay. On each wake
//! the loop takes every due call out of the queue, releases the queue lock,
//! and runs them in submission order. A call that fails or panics is logged
//! and does not affect the others.
//!
//! ```
//! use doorkeep_runtime::Dispatcher;
//! use std::time::Duration;
//!
//! # async fn example() {
//! let dispatcher = Dispatcher::new();
//! let runner = tokio::spawn({
//!     let dispatcher = dispatcher.clone();
//!     async move { dispatcher.run().await }
//! });
//!
//! dispatcher.schedule(|| async {
//!     tracing::info!("runs as soon as possible");
//!     Ok(())
//! });
//! dispatcher.schedule_delay(Duration::from_secs(60), || async { Ok(()) });
//!
//! dispatcher.shutdown();
//! runner.await.unwrap();
//! # }
//! ```

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, error, trace, warn};

type CallFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;
type Action = Box<dyn FnOnce() -> CallFuture + Send>;

struct DeferredCall {
    due: Instant,
    seq: u64,
    action: Action,
}

struct Queue {
    pending: Vec<DeferredCall>,
    accepting: bool,
    next_seq: u64,
}

impl Queue {
    /// Remove and return every call due at `now`, in submission order.
    fn take_due(&mut self, now: Instant) -> Vec<DeferredCall> {
        let (mut due, rest): (Vec<_>, Vec<_>) =
            self.pending.drain(..).partition(|call| call.due <= now);
        self.pending = rest;
        due.sort_by_key(|call| call.seq);
        due
    }

    fn next_due(&self) -> Option<Instant> {
        self.pending.iter().map(|call| call.due).min()
    }
}

struct Shared {
    queue: Mutex<Queue>,
    wakeup: Notify,
}

/// Handle to the deferred-call queue. Clones share the same queue.
#[derive(Clone)]
pub struct Dispatcher {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let queue = self.lock();
        f.debug_struct("Dispatcher")
            .field("pending", &queue.pending.len())
            .field("accepting", &queue.accepting)
            .finish()
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    #[must_use]
    pub fn new() -> Self {
        Dispatcher {
            shared: Arc::new(Shared {
                queue: Mutex::new(Queue {
                    pending: Vec::new(),
                    accepting: true,
                    next_seq: 0,
                }),
                wakeup: Notify::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Queue> {
        self.shared.queue.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Run `f` as soon as possible on the dispatcher task.
    ///
    /// Returns `false` if the dispatcher is shutting down and the call was
    /// dropped.
    pub fn schedule<F, Fut>(&self, f: F) -> bool
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.schedule_delay(Duration::ZERO, f)
    }

    /// Run `f` no earlier than `delay` from now.
    pub fn schedule_delay<F, Fut>(&self, delay: Duration, f: F) -> bool
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let mut queue = self.lock();
        if !queue.accepting {
            debug!("Dispatcher stopped, dropping deferred call");
            return false;
        }
        let seq = queue.next_seq;
        queue.next_seq += 1;
        queue.pending.push(DeferredCall {
            due: Instant::now() + delay,
            seq,
            action: Box::new(move || Box::pin(f()) as CallFuture),
        });
        drop(queue);
        self.shared.wakeup.notify_one();
        true
    }

    /// Number of calls not yet run.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.lock().pending.len()
    }

    /// Stop accepting work and make [`run`](Self::run) return after one
    /// final pass over the calls already due.
    pub fn shutdown(&self) {
        self.lock().accepting = false;
        self.shared.wakeup.notify_one();
    }

    /// Dispatcher loop. Returns after [`shutdown`](Self::shutdown).
    pub async fn run(&self) {
        debug!("Dispatcher running");
        loop {
            let (due, next, accepting) = {
                let mut queue = self.lock();
                let due = queue.take_due(Instant::now());
                (due, queue.next_due(), queue.accepting)
            };

            if !accepting {
                self.drain_final(due).await;
                return;
            }

            if !due.is_empty() {
                for call in due {
                    Self::execute(call).await;
                }
                continue;
            }

            match next {
                Some(at) => {
                    tokio::select! {
                        _ = self.shared.wakeup.notified() => {}
                        _ = tokio::time::sleep_until(at) => {}
                    }
                }
                None => self.shared.wakeup.notified().await,
            }
        }
    }

    async fn drain_final(&self, due: Vec<DeferredCall>) {
        for call in due {
            Self::execute(call).await;
        }
        let mut queue = self.lock();
        let dropped = queue.pending.len();
        queue.pending.clear();
        if dropped > 0 {
            debug!(dropped, "Dropped future-dated calls on shutdown");
        }
        debug!("Dispatcher stopped");
    }

    async fn execute(call: DeferredCall) {
        trace!(seq = call.seq, "Running deferred call");
        let action = call.action;
        let outcome = std::panic::AssertUnwindSafe(async move { action().await })
            .catch_unwind()
            .await;
        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(seq = call.seq, error = %e, "Deferred call failed"),
            Err(panic) => {
                let msg = panic_message(panic.as_ref());
                error!(seq = call.seq, panic = %msg, "Deferred call panicked");
            }
        }
    }
}

pub(crate) fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
