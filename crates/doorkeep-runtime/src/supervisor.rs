//! Spawns worker loops and stops them on shutdown.
//!
//! Each loop runs as its own task. A loop that returns an error or panics
//! is logged with its worker name; the other loops keep running. On
//! shutdown every worker is killed and the supervisor waits up to the grace
//! period for the loops to return. Stragglers are reported and abandoned.

use std::collections::BTreeSet;
use std::fmt::Display;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::FutureExt;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::dispatcher::panic_message;
use crate::worker::Worker;

#[derive(Debug)]
pub struct Supervisor {
    tasks: JoinSet<()>,
    workers: Vec<Worker>,
    alive: Arc<Mutex<BTreeSet<String>>>,
    root: CancellationToken,
    grace: Duration,
}

impl Supervisor {
    #[must_use]
    pub fn new(grace: Duration) -> Self {
        Supervisor {
            tasks: JoinSet::new(),
            workers: Vec::new(),
            alive: Arc::new(Mutex::new(BTreeSet::new())),
            root: CancellationToken::new(),
            grace,
        }
    }

    /// A new worker handle cancelled together with every other worker of
    /// this supervisor.
    #[must_use]
    pub fn worker(&self, name: &str) -> Worker {
        Worker::child_of(name, &self.root)
    }

    /// Run `fut` as the loop of `worker`.
    pub fn spawn<F, E>(&mut self, worker: Worker, fut: F)
    where
        F: Future<Output = Result<(), E>> + Send + 'static,
        E: Display + Send + 'static,
    {
        let name = worker.name().to_string();
        let alive = Arc::clone(&self.alive);
        lock(&alive).insert(name.clone());
        self.workers.push(worker);

        self.tasks.spawn(async move {
            info!(worker = %name, "Worker started");
            match std::panic::AssertUnwindSafe(fut).catch_unwind().await {
                Ok(Ok(())) => info!(worker = %name, "Worker stopped"),
                Ok(Err(e)) => error!(worker = %name, error = %e, "Worker failed"),
                Err(panic) => {
                    let msg = panic_message(panic.as_ref());
                    error!(worker = %name, panic = %msg, "Worker panicked");
                }
            }
            lock(&alive).remove(&name);
        });
    }

    /// Names of loops that have not returned yet.
    #[must_use]
    pub fn alive(&self) -> Vec<String> {
        lock(&self.alive).iter().cloned().collect()
    }

    /// Kill every worker and wait for their loops within the grace period.
    ///
    /// Returns the names of loops still running when the grace period ran
    /// out; those tasks are aborted.
    pub async fn shutdown(mut self) -> Vec<String> {
        info!(workers = self.workers.len(), "Stopping workers");
        self.root.cancel();
        for worker in &self.workers {
            worker.kill();
        }

        let tasks = &mut self.tasks;
        let done = async { while tasks.join_next().await.is_some() {} };
        if tokio::time::timeout(self.grace, done).await.is_ok() {
            info!("All workers stopped within grace period");
            return Vec::new();
        }

        let stuck = self.alive();
        warn!(grace = ?self.grace, ?stuck, "Workers did not stop in time, abandoning");
        self.tasks.abort_all();
        stuck
    }
}

fn lock(alive: &Mutex<BTreeSet<String>>) -> std::sync::MutexGuard<'_, BTreeSet<String>> {
    alive.lock().unwrap_or_else(|e| e.into_inner())
}
