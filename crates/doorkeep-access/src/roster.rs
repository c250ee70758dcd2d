//! Roster polling and fan-out to the lock controllers.
//!
//! [`RosterSync`] reads a [`RosterSource`] every poll period. When the
//! result differs from the roster held by [`FacilityState`] it replaces it
//! wholesale and schedules a key update on every registered [`KeySink`]
//! through the dispatcher. A failed read keeps the last good roster.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use doorkeep_core::{Door, FacilityState, KeyRecord, Roster, Tag};
use doorkeep_runtime::{Cancelled, Dispatcher, Worker};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum RosterError {
    #[error("Failed to read roster {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse roster: {0}")]
    Parse(#[from] serde_json::Error),
}

impl RosterError {
    pub fn read(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Read {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }
}

/// Where the current list of credentials comes from.
pub trait RosterSource: Send + Sync {
    fn current(&self) -> impl Future<Output = Result<Roster, RosterError>> + Send;
}

/// Roster kept in a JSON file: an array of `{"id", "pin", "access"}`.
#[derive(Debug, Clone)]
pub struct JsonFileRoster {
    path: PathBuf,
}

impl JsonFileRoster {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl RosterSource for JsonFileRoster {
    async fn current(&self) -> Result<Roster, RosterError> {
        let raw = tokio::fs::read(&self.path)
            .await
            .map_err(|e| RosterError::read(&self.path, e))?;
        let tags: Vec<Tag> = serde_json::from_slice(&raw)?;
        Ok(Roster::new(tags))
    }
}

/// Receives the key list assigned to one door.
pub trait KeySink: Send + Sync {
    fn set_keys(&self, keys: Vec<KeyRecord>);
}

pub struct RosterSync<S> {
    source: S,
    facility: Arc<FacilityState>,
    dispatcher: Dispatcher,
    sinks: Vec<(Door, Arc<dyn KeySink>)>,
    primed: AtomicBool,
}

impl<S: RosterSource> RosterSync<S> {
    pub fn new(source: S, facility: Arc<FacilityState>, dispatcher: Dispatcher) -> Self {
        Self {
            source,
            facility,
            dispatcher,
            sinks: Vec::new(),
            primed: AtomicBool::new(false),
        }
    }

    /// Register the controller guarding `door`.
    pub fn add_sink(&mut self, door: Door, sink: Arc<dyn KeySink>) {
        self.sinks.push((door, sink));
    }

    /// Poll the source once. Returns `true` if key lists were pushed.
    ///
    /// The first successful poll always pushes, so controllers start with
    /// a key list even when the roster is empty.
    pub async fn refresh(&self) -> Result<bool, RosterError> {
        let roster = self.source.current().await?;
        let changed = self.facility.replace_roster(roster);
        let first = !self.primed.swap(true, Ordering::SeqCst);
        if !changed && !first {
            debug!("Roster unchanged");
            return Ok(false);
        }

        let roster = self.facility.roster();
        for (door, sink) in &self.sinks {
            let keys = roster.key_records(*door);
            info!(door = %door, keys = keys.len(), "Scheduling key update");
            let sink = Arc::clone(sink);
            self.dispatcher.schedule(move || async move {
                sink.set_keys(keys);
                Ok(())
            });
        }
        Ok(true)
    }

    /// Poll until cancelled.
    pub async fn run(&self, worker: Worker, period_secs: u64) -> Result<(), Cancelled> {
        loop {
            if let Err(e) = worker.guard(self.refresh()).await? {
                warn!(error = %e, "Roster refresh failed, keeping last good roster");
            }
            worker.delay(period_secs).await?;
        }
    }
}
