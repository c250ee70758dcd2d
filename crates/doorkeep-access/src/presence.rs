//! Who is in the facility.
//!
//! Presence is a deadline table: a tag-in keeps its holder present until
//! `now + scan lifetime`. A tag-out hides the holder without touching the
//! deadline, so the entry simply lapses later. After every change, and on a
//! periodic sweep, the facility transition rule is re-applied on the
//! dispatcher task and any resulting transition is announced.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use doorkeep_core::constants::{PRESENCE_SWEEP_SECS, RFID_SCAN_LIFETIME_SECS, TAG_OUT_RECENCY_SECS};
use doorkeep_core::{Door, FacilityState, Transition};
use doorkeep_runtime::Dispatcher;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::notifier::Notifier;

/// Presence signals produced by the lock controllers.
pub trait Presence: Send + Sync {
    /// A member tagged in.
    fn mark_in(&self, id: &str);

    /// A member tagged out.
    fn mark_out(&self, id: &str);

    /// Force-close requested at `door`'s keypad.
    fn force_close(&self, door: Door);

    /// Re-apply the facility rule, e.g. after a door changed state.
    fn refresh(&self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PresenceConfig {
    /// How long one tag-in keeps its holder present.
    pub scan_lifetime_secs: i64,
    /// Window after a tag-out that closes an empty facility and allows a
    /// force-close.
    pub tag_out_recency_secs: i64,
    /// Period of the background re-evaluation.
    pub sweep_secs: u64,
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            scan_lifetime_secs: RFID_SCAN_LIFETIME_SECS,
            tag_out_recency_secs: TAG_OUT_RECENCY_SECS,
            sweep_secs: PRESENCE_SWEEP_SECS,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Entry {
    deadline: DateTime<Utc>,
    hidden: bool,
}

#[derive(Debug, Default)]
struct Table {
    entries: BTreeMap<String, Entry>,
    last_tag_out: Option<DateTime<Utc>>,
}

/// In-memory deadline-table [`Presence`] tracker.
pub struct MemoryPresence {
    table: Mutex<Table>,
    config: PresenceConfig,
    facility: Arc<FacilityState>,
    notifier: Arc<dyn Notifier>,
    dispatcher: Dispatcher,
    me: Weak<MemoryPresence>,
}

impl std::fmt::Debug for MemoryPresence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryPresence")
            .field("table", &self.table)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl MemoryPresence {
    pub fn new(
        config: PresenceConfig,
        facility: Arc<FacilityState>,
        notifier: Arc<dyn Notifier>,
        dispatcher: Dispatcher,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me| MemoryPresence {
            table: Mutex::new(Table::default()),
            config,
            facility,
            notifier,
            dispatcher,
            me: me.clone(),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Table> {
        self.table.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn recent_tag_out(&self, table: &Table, now: DateTime<Utc>) -> bool {
        let window = chrono::Duration::seconds(self.config.tag_out_recency_secs);
        table.last_tag_out.is_some_and(|at| now - at < window)
    }

    pub fn mark_in_at(&self, id: &str, now: DateTime<Utc>) {
        let deadline = now + chrono::Duration::seconds(self.config.scan_lifetime_secs);
        self.lock().entries.insert(
            id.to_ascii_uppercase(),
            Entry {
                deadline,
                hidden: false,
            },
        );
        debug!(tag = id, %deadline, "Tag in");
        self.schedule_update();
    }

    pub fn mark_out_at(&self, id: &str, now: DateTime<Utc>) {
        let mut table = self.lock();
        if let Some(entry) = table.entries.get_mut(&id.to_ascii_uppercase()) {
            entry.hidden = true;
        }
        table.last_tag_out = Some(now);
        drop(table);
        debug!(tag = id, "Tag out");
        self.schedule_update();
    }

    /// Hide everyone present. Only honoured at the upstairs door shortly
    /// after a tag-out. Returns whether anything was done.
    pub fn force_close_at(&self, door: Door, now: DateTime<Utc>) -> bool {
        if door != Door::Upstairs {
            return false;
        }
        let mut table = self.lock();
        if !self.recent_tag_out(&table, now) {
            debug!("Force-close ignored, no recent tag-out");
            return false;
        }
        for entry in table.entries.values_mut() {
            entry.hidden = true;
        }
        drop(table);
        info!("Force-close");
        self.schedule_update();
        true
    }

    /// Ids currently counted as present, in id order.
    #[must_use]
    pub fn present_at(&self, now: DateTime<Utc>) -> Vec<String> {
        let roster = self.facility.roster();
        self.lock()
            .entries
            .iter()
            .filter(|(id, e)| !e.hidden && e.deadline > now && roster.is_member(id))
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Apply the facility transition rule as of `now` and announce the
    /// result.
    pub fn reevaluate_at(&self, now: DateTime<Utc>) -> Option<Transition> {
        let (occupant, recent) = {
            let mut table = self.lock();
            table.entries.retain(|_, e| e.deadline > now);
            let recent = self.recent_tag_out(&table, now);
            drop(table);
            (self.present_at(now).into_iter().next(), recent)
        };
        let transition = self.facility.apply_presence(occupant.as_deref(), recent)?;
        self.notifier.announce(&transition.announcement());
        Some(transition)
    }

    fn schedule_update(&self) {
        let me = self.me.clone();
        self.dispatcher.schedule(move || async move {
            if let Some(me) = me.upgrade() {
                me.reevaluate_at(Utc::now());
            }
            Ok(())
        });
    }

    /// Re-evaluate every sweep period until the dispatcher stops.
    pub fn start_sweep(&self) {
        let me = self.me.clone();
        let period = Duration::from_secs(self.config.sweep_secs);
        self.dispatcher.schedule_delay(period, move || async move {
            if let Some(me) = me.upgrade() {
                me.reevaluate_at(Utc::now());
                me.start_sweep();
            }
            Ok(())
        });
    }
}

impl Presence for MemoryPresence {
    fn mark_in(&self, id: &str) {
        self.mark_in_at(id, Utc::now());
    }

    fn mark_out(&self, id: &str) {
        self.mark_out_at(id, Utc::now());
    }

    fn force_close(&self, door: Door) {
        self.force_close_at(door, Utc::now());
    }

    fn refresh(&self) {
        self.schedule_update();
    }
}
