//! Shared facility state.
//!
//! [`FacilityState`] is the one place holding the facility-open flag, the
//! per-door open/closed flags and the current [`Roster`]. It is a leaf: its
//! methods never call out to other components, so any component may call it
//! while holding its own lock.
//!
//! Readers that need a consistent view take a [`FacilitySnapshot`], which is
//! captured under a single lock acquisition. A roster replacement swaps the
//! whole list at once, so a snapshot sees either the old roster or the new
//! one, never a mix.

use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::watch;
use tracing::{debug, info};

use crate::types::{Door, Roster};

/// Observable summary of the facility, published on every change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FacilityStatus {
    pub is_open: bool,
    pub upstairs_open: bool,
    pub downstairs_open: bool,
}

impl FacilityStatus {
    #[must_use]
    pub fn door_open(&self, door: Door) -> bool {
        match door {
            Door::Upstairs => self.upstairs_open,
            Door::Downstairs => self.downstairs_open,
        }
    }
}

/// Consistent view used by access decisions.
#[derive(Debug, Clone)]
pub struct FacilitySnapshot {
    pub is_open: bool,
    pub roster: Arc<Roster>,
}

/// Outcome of the facility state-transition rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    Opened { by: String },
    Closed,
}

impl Transition {
    /// Text announced to the facility's notification channel.
    #[must_use]
    pub fn announcement(&self) -> String {
        match self {
            Transition::Opened { by } => format!("The space is open! {by} is here!"),
            Transition::Closed => "The space is closed".to_string(),
        }
    }
}

#[derive(Debug)]
struct Inner {
    is_open: bool,
    doors: [bool; 2],
    roster: Arc<Roster>,
}

impl Inner {
    fn status(&self) -> FacilityStatus {
        FacilityStatus {
            is_open: self.is_open,
            upstairs_open: self.doors[Door::Upstairs.index()],
            downstairs_open: self.doors[Door::Downstairs.index()],
        }
    }
}

/// Facility-wide state with its own lock.
#[derive(Debug)]
pub struct FacilityState {
    inner: Mutex<Inner>,
    status_tx: watch::Sender<FacilityStatus>,
}

impl Default for FacilityState {
    fn default() -> Self {
        Self::new()
    }
}

impl FacilityState {
    /// Closed facility, both doors closed, empty roster.
    #[must_use]
    pub fn new() -> Self {
        Self::with_roster(Roster::default())
    }

    #[must_use]
    pub fn with_roster(roster: Roster) -> Self {
        let inner = Inner {
            is_open: false,
            doors: [false; 2],
            roster: Arc::new(roster),
        };
        let (status_tx, _) = watch::channel(inner.status());
        FacilityState {
            inner: Mutex::new(inner),
            status_tx,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn publish(&self, inner: &Inner) {
        self.status_tx.send_replace(inner.status());
    }

    /// Subscribe to status changes.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<FacilityStatus> {
        self.status_tx.subscribe()
    }

    #[must_use]
    pub fn status(&self) -> FacilityStatus {
        self.lock().status()
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.lock().is_open
    }

    #[must_use]
    pub fn door_open(&self, door: Door) -> bool {
        self.lock().doors[door.index()]
    }

    #[must_use]
    pub fn roster(&self) -> Arc<Roster> {
        Arc::clone(&self.lock().roster)
    }

    /// Roster and open flag as of one instant.
    #[must_use]
    pub fn snapshot(&self) -> FacilitySnapshot {
        let inner = self.lock();
        FacilitySnapshot {
            is_open: inner.is_open,
            roster: Arc::clone(&inner.roster),
        }
    }

    /// Replace the roster wholesale. Returns `true` if it differed.
    pub fn replace_roster(&self, roster: Roster) -> bool {
        let mut inner = self.lock();
        if *inner.roster == roster {
            return false;
        }
        info!(tags = roster.len(), "Roster replaced");
        inner.roster = Arc::new(roster);
        true
    }

    /// Record a door's physical state. Returns `true` if it changed.
    pub fn set_door_state(&self, door: Door, open: bool) -> bool {
        let mut inner = self.lock();
        let slot = &mut inner.doors[door.index()];
        if *slot == open {
            return false;
        }
        *slot = open;
        debug!(door = %door, open, "Door state changed");
        self.publish(&inner);
        true
    }

    /// Apply the facility state-transition rule.
    ///
    /// `occupant` is any one member currently present, `recent_tag_out`
    /// tells whether someone tagged out within the recency window.
    ///
    /// With nobody present the facility closes if a tag-out was recent and
    /// otherwise follows the upstairs door, which can close it but never
    /// open it. With anyone present a closed facility opens.
    pub fn apply_presence(&self, occupant: Option<&str>, recent_tag_out: bool) -> Option<Transition> {
        let mut inner = self.lock();
        let old = inner.is_open;
        let transition = match occupant {
            None => {
                let keep_open = !recent_tag_out && inner.doors[Door::Upstairs.index()];
                if old && !keep_open {
                    inner.is_open = false;
                    Some(Transition::Closed)
                } else {
                    None
                }
            }
            Some(who) if !old => {
                inner.is_open = true;
                Some(Transition::Opened { by: who.to_string() })
            }
            Some(_) => None,
        };
        if let Some(t) = &transition {
            info!(?t, "Facility state changed");
            self.publish(&inner);
        }
        transition
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AccessLevel, Tag};

    fn roster_of(ids: &[&str]) -> Roster {
        ids.iter()
            .map(|id| Tag::new(id, "1234", AccessLevel::Both).unwrap())
            .collect()
    }

    #[test]
    fn test_new_facility_closed() {
        let f = FacilityState::new();
        assert!(!f.is_open());
        assert!(!f.door_open(Door::Upstairs));
        assert!(f.roster().is_empty());
    }

    #[test]
    fn test_occupant_opens_facility() {
        let f = FacilityState::new();
        let t = f.apply_presence(Some("alice"), false);
        assert_eq!(t, Some(Transition::Opened { by: "alice".into() }));
        assert!(f.is_open());
        // Already open: no further transition
        assert_eq!(f.apply_presence(Some("bob"), false), None);
    }

    #[test]
    fn test_empty_facility_follows_upstairs_door() {
        let f = FacilityState::new();
        f.apply_presence(Some("alice"), false);
        f.set_door_state(Door::Upstairs, true);

        // Nobody present but the internal door is open: stays open
        assert_eq!(f.apply_presence(None, false), None);
        assert!(f.is_open());

        f.set_door_state(Door::Upstairs, false);
        assert_eq!(f.apply_presence(None, false), Some(Transition::Closed));
        assert!(!f.is_open());
    }

    #[test]
    fn test_recent_tag_out_closes_despite_open_door() {
        let f = FacilityState::new();
        f.apply_presence(Some("alice"), false);
        f.set_door_state(Door::Upstairs, true);
        assert_eq!(f.apply_presence(None, true), Some(Transition::Closed));
    }

    #[test]
    fn test_open_door_never_opens_closed_facility() {
        let f = FacilityState::new();
        f.set_door_state(Door::Upstairs, true);
        assert_eq!(f.apply_presence(None, false), None);
        assert!(!f.is_open());
    }

    #[test]
    fn test_replace_roster_reports_difference() {
        let f = FacilityState::new();
        assert!(f.replace_roster(roster_of(&["AAAA"])));
        assert!(!f.replace_roster(roster_of(&["AAAA"])));
        assert!(f.replace_roster(roster_of(&["AAAA", "BBBB"])));
        assert_eq!(f.roster().len(), 2);
    }

    #[test]
    fn test_snapshot_keeps_old_roster_after_replace() {
        let f = FacilityState::with_roster(roster_of(&["AAAA"]));
        let before = f.snapshot();
        f.replace_roster(roster_of(&["BBBB"]));
        assert!(before.roster.is_member("AAAA"));
        assert!(!before.roster.is_member("BBBB"));
        assert!(f.snapshot().roster.is_member("BBBB"));
    }

    #[test]
    fn test_status_published_to_subscribers() {
        let f = FacilityState::new();
        let mut rx = f.subscribe();
        assert!(!rx.borrow_and_update().is_open);

        f.set_door_state(Door::Downstairs, true);
        assert!(rx.has_changed().unwrap());
        assert!(rx.borrow_and_update().door_open(Door::Downstairs));

        f.apply_presence(Some("alice"), false);
        assert!(rx.borrow_and_update().is_open);
    }

    #[test]
    fn test_set_door_state_reports_change() {
        let f = FacilityState::new();
        assert!(f.set_door_state(Door::Upstairs, true));
        assert!(!f.set_door_state(Door::Upstairs, true));
        assert!(f.status().upstairs_open);
    }
}
