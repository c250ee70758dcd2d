//! Access decisions and the collaborators the lock controllers report to.
//!
//! - [`AccessPolicy`]: decides host-side unlock requests.
//! - [`OtpStore`]: keypad secrets with a sliding grace window.
//! - [`Presence`]: who is in, and the facility open/closed rule.
//! - [`Notifier`]: fire-and-forget announcements.
//! - [`RosterSync`]: roster polling with fan-out to the controllers.

pub mod notifier;
pub mod otp;
pub mod policy;
pub mod presence;
pub mod roster;

pub use notifier::{ChannelNotifier, LogNotifier, Notifier};
pub use otp::{MemoryOtpStore, OtpStore};
pub use policy::{AccessPolicy, Credential, OpenPeriod, PolicyConfig};
pub use presence::{MemoryPresence, Presence, PresenceConfig};
pub use roster::{JsonFileRoster, KeySink, RosterError, RosterSource, RosterSync};
