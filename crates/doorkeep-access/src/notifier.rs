//! Facility-wide announcements.
//!
//! Announcing is fire-and-forget: implementations must return immediately
//! and never fail the caller.

use tokio::sync::mpsc;
use tracing::{info, warn};

pub trait Notifier: Send + Sync {
    fn announce(&self, text: &str);
}

/// Writes announcements to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn announce(&self, text: &str) {
        info!(target: "doorkeep::announce", "{text}");
    }
}

/// Forwards announcements to a channel, e.g. a chat relay task.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    tx: mpsc::UnboundedSender<String>,
}

impl ChannelNotifier {
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl Notifier for ChannelNotifier {
    fn announce(&self, text: &str) {
        if self.tx.send(text.to_string()).is_err() {
            warn!(text, "Announcement dropped, receiver gone");
        }
    }
}
