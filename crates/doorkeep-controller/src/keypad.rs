use std::time::Duration;

use tokio::time::Instant;

/// Keystrokes typed on a door keypad, forgotten after a period of silence.
///
/// Each keystroke pushes the expiry out to `lifetime` from now.
#[derive(Debug, Clone)]
pub struct KeypadBuffer {
    digits: String,
    expires_at: Option<Instant>,
    lifetime: Duration,
}

impl KeypadBuffer {
    #[must_use]
    pub fn new(lifetime: Duration) -> Self {
        Self {
            digits: String::new(),
            expires_at: None,
            lifetime,
        }
    }

    /// Append `key` and restart the expiry. Digits that had already expired
    /// at `now` are dropped first.
    pub fn push(&mut self, key: char, now: Instant) {
        self.expire(now);
        self.digits.push(key);
        self.expires_at = Some(now + self.lifetime);
    }

    /// Clear the buffer if its expiry has passed. Returns `true` if it did.
    pub fn expire(&mut self, now: Instant) -> bool {
        match self.expires_at {
            Some(at) if at < now => {
                self.clear();
                true
            }
            _ => false,
        }
    }

    pub fn clear(&mut self) {
        self.digits.clear();
        self.expires_at = None;
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.digits
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.digits.is_empty()
    }
}
