//! Keypad one-time secrets.
//!
//! A secret is matchable while `now <= expires_at`. Every match pushes the
//! expiry out to the end of the grace window, so a secret can be reused for
//! a while after it is first entered.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use doorkeep_core::constants::MIN_OTP_SECRET_LENGTH;

/// Storage for keypad secrets.
pub trait OtpStore: Send + Sync {
    /// Unexpired secrets at `now` that are long enough to ever match.
    fn active_secrets(&self, now: DateTime<Utc>) -> Vec<String>;

    /// Keep `secret` valid until at least `until`.
    fn extend(&self, secret: &str, until: DateTime<Utc>);
}

/// In-memory [`OtpStore`].
#[derive(Debug, Default)]
pub struct MemoryOtpStore {
    secrets: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl MemoryOtpStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, DateTime<Utc>>> {
        self.secrets.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Add or replace a secret.
    pub fn insert(&self, secret: impl Into<String>, expires_at: DateTime<Utc>) {
        self.lock().insert(secret.into(), expires_at);
    }

    #[must_use]
    pub fn expires_at(&self, secret: &str) -> Option<DateTime<Utc>> {
        self.lock().get(secret).copied()
    }
}

impl OtpStore for MemoryOtpStore {
    /// Secrets that expired before `now` are dropped from the store.
    fn active_secrets(&self, now: DateTime<Utc>) -> Vec<String> {
        let mut secrets = self.lock();
        secrets.retain(|_, expires_at| now <= *expires_at);
        secrets
            .keys()
            .filter(|secret| secret.len() >= MIN_OTP_SECRET_LENGTH)
            .cloned()
            .collect()
    }

    fn extend(&self, secret: &str, until: DateTime<Utc>) {
        if let Some(expires_at) = self.lock().get_mut(secret) {
            *expires_at = (*expires_at).max(until);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 3, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_short_secrets_never_active() {
        let store = MemoryOtpStore::new();
        store.insert("12345", t0() + Duration::hours(1));
        store.insert("123456", t0() + Duration::hours(1));
        assert_eq!(store.active_secrets(t0()), vec!["123456".to_string()]);
    }

    #[test]
    fn test_expiry_inclusive() {
        let store = MemoryOtpStore::new();
        store.insert("246810", t0());
        assert_eq!(store.active_secrets(t0()).len(), 1);
        assert!(store.active_secrets(t0() + Duration::seconds(1)).is_empty());
    }

    #[test]
    fn test_extend_never_shortens() {
        let store = MemoryOtpStore::new();
        store.insert("246810", t0() + Duration::hours(2));
        store.extend("246810", t0() + Duration::minutes(10));
        assert_eq!(store.expires_at("246810"), Some(t0() + Duration::hours(2)));

        store.extend("246810", t0() + Duration::hours(3));
        assert_eq!(store.expires_at("246810"), Some(t0() + Duration::hours(3)));

        // Unknown secrets are not created
        store.extend("999999", t0());
        assert_eq!(store.expires_at("999999"), None);
    }

    #[test]
    fn test_expired_secrets_dropped() {
        let store = MemoryOtpStore::new();
        store.insert("111111", t0());
        store.insert("222222", t0() + Duration::minutes(5));
        assert_eq!(store.active_secrets(t0() + Duration::minutes(1)), vec!["222222".to_string()]);
        assert_eq!(store.expires_at("111111"), None);

        // A late extend cannot revive a dropped secret
        store.extend("111111", t0() + Duration::hours(1));
        assert_eq!(store.active_secrets(t0() + Duration::minutes(2)).len(), 1);
    }
}
