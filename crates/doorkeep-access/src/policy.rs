//! Host-side access decisions.
//!
//! The lock controllers check cards and PINs on their own. The host is only
//! asked when a card was rejected or queried on-device, or when someone types
//! on the keypad. Every decision reads roster and open flag from one
//! [`FacilitySnapshot`].
//!
//! | Credential | Granted when |
//! |---|---|
//! | override token `!#` | inside the weekly override window and the facility is open |
//! | keypad (`!` prefix) | the keystroke buffer ends with an active secret |
//! | tag id | the tag belongs to a member and the facility is open |

use std::sync::Arc;

use chrono::{DateTime, Datelike, Local, NaiveDateTime, Timelike, Utc, Weekday};
use doorkeep_core::FacilitySnapshot;
use doorkeep_core::constants::{
    MIN_OTP_SECRET_LENGTH, OTP_GRACE_WINDOW_SECS, OTP_PREFIX, OVERRIDE_TOKEN,
};
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use tracing::debug;

use crate::otp::OtpStore;

/// A credential presented for a host decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Credential<'a> {
    /// A tag id read by a controller.
    Tag(&'a str),
    /// The recurring-override token.
    Override,
    /// A keypad entry, matched against the accumulated keystrokes.
    Otp { buffer: &'a str },
}

impl<'a> Credential<'a> {
    /// Interpret a presented token. Tokens starting with `!` come from the
    /// keypad; `buffer` holds the keystrokes typed so far.
    #[must_use]
    pub fn from_token(token: &'a str, buffer: &'a str) -> Self {
        if token == OVERRIDE_TOKEN {
            Credential::Override
        } else if token.starts_with(OTP_PREFIX) {
            Credential::Otp { buffer }
        } else {
            Credential::Tag(token)
        }
    }
}

/// A one-off period during which the override token is honoured.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenPeriod {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

/// Settings for [`AccessPolicy`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// Weekday of the recurring open evening.
    pub override_day: Weekday,
    /// Local hour from which the override token works on that day.
    pub override_from_hour: u32,
    /// Extra periods (local time, end exclusive) when the override works.
    pub open_periods: Vec<OpenPeriod>,
    /// Seconds a matched keypad secret stays valid.
    pub otp_grace_secs: i64,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            override_day: Weekday::Tue,
            override_from_hour: 17,
            open_periods: Vec::new(),
            otp_grace_secs: OTP_GRACE_WINDOW_SECS,
        }
    }
}

impl PolicyConfig {
    /// Whether the override token is honoured at `now`.
    #[must_use]
    pub fn override_window_contains(&self, now: DateTime<Local>) -> bool {
        if now.weekday() == self.override_day && now.hour() >= self.override_from_hour {
            return true;
        }
        let local = now.naive_local();
        self.open_periods
            .iter()
            .any(|p| p.start <= local && local < p.end)
    }
}

pub struct AccessPolicy {
    config: PolicyConfig,
    otp: Arc<dyn OtpStore>,
}

impl std::fmt::Debug for AccessPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessPolicy")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl AccessPolicy {
    pub fn new(config: PolicyConfig, otp: Arc<dyn OtpStore>) -> Self {
        Self { config, otp }
    }

    #[must_use]
    pub fn config(&self) -> &PolicyConfig {
        &self.config
    }

    /// Decide whether `credential` opens the door at `now`.
    ///
    /// A matched keypad secret has its expiry extended as a side effect.
    pub fn decide(
        &self,
        credential: Credential<'_>,
        snapshot: &FacilitySnapshot,
        now: DateTime<Local>,
    ) -> bool {
        let granted = match credential {
            Credential::Override => {
                snapshot.is_open && self.config.override_window_contains(now)
            }
            Credential::Otp { buffer } => self.match_otp(buffer, now.with_timezone(&Utc)),
            Credential::Tag(id) => snapshot.is_open && snapshot.roster.is_member(id),
        };
        debug!(?credential, is_open = snapshot.is_open, granted, "Access decision");
        granted
    }

    fn match_otp(&self, buffer: &str, now: DateTime<Utc>) -> bool {
        let typed = buffer.as_bytes();
        for secret in self.otp.active_secrets(now) {
            let secret_bytes = secret.as_bytes();
            if secret_bytes.len() < MIN_OTP_SECRET_LENGTH || secret_bytes.len() > typed.len() {
                continue;
            }
            let tail = &typed[typed.len() - secret_bytes.len()..];
            if bool::from(tail.ct_eq(secret_bytes)) {
                let until = now + chrono::Duration::seconds(self.config.otp_grace_secs);
                self.otp.extend(&secret, until);
                debug!(until = %until, "Keypad secret matched");
                return true;
            }
        }
        false
    }
}
