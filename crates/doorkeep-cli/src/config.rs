//! Daemon configuration, read from an optional TOML file.
//!
//! Every key is optional; a missing file section falls back to the
//! defaults of the component it configures.
//!
//! ```toml
//! serial_dir = "/dev"
//! roster_path = "/var/lib/doorkeep/roster.json"
//!
//! [lock]
//! ping_interval_secs = 60
//!
//! [policy]
//! override_day = "Tue"
//! override_from_hour = 17
//!
//! [[otp]]
//! secret = "246810"
//! expires_at = "2026-12-31T23:00:00Z"
//! ```

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use doorkeep_access::{PolicyConfig, PresenceConfig};
use doorkeep_controller::{LockConfig, StatusConfig};
use doorkeep_core::constants::{ROSTER_POLL_PERIOD_SECS, SHUTDOWN_GRACE_SECS};
use serde::Deserialize;

/// A keypad secret loaded at startup.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct OtpSeed {
    pub secret: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Directory holding the `door_up`, `door_down` and status ports.
    pub serial_dir: PathBuf,
    /// Port name of the status board; unset runs without one.
    pub status_port: Option<String>,
    pub roster_path: PathBuf,
    pub roster_poll_secs: u64,
    pub shutdown_grace_secs: u64,
    pub lock: LockConfig,
    pub status: StatusConfig,
    pub policy: PolicyConfig,
    pub presence: PresenceConfig,
    pub otp: Vec<OtpSeed>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            serial_dir: PathBuf::from("/dev"),
            status_port: Some("aux".to_string()),
            roster_path: PathBuf::from("roster.json"),
            roster_poll_secs: ROSTER_POLL_PERIOD_SECS,
            shutdown_grace_secs: SHUTDOWN_GRACE_SECS,
            lock: LockConfig::default(),
            status: StatusConfig::default(),
            policy: PolicyConfig::default(),
            presence: PresenceConfig::default(),
            otp: Vec::new(),
        }
    }
}

impl DaemonConfig {
    /// Load `path`, or the defaults when no file is given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        Self::parse(&raw).with_context(|| format!("Invalid config {}", path.display()))
    }

    pub fn parse(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    #[must_use]
    pub fn port_path(&self, port: &str) -> PathBuf {
        self.serial_dir.join(port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Weekday};
    use rstest::rstest;

    #[test]
    fn test_empty_file_is_default() {
        assert_eq!(DaemonConfig::parse("").unwrap(), DaemonConfig::default());
    }

    #[test]
    fn test_partial_sections_keep_defaults() {
        let config = DaemonConfig::parse(
            r#"
            serial_dir = "/dev/serial/by-id"
            status_port = "marvin"

            [lock]
            ping_interval_secs = 30

            [policy]
            override_day = "Thu"

            [[otp]]
            secret = "246810"
            expires_at = "2026-12-31T23:00:00Z"
            "#,
        )
        .unwrap();

        assert_eq!(config.port_path("door_up"), PathBuf::from("/dev/serial/by-id/door_up"));
        assert_eq!(config.status_port.as_deref(), Some("marvin"));
        assert_eq!(config.lock.ping_interval_secs, 30);
        assert_eq!(config.lock.read_timeout_secs, LockConfig::default().read_timeout_secs);
        assert_eq!(config.policy.override_day, Weekday::Thu);
        assert_eq!(config.policy.override_from_hour, 17);
        assert_eq!(
            config.otp,
            vec![OtpSeed {
                secret: "246810".to_string(),
                expires_at: Utc.with_ymd_and_hms(2026, 12, 31, 23, 0, 0).unwrap(),
            }]
        );
    }

    #[rstest]
    #[case("roster_poll_secs = \"often\"")]
    #[case("[lock]\nbell_secs = -1")]
    #[case("[[otp]]\nsecret = \"123456\"")]
    fn test_invalid_values_rejected(#[case] raw: &str) {
        assert!(DaemonConfig::parse(raw).is_err());
    }

    #[test]
    fn test_missing_file_reports_path() {
        let err = DaemonConfig::load(Some(Path::new("/nonexistent/doorkeep.toml"))).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/doorkeep.toml"));
    }
}
