//! Timing and sizing constants shared by the daemon's components.
//!
//! The values mirror the behaviour of the deployed lock firmware and the
//! facility's operating rules. Components take these as configuration
//! defaults, so tests can shrink them without touching the constants.
//!
//! # Usage
//!
//! ```
//! use doorkeep_core::constants::*;
//! use std::time::Duration;
//!
//! let read_timeout = Duration::from_secs(SERIAL_POLL_PERIOD_SECS);
//! assert!(read_timeout < Duration::from_secs(SERIAL_PING_INTERVAL_SECS));
//! ```

// ============================================================================
// Serial link
// ============================================================================

/// Baud rate of every controller board.
pub const SERIAL_BAUD_RATE: u32 = 9600;

/// Read timeout on the serial link, also the idle poll period.
///
/// A command that receives no complete line within this period is treated
/// as a dead link.
pub const SERIAL_POLL_PERIOD_SECS: u64 = 5;

/// Idle time after which a liveness challenge is issued anyway.
pub const SERIAL_PING_INTERVAL_SECS: u64 = 60;

/// Quiet period that ends the stale-output drain after opening a port.
pub const SERIAL_QUIET_PERIOD_MS: u64 = 1000;

/// Longest line accepted from a controller before the link is declared corrupt.
pub const MAX_LINE_LENGTH: usize = 256;

// ============================================================================
// Keypad and OTP
// ============================================================================

/// Lifetime of the keypad buffer, refreshed on every buffered keystroke.
pub const KEYPAD_BUFFER_LIFETIME_SECS: u64 = 60;

/// Shortest stored OTP secret that may ever match.
pub const MIN_OTP_SECRET_LENGTH: usize = 6;

/// Grace window granted to an OTP secret each time it matches.
pub const OTP_GRACE_WINDOW_SECS: i64 = 10 * 60;

/// Keystroke that requests a force-close.
pub const KEY_FORCE_CLOSE: char = '*';

/// Keystroke checked as the recurring-override token.
pub const KEY_OVERRIDE: char = '#';

/// Credential prefix for keypad-originated credentials.
pub const OTP_PREFIX: char = '!';

/// The recurring-override token.
pub const OVERRIDE_TOKEN: &str = "!#";

// ============================================================================
// Presence
// ============================================================================

/// How long an RFID scan keeps its holder present.
pub const RFID_SCAN_LIFETIME_SECS: i64 = 15 * 60;

/// Window after a tag-out during which the facility closes with nobody present
/// and a force-close request is honoured.
pub const TAG_OUT_RECENCY_SECS: i64 = 60;

/// Period of the presence re-evaluation sweep.
pub const PRESENCE_SWEEP_SECS: u64 = 60;

// ============================================================================
// Daemon
// ============================================================================

/// Roster source poll period.
pub const ROSTER_POLL_PERIOD_SECS: u64 = 20;

/// Grace period granted to workers on shutdown.
pub const SHUTDOWN_GRACE_SECS: u64 = 30;

/// Delay before reconnecting a controller after a link failure.
pub const RECONNECT_DELAY_SECS: u64 = 5;
