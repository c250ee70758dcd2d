//! Six-character time code used by the liveness challenge and the event log.
//!
//! The low 36 bits of a Unix timestamp are emitted six bits at a time,
//! least significant group first, using the alphabet `A-Z a-z 0-9 + /`.
//! The value is opaque to the controller: it only echoes it back (or stamps
//! its log entries with its own clock in the same encoding).

use std::fmt;
use std::str::FromStr;

use chrono::Utc;

use crate::error::{ProtocolError, Result};

/// Number of characters in a time code.
pub const TIME_CODE_LEN: usize = 6;

/// Bits carried by a time code.
pub const TIME_CODE_BITS: u32 = 36;

const MASK: u64 = (1 << TIME_CODE_BITS) - 1;

fn encode_sextet(val: u8) -> u8 {
    match val {
        0..=25 => b'A' + val,
        26..=51 => b'a' + (val - 26),
        52..=61 => b'0' + (val - 52),
        62 => b'+',
        _ => b'/',
    }
}

fn decode_sextet(c: u8) -> Result<u64> {
    let v = match c {
        b'A'..=b'Z' => c - b'A',
        b'a'..=b'z' => c - b'a' + 26,
        b'0'..=b'9' => c - b'0' + 52,
        b'+' => 62,
        b'/' => 63,
        _ => return Err(ProtocolError::InvalidTimeCode(char::from(c))),
    };
    Ok(u64::from(v))
}

/// An encoded 36-bit timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimeCode([u8; TIME_CODE_LEN]);

impl TimeCode {
    /// Encode the low 36 bits of `secs`.
    #[must_use]
    pub fn from_secs(secs: u64) -> Self {
        let mut t = secs & MASK;
        let mut out = [0u8; TIME_CODE_LEN];
        for slot in &mut out {
            *slot = encode_sextet((t & 0x3f) as u8);
            t >>= 6;
        }
        TimeCode(out)
    }

    /// Time code for the current wall-clock second.
    #[must_use]
    pub fn now() -> Self {
        Self::from_secs(Utc::now().timestamp().max(0) as u64)
    }

    /// The 36-bit value carried by this code.
    #[must_use]
    pub fn secs(&self) -> u64 {
        self.0
            .iter()
            .enumerate()
            .fold(0u64, |acc, (i, &c)| {
                // Characters were validated on construction
                acc | (decode_sextet(c).unwrap_or(0) << (i * 6))
            })
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        // Every byte comes from the ASCII alphabet above
        std::str::from_utf8(&self.0).unwrap_or_default()
    }
}

impl fmt::Display for TimeCode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TimeCode {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self> {
        let bytes = s.as_bytes();
        if bytes.len() != TIME_CODE_LEN {
            return Err(ProtocolError::TimeCodeLength(bytes.len()));
        }
        let mut out = [0u8; TIME_CODE_LEN];
        for (slot, &c) in out.iter_mut().zip(bytes) {
            decode_sextet(c)?;
            *slot = c;
        }
        Ok(TimeCode(out))
    }
}
