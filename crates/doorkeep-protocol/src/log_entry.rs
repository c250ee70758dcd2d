//! Event-log entries drained from a lock controller with `G0`.

use std::fmt;

use chrono::{DateTime, Utc};

use crate::error::{ProtocolError, Result};
use crate::time_code::{TIME_CODE_LEN, TimeCode};

/// What a log entry records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogAction {
    /// `R`: card presented and rejected on-device.
    Rejected,
    /// `U`: unlocked by the controller's own card/PIN check.
    Unlocked,
    /// `P`: wrong PIN entered.
    BadPin,
    /// `O`: door physically opened.
    Opened,
    /// `C`: door physically closed.
    Closed,
    /// `B`: exit button pressed.
    Button,
    /// `T`: card scanned on the way out.
    TagOut,
    /// `Q`: card presented while the controller wants a host decision.
    Query,
    /// Any letter this daemon does not know.
    Unknown(char),
}

impl LogAction {
    #[must_use]
    pub fn from_letter(c: char) -> Self {
        match c {
            'R' => LogAction::Rejected,
            'U' => LogAction::Unlocked,
            'P' => LogAction::BadPin,
            'O' => LogAction::Opened,
            'C' => LogAction::Closed,
            'B' => LogAction::Button,
            'T' => LogAction::TagOut,
            'Q' => LogAction::Query,
            other => LogAction::Unknown(other),
        }
    }

    #[must_use]
    pub fn letter(self) -> char {
        match self {
            LogAction::Rejected => 'R',
            LogAction::Unlocked => 'U',
            LogAction::BadPin => 'P',
            LogAction::Opened => 'O',
            LogAction::Closed => 'C',
            LogAction::Button => 'B',
            LogAction::TagOut => 'T',
            LogAction::Query => 'Q',
            LogAction::Unknown(c) => c,
        }
    }

    /// Whether the host should run its own access decision for this entry.
    #[must_use]
    pub fn wants_host_decision(self) -> bool {
        matches!(self, LogAction::Rejected | LogAction::Query)
    }
}

impl fmt::Display for LogAction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            LogAction::Rejected => "rejected",
            LogAction::Unlocked => "unlocked",
            LogAction::BadPin => "bad-pin",
            LogAction::Opened => "opened",
            LogAction::Closed => "closed",
            LogAction::Button => "button",
            LogAction::TagOut => "tag-out",
            LogAction::Query => "query",
            LogAction::Unknown(c) => return write!(f, "unknown({c})"),
        };
        f.write_str(name)
    }
}

/// One event-log entry: time code, action letter, tag id (may be empty).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub at: TimeCode,
    pub action: LogAction,
    pub tag: String,
}

impl LogEntry {
    /// Parse the payload of a non-empty `V0` response.
    ///
    /// # Errors
    /// `MalformedEntry` if the payload is shorter than a time code plus an
    /// action letter or the time code is invalid.
    pub fn parse(payload: &str) -> Result<Self> {
        if payload.len() < TIME_CODE_LEN + 1 || !payload.is_ascii() {
            return Err(ProtocolError::MalformedEntry(payload.to_string()));
        }
        let (time, rest) = payload.split_at(TIME_CODE_LEN);
        let at: TimeCode = time
            .parse()
            .map_err(|_| ProtocolError::MalformedEntry(payload.to_string()))?;
        let mut chars = rest.chars();
        let action = chars
            .next()
            .map(LogAction::from_letter)
            .ok_or_else(|| ProtocolError::MalformedEntry(payload.to_string()))?;
        Ok(LogEntry {
            at,
            action,
            tag: chars.as_str().to_string(),
        })
    }

    /// Controller timestamp, taken as the low 36 bits of a Unix time.
    #[must_use]
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.at.secs() as i64, 0)
    }
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}{}{}", self.at, self.action.letter(), self.tag)
    }
}
