//! Commands sent to a lock controller and the lines it sends back.
//!
//! | Host         | Controller           |
//! |--------------|----------------------|
//! | `S0`         | `S1`                 |
//! | `P0<time>`   | `P1<time>` (echo)    |
//! | `K0`         | `H0<hash>`           |
//! | `R0`         | `A0`                 |
//! | `N0<key>`    | `A0`                 |
//! | `G0`         | `V0[entry]`          |
//! | `C0`         | `A0`                 |
//! | `U0`         | `A0`                 |
//!
//! Unsolicited: `E...` (event pending), `Y<addr><key>` (keystroke).

use std::fmt;

use doorkeep_core::KeyRecord;

use crate::error::{ProtocolError, Result};
use crate::time_code::TimeCode;

const ACK: &str = "A0";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Address enumeration.
    Address,
    /// Liveness challenge carrying the current time code.
    Ping(TimeCode),
    /// Ask for the hash of the on-device key list.
    QueryKeyHash,
    /// Wipe every key on the device.
    ResetKeys,
    /// Upload one key record.
    AddKey(KeyRecord),
    /// Fetch the oldest unconsumed log entry.
    NextEvent,
    /// Mark the entry returned by the last `NextEvent` as consumed.
    ClearEvent,
    /// Software-initiated unlock.
    RemoteOpen,
}

impl Command {
    /// Command text without checksum.
    #[must_use]
    pub fn to_wire(&self) -> String {
        match self {
            Command::Address => "S0".to_string(),
            Command::Ping(t) => format!("P0{t}"),
            Command::QueryKeyHash => "K0".to_string(),
            Command::ResetKeys => "R0".to_string(),
            Command::AddKey(key) => format!("N0{key}"),
            Command::NextEvent => "G0".to_string(),
            Command::ClearEvent => "C0".to_string(),
            Command::RemoteOpen => "U0".to_string(),
        }
    }

    /// Check `response` against what this command expects and return the
    /// payload that follows the reply prefix.
    ///
    /// # Errors
    /// `MalformedLine` when the response is not the expected reply.
    pub fn reply_payload<'a>(&self, response: &'a str) -> Result<&'a str> {
        let payload = match self {
            Command::Address => (response == "S1").then_some(""),
            Command::Ping(t) => response
                .strip_prefix("P1")
                .filter(|echo| *echo == t.as_str()),
            Command::QueryKeyHash => response.strip_prefix("H0"),
            Command::NextEvent => response.strip_prefix("V0"),
            Command::ResetKeys | Command::AddKey(_) | Command::ClearEvent | Command::RemoteOpen => {
                (response == ACK).then_some("")
            }
        };
        payload.ok_or_else(|| {
            ProtocolError::MalformedLine(format!("unexpected reply {response:?} to {self}"))
        })
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.to_wire())
    }
}

/// A validated line received from a lock controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// Reply to the command in flight.
    Response(String),
    /// The controller has log entries waiting.
    EventPending,
    /// A keypad keystroke.
    Keypad(char),
}

impl Inbound {
    /// Classify the checksummed text of a line.
    ///
    /// # Errors
    /// `MalformedLine` for a keystroke line without a key.
    pub fn classify(text: String) -> Result<Self> {
        let first = text.as_bytes().first().copied();
        match first {
            Some(b'E') => Ok(Inbound::EventPending),
            Some(b'Y') => match text.chars().nth(2) {
                Some(key) => Ok(Inbound::Keypad(key)),
                None => Err(ProtocolError::MalformedLine(text)),
            },
            _ => Ok(Inbound::Response(text)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use doorkeep_core::{AccessLevel, Tag};
    use rstest::rstest;

    #[test]
    fn test_wire_text() {
        let key = KeyRecord::for_tag(&Tag::new("ABCD1234", "1234", AccessLevel::Both).unwrap());
        assert_eq!(Command::AddKey(key).to_wire(), "N0ABCD1234 1234");
        assert_eq!(Command::Ping(TimeCode::from_secs(0)).to_wire(), "P0AAAAAA");
        assert_eq!(Command::RemoteOpen.to_string(), "U0");
    }

    #[rstest]
    #[case(Command::Address, "S1", Some(""))]
    #[case(Command::Address, "S0", None)]
    #[case(Command::ResetKeys, "A0", Some(""))]
    #[case(Command::ClearEvent, "A1", None)]
    #[case(Command::QueryKeyHash, "H0BEEF", Some("BEEF"))]
    #[case(Command::NextEvent, "V0", Some(""))]
    #[case(Command::NextEvent, "V0AAAAAAO", Some("AAAAAAO"))]
    #[case(Command::RemoteOpen, "V0", None)]
    fn test_reply_payload(#[case] cmd: Command, #[case] response: &str, #[case] expected: Option<&str>) {
        assert_eq!(cmd.reply_payload(response).ok(), expected);
    }

    #[test]
    fn test_ping_requires_exact_echo() {
        let t = TimeCode::from_secs(12345);
        let cmd = Command::Ping(t);
        assert!(cmd.reply_payload(&format!("P1{t}")).is_ok());
        assert!(cmd.reply_payload("P1AAAAAA").is_err());
        assert!(cmd.reply_payload(&format!("P0{t}")).is_err());
    }

    #[rstest]
    #[case("E0", Inbound::EventPending)]
    #[case("Y05", Inbound::Keypad('5'))]
    #[case("Y0*", Inbound::Keypad('*'))]
    #[case("S1", Inbound::Response("S1".into()))]
    fn test_classify(#[case] text: &str, #[case] expected: Inbound) {
        assert_eq!(Inbound::classify(text.to_string()).unwrap(), expected);
    }

    #[test]
    fn test_classify_truncated_keystroke() {
        assert!(Inbound::classify("Y0".to_string()).is_err());
    }
}
