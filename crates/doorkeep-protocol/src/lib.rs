//! Wire protocol spoken by the door lock controllers.
//!
//! Every line on the serial link is a command or response text followed by
//! four uppercase hex digits of CRC16/XMODEM over that text and a newline:
//!
//! ```text
//! S0 6DBF \n        host -> controller: address enumerate
//! S1 .... \n        controller -> host: address accepted
//! ```
//!
//! (spaces added for readability; the wire form has none)
//!
//! Lines shorter than five characters or starting with `#` are firmware
//! chatter and are dropped silently. Anything else with a bad checksum is a
//! protocol error.

pub mod codec;
pub mod commands;
pub mod crc;
pub mod error;
pub mod frame;
pub mod key_hash;
pub mod log_entry;
pub mod time_code;

pub use codec::LockCodec;
pub use commands::{Command, Inbound};
pub use crc::{checksum_hex, crc16_xmodem, crc16_xmodem_update};
pub use error::{ProtocolError, Result};
pub use frame::{decode_line, encode_frame};
pub use key_hash::KeyHash;
pub use log_entry::{LogAction, LogEntry};
pub use time_code::TimeCode;
