//! Line framing: `<text><CRC16 hex>\n`.

use crate::crc::checksum_hex;
use crate::error::{ProtocolError, Result};

/// Length of the checksum suffix.
pub const CHECKSUM_LEN: usize = 4;

/// Shortest line that is not treated as noise.
pub const MIN_LINE_LEN: usize = CHECKSUM_LEN + 1;

/// Comment marker used by the firmware for debug chatter.
pub const COMMENT_MARKER: u8 = b'#';

/// Build the wire form of `text`, newline included.
#[must_use]
pub fn encode_frame(text: &str) -> String {
    let mut line = String::with_capacity(text.len() + CHECKSUM_LEN + 1);
    line.push_str(text);
    line.push_str(&checksum_hex(text.as_bytes()));
    line.push('\n');
    line
}

/// Validate one received line (without its newline).
///
/// Returns `Ok(None)` for noise: lines shorter than [`MIN_LINE_LEN`] or
/// starting with [`COMMENT_MARKER`]. A trailing carriage return is ignored.
///
/// # Errors
/// `NotAscii` for non-ASCII bytes, `ChecksumMismatch` if the trailing four
/// characters are not the uppercase CRC of the rest.
pub fn decode_line(line: &[u8]) -> Result<Option<String>> {
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    if line.len() < MIN_LINE_LEN || line.first() == Some(&COMMENT_MARKER) {
        return Ok(None);
    }
    if !line.is_ascii() {
        return Err(ProtocolError::NotAscii(line.to_vec()));
    }

    let (text, received) = line.split_at(line.len() - CHECKSUM_LEN);
    let expected = checksum_hex(text);
    if expected.as_bytes() != received {
        return Err(ProtocolError::ChecksumMismatch {
            expected,
            actual: String::from_utf8_lossy(received).into_owned(),
        });
    }
    Ok(Some(String::from_utf8_lossy(text).into_owned()))
}
