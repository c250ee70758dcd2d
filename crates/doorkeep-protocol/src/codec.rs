//! Tokio codec for the lock controller line protocol.
//!
//! `LockCodec` plugs the framing rules into `tokio_util::codec::Framed`:
//!
//! ```text
//! serial bytes -> Decoder -> Inbound (checksummed, noise dropped)
//! Command      -> Encoder -> "<text><crc>\n"
//! ```
//!
//! # Usage with Framed
//!
//! ```rust,no_run
//! use doorkeep_protocol::{Command, Inbound, LockCodec};
//! use futures::{SinkExt, StreamExt};
//! use tokio_util::codec::Framed;
//!
//! # async fn example(port: tokio::io::DuplexStream) -> doorkeep_protocol::Result<()> {
//! let mut framed = Framed::new(port, LockCodec::new());
//! framed.send(Command::Address).await?;
//! if let Some(Ok(Inbound::Response(text))) = framed.next().await {
//!     Command::Address.reply_payload(&text)?;
//! }
//! # Ok(())
//! # }
//! ```
//!
//! A decode error is terminal for the `Framed` stream. Callers drop the link
//! and build a fresh codec on reconnect.

use bytes::{Buf, BytesMut};
use doorkeep_core::constants::MAX_LINE_LENGTH;
use tokio_util::codec::{Decoder, Encoder};
use tracing::trace;

use crate::commands::{Command, Inbound};
use crate::error::{ProtocolError, Result};
use crate::frame::{COMMENT_MARKER, decode_line, encode_frame};

#[derive(Debug)]
pub struct LockCodec {
    max_line_length: usize,
    /// Bytes already scanned for a newline.
    scanned: usize,
    /// Inside an overlong comment line; drop bytes up to the next newline.
    skipping_comment: bool,
}

impl LockCodec {
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_line_length(MAX_LINE_LENGTH)
    }

    #[must_use]
    pub fn with_max_line_length(max_line_length: usize) -> Self {
        Self {
            max_line_length,
            scanned: 0,
            skipping_comment: false,
        }
    }
}

impl Default for LockCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for LockCodec {
    type Item = Inbound;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Inbound>> {
        loop {
            let Some(offset) = src[self.scanned..].iter().position(|&b| b == b'\n') else {
                if self.skipping_comment || is_long_comment(src, src.len(), self.max_line_length) {
                    self.skipping_comment = true;
                    self.scanned = 0;
                    src.clear();
                    return Ok(None);
                }
                self.scanned = src.len();
                if src.len() > self.max_line_length {
                    return Err(ProtocolError::LineTooLong {
                        len: src.len(),
                        max: self.max_line_length,
                    });
                }
                return Ok(None);
            };

            let end = self.scanned + offset;
            self.scanned = 0;
            if std::mem::take(&mut self.skipping_comment)
                || is_long_comment(src, end, self.max_line_length)
            {
                trace!(len = end, "Dropped long comment");
                src.advance(end + 1);
                continue;
            }
            if end > self.max_line_length {
                return Err(ProtocolError::LineTooLong {
                    len: end,
                    max: self.max_line_length,
                });
            }
            let line = src.split_to(end);
            src.advance(1);

            match decode_line(&line)? {
                Some(text) => {
                    trace!(line = %text, "<-");
                    return Inbound::classify(text).map(Some);
                }
                None => trace!(line = %String::from_utf8_lossy(&line), "Dropped noise"),
            }
        }
    }
}

fn is_long_comment(src: &[u8], len: usize, max: usize) -> bool {
    len > max && src.first() == Some(&COMMENT_MARKER)
}

impl Encoder<Command> for LockCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: Command, dst: &mut BytesMut) -> Result<()> {
        let line = encode_frame(&item.to_wire());
        trace!(cmd = %item, "->");
        dst.extend_from_slice(line.as_bytes());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wire(text: &str) -> BytesMut {
        BytesMut::from(encode_frame(text).as_bytes())
    }

    #[test]
    fn test_decode_response() {
        let mut codec = LockCodec::new();
        let mut buf = wire("S1");
        assert_eq!(
            codec.decode(&mut buf).unwrap(),
            Some(Inbound::Response("S1".into()))
        );
        assert!(buf.is_empty());
    }

    #[test]
    fn test_decode_skips_noise() {
        let mut codec = LockCodec::new();
        let mut buf = BytesMut::from(&b"# boot\nX\n"[..]);
        buf.extend_from_slice(&wire("E0"));
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(Inbound::EventPending));
    }

    #[test]
    fn test_decode_partial_line() {
        let mut codec = LockCodec::new();
        let full = wire("Y05");
        let mut buf = BytesMut::from(&full[..3]);
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
        buf.extend_from_slice(&full[3..]);
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(Inbound::Keypad('5')));
    }

    #[test]
    fn test_decode_two_lines() {
        let mut codec = LockCodec::new();
        let mut buf = wire("E0");
        buf.extend_from_slice(&wire("A0"));
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(Inbound::EventPending));
        assert_eq!(
            codec.decode(&mut buf).unwrap(),
            Some(Inbound::Response("A0".into()))
        );
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
    }

    #[test]
    fn test_decode_corrupt_line() {
        let mut codec = LockCodec::new();
        let mut buf = BytesMut::from(&b"A0FFFF\n"[..]);
        assert!(matches!(
            codec.decode(&mut buf),
            Err(ProtocolError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_decode_line_too_long() {
        let mut codec = LockCodec::with_max_line_length(8);
        let mut buf = BytesMut::from(&b"0123456789"[..]);
        assert!(matches!(
            codec.decode(&mut buf),
            Err(ProtocolError::LineTooLong { .. })
        ));
    }

    #[test]
    fn test_long_comment_is_noise() {
        let mut codec = LockCodec::with_max_line_length(8);
        let mut buf = BytesMut::from(&b"# firmware debug "[..]);
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
        assert!(buf.is_empty());

        buf.extend_from_slice(b"dump continues\n");
        buf.extend_from_slice(&wire("E0"));
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(Inbound::EventPending));

        let mut buf = BytesMut::from(&b"# one whole long line\n"[..]);
        buf.extend_from_slice(&wire("A0"));
        assert_eq!(
            codec.decode(&mut buf).unwrap(),
            Some(Inbound::Response("A0".into()))
        );
    }

    #[test]
    fn test_encode_command() {
        let mut codec = LockCodec::new();
        let mut buf = BytesMut::new();
        codec.encode(Command::Address, &mut buf).unwrap();
        assert_eq!(&buf[..], encode_frame("S0").as_bytes());
        assert_eq!(buf.last(), Some(&b'\n'));
    }
}
