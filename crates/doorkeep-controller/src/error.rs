//! Errors raised while talking to a controller.
//!
//! Every variant except [`LinkError::Cancelled`] is recoverable: the worker
//! closes the link, backs off and reconnects.

use doorkeep_protocol::ProtocolError;
use doorkeep_runtime::Cancelled;

pub type Result<T> = std::result::Result<T, LinkError>;

#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    /// The serial device could not be opened.
    #[error("Failed to open {device}: {message}")]
    Open { device: String, message: String },

    /// No reply within the read timeout.
    #[error("Timeout after {duration_ms}ms waiting for reply to {command}")]
    Timeout { command: String, duration_ms: u64 },

    /// A reply arrived but was not the one the command expects.
    #[error("Unexpected reply {reply:?} to {command}")]
    UnexpectedReply { command: String, reply: String },

    /// A response line arrived while no command was in flight.
    #[error("Unsolicited response {0:?}")]
    Unsolicited(String),

    /// The device closed the stream.
    #[error("Link closed by device")]
    Closed,

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The worker was killed; not a failure.
    #[error("Cancelled")]
    Cancelled(#[from] Cancelled),
}

impl LinkError {
    pub fn open(device: impl Into<String>, message: impl ToString) -> Self {
        Self::Open {
            device: device.into(),
            message: message.to_string(),
        }
    }

    pub fn timeout(command: impl ToString, duration_ms: u64) -> Self {
        Self::Timeout {
            command: command.to_string(),
            duration_ms,
        }
    }

    pub fn unexpected_reply(command: impl ToString, reply: impl Into<String>) -> Self {
        Self::UnexpectedReply {
            command: command.to_string(),
            reply: reply.into(),
        }
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_cancelled_is_distinct() {
        let err: LinkError = Cancelled.into();
        assert!(err.is_cancelled());
        assert!(!LinkError::Closed.is_cancelled());
    }

    #[rstest]
    #[case(LinkError::unexpected_reply("S0", "A0"), "Unexpected reply \"A0\" to S0")]
    #[case(LinkError::timeout("G0", 5000), "Timeout after 5000ms waiting for reply to G0")]
    #[case(LinkError::Closed, "Link closed by device")]
    fn test_messages(#[case] err: LinkError, #[case] expected: &str) {
        assert_eq!(err.to_string(), expected);
    }
}
