use thiserror::Error;

/// Errors raised while framing or parsing controller traffic.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("Line too long: {len} bytes (max {max})")]
    LineTooLong { len: usize, max: usize },

    #[error("Line is not valid ASCII: {0:?}")]
    NotAscii(Vec<u8>),

    #[error("Malformed line: {0}")]
    MalformedLine(String),

    #[error("Bad time code character: {0:?}")]
    InvalidTimeCode(char),

    #[error("Time code must be 6 characters, got {0}")]
    TimeCodeLength(usize),

    #[error("Malformed event log entry: {0}")]
    MalformedEntry(String),

    #[error("Invalid key hash: {0}")]
    InvalidKeyHash(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ProtocolError>;
