use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid tag id: {0}")]
    InvalidTagId(String),

    #[error("Invalid PIN for tag {tag}")]
    InvalidPin { tag: String },

    #[error("Unknown door: {0}")]
    UnknownDoor(String),
}

pub type Result<T> = std::result::Result<T, Error>;
