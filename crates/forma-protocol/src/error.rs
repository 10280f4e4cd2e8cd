//! Error types for protocol decoding

use thiserror::Error;

/// Result type alias using the protocol error
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Errors raised while decoding or validating a message
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// Payload is not valid JSON or does not match the message shape
    #[error("Malformed message: {0}")]
    Malformed(#[from] serde_json::Error),

    /// Payload is JSON but not a message this channel understands
    #[error("Unknown message: {0}")]
    UnknownMessage(String),

    /// A required field was absent or had the wrong type
    #[error("Missing field: {0}")]
    MissingField(&'static str),

    /// A required field was present but empty
    #[error("Empty field: {0}")]
    EmptyField(&'static str),
}
