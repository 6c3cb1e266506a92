//! Error types for Parley

use thiserror::Error;

/// Result type alias for Parley core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Parley core error types
#[derive(Error, Debug)]
pub enum Error {
    /// JSON encoding error
    #[error("encode error: {0}")]
    EncodeError(String),

    /// JSON decoding error (malformed frame, wrong shape)
    #[error("decode error: {0}")]
    DecodeError(String),

    /// Empty frame received
    #[error("empty frame")]
    EmptyFrame,
}

impl Error {
    /// Build an encode error from a serializer failure
    pub fn encode(e: serde_json::Error) -> Self {
        Error::EncodeError(e.to_string())
    }

    /// Build a decode error from a deserializer failure
    pub fn decode(e: serde_json::Error) -> Self {
        Error::DecodeError(e.to_string())
    }
}
