//! Client error types.

use thiserror::Error;

/// Result type for client operations.
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors that can occur during client operations.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Connection error.
    #[error("connection error: {0}")]
    Connection(#[from] std::io::Error),

    /// The request could not be encoded or the reply could not be decoded.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// No reply arrived before the read timeout.
    #[error("timed out waiting for a response")]
    Timeout,

    /// The server closed the connection before replying.
    #[error("connection closed by server")]
    ConnectionClosed,

    /// The reply grew past the configured limit without completing.
    #[error("response exceeds {limit} bytes")]
    ResponseTooLarge { limit: usize },

    /// The server answered with an error envelope.
    #[error("command failed: {message}")]
    Command { message: String },
}

impl From<serde_json::Error> for ClientError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}
