//! Host error types.

use edlink_server::Response;
use thiserror::Error;

/// Result type for host operations.
pub type HostResult<T> = Result<T, HostError>;

/// Errors raised by the host object model or while reading handler params.
///
/// The display text is what a client sees in the error response.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HostError {
    /// A required parameter is absent or has the wrong type.
    #[error("Missing '{0}' field")]
    MissingField(String),

    /// A parameter is present but malformed.
    #[error("Invalid '{0}' field")]
    InvalidField(String),

    #[error("Actor not found: {0}")]
    ActorNotFound(String),

    /// The actor is part of the level's fixed furniture.
    #[error("Cannot delete special actor: {0}")]
    ProtectedActor(String),

    #[error("Unsupported actor type: {0}")]
    UnsupportedActorType(String),

    #[error("Asset already exists: {0}")]
    AssetExists(String),

    #[error("Asset not found: {0}")]
    AssetNotFound(String),

    /// A request the host understood but rejected.
    #[error("{0}")]
    InvalidArgument(String),

    /// The host cannot perform this kind of operation.
    #[error("{0}")]
    Unsupported(String),

    /// The operation was attempted and failed.
    #[error("{0}")]
    Failed(String),
}

impl HostError {
    /// Converts the error into an error response.
    pub fn into_response(self) -> Response {
        Response::error(self.to_string())
    }
}

impl From<HostError> for Response {
    fn from(e: HostError) -> Self {
        e.into_response()
    }
}
