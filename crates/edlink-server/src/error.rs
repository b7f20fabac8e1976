//! Server error types.

use thiserror::Error;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors surfaced to the embedding host.
///
/// Everything that goes wrong inside a poll is handled in place; only
/// starting the listener can fail from the host's point of view.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Bind failed.
    #[error("failed to bind to {addr}: {source}")]
    BindFailed {
        addr: std::net::SocketAddr,
        source: std::io::Error,
    },

    /// I/O error.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors from registering or removing command handlers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// Handler reported an empty command name.
    #[error("command handler has an empty name")]
    EmptyName,

    /// A handler is already registered under this name.
    #[error("command handler for '{0}' conflicts with an existing handler")]
    AlreadyRegistered(String),

    /// No handler is registered under this name.
    #[error("no command handler registered for '{0}'")]
    NotRegistered(String),
}
