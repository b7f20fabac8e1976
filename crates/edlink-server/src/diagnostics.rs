//! Diagnostics emitted by the server.
//!
//! The server never logs through a global directly. It reports typed
//! [`ServerEvent`]s to the [`DiagnosticSink`] it was built with. The default
//! sink forwards to `tracing`; tests use [`RecordingSink`] to assert on what
//! happened.

use std::fmt;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tracing::{debug, error, info, trace, warn};

use crate::connection::ConnectionId;

/// Why a connection was closed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The peer shut down its end.
    PeerClosed,
    /// A read or liveness probe failed.
    SocketError(String),
    /// No bytes arrived within the idle timeout.
    IdleTimeout { idle: Duration },
    /// Unsent response bytes grew past the outbound cap.
    OutboundOverflow { queued: usize, limit: usize },
    /// The server is stopping.
    ServerStopped,
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PeerClosed => write!(f, "closed by peer"),
            Self::SocketError(e) => write!(f, "socket error: {e}"),
            Self::IdleTimeout { idle } => {
                write!(f, "timed out after {:.1}s of inactivity", idle.as_secs_f64())
            }
            Self::OutboundOverflow { queued, limit } => {
                write!(f, "{queued} unsent bytes exceed the {limit} byte limit")
            }
            Self::ServerStopped => write!(f, "server stopped"),
        }
    }
}

/// Something noteworthy the server did or observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    /// Listener bound and poll registration installed.
    Started { addr: SocketAddr },
    /// `start` was called while already running.
    AlreadyRunning,
    /// The listener could not be bound.
    BindFailed { addr: SocketAddr, error: String },
    /// The server stopped.
    Stopped { connections_closed: usize },
    /// A client connection was accepted.
    ClientConnected {
        id: ConnectionId,
        peer: SocketAddr,
        total: usize,
    },
    /// Accepting from the listener failed.
    AcceptFailed { error: String },
    /// A client connection was closed and removed.
    ClientDisconnected {
        id: ConnectionId,
        peer: SocketAddr,
        reason: DisconnectReason,
        remaining: usize,
    },
    /// Shutting down a socket failed. The connection was removed anyway.
    CleanupFailed {
        id: ConnectionId,
        peer: SocketAddr,
        error: String,
    },
    /// Bytes were read from a client. Verbose only.
    BytesRead { id: ConnectionId, bytes: usize },
    /// A request payload about to be dispatched. Verbose only.
    RequestReceived { id: ConnectionId, payload: String },
    /// A request was routed to its handler.
    CommandDispatched { id: ConnectionId, command: String },
    /// A request named an unregistered command.
    UnknownCommand { id: ConnectionId, command: String },
    /// A request had no string `type` field.
    MissingType { id: ConnectionId },
    /// A chunk was not a JSON object.
    InvalidJson { id: ConnectionId, bytes: usize },
    /// Streaming framing gave up on a message that filled the buffer.
    MessageTooLarge { id: ConnectionId, bytes: usize },
    /// Part of the outbound bytes were written. Verbose only.
    WriteProgress {
        id: ConnectionId,
        sent: usize,
        total: usize,
    },
    /// A response was written completely.
    ResponseSent { id: ConnectionId, bytes: usize },
    /// The socket would block; the rest is queued for the next tick.
    ResponseDeferred {
        id: ConnectionId,
        sent: usize,
        remaining: usize,
    },
    /// Writing failed; queued bytes were discarded.
    SendFailed {
        id: ConnectionId,
        error: String,
        discarded: usize,
    },
    /// A response could not be serialized.
    EncodeFailed { id: ConnectionId, error: String },
    /// A handler was registered.
    HandlerRegistered { name: String, external: bool },
    /// A handler registration was refused.
    HandlerRejected { name: String, reason: String },
    /// A handler was removed.
    HandlerUnregistered { name: String },
    /// Removing a handler failed.
    UnregisterFailed { name: String, reason: String },
}

/// Receives server diagnostics.
pub trait DiagnosticSink: Send {
    /// Records one event.
    fn record(&self, event: ServerEvent);
}

/// Forwards events to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl DiagnosticSink for TracingSink {
    fn record(&self, event: ServerEvent) {
        match event {
            ServerEvent::Started { addr } => info!(%addr, "command server started"),
            ServerEvent::AlreadyRunning => {
                warn!("start called but server is already running");
            }
            ServerEvent::BindFailed { addr, error } => {
                error!(%addr, %error, "failed to start command server");
            }
            ServerEvent::Stopped { connections_closed } => {
                info!(connections_closed, "command server stopped");
            }
            ServerEvent::ClientConnected { id, peer, total } => {
                info!(%id, %peer, total, "client connected");
            }
            ServerEvent::AcceptFailed { error } => error!(%error, "error accepting connection"),
            ServerEvent::ClientDisconnected {
                id,
                peer,
                reason,
                remaining,
            } => match reason {
                DisconnectReason::IdleTimeout { .. }
                | DisconnectReason::SocketError(_)
                | DisconnectReason::OutboundOverflow { .. } => {
                    warn!(%id, %peer, %reason, remaining, "client disconnected");
                }
                DisconnectReason::PeerClosed | DisconnectReason::ServerStopped => {
                    info!(%id, %peer, %reason, remaining, "client disconnected");
                }
            },
            ServerEvent::CleanupFailed { id, peer, error } => {
                error!(%id, %peer, %error, "failed to close client socket");
            }
            ServerEvent::BytesRead { id, bytes } => trace!(%id, bytes, "read from client"),
            ServerEvent::RequestReceived { id, payload } => {
                trace!(%id, %payload, "processing request");
            }
            ServerEvent::CommandDispatched { id, command } => {
                info!(%id, %command, "processing command");
            }
            ServerEvent::UnknownCommand { id, command } => {
                warn!(%id, %command, "unknown command");
            }
            ServerEvent::MissingType { id } => warn!(%id, "missing 'type' field in command"),
            ServerEvent::InvalidJson { id, bytes } => {
                warn!(%id, bytes, "invalid JSON in command");
            }
            ServerEvent::MessageTooLarge { id, bytes } => {
                warn!(%id, bytes, "message exceeds receive buffer, discarding");
            }
            ServerEvent::WriteProgress { id, sent, total } => {
                trace!(%id, sent, total, "write progress");
            }
            ServerEvent::ResponseSent { id, bytes } => debug!(%id, bytes, "sent response"),
            ServerEvent::ResponseDeferred {
                id,
                sent,
                remaining,
            } => debug!(%id, sent, remaining, "socket would block, deferring rest of response"),
            ServerEvent::SendFailed {
                id,
                error,
                discarded,
            } => warn!(%id, %error, discarded, "failed to send response"),
            ServerEvent::EncodeFailed { id, error } => {
                error!(%id, %error, "failed to encode response");
            }
            ServerEvent::HandlerRegistered { name, external } => {
                info!(%name, external, "registered command handler");
            }
            ServerEvent::HandlerRejected { name, reason } => {
                warn!(%name, %reason, "command handler rejected");
            }
            ServerEvent::HandlerUnregistered { name } => {
                info!(%name, "unregistered command handler");
            }
            ServerEvent::UnregisterFailed { name, reason } => {
                warn!(%name, %reason, "failed to unregister command handler");
            }
        }
    }
}

/// Keeps every event in memory.
///
/// Clones share the same buffer, so a test can hand one clone to the server
/// and inspect the other.
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    events: Arc<Mutex<Vec<ServerEvent>>>,
}

impl RecordingSink {
    /// Creates an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of everything recorded so far.
    pub fn events(&self) -> Vec<ServerEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Returns true if any recorded event matches.
    pub fn any(&self, predicate: impl Fn(&ServerEvent) -> bool) -> bool {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .any(predicate)
    }

    /// Discards recorded events.
    pub fn clear(&self) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl DiagnosticSink for RecordingSink {
    fn record(&self, event: ServerEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }
}
