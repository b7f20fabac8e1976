//! # edlink-server: embedded command server for editor automation
//!
//! A TCP server that lives inside a host application's frame loop. Clients
//! send JSON requests naming a command; the server routes each one to a
//! registered handler and writes back a JSON response.
//!
//! ## Architecture
//!
//! There is no server thread. Each host tick may run one poll, which does a
//! bounded amount of non-blocking work and returns.
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                        edlink-server                           │
//! │  ┌──────────┐   ┌─────────────┐   ┌────────────┐   ┌─────────┐ │
//! │  │ Acceptor │ → │  I/O pump   │ → │ Dispatcher │ → │ Handler │ │
//! │  │  (mio)   │   │ (per conn)  │   │  (JSON)    │   │Registry │ │
//! │  └──────────┘   └─────────────┘   └────────────┘   └─────────┘ │
//! │                        ↓                                       │
//! │                 Timeout monitor                                │
//! └────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```ignore
//! use edlink_server::{CommandRegistry, FnHandler, Response, Server, ServerConfig};
//!
//! let mut registry = CommandRegistry::new();
//! registry.register(FnHandler::new("ping", |_, _| Response::success()).boxed())?;
//!
//! let mut server = Server::new(ServerConfig::default(), registry);
//! server.start()?;
//! loop {
//!     let frame = host.wait_for_next_frame();
//!     server.tick(frame);
//! }
//! ```

mod config;
mod connection;
mod diagnostics;
mod dispatch;
mod error;
mod protocol;
mod registry;
mod server;
#[cfg(test)]
mod tests;

pub use config::{
    DEFAULT_MAX_OUTBOUND_SIZE, DEFAULT_PORT, DEFAULT_RECEIVE_BUFFER_SIZE, FramingMode,
    MIN_RECEIVE_BUFFER_SIZE, ServerConfig,
};
pub use connection::{ClientConnection, ConnectionId};
pub use diagnostics::{DiagnosticSink, DisconnectReason, RecordingSink, ServerEvent, TracingSink};
pub use dispatch::{Dispatch, DispatchOutcome, dispatch};
pub use error::{RegistryError, ServerError, ServerResult};
pub use protocol::{
    INVALID_JSON_MESSAGE, MISSING_TYPE_MESSAGE, Params, Request, Response, Status,
};
pub use registry::{ClientInfo, CommandHandler, CommandRegistry, FnHandler};
pub use server::Server;
