//! Tick-driven TCP command server.
//!
//! The server has no thread of its own. The host calls [`Server::tick`] from
//! its frame loop; once the configured poll interval has elapsed, one poll
//! runs to completion:
//!
//! 1. accept every pending connection,
//! 2. service each connection once (flush, liveness, read, dispatch, respond),
//! 3. age idle connections and evict the ones past the timeout.
//!
//! Every socket is non-blocking. "Would block" means "nothing to do until
//! the next tick", never a wait.

use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use mio::net::TcpListener;

use crate::config::{FramingMode, ServerConfig};
use crate::connection::{
    ClientConnection, ConnectionId, FlushOutcome, Frame, Probe, ReadOutcome,
};
use crate::diagnostics::{DiagnosticSink, DisconnectReason, ServerEvent, TracingSink};
use crate::dispatch::{DispatchOutcome, dispatch};
use crate::error::{RegistryError, ServerError, ServerResult};
use crate::protocol::Response;
use crate::registry::{ClientInfo, CommandHandler, CommandRegistry};

/// Periodic poll registration installed by [`Server::start`].
#[derive(Debug, Clone, Copy)]
struct PollSchedule {
    interval: Duration,
    elapsed: Duration,
}

impl PollSchedule {
    fn new(interval: Duration) -> Self {
        Self {
            interval,
            elapsed: Duration::ZERO,
        }
    }

    /// Accumulates frame time. Returns the time since the last poll once the
    /// interval has been reached.
    fn advance(&mut self, delta: Duration) -> Option<Duration> {
        self.elapsed = self.elapsed.saturating_add(delta);
        if self.elapsed >= self.interval {
            Some(std::mem::take(&mut self.elapsed))
        } else {
            None
        }
    }
}

/// What to do with a connection after servicing it.
enum Fate {
    Keep,
    Evict(DisconnectReason),
}

/// Embedded TCP command server.
///
/// # Example
///
/// ```no_run
/// use std::time::Duration;
/// use edlink_server::{CommandRegistry, Server, ServerConfig};
///
/// let mut server = Server::new(ServerConfig::default(), CommandRegistry::new());
/// server.start()?;
///
/// // Somewhere in the host's frame loop:
/// let frame = Duration::from_millis(16);
/// while server.tick(frame) {
///     # break;
/// }
/// # Ok::<(), edlink_server::ServerError>(())
/// ```
pub struct Server {
    config: ServerConfig,
    listener: Option<TcpListener>,
    connections: HashMap<ConnectionId, ClientConnection>,
    registry: CommandRegistry,
    sink: Box<dyn DiagnosticSink>,
    schedule: Option<PollSchedule>,
    next_id: u64,
}

impl Server {
    /// Creates a stopped server that logs through `tracing`.
    pub fn new(config: ServerConfig, registry: CommandRegistry) -> Self {
        Self::with_sink(config, registry, Box::new(TracingSink))
    }

    /// Creates a stopped server reporting to the given sink.
    pub fn with_sink(
        config: ServerConfig,
        registry: CommandRegistry,
        sink: Box<dyn DiagnosticSink>,
    ) -> Self {
        Self {
            config,
            listener: None,
            connections: HashMap::new(),
            registry,
            sink,
            schedule: None,
            next_id: 1,
        }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Returns true between a successful `start` and the next `stop`.
    pub fn is_running(&self) -> bool {
        self.listener.is_some()
    }

    /// Returns the bound address while running.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.as_ref().and_then(|l| l.local_addr().ok())
    }

    /// Returns the number of active connections.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Returns the ids of all active connections, in accept order.
    pub fn connection_ids(&self) -> Vec<ConnectionId> {
        let mut ids: Vec<ConnectionId> = self.connections.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Returns an active connection.
    pub fn connection(&self, id: ConnectionId) -> Option<&ClientConnection> {
        self.connections.get(&id)
    }

    /// Returns the handler registry.
    pub fn registry(&self) -> &CommandRegistry {
        &self.registry
    }

    /// Returns the registered command names, sorted.
    pub fn command_names(&self) -> Vec<String> {
        self.registry.names()
    }

    /// Returns true if `name` has a handler.
    pub fn has_handler(&self, name: &str) -> bool {
        self.registry.contains(name)
    }

    /// Registers a handler owned by the embedding host.
    ///
    /// # Errors
    ///
    /// Fails if the name is empty or already registered.
    pub fn register_handler(
        &mut self,
        handler: Box<dyn CommandHandler>,
    ) -> Result<(), RegistryError> {
        self.register(handler, false)
    }

    /// Registers a handler on behalf of an external module.
    ///
    /// # Errors
    ///
    /// Fails if the name is empty or already registered; the existing
    /// handler is kept.
    pub fn register_external_handler(
        &mut self,
        handler: Box<dyn CommandHandler>,
    ) -> Result<(), RegistryError> {
        self.register(handler, true)
    }

    /// Removes a handler previously registered by an external module.
    ///
    /// # Errors
    ///
    /// Fails if the name is empty or not registered.
    pub fn unregister_external_handler(&mut self, name: &str) -> Result<(), RegistryError> {
        match self.registry.unregister(name) {
            Ok(()) => {
                self.sink.record(ServerEvent::HandlerUnregistered {
                    name: name.to_string(),
                });
                Ok(())
            }
            Err(e) => {
                self.sink.record(ServerEvent::UnregisterFailed {
                    name: name.to_string(),
                    reason: e.to_string(),
                });
                Err(e)
            }
        }
    }

    fn register(
        &mut self,
        handler: Box<dyn CommandHandler>,
        external: bool,
    ) -> Result<(), RegistryError> {
        let name = handler.name().to_string();
        match self.registry.register(handler) {
            Ok(()) => {
                self.sink
                    .record(ServerEvent::HandlerRegistered { name, external });
                Ok(())
            }
            Err(e) => {
                self.sink.record(ServerEvent::HandlerRejected {
                    name,
                    reason: e.to_string(),
                });
                Err(e)
            }
        }
    }

    /// Binds the listener and installs the poll registration.
    ///
    /// Calling `start` on a running server does nothing and succeeds.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::BindFailed`] if the listener cannot be bound.
    /// The server is left stopped with nothing acquired.
    pub fn start(&mut self) -> ServerResult<()> {
        if self.is_running() {
            self.sink.record(ServerEvent::AlreadyRunning);
            return Ok(());
        }

        let addr = self.config.listen_addr();
        let listener = match TcpListener::bind(addr) {
            Ok(listener) => listener,
            Err(source) => {
                self.sink.record(ServerEvent::BindFailed {
                    addr,
                    error: source.to_string(),
                });
                return Err(ServerError::BindFailed { addr, source });
            }
        };
        let bound = listener.local_addr()?;

        // Anything left from a previous run is stale.
        self.connections.clear();
        self.listener = Some(listener);
        self.schedule = Some(PollSchedule::new(self.config.poll_interval));

        self.sink.record(ServerEvent::Started { addr: bound });
        Ok(())
    }

    /// Closes every connection, releases the listener and removes the poll
    /// registration. Safe to call at any time.
    pub fn stop(&mut self) {
        let was_running = self.is_running();
        let connections_closed = self.connections.len();

        self.cleanup_all();
        self.listener = None;
        self.schedule = None;

        if was_running || connections_closed > 0 {
            self.sink
                .record(ServerEvent::Stopped { connections_closed });
        }
    }

    /// Advances the poll registration by one host frame.
    ///
    /// Runs a poll once the configured interval has elapsed. Returns false
    /// when the server is not running, so a host ticker can drop it.
    pub fn tick(&mut self, frame_delta: Duration) -> bool {
        let Some(schedule) = self.schedule.as_mut() else {
            return false;
        };
        if let Some(elapsed) = schedule.advance(frame_delta) {
            self.poll(elapsed);
        }
        self.is_running()
    }

    /// Runs one poll immediately, treating `delta` as the time since the
    /// previous one. Does nothing when stopped.
    pub fn poll(&mut self, delta: Duration) {
        if !self.is_running() {
            return;
        }
        self.accept_pending();
        self.pump();
        self.check_timeouts(delta);
    }

    /// Accepts every connection waiting in the backlog.
    fn accept_pending(&mut self) {
        let Some(listener) = self.listener.as_ref() else {
            return;
        };

        loop {
            match listener.accept() {
                Ok((stream, peer)) => {
                    let id = ConnectionId::new(self.next_id);
                    self.next_id += 1;
                    // mio hands out accepted streams already in non-blocking mode.
                    let conn =
                        ClientConnection::new(id, stream, peer, self.config.receive_buffer_size);
                    self.connections.insert(id, conn);
                    self.sink.record(ServerEvent::ClientConnected {
                        id,
                        peer,
                        total: self.connections.len(),
                    });
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => {
                    self.sink.record(ServerEvent::AcceptFailed {
                        error: e.to_string(),
                    });
                    break;
                }
            }
        }
    }

    /// Services each connection once, over a snapshot of the set.
    fn pump(&mut self) {
        for id in self.connection_ids() {
            let Some(conn) = self.connections.get_mut(&id) else {
                continue;
            };
            let fate =
                service_connection(conn, &self.registry, self.sink.as_ref(), &self.config);
            if let Fate::Evict(reason) = fate {
                self.cleanup(id, reason);
            }
        }
    }

    /// Ages every connection by `delta` and evicts the ones past the timeout.
    fn check_timeouts(&mut self, delta: Duration) {
        for id in self.connection_ids() {
            let Some(conn) = self.connections.get_mut(&id) else {
                continue;
            };
            let idle = conn.add_idle(delta);
            if idle > self.config.idle_timeout {
                self.cleanup(id, DisconnectReason::IdleTimeout { idle });
            }
        }
    }

    /// Closes one connection and removes it from the set.
    ///
    /// Removal happens whether or not closing the socket succeeds. Unknown
    /// ids are ignored, so cleaning up twice is harmless.
    fn cleanup(&mut self, id: ConnectionId, reason: DisconnectReason) {
        let Some(conn) = self.connections.remove(&id) else {
            return;
        };
        let peer = conn.peer();
        if let Err(e) = conn.close() {
            self.sink.record(ServerEvent::CleanupFailed {
                id,
                peer,
                error: e.to_string(),
            });
        }
        drop(conn);

        self.sink.record(ServerEvent::ClientDisconnected {
            id,
            peer,
            reason,
            remaining: self.connections.len(),
        });
    }

    fn cleanup_all(&mut self) {
        for id in self.connection_ids() {
            self.cleanup(id, DisconnectReason::ServerStopped);
        }
        self.connections.clear();
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("config", &self.config)
            .field("running", &self.is_running())
            .field("connections", &self.connections.len())
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

/// Flush, liveness check, read, dispatch and respond for one connection.
fn service_connection(
    conn: &mut ClientConnection,
    registry: &CommandRegistry,
    sink: &dyn DiagnosticSink,
    config: &ServerConfig,
) -> Fate {
    let verbose = config.verbose_logging;

    // Finish anything a previous tick could not write.
    report_flush(conn, sink, verbose);

    match conn.probe() {
        Probe::Ready => {}
        Probe::Idle => return Fate::Keep,
        Probe::Closed => return Fate::Evict(DisconnectReason::PeerClosed),
        Probe::Failed(e) => {
            return Fate::Evict(DisconnectReason::SocketError(e.to_string()));
        }
    }

    conn.reset_idle();
    let bytes = match conn.read() {
        ReadOutcome::Data(n) => n,
        ReadOutcome::WouldBlock => return Fate::Keep,
        ReadOutcome::Closed => return Fate::Evict(DisconnectReason::PeerClosed),
        ReadOutcome::Failed(e) => {
            return Fate::Evict(DisconnectReason::SocketError(e.to_string()));
        }
    };
    if verbose {
        sink.record(ServerEvent::BytesRead { id: conn.id(), bytes });
    }

    let client = ClientInfo {
        id: conn.id(),
        peer: conn.peer(),
    };

    match config.framing {
        FramingMode::PerRead => {
            let response = handle_message(registry, sink, verbose, &client, conn.received(bytes));
            respond(conn, sink, verbose, &response);
        }
        FramingMode::Streaming => {
            conn.stash_received(bytes);
            while let Some(frame) = conn.next_frame() {
                let response = match frame {
                    Frame::Message(message) => {
                        handle_message(registry, sink, verbose, &client, &message)
                    }
                    Frame::Malformed(bytes) => {
                        sink.record(ServerEvent::InvalidJson { id: client.id, bytes });
                        Response::invalid_json()
                    }
                    Frame::Oversized(bytes) => {
                        sink.record(ServerEvent::MessageTooLarge { id: client.id, bytes });
                        Response::invalid_json()
                    }
                };
                respond(conn, sink, verbose, &response);
            }
        }
    }

    let queued = conn.queued_bytes();
    if queued > config.max_outbound_size {
        return Fate::Evict(DisconnectReason::OutboundOverflow {
            queued,
            limit: config.max_outbound_size,
        });
    }
    Fate::Keep
}

fn handle_message(
    registry: &CommandRegistry,
    sink: &dyn DiagnosticSink,
    verbose: bool,
    client: &ClientInfo,
    message: &[u8],
) -> Response {
    let id = client.id;
    if verbose {
        sink.record(ServerEvent::RequestReceived {
            id,
            payload: String::from_utf8_lossy(message).into_owned(),
        });
    }

    let dispatched = dispatch(registry, message, client);
    sink.record(match dispatched.outcome {
        DispatchOutcome::Handled(command) => ServerEvent::CommandDispatched { id, command },
        DispatchOutcome::UnknownCommand(command) => ServerEvent::UnknownCommand { id, command },
        DispatchOutcome::MissingType => ServerEvent::MissingType { id },
        DispatchOutcome::InvalidJson => ServerEvent::InvalidJson {
            id,
            bytes: message.len(),
        },
    });
    dispatched.response
}

/// Serializes a response, queues it behind anything still pending and
/// writes as much as the socket takes.
fn respond(
    conn: &mut ClientConnection,
    sink: &dyn DiagnosticSink,
    verbose: bool,
    response: &Response,
) {
    match response.to_bytes() {
        Ok(bytes) => {
            conn.queue(&bytes);
            report_flush(conn, sink, verbose);
        }
        Err(e) => sink.record(ServerEvent::EncodeFailed {
            id: conn.id(),
            error: e.to_string(),
        }),
    }
}

fn report_flush(conn: &mut ClientConnection, sink: &dyn DiagnosticSink, verbose: bool) {
    let id = conn.id();
    match conn.flush() {
        FlushOutcome::Empty => {}
        FlushOutcome::Complete { written } => {
            sink.record(ServerEvent::ResponseSent { id, bytes: written });
        }
        FlushOutcome::Pending { written, remaining } => {
            if verbose {
                sink.record(ServerEvent::WriteProgress {
                    id,
                    sent: written,
                    total: written + remaining,
                });
            }
            sink.record(ServerEvent::ResponseDeferred {
                id,
                sent: written,
                remaining,
            });
        }
        FlushOutcome::Failed { error, discarded } => {
            sink.record(ServerEvent::SendFailed {
                id,
                error: error.to_string(),
                discarded,
            });
        }
    }
}

#[cfg(test)]
mod schedule_tests {
    use super::PollSchedule;
    use std::time::Duration;

    #[test]
    fn test_schedule_waits_for_interval() {
        let mut schedule = PollSchedule::new(Duration::from_millis(100));

        assert_eq!(schedule.advance(Duration::from_millis(40)), None);
        assert_eq!(schedule.advance(Duration::from_millis(40)), None);
        assert_eq!(
            schedule.advance(Duration::from_millis(40)),
            Some(Duration::from_millis(120))
        );
        // Accumulator restarts after a poll.
        assert_eq!(schedule.advance(Duration::from_millis(40)), None);
    }

    #[test]
    fn test_zero_interval_polls_every_frame() {
        let mut schedule = PollSchedule::new(Duration::ZERO);
        assert_eq!(
            schedule.advance(Duration::from_millis(16)),
            Some(Duration::from_millis(16))
        );
        assert_eq!(schedule.advance(Duration::ZERO), Some(Duration::ZERO));
    }
}
