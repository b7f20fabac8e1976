//! Server configuration.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

/// Port the server listens on when none is configured.
pub const DEFAULT_PORT: u16 = 13377;

/// Default per-connection receive buffer capacity.
pub const DEFAULT_RECEIVE_BUFFER_SIZE: usize = 64 * 1024; // 64 KiB

/// Default cap on response bytes queued for a client that is not reading.
pub const DEFAULT_MAX_OUTBOUND_SIZE: usize = 16 * 1024 * 1024; // 16 MiB

/// Smallest receive buffer the server will allocate. One byte is always
/// reserved, so anything smaller could never read.
pub const MIN_RECEIVE_BUFFER_SIZE: usize = 2;

/// How inbound bytes are split into messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FramingMode {
    /// Each successful read is treated as exactly one JSON message.
    ///
    /// This is what existing clients expect: they write one object and wait
    /// for the reply. A message split across TCP segments, or two messages
    /// coalesced into one read, will be answered with an error.
    #[default]
    PerRead,
    /// Bytes accumulate per connection and every complete JSON value is
    /// dispatched as it becomes available. No delimiter is required.
    Streaming,
}

/// Server configuration.
///
/// Constructed once by the embedding host and read-only after the server is
/// built.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind the listener to.
    pub bind_addr: IpAddr,
    /// Port to listen on. `0` lets the OS pick one.
    pub port: u16,
    /// Receive buffer capacity per connection, in bytes.
    pub receive_buffer_size: usize,
    /// Connections silent for longer than this are closed.
    pub idle_timeout: Duration,
    /// How often the host tick actually polls sockets.
    pub poll_interval: Duration,
    /// Emit per-read and per-write diagnostics.
    pub verbose_logging: bool,
    /// Message framing on inbound bytes.
    pub framing: FramingMode,
    /// A connection whose unsent response bytes exceed this is closed.
    pub max_outbound_size: usize,
}

impl ServerConfig {
    /// Creates a configuration listening on the given port on localhost.
    pub fn new(port: u16) -> Self {
        Self {
            port,
            ..Self::default()
        }
    }

    /// Returns the socket address the listener binds to.
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_addr, self.port)
    }

    /// Sets the bind address.
    pub fn with_bind_addr(mut self, addr: impl Into<IpAddr>) -> Self {
        self.bind_addr = addr.into();
        self
    }

    /// Sets the receive buffer size, clamped to [`MIN_RECEIVE_BUFFER_SIZE`].
    pub fn with_receive_buffer_size(mut self, size: usize) -> Self {
        self.receive_buffer_size = size.max(MIN_RECEIVE_BUFFER_SIZE);
        self
    }

    /// Sets the idle timeout.
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Sets the poll interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Enables or disables verbose logging.
    pub fn with_verbose_logging(mut self, verbose: bool) -> Self {
        self.verbose_logging = verbose;
        self
    }

    /// Sets the outbound queue cap.
    pub fn with_max_outbound_size(mut self, size: usize) -> Self {
        self.max_outbound_size = size;
        self
    }

    /// Sets the framing mode.
    pub fn with_framing(mut self, framing: FramingMode) -> Self {
        self.framing = framing;
        self
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: DEFAULT_PORT,
            receive_buffer_size: DEFAULT_RECEIVE_BUFFER_SIZE,
            idle_timeout: Duration::from_secs(30),
            poll_interval: Duration::from_millis(100),
            verbose_logging: false,
            framing: FramingMode::PerRead,
            max_outbound_size: DEFAULT_MAX_OUTBOUND_SIZE,
        }
    }
}
