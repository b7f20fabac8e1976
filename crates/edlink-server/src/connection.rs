//! Client connection state.

use std::fmt;
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr};
use std::time::Duration;

use bytes::{Buf, Bytes, BytesMut};
use mio::net::TcpStream;
use serde::de::IgnoredAny;

use crate::config::MIN_RECEIVE_BUFFER_SIZE;

/// Identifies a connection for as long as the server runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Wraps a raw id.
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw id.
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Result of the one-byte liveness peek.
#[derive(Debug)]
pub(crate) enum Probe {
    /// At least one byte is waiting.
    Ready,
    /// Nothing to read right now.
    Idle,
    /// Orderly shutdown by the peer.
    Closed,
    Failed(io::Error),
}

/// Result of a single non-blocking read.
#[derive(Debug)]
pub(crate) enum ReadOutcome {
    Data(usize),
    WouldBlock,
    Closed,
    Failed(io::Error),
}

/// Result of flushing the outbound buffer.
#[derive(Debug)]
pub(crate) enum FlushOutcome {
    /// Nothing was queued.
    Empty,
    /// Everything queued was written.
    Complete { written: usize },
    /// The socket stopped accepting bytes; the rest stays queued.
    Pending { written: usize, remaining: usize },
    /// A hard error; queued bytes were discarded.
    Failed { error: io::Error, discarded: usize },
}

/// A message boundary found by streaming framing.
#[derive(Debug)]
pub(crate) enum Frame {
    /// One complete JSON value.
    Message(Bytes),
    /// Bytes that can never form valid JSON.
    Malformed(usize),
    /// An incomplete value that already fills the receive buffer.
    Oversized(usize),
}

/// State of an accepted client connection.
///
/// Owns its socket exclusively. Dropping the record closes the socket, so a
/// connection and its socket always go away together.
pub struct ClientConnection {
    id: ConnectionId,
    stream: TcpStream,
    peer: SocketAddr,
    /// Reusable read buffer. One byte is always left unused.
    receive_buf: Vec<u8>,
    /// Bytes awaiting a complete message (streaming framing only).
    pending: BytesMut,
    /// Response bytes not yet accepted by the socket.
    outbound: BytesMut,
    /// Time since the last successful read.
    idle: Duration,
}

impl ClientConnection {
    /// Wraps an accepted, non-blocking stream.
    pub(crate) fn new(
        id: ConnectionId,
        stream: TcpStream,
        peer: SocketAddr,
        buffer_size: usize,
    ) -> Self {
        let capacity = buffer_size.max(MIN_RECEIVE_BUFFER_SIZE);
        Self {
            id,
            stream,
            peer,
            receive_buf: vec![0; capacity],
            pending: BytesMut::new(),
            outbound: BytesMut::new(),
            idle: Duration::ZERO,
        }
    }

    /// Returns the connection id.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Returns the remote address.
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Returns the time since the last successful read.
    pub fn idle(&self) -> Duration {
        self.idle
    }

    /// Returns the number of response bytes still queued.
    pub fn queued_bytes(&self) -> usize {
        self.outbound.len()
    }

    pub(crate) fn reset_idle(&mut self) {
        self.idle = Duration::ZERO;
    }

    /// Adds `delta` to the idle duration and returns the new total.
    pub(crate) fn add_idle(&mut self, delta: Duration) -> Duration {
        self.idle = self.idle.saturating_add(delta);
        self.idle
    }

    /// Most bytes a single read may return.
    fn read_limit(&self) -> usize {
        self.receive_buf.len() - 1
    }

    /// Peeks one byte without consuming it.
    pub(crate) fn probe(&self) -> Probe {
        let mut byte = [0u8; 1];
        match self.stream.peek(&mut byte) {
            Ok(0) => Probe::Closed,
            Ok(_) => Probe::Ready,
            Err(ref e)
                if e.kind() == io::ErrorKind::WouldBlock
                    || e.kind() == io::ErrorKind::Interrupted =>
            {
                Probe::Idle
            }
            Err(e) => Probe::Failed(e),
        }
    }

    /// Reads once into the receive buffer.
    pub(crate) fn read(&mut self) -> ReadOutcome {
        let limit = self.read_limit();
        match self.stream.read(&mut self.receive_buf[..limit]) {
            Ok(0) => ReadOutcome::Closed,
            Ok(n) => ReadOutcome::Data(n),
            Err(ref e)
                if e.kind() == io::ErrorKind::WouldBlock
                    || e.kind() == io::ErrorKind::Interrupted =>
            {
                ReadOutcome::WouldBlock
            }
            Err(e) => ReadOutcome::Failed(e),
        }
    }

    /// The bytes from the last read of length `n`.
    pub(crate) fn received(&self, n: usize) -> &[u8] {
        &self.receive_buf[..n]
    }

    /// Moves the bytes from the last read into the framing buffer.
    pub(crate) fn stash_received(&mut self, n: usize) {
        self.pending.extend_from_slice(&self.receive_buf[..n]);
    }

    /// Splits the next complete JSON value off the framing buffer.
    pub(crate) fn next_frame(&mut self) -> Option<Frame> {
        enum Scan {
            Blank,
            Complete(usize),
            Incomplete,
            Invalid,
        }

        let scan = {
            let mut values =
                serde_json::Deserializer::from_slice(&self.pending).into_iter::<IgnoredAny>();
            match values.next() {
                None => Scan::Blank,
                Some(Ok(_)) => Scan::Complete(values.byte_offset()),
                Some(Err(e)) if e.is_eof() => Scan::Incomplete,
                Some(Err(_)) => Scan::Invalid,
            }
        };

        match scan {
            Scan::Blank => {
                self.pending.clear();
                None
            }
            Scan::Complete(end) => Some(Frame::Message(self.pending.split_to(end).freeze())),
            Scan::Incomplete if self.pending.len() >= self.read_limit() => {
                let bytes = self.pending.len();
                self.pending.clear();
                Some(Frame::Oversized(bytes))
            }
            Scan::Incomplete => None,
            Scan::Invalid => {
                let bytes = self.pending.len();
                self.pending.clear();
                Some(Frame::Malformed(bytes))
            }
        }
    }

    /// Appends response bytes to the outbound buffer.
    pub(crate) fn queue(&mut self, bytes: &[u8]) {
        self.outbound.extend_from_slice(bytes);
    }

    /// Writes queued bytes for as long as the socket makes progress.
    pub(crate) fn flush(&mut self) -> FlushOutcome {
        if self.outbound.is_empty() {
            return FlushOutcome::Empty;
        }

        let mut written = 0;
        while !self.outbound.is_empty() {
            match self.stream.write(&self.outbound) {
                // No forward progress; try again next tick.
                Ok(0) => break,
                Ok(n) => {
                    self.outbound.advance(n);
                    written += n;
                }
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(error) => {
                    let discarded = self.outbound.len();
                    self.outbound.clear();
                    return FlushOutcome::Failed { error, discarded };
                }
            }
        }

        if self.outbound.is_empty() {
            FlushOutcome::Complete { written }
        } else {
            FlushOutcome::Pending {
                written,
                remaining: self.outbound.len(),
            }
        }
    }

    /// Shuts the socket down in both directions.
    ///
    /// A peer that already went away is not an error.
    pub(crate) fn close(&self) -> io::Result<()> {
        match self.stream.shutdown(Shutdown::Both) {
            Err(ref e) if e.kind() == io::ErrorKind::NotConnected => Ok(()),
            other => other,
        }
    }
}

impl fmt::Debug for ClientConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConnection")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .field("idle", &self.idle)
            .field("pending", &self.pending.len())
            .field("outbound", &self.outbound.len())
            .finish()
    }
}
