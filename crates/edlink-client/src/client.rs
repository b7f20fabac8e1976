//! Blocking client for the command server.

use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use bytes::{Buf, BytesMut};
use edlink_server::{Params, Request, Response, Status};
use serde_json::Value;

use crate::error::{ClientError, ClientResult};

/// Configuration for the client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Read timeout.
    pub read_timeout: Option<Duration>,
    /// Write timeout.
    pub write_timeout: Option<Duration>,
    /// Bytes requested per socket read.
    pub buffer_size: usize,
    /// Largest reply accepted before giving up.
    pub max_response_size: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            read_timeout: Some(Duration::from_secs(10)),
            write_timeout: Some(Duration::from_secs(10)),
            buffer_size: 64 * 1024,
            max_response_size: 64 * 1024 * 1024,
        }
    }
}

impl ClientConfig {
    /// Sets both read and write timeouts.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = Some(timeout);
        self.write_timeout = Some(timeout);
        self
    }
}

/// Client for an edlink server.
///
/// Sends one request at a time and blocks until the reply is complete.
///
/// # Example
///
/// ```ignore
/// use edlink_client::{Client, ClientConfig};
///
/// let mut client = Client::connect("127.0.0.1:13377", ClientConfig::default())?;
/// let scene = client.call("get_scene_info", Default::default())?;
/// println!("{} actors", scene["actor_count"]);
/// ```
pub struct Client {
    stream: TcpStream,
    peer: SocketAddr,
    /// Bytes received but not yet consumed by a reply.
    read_buf: BytesMut,
    config: ClientConfig,
}

impl Client {
    /// Connects to a server.
    pub fn connect(addr: impl ToSocketAddrs, config: ClientConfig) -> ClientResult<Self> {
        let stream = TcpStream::connect(addr)?;
        stream.set_read_timeout(config.read_timeout)?;
        stream.set_write_timeout(config.write_timeout)?;
        stream.set_nodelay(true)?;
        let peer = stream.peer_addr()?;

        Ok(Self {
            stream,
            peer,
            read_buf: BytesMut::with_capacity(config.buffer_size),
            config,
        })
    }

    /// Returns the server address.
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Sends a command and returns the response envelope as-is.
    pub fn send(&mut self, command: &str, params: Params) -> ClientResult<Response> {
        self.request(&Request::with_params(command, params))
    }

    /// Sends a command and returns its result.
    ///
    /// An error envelope becomes [`ClientError::Command`]; a success with no
    /// result yields `Value::Null`.
    pub fn call(&mut self, command: &str, params: Params) -> ClientResult<Value> {
        let response = self.send(command, params)?;
        match response.status {
            Status::Success => Ok(response.result.unwrap_or(Value::Null)),
            Status::Error => Err(ClientError::Command {
                message: response.message.unwrap_or_default(),
            }),
        }
    }

    /// Sends a request envelope.
    pub fn request(&mut self, request: &Request) -> ClientResult<Response> {
        let bytes = serde_json::to_vec(request)?;
        self.send_raw(&bytes)
    }

    /// Writes raw bytes and reads one reply.
    ///
    /// Useful for sending payloads a well-formed client never would.
    pub fn send_raw(&mut self, bytes: &[u8]) -> ClientResult<Response> {
        self.stream.write_all(bytes)?;
        self.stream.flush()?;
        let value = self.read_value()?;
        Ok(serde_json::from_value(value)?)
    }

    /// Reads until one complete JSON value is buffered.
    ///
    /// Bytes after that value stay buffered for the next call.
    fn read_value(&mut self) -> ClientResult<Value> {
        let mut chunk = vec![0u8; self.config.buffer_size.max(1)];
        loop {
            if let Some(value) = self.take_value()? {
                return Ok(value);
            }

            match self.stream.read(&mut chunk) {
                Ok(0) => return self.finish_partial(ClientError::ConnectionClosed),
                Ok(n) => self.read_buf.extend_from_slice(&chunk[..n]),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e)
                    if e.kind() == io::ErrorKind::WouldBlock
                        || e.kind() == io::ErrorKind::TimedOut =>
                {
                    return self.finish_partial(ClientError::Timeout);
                }
                Err(e) => return Err(e.into()),
            }

            if self.read_buf.len() > self.config.max_response_size {
                return Err(ClientError::ResponseTooLarge {
                    limit: self.config.max_response_size,
                });
            }
        }
    }

    /// Splits the first complete value off the buffer, if there is one.
    fn take_value(&mut self) -> ClientResult<Option<Value>> {
        let (next, consumed) = {
            let mut values =
                serde_json::Deserializer::from_slice(&self.read_buf).into_iter::<Value>();
            let next = values.next();
            (next, values.byte_offset())
        };
        match next {
            None => Ok(None),
            Some(Ok(value)) => {
                self.read_buf.advance(consumed);
                Ok(Some(value))
            }
            Some(Err(e)) if e.is_eof() => Ok(None),
            Some(Err(e)) => {
                self.read_buf.clear();
                Err(e.into())
            }
        }
    }

    /// The stream ended or timed out before a complete value arrived.
    ///
    /// With nothing buffered, `reason` is the error; otherwise the reply was
    /// cut short.
    fn finish_partial(&mut self, reason: ClientError) -> ClientResult<Value> {
        let received = self.read_buf.len();
        let blank = self.read_buf.iter().all(u8::is_ascii_whitespace);
        self.read_buf.clear();
        if blank {
            Err(reason)
        } else {
            Err(ClientError::Serialization(format!(
                "incomplete response ({received} bytes received)"
            )))
        }
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("peer", &self.peer)
            .field("buffered", &self.read_buf.len())
            .finish_non_exhaustive()
    }
}
