//! # edlink-client: client for the edlink command server
//!
//! A small synchronous client. Each call writes one request envelope and
//! blocks until a complete JSON reply has arrived or the read times out.
//!
//! ## Usage
//!
//! ```ignore
//! use edlink_client::{Client, ClientConfig};
//! use serde_json::json;
//!
//! let mut client = Client::connect("127.0.0.1:13377", ClientConfig::default())?;
//!
//! let params = json!({"type": "cube", "location": [0, 0, 50]});
//! let spawned = client.call("create_object", params.as_object().cloned().unwrap_or_default())?;
//! ```

mod client;
mod error;

pub use client::{Client, ClientConfig};
pub use error::{ClientError, ClientResult};

pub use edlink_server::{Params, Request, Response, Status};
