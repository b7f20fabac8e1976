//! Request and response envelopes.
//!
//! The wire format is plain JSON with no length prefix or delimiter:
//!
//! ```text
//! request:  {"type": "<command>", "params": { ... }}
//! response: {"status": "success" | "error", "message"?: "...", "result"?: { ... }}
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Message sent when a chunk is not a JSON object.
pub const INVALID_JSON_MESSAGE: &str = "Invalid JSON format";

/// Message sent when a request has no string `type` field.
pub const MISSING_TYPE_MESSAGE: &str = "Missing 'type' field";

/// Command parameters.
pub type Params = Map<String, Value>;

/// A command request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    /// Command name.
    #[serde(rename = "type")]
    pub command: String,
    /// Command parameters. Absent is the same as empty.
    #[serde(default)]
    pub params: Params,
}

impl Request {
    /// Creates a request with no parameters.
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            params: Params::new(),
        }
    }

    /// Creates a request with the given parameters.
    pub fn with_params(command: impl Into<String>, params: Params) -> Self {
        Self {
            command: command.into(),
            params,
        }
    }
}

/// Outcome reported in a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Success,
    Error,
}

/// A command response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    /// Whether the command succeeded.
    pub status: Status,
    /// Human-readable detail, typically present on error.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Command output, typically present on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
}

impl Response {
    /// Creates a success response with no result.
    pub fn success() -> Self {
        Self {
            status: Status::Success,
            message: None,
            result: None,
        }
    }

    /// Creates a success response carrying a result.
    pub fn success_with(result: Value) -> Self {
        Self {
            status: Status::Success,
            message: None,
            result: Some(result),
        }
    }

    /// Creates an error response.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: Status::Error,
            message: Some(message.into()),
            result: None,
        }
    }

    /// Attaches a message.
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Attaches a result.
    pub fn with_result(mut self, result: Value) -> Self {
        self.result = Some(result);
        self
    }

    /// Returns true if the status is `success`.
    pub fn is_success(&self) -> bool {
        self.status == Status::Success
    }

    /// Response to input that did not parse as a JSON object.
    pub fn invalid_json() -> Self {
        Self::error(INVALID_JSON_MESSAGE)
    }

    /// Response to a request without a `type` field.
    pub fn missing_type() -> Self {
        Self::error(MISSING_TYPE_MESSAGE)
    }

    /// Response to a request naming an unregistered command.
    pub fn unknown_command(command: &str) -> Self {
        Self::error(format!("Unknown command: {command}"))
    }

    /// Serializes to compact JSON bytes.
    pub fn to_bytes(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }
}
