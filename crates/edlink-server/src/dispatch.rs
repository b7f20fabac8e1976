//! Routes one inbound message to its command handler.

use serde_json::Value;

use crate::protocol::{Params, Response};
use crate::registry::{ClientInfo, CommandRegistry};

/// How a message was handled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The named handler ran.
    Handled(String),
    /// No handler is registered under the name.
    UnknownCommand(String),
    /// The object had no string `type` field.
    MissingType,
    /// The bytes were not a JSON object.
    InvalidJson,
}

/// A response together with how it was produced.
#[derive(Debug, Clone, PartialEq)]
pub struct Dispatch {
    pub response: Response,
    pub outcome: DispatchOutcome,
}

impl Dispatch {
    fn rejected(response: Response, outcome: DispatchOutcome) -> Self {
        Self { response, outcome }
    }
}

/// Parses `message` and runs the matching handler.
///
/// Always yields exactly one response. Protocol errors become error
/// responses; the handler's own envelope is passed through untouched.
pub fn dispatch(registry: &CommandRegistry, message: &[u8], client: &ClientInfo) -> Dispatch {
    let mut object = match serde_json::from_slice::<Value>(message) {
        Ok(Value::Object(object)) => object,
        Ok(_) | Err(_) => {
            return Dispatch::rejected(Response::invalid_json(), DispatchOutcome::InvalidJson);
        }
    };

    let Some(command) = object.get("type").and_then(Value::as_str).map(str::to_owned) else {
        return Dispatch::rejected(Response::missing_type(), DispatchOutcome::MissingType);
    };

    let Some(handler) = registry.get(&command) else {
        return Dispatch::rejected(
            Response::unknown_command(&command),
            DispatchOutcome::UnknownCommand(command),
        );
    };

    // A missing or non-object `params` is treated as empty.
    let params = match object.remove("params") {
        Some(Value::Object(params)) => params,
        _ => Params::new(),
    };

    Dispatch {
        response: handler.execute(&params, client),
        outcome: DispatchOutcome::Handled(command),
    }
}
