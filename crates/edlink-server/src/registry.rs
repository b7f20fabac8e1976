//! Command handler registry.
//!
//! Maps command names to handlers. Names are unique: registering a name that
//! is already present fails instead of replacing the existing handler.

use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;

use crate::connection::ConnectionId;
use crate::error::RegistryError;
use crate::protocol::{Params, Response};

/// The connection a command arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientInfo {
    /// Server-assigned connection id.
    pub id: ConnectionId,
    /// Remote address of the client.
    pub peer: SocketAddr,
}

/// A named command against the host's object model.
///
/// Handlers run on the host's tick thread and must return promptly; a
/// handler that blocks stalls every connection and the host itself.
pub trait CommandHandler: Send {
    /// The command name this handler responds to.
    fn name(&self) -> &str;

    /// Executes the command.
    ///
    /// The returned envelope is sent to the client unchanged.
    fn execute(&self, params: &Params, client: &ClientInfo) -> Response;
}

/// Registry of command handlers keyed by name.
#[derive(Default)]
pub struct CommandRegistry {
    handlers: HashMap<String, Box<dyn CommandHandler>>,
}

impl CommandRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler under its own name.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::EmptyName`] if the handler has no name, or
    /// [`RegistryError::AlreadyRegistered`] if the name is taken. The
    /// existing handler is left in place.
    pub fn register(&mut self, handler: Box<dyn CommandHandler>) -> Result<(), RegistryError> {
        let name = handler.name();
        if name.is_empty() {
            return Err(RegistryError::EmptyName);
        }
        if self.handlers.contains_key(name) {
            return Err(RegistryError::AlreadyRegistered(name.to_string()));
        }
        self.handlers.insert(name.to_string(), handler);
        Ok(())
    }

    /// Removes the handler registered under `name`.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::EmptyName`] for an empty name and
    /// [`RegistryError::NotRegistered`] if nothing is registered.
    pub fn unregister(&mut self, name: &str) -> Result<(), RegistryError> {
        if name.is_empty() {
            return Err(RegistryError::EmptyName);
        }
        self.handlers
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| RegistryError::NotRegistered(name.to_string()))
    }

    /// Looks up a handler.
    pub fn get(&self, name: &str) -> Option<&dyn CommandHandler> {
        self.handlers.get(name).map(AsRef::as_ref)
    }

    /// Returns true if a handler is registered under `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// Returns the registered command names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.keys().cloned().collect();
        names.sort();
        names
    }

    /// Returns the number of registered handlers.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Returns true if no handlers are registered.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl fmt::Debug for CommandRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandRegistry")
            .field("commands", &self.names())
            .finish()
    }
}

/// A handler built from a name and a closure.
///
/// Handy for external modules and tests that don't need a dedicated type.
pub struct FnHandler<F> {
    name: String,
    func: F,
}

impl<F> FnHandler<F>
where
    F: Fn(&Params, &ClientInfo) -> Response + Send,
{
    /// Creates a handler named `name` that runs `func`.
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            func,
        }
    }

    /// Boxes the handler for registration.
    pub fn boxed(self) -> Box<dyn CommandHandler>
    where
        F: 'static,
    {
        Box::new(self)
    }
}

impl<F> CommandHandler for FnHandler<F>
where
    F: Fn(&Params, &ClientInfo) -> Response + Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn execute(&self, params: &Params, client: &ClientInfo) -> Response {
        (self.func)(params, client)
    }
}
