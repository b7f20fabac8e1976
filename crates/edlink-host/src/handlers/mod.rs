//! Built-in command handlers.
//!
//! Each handler reads its params, calls one [`EditorHost`] operation and
//! shapes the response. Host and param errors become error responses; a
//! handler never panics on bad input.

mod assets;
mod content;
mod scene;

use std::sync::PoisonError;

use edlink_server::{ClientInfo, CommandHandler, CommandRegistry, Params, RegistryError, Response};
use tracing::{debug, warn};

use crate::error::HostResult;
use crate::host::{EditorHost, SharedHost};

pub use assets::{ASSET_COMMANDS, AssetCommand, AssetHandler};
pub use content::{MISSING_SCRIPT_MESSAGE, MISSING_VARIANT_MESSAGE, SCRIPT_FAILED_MESSAGE};
pub use scene::{MAX_ACTORS_IN_SCENE_INFO, NO_MODIFICATIONS_MESSAGE};

/// Signature shared by the host-backed handlers.
type Run = fn(&mut dyn EditorHost, &Params) -> HostResult<Response>;

const HOST_COMMANDS: &[(&str, Run)] = &[
    ("get_scene_info", scene::get_scene_info),
    ("create_object", scene::create_object),
    ("modify_object", scene::modify_object),
    ("delete_object", scene::delete_object),
    ("execute_python", content::execute_python),
    ("import_template_variant", content::import_template_variant),
    ("apply_color_grading", content::apply_color_grading),
];

/// A named command backed by one function over the host.
pub struct HostHandler {
    name: &'static str,
    host: SharedHost,
    run: Run,
}

impl HostHandler {
    fn new(name: &'static str, host: SharedHost, run: Run) -> Self {
        Self { name, host, run }
    }
}

impl CommandHandler for HostHandler {
    fn name(&self) -> &str {
        self.name
    }

    fn execute(&self, params: &Params, client: &ClientInfo) -> Response {
        debug!(command = self.name, client = %client.id, "executing command");
        let mut host = self.host.lock().unwrap_or_else(PoisonError::into_inner);
        match (self.run)(&mut *host, params) {
            Ok(response) => response,
            Err(e) => {
                warn!(command = self.name, error = %e, "command failed");
                e.into_response()
            }
        }
    }
}

/// Names of every built-in command, in registration order.
pub fn builtin_command_names() -> Vec<&'static str> {
    HOST_COMMANDS
        .iter()
        .map(|(name, _)| *name)
        .chain(ASSET_COMMANDS.iter().map(|def| def.name))
        .collect()
}

/// Creates one handler per built-in command, all sharing `host`.
pub fn builtin_handlers(host: &SharedHost) -> Vec<Box<dyn CommandHandler>> {
    let scene = HOST_COMMANDS.iter().map(|&(name, run)| {
        Box::new(HostHandler::new(name, SharedHost::clone(host), run)) as Box<dyn CommandHandler>
    });
    let assets = ASSET_COMMANDS.iter().map(|def| {
        Box::new(AssetHandler::new(def, SharedHost::clone(host))) as Box<dyn CommandHandler>
    });
    scene.chain(assets).collect()
}

/// Registers the built-in handlers.
///
/// # Errors
///
/// Fails on the first name that is already registered. Handlers before it
/// stay registered.
pub fn install(registry: &mut CommandRegistry, host: &SharedHost) -> Result<(), RegistryError> {
    for handler in builtin_handlers(host) {
        registry.register(handler)?;
    }
    Ok(())
}

/// Returns a registry holding exactly the built-in handlers.
pub fn builtin_registry(host: &SharedHost) -> Result<CommandRegistry, RegistryError> {
    let mut registry = CommandRegistry::new();
    install(&mut registry, host)?;
    Ok(registry)
}
