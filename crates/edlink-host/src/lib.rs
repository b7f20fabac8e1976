//! # edlink-host: editor capabilities for the edlink command server
//!
//! The server core knows nothing about levels, actors or assets. This crate
//! supplies the built-in command set on top of a small capability trait:
//!
//! - [`EditorHost`]: what the handlers need from the host's object model
//! - [`handlers`]: one [`CommandHandler`](edlink_server::CommandHandler) per
//!   built-in command, plus [`install`] to register them all
//! - [`SceneModel`]: an in-memory host for tests and the demo server
//!
//! ```ignore
//! use edlink_host::{SceneModel, builtin_registry, shared};
//! use edlink_server::{Server, ServerConfig};
//!
//! let host = shared(SceneModel::new());
//! let mut server = Server::new(ServerConfig::default(), builtin_registry(&host)?);
//! server.start()?;
//! ```

mod error;
pub mod handlers;
mod host;
mod params;
mod scene;

pub use error::{HostError, HostResult};
pub use handlers::{builtin_command_names, builtin_handlers, builtin_registry, install};
pub use host::{
    ActorInfo, ActorKind, AssetDomain, AssetOperation, AssetRequest, ColorGrading,
    DEFAULT_TEMPLATE_CATEGORY, EditorHost, GradedVolume, ImportedTemplate, PythonOutput,
    PythonScript, SharedHost, SpawnRequest, SpawnedActor, TemplateImport, TemplateVariant,
    TransformEdit, Vec3, shared,
};
pub use scene::{COLOR_GRADING_KEYS, SceneModel};
