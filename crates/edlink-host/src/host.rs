//! The capability interface to the host's object model.
//!
//! Built-in handlers never touch the host directly; they translate wire
//! params into the request types below and call through [`EditorHost`].

use std::fmt;
use std::sync::{Arc, Mutex};

use edlink_server::Params;
use serde::Serialize;
use serde_json::Value;

use crate::error::HostResult;

/// An `[x, y, z]` triple.
pub type Vec3 = [f64; 3];

/// A host shared between every built-in handler.
pub type SharedHost = Arc<Mutex<dyn EditorHost>>;

/// Wraps a host for use by the built-in handlers.
pub fn shared<H: EditorHost + 'static>(host: H) -> SharedHost {
    Arc::new(Mutex::new(host))
}

/// Operations the built-in command handlers need from the host.
///
/// Implementations run on the server's poll thread and must return
/// promptly.
pub trait EditorHost: Send {
    /// Name of the currently loaded level.
    fn level_name(&self) -> String;

    /// Every actor in the level, in a stable order.
    fn actors(&self) -> Vec<ActorInfo>;

    fn spawn_actor(&mut self, request: SpawnRequest) -> HostResult<SpawnedActor>;

    /// Applies the edit to the named actor and returns its new state.
    fn transform_actor(&mut self, name: &str, edit: &TransformEdit) -> HostResult<ActorInfo>;

    fn delete_actor(&mut self, name: &str) -> HostResult<()>;

    /// Runs a script. A script that raised is `Ok` with `error` set.
    fn run_python(&mut self, script: &PythonScript) -> HostResult<PythonOutput>;

    fn import_template(&mut self, import: &TemplateImport) -> HostResult<ImportedTemplate>;

    fn apply_color_grading(&mut self, grading: &ColorGrading) -> HostResult<GradedVolume>;

    /// Creates, edits or inspects a content asset. Returns the command's
    /// result object.
    fn asset_command(&mut self, request: &AssetRequest) -> HostResult<Value>;
}

/// Actor summary as reported by `get_scene_info`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActorInfo {
    pub name: String,
    #[serde(rename = "type")]
    pub class: String,
    pub label: String,
    pub location: Vec3,
}

/// Kinds of actor `create_object` can spawn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActorKind {
    /// A static mesh actor, optionally with a mesh asset path.
    StaticMesh { mesh: Option<String> },
    /// A static mesh actor using the engine's basic cube.
    Cube,
}

impl ActorKind {
    /// Maps a wire type name to a kind. `cube` is matched case-insensitively.
    pub fn from_type_name(type_name: &str, mesh: Option<String>) -> Option<Self> {
        if type_name == "StaticMeshActor" {
            Some(Self::StaticMesh { mesh })
        } else if type_name.eq_ignore_ascii_case("cube") {
            Some(Self::Cube)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SpawnRequest {
    pub kind: ActorKind,
    pub location: Vec3,
    pub label: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SpawnedActor {
    pub name: String,
    pub label: String,
}

/// Optional transform components for `modify_object`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransformEdit {
    pub location: Option<Vec3>,
    pub rotation: Option<Vec3>,
    pub scale: Option<Vec3>,
}

impl TransformEdit {
    /// Returns true if no component is set.
    pub fn is_empty(&self) -> bool {
        self.location.is_none() && self.rotation.is_none() && self.scale.is_none()
    }
}

/// Source of a script to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PythonScript {
    Code(String),
    File(String),
}

/// Captured output of a script run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PythonOutput {
    pub output: String,
    pub error: Option<String>,
}

/// Template projects that can be imported into the content tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TemplateVariant {
    ThirdPerson,
    FirstPerson,
    TopDown,
}

impl TemplateVariant {
    pub const ALL: [Self; 3] = [Self::ThirdPerson, Self::FirstPerson, Self::TopDown];

    /// Parses a variant, ignoring case, spaces, dashes and underscores.
    /// Accepts a few common aliases such as `fps` and `td`.
    pub fn parse(input: &str) -> Option<Self> {
        let normalized: String = input
            .chars()
            .filter(|c| !matches!(c, ' ' | '-' | '_'))
            .map(|c| c.to_ascii_lowercase())
            .collect();
        Self::ALL.into_iter().find(|variant| {
            variant.key() == normalized || variant.aliases().contains(&normalized.as_str())
        })
    }

    fn key(self) -> &'static str {
        match self {
            Self::ThirdPerson => "thirdperson",
            Self::FirstPerson => "firstperson",
            Self::TopDown => "topdown",
        }
    }

    fn aliases(self) -> &'static [&'static str] {
        match self {
            Self::ThirdPerson => &["third", "3rdperson", "thirdpersonbp"],
            Self::FirstPerson => &["first", "fps", "firstpersonbp"],
            Self::TopDown => &["top", "td", "topdownbp"],
        }
    }

    /// Human-readable name, e.g. "Third Person".
    pub fn friendly_name(self) -> &'static str {
        match self {
            Self::ThirdPerson => "Third Person",
            Self::FirstPerson => "First Person",
            Self::TopDown => "Top Down",
        }
    }

    /// Folder used when the request names none.
    pub fn default_folder(self) -> &'static str {
        match self {
            Self::ThirdPerson => "ThirdPersonTemplate",
            Self::FirstPerson => "FirstPersonTemplate",
            Self::TopDown => "TopDownTemplate",
        }
    }
}

impl fmt::Display for TemplateVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.friendly_name())
    }
}

/// Category folder used when the request names none.
pub const DEFAULT_TEMPLATE_CATEGORY: &str = "MCPTemplates";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateImport {
    pub variant: TemplateVariant,
    pub destination_folder: String,
    pub category: String,
    pub overwrite_existing: bool,
}

impl TemplateImport {
    /// Content path the template lands under, e.g. `/Game/MCPTemplates/TopDownTemplate`.
    pub fn content_path(&self) -> String {
        format!("/Game/{}/{}", self.category, self.destination_folder)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImportedTemplate {
    pub variant: String,
    pub content_path: String,
    pub overwrote_existing: bool,
}

/// Post-process overrides for `apply_color_grading`.
#[derive(Debug, Clone, PartialEq)]
pub struct ColorGrading {
    /// Name or label of the target volume.
    pub volume_name: Option<String>,
    pub create_if_missing: bool,
    pub settings: Params,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GradedVolume {
    pub volume_name: String,
    pub applied_overrides: Params,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Content asset families reachable through `asset_command`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum AssetDomain {
    Material,
    DataTable,
    GameplayEffect,
    AttributeSet,
    Blueprint,
    WidgetBlueprint,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum AssetOperation {
    /// Make a new asset at `path`.
    Create,
    /// Merge params into the asset at `path`.
    Modify,
    /// Read back the asset at `path`.
    Inspect,
    /// Add a row to the data table at `path`.
    Register,
    /// Add an event graph entry to the blueprint at `path`.
    AddEvent,
}

/// A validated asset command.
#[derive(Debug, Clone, PartialEq)]
pub struct AssetRequest {
    pub command: String,
    pub domain: AssetDomain,
    pub operation: AssetOperation,
    /// Object path of the asset the operation targets.
    pub path: String,
    pub params: Params,
}
