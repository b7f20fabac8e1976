//! In-memory host used by tests and the demo server.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use edlink_server::Params;
use serde_json::{Value, json};

use crate::error::{HostError, HostResult};
use crate::host::{
    ActorInfo, ActorKind, AssetDomain, AssetOperation, AssetRequest, ColorGrading, EditorHost,
    GradedVolume, ImportedTemplate, PythonOutput, PythonScript, SpawnRequest, SpawnedActor,
    TemplateImport, TemplateVariant, TransformEdit, Vec3,
};

/// Post-process keys the model accepts as overrides.
pub const COLOR_GRADING_KEYS: &[&str] = &[
    "color_saturation",
    "color_contrast",
    "color_gamma",
    "color_gain",
    "color_offset",
    "temperature",
    "tint",
    "film_slope",
    "film_toe",
    "film_shoulder",
    "film_black_clip",
    "film_white_clip",
    "lut",
    "lut_intensity",
];

const POST_PROCESS_CLASS: &str = "PostProcessVolume";
const STATIC_MESH_CLASS: &str = "StaticMeshActor";

type PythonRunner = Box<dyn FnMut(&PythonScript) -> PythonOutput + Send>;

#[derive(Debug, Clone)]
struct Actor {
    name: String,
    class: String,
    label: String,
    location: Vec3,
    rotation: Vec3,
    scale: Vec3,
    mesh: Option<String>,
    /// Level furniture that cannot be deleted.
    protected: bool,
}

impl Actor {
    fn new(name: &str, class: &str, location: Vec3) -> Self {
        Self {
            name: name.to_string(),
            class: class.to_string(),
            label: name.to_string(),
            location,
            rotation: [0.0; 3],
            scale: [1.0; 3],
            mesh: None,
            protected: false,
        }
    }

    fn protected(mut self) -> Self {
        self.protected = true;
        self
    }

    fn info(&self) -> ActorInfo {
        ActorInfo {
            name: self.name.clone(),
            class: self.class.clone(),
            label: self.label.clone(),
            location: self.location,
        }
    }
}

#[derive(Debug, Clone)]
struct Asset {
    domain: AssetDomain,
    data: Params,
    /// Rows or events appended by register/add-event commands.
    entries: Vec<Value>,
}

/// A level and content tree held entirely in memory.
///
/// Starts with world settings, a builder brush, a floor and a player start.
/// Python is unavailable unless a runner is installed with
/// [`SceneModel::with_python_runner`].
pub struct SceneModel {
    level: String,
    actors: Vec<Actor>,
    /// Next numeric suffix per actor class.
    counters: HashMap<String, u32>,
    templates: BTreeMap<String, TemplateVariant>,
    /// Post-process overrides keyed by volume name.
    volumes: BTreeMap<String, Params>,
    assets: BTreeMap<String, Asset>,
    python: Option<PythonRunner>,
}

impl SceneModel {
    /// Creates the default demo level.
    pub fn new() -> Self {
        Self::with_level("DemoLevel")
    }

    pub fn with_level(level: impl Into<String>) -> Self {
        Self {
            level: level.into(),
            actors: vec![
                Actor::new("WorldSettings", "WorldSettings", [0.0; 3]).protected(),
                Actor::new("Brush_0", "Brush", [0.0; 3]).protected(),
                Actor::new("Floor", STATIC_MESH_CLASS, [0.0; 3]),
                Actor::new("PlayerStart", "PlayerStart", [0.0, 0.0, 100.0]),
            ],
            counters: HashMap::new(),
            templates: BTreeMap::new(),
            volumes: BTreeMap::new(),
            assets: BTreeMap::new(),
            python: None,
        }
    }

    /// Installs a script runner.
    pub fn with_python_runner(
        mut self,
        runner: impl FnMut(&PythonScript) -> PythonOutput + Send + 'static,
    ) -> Self {
        self.python = Some(Box::new(runner));
        self
    }

    /// Returns the number of actors in the level.
    pub fn actor_count(&self) -> usize {
        self.actors.len()
    }

    /// Returns `[location, rotation, scale]` of an actor.
    pub fn actor_transform(&self, name: &str) -> Option<[Vec3; 3]> {
        self.actors
            .iter()
            .find(|a| a.name == name)
            .map(|a| [a.location, a.rotation, a.scale])
    }

    /// Returns the mesh asset assigned to an actor, if any.
    pub fn actor_mesh(&self, name: &str) -> Option<&str> {
        self.actors
            .iter()
            .find(|a| a.name == name)
            .and_then(|a| a.mesh.as_deref())
    }

    /// Returns true if an asset exists at `path`.
    pub fn has_asset(&self, path: &str) -> bool {
        self.assets.contains_key(path)
    }

    /// Returns the overrides applied to a post-process volume.
    pub fn volume_overrides(&self, volume: &str) -> Option<&Params> {
        self.volumes.get(volume)
    }

    fn actor_mut(&mut self, name: &str) -> HostResult<&mut Actor> {
        self.actors
            .iter_mut()
            .find(|a| a.name == name)
            .ok_or_else(|| HostError::ActorNotFound(name.to_string()))
    }

    fn unique_name(&mut self, class: &str) -> String {
        let counter = self.counters.entry(class.to_string()).or_insert(0);
        let name = format!("{class}_{counter}");
        *counter += 1;
        name
    }

    fn add_actor(&mut self, class: &str, location: Vec3) -> &mut Actor {
        let name = self.unique_name(class);
        self.actors.push(Actor::new(&name, class, location));
        let index = self.actors.len() - 1;
        &mut self.actors[index]
    }

    /// Looks up an asset and checks it belongs to `domain`.
    fn asset_of(&mut self, path: &str, domain: AssetDomain) -> HostResult<&mut Asset> {
        let asset = self
            .assets
            .get_mut(path)
            .ok_or_else(|| HostError::AssetNotFound(path.to_string()))?;
        if asset.domain != domain {
            return Err(HostError::InvalidArgument(format!(
                "Asset at {path} is a {:?}, not a {domain:?}",
                asset.domain
            )));
        }
        Ok(asset)
    }

    /// Picks the volume to grade: a name or label match first, then any
    /// existing volume, then a new one if allowed.
    fn resolve_volume(&mut self, grading: &ColorGrading) -> HostResult<(String, Option<String>)> {
        let volumes = || self.actors.iter().filter(|a| a.class == POST_PROCESS_CLASS);

        if let Some(requested) = grading.volume_name.as_deref() {
            let found = volumes().find(|a| {
                a.name.eq_ignore_ascii_case(requested) || a.label.eq_ignore_ascii_case(requested)
            });
            if let Some(actor) = found {
                return Ok((actor.name.clone(), None));
            }
        }
        if let Some(actor) = volumes().next() {
            return Ok((actor.name.clone(), None));
        }
        if !grading.create_if_missing {
            return Err(HostError::Failed(
                "No post process volume found and create_if_missing is false".into(),
            ));
        }

        let actor = self.add_actor(POST_PROCESS_CLASS, [0.0; 3]);
        if let Some(label) = grading.volume_name.as_deref() {
            actor.label = label.to_string();
        }
        Ok((
            actor.name.clone(),
            Some("Created new post process volume".to_string()),
        ))
    }
}

impl Default for SceneModel {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SceneModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SceneModel")
            .field("level", &self.level)
            .field("actors", &self.actors.len())
            .field("templates", &self.templates.len())
            .field("assets", &self.assets.len())
            .field("python", &self.python.is_some())
            .finish()
    }
}

impl EditorHost for SceneModel {
    fn level_name(&self) -> String {
        self.level.clone()
    }

    fn actors(&self) -> Vec<ActorInfo> {
        self.actors.iter().map(Actor::info).collect()
    }

    fn spawn_actor(&mut self, request: SpawnRequest) -> HostResult<SpawnedActor> {
        let (mesh, default_label) = match request.kind {
            ActorKind::StaticMesh { mesh } => (mesh, None),
            ActorKind::Cube => (Some("/Engine/BasicShapes/Cube".to_string()), Some("Cube")),
        };

        let actor = self.add_actor(STATIC_MESH_CLASS, request.location);
        actor.mesh = mesh;
        if let Some(label) = request.label.as_deref().or(default_label) {
            actor.label = label.to_string();
        }
        Ok(SpawnedActor {
            name: actor.name.clone(),
            label: actor.label.clone(),
        })
    }

    fn transform_actor(&mut self, name: &str, edit: &TransformEdit) -> HostResult<ActorInfo> {
        let actor = self.actor_mut(name)?;
        if let Some(location) = edit.location {
            actor.location = location;
        }
        if let Some(rotation) = edit.rotation {
            actor.rotation = rotation;
        }
        if let Some(scale) = edit.scale {
            actor.scale = scale;
        }
        Ok(actor.info())
    }

    fn delete_actor(&mut self, name: &str) -> HostResult<()> {
        let index = self
            .actors
            .iter()
            .position(|a| a.name == name)
            .ok_or_else(|| HostError::ActorNotFound(name.to_string()))?;
        if self.actors[index].protected {
            return Err(HostError::ProtectedActor(name.to_string()));
        }
        let removed = self.actors.remove(index);
        self.volumes.remove(&removed.name);
        Ok(())
    }

    fn run_python(&mut self, script: &PythonScript) -> HostResult<PythonOutput> {
        match self.python.as_mut() {
            Some(runner) => Ok(runner(script)),
            None => Err(HostError::Unsupported(
                "Python scripting is not available in this host".into(),
            )),
        }
    }

    fn import_template(&mut self, import: &TemplateImport) -> HostResult<ImportedTemplate> {
        let content_path = import.content_path();
        let existed = self.templates.contains_key(&content_path);
        if existed && !import.overwrite_existing {
            return Err(HostError::InvalidArgument(format!(
                "Destination directory '{content_path}' already exists. \
                 Set overwrite_existing to true to replace it."
            )));
        }

        self.templates.insert(content_path.clone(), import.variant);
        Ok(ImportedTemplate {
            variant: import.variant.friendly_name().to_string(),
            content_path,
            overwrote_existing: existed,
        })
    }

    fn apply_color_grading(&mut self, grading: &ColorGrading) -> HostResult<GradedVolume> {
        let applied: Params = grading
            .settings
            .iter()
            .filter(|(key, _)| COLOR_GRADING_KEYS.contains(&key.as_str()))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        if applied.is_empty() {
            return Err(HostError::InvalidArgument(
                "No supported color grading settings supplied".into(),
            ));
        }

        let (volume_name, message) = self.resolve_volume(grading)?;
        self.volumes
            .entry(volume_name.clone())
            .or_default()
            .extend(applied.clone());

        Ok(GradedVolume {
            volume_name,
            applied_overrides: applied,
            message,
        })
    }

    fn asset_command(&mut self, request: &AssetRequest) -> HostResult<Value> {
        let path = request.path.as_str();
        match request.operation {
            AssetOperation::Create => {
                if self.assets.contains_key(path) {
                    return Err(HostError::AssetExists(path.to_string()));
                }
                self.assets.insert(
                    path.to_string(),
                    Asset {
                        domain: request.domain,
                        data: request.params.clone(),
                        entries: Vec::new(),
                    },
                );
                Ok(json!({ "path": path, "domain": request.domain }))
            }
            AssetOperation::Modify => {
                let asset = self.asset_of(path, request.domain)?;
                let changed: Vec<&String> =
                    request.params.keys().filter(|k| k.as_str() != "path").collect();
                for key in &changed {
                    if let Some(value) = request.params.get(key.as_str()) {
                        asset.data.insert((*key).clone(), value.clone());
                    }
                }
                Ok(json!({ "path": path, "modified_fields": changed }))
            }
            AssetOperation::Inspect => {
                let asset = self.asset_of(path, request.domain)?;
                Ok(json!({
                    "path": path,
                    "domain": asset.domain,
                    "data": asset.data,
                    "entries": asset.entries,
                }))
            }
            AssetOperation::Register | AssetOperation::AddEvent => {
                let asset = self
                    .assets
                    .get_mut(path)
                    .ok_or_else(|| HostError::AssetNotFound(path.to_string()))?;
                asset.entries.push(Value::Object(request.params.clone()));
                Ok(json!({ "path": path, "entry_count": asset.entries.len() }))
            }
        }
    }
}
