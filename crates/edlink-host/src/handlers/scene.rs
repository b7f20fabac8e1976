//! Level and actor commands.

use edlink_server::{Params, Response};
use serde::Serialize;
use serde_json::json;
use tracing::info;

use crate::error::{HostError, HostResult};
use crate::host::{ActorInfo, ActorKind, EditorHost, SpawnRequest, TransformEdit};
use crate::params::{encode, optional_str, required_str, vec3};

/// Most actors `get_scene_info` lists.
pub const MAX_ACTORS_IN_SCENE_INFO: usize = 100;

pub const NO_MODIFICATIONS_MESSAGE: &str = "No modifications specified";

#[derive(Serialize)]
struct SceneInfo {
    level: String,
    actor_count: usize,
    returned_actor_count: usize,
    limit_reached: bool,
    actors: Vec<ActorInfo>,
}

pub(super) fn get_scene_info(host: &mut dyn EditorHost, _params: &Params) -> HostResult<Response> {
    let actors = host.actors();
    let actor_count = actors.len();
    let listed: Vec<ActorInfo> = actors.into_iter().take(MAX_ACTORS_IN_SCENE_INFO).collect();

    let info = SceneInfo {
        level: host.level_name(),
        actor_count,
        returned_actor_count: listed.len(),
        limit_reached: listed.len() >= MAX_ACTORS_IN_SCENE_INFO,
        actors: listed,
    };
    Ok(Response::success_with(encode(&info)?))
}

pub(super) fn create_object(host: &mut dyn EditorHost, params: &Params) -> HostResult<Response> {
    let type_name = required_str(params, "type")?;
    let location =
        vec3(params, "location")?.ok_or_else(|| HostError::InvalidField("location".into()))?;
    let mesh = optional_str(params, "mesh").map(str::to_owned);
    let kind = ActorKind::from_type_name(type_name, mesh)
        .ok_or_else(|| HostError::UnsupportedActorType(type_name.to_string()))?;

    let spawned = host.spawn_actor(SpawnRequest {
        kind,
        location,
        label: optional_str(params, "label").map(str::to_owned),
    })?;
    info!(actor = %spawned.name, "spawned actor");
    Ok(Response::success_with(encode(&spawned)?))
}

pub(super) fn modify_object(host: &mut dyn EditorHost, params: &Params) -> HostResult<Response> {
    let name = required_str(params, "name")?;
    let edit = TransformEdit {
        location: vec3(params, "location")?,
        rotation: vec3(params, "rotation")?,
        scale: vec3(params, "scale")?,
    };

    // An empty edit still checks that the actor exists.
    let actor = host.transform_actor(name, &edit)?;
    let response = Response::success_with(json!({ "name": actor.name }));
    if edit.is_empty() {
        return Ok(response.with_message(NO_MODIFICATIONS_MESSAGE));
    }
    info!(actor = name, "modified actor");
    Ok(response)
}

pub(super) fn delete_object(host: &mut dyn EditorHost, params: &Params) -> HostResult<Response> {
    let name = required_str(params, "name")?;
    host.delete_actor(name)?;
    info!(actor = name, "deleted actor");
    Ok(Response::success())
}
