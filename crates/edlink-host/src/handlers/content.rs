//! Scripting, template import and post-processing commands.

use edlink_server::{Params, Response};
use serde_json::json;
use tracing::{info, warn};

use crate::error::{HostError, HostResult};
use crate::host::{
    ColorGrading, DEFAULT_TEMPLATE_CATEGORY, EditorHost, PythonScript, TemplateImport,
    TemplateVariant,
};
use crate::params::{bool_or, encode, non_empty_str, object, optional_str};

pub const MISSING_SCRIPT_MESSAGE: &str =
    "Missing 'code' or 'file' field. You must provide either Python code or a file path.";

pub const SCRIPT_FAILED_MESSAGE: &str = "Python execution failed with errors";

pub const MISSING_VARIANT_MESSAGE: &str =
    "Missing 'variant' field. Expected one of: ThirdPerson, FirstPerson, TopDown.";

/// Finds `code` or `file`, at the top level first and then under `data`.
fn script_source(params: &Params) -> Option<PythonScript> {
    let lookup = |p: &Params| {
        optional_str(p, "code")
            .map(|code| PythonScript::Code(code.to_string()))
            .or_else(|| optional_str(p, "file").map(|file| PythonScript::File(file.to_string())))
    };
    lookup(params).or_else(|| object(params, "data").and_then(lookup))
}

pub(super) fn execute_python(host: &mut dyn EditorHost, params: &Params) -> HostResult<Response> {
    let script = script_source(params)
        .ok_or_else(|| HostError::InvalidArgument(MISSING_SCRIPT_MESSAGE.into()))?;

    let run = host.run_python(&script)?;
    match run.error {
        None => Ok(Response::success_with(json!({ "output": run.output }))),
        Some(error) => {
            warn!(%error, "python script raised");
            Ok(Response::error(SCRIPT_FAILED_MESSAGE)
                .with_result(json!({ "output": run.output, "error": error })))
        }
    }
}

pub(super) fn import_template_variant(
    host: &mut dyn EditorHost,
    params: &Params,
) -> HostResult<Response> {
    let requested = optional_str(params, "variant")
        .ok_or_else(|| HostError::InvalidArgument(MISSING_VARIANT_MESSAGE.into()))?;
    let variant = TemplateVariant::parse(requested).ok_or_else(|| {
        let supported: Vec<&str> = TemplateVariant::ALL.iter().map(|v| v.friendly_name()).collect();
        HostError::InvalidArgument(format!(
            "Unsupported template variant '{requested}'. Supported variants: {}.",
            supported.join(", ")
        ))
    })?;

    let import = TemplateImport {
        variant,
        destination_folder: non_empty_str(params, "destination_folder")
            .unwrap_or(variant.default_folder())
            .to_string(),
        category: non_empty_str(params, "category")
            .unwrap_or(DEFAULT_TEMPLATE_CATEGORY)
            .to_string(),
        overwrite_existing: bool_or(params, "overwrite_existing", false),
    };

    let imported = host.import_template(&import)?;
    info!(%variant, path = %imported.content_path, "imported template");
    Ok(Response::success_with(encode(&imported)?))
}

pub(super) fn apply_color_grading(
    host: &mut dyn EditorHost,
    params: &Params,
) -> HostResult<Response> {
    let settings = object(params, "settings")
        .ok_or_else(|| HostError::InvalidArgument("Missing 'settings' object".into()))?;

    let grading = ColorGrading {
        volume_name: non_empty_str(params, "volume_name").map(str::to_owned),
        create_if_missing: bool_or(params, "create_if_missing", true),
        settings: settings.clone(),
    };

    let graded = host.apply_color_grading(&grading)?;
    info!(volume = %graded.volume_name, "applied color grading");
    Ok(Response::success_with(encode(&graded)?))
}
