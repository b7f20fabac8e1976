//! Table-driven asset commands.
//!
//! Every asset command has the same shape: check the required string
//! fields, derive the target object path, then forward to
//! [`EditorHost::asset_command`](crate::EditorHost::asset_command).

use std::sync::PoisonError;

use edlink_server::{ClientInfo, CommandHandler, Params, Response};
use tracing::{debug, warn};

use crate::error::HostResult;
use crate::host::{AssetDomain, AssetOperation, AssetRequest, SharedHost};
use crate::host::{AssetDomain as D, AssetOperation as Op};
use crate::params::{non_empty_str, required_str};

/// Package that widget blueprints go to when none is given.
const DEFAULT_UI_PACKAGE: &str = "/Game/UI";

/// How the target object path is derived from params.
#[derive(Debug, Clone, Copy)]
enum Target {
    /// `{package_path}/{name}`.
    Package,
    /// The value of the named field.
    Field(&'static str),
    /// `/Script/{module_name}.{class_name}`.
    NativeClass,
    /// `{package_path or /Game/UI}/{name}`.
    Widget,
}

/// Static description of one asset command.
#[derive(Debug)]
pub struct AssetCommand {
    pub name: &'static str,
    pub domain: AssetDomain,
    pub operation: AssetOperation,
    /// String fields checked in order before anything else runs.
    pub required: &'static [&'static str],
    target: Target,
}

impl AssetCommand {
    const fn new(
        name: &'static str,
        domain: AssetDomain,
        operation: AssetOperation,
        required: &'static [&'static str],
        target: Target,
    ) -> Self {
        Self {
            name,
            domain,
            operation,
            required,
            target,
        }
    }

    /// Validates `params` and builds the host request.
    pub fn request(&self, params: &Params) -> HostResult<AssetRequest> {
        for field in self.required {
            required_str(params, field)?;
        }

        let path = match self.target {
            Target::Package => {
                let package = required_str(params, "package_path")?;
                let name = required_str(params, "name")?;
                format!("{}/{name}", package.trim_end_matches('/'))
            }
            Target::Field(field) => required_str(params, field)?.to_string(),
            Target::NativeClass => format!(
                "/Script/{}.{}",
                required_str(params, "module_name")?,
                required_str(params, "class_name")?
            ),
            Target::Widget => {
                let package = non_empty_str(params, "package_path").unwrap_or(DEFAULT_UI_PACKAGE);
                let name = required_str(params, "name")?;
                format!("{}/{name}", package.trim_end_matches('/'))
            }
        };

        Ok(AssetRequest {
            command: self.name.to_string(),
            domain: self.domain,
            operation: self.operation,
            path,
            params: params.clone(),
        })
    }
}

/// Every asset command the host understands.
pub const ASSET_COMMANDS: &[AssetCommand] = &[
    AssetCommand::new(
        "create_material",
        D::Material,
        Op::Create,
        &["package_path", "name"],
        Target::Package,
    ),
    AssetCommand::new("modify_material", D::Material, Op::Modify, &["path"], Target::Field("path")),
    AssetCommand::new(
        "get_material_info",
        D::Material,
        Op::Inspect,
        &["path"],
        Target::Field("path"),
    ),
    AssetCommand::new(
        "create_data_table",
        D::DataTable,
        Op::Create,
        &["package_path", "name", "row_struct"],
        Target::Package,
    ),
    AssetCommand::new(
        "modify_data_table",
        D::DataTable,
        Op::Modify,
        &["path"],
        Target::Field("path"),
    ),
    AssetCommand::new(
        "create_gameplay_effect",
        D::GameplayEffect,
        Op::Create,
        &["package_path", "name"],
        Target::Package,
    ),
    AssetCommand::new(
        "register_gameplay_effect",
        D::GameplayEffect,
        Op::Register,
        &["data_table_path", "row_name", "gameplay_effect_path"],
        Target::Field("data_table_path"),
    ),
    AssetCommand::new(
        "create_attribute_set",
        D::AttributeSet,
        Op::Create,
        &["module_name", "class_name"],
        Target::NativeClass,
    ),
    AssetCommand::new(
        "create_blueprint",
        D::Blueprint,
        Op::Create,
        &["package_path", "name"],
        Target::Package,
    ),
    AssetCommand::new(
        "modify_blueprint",
        D::Blueprint,
        Op::Modify,
        &["path"],
        Target::Field("path"),
    ),
    AssetCommand::new(
        "get_blueprint_info",
        D::Blueprint,
        Op::Inspect,
        &["path"],
        Target::Field("path"),
    ),
    AssetCommand::new(
        "create_blueprint_event",
        D::Blueprint,
        Op::AddEvent,
        &["blueprint_path", "event_name"],
        Target::Field("blueprint_path"),
    ),
    AssetCommand::new("create_mvvm_ui", D::WidgetBlueprint, Op::Create, &["name"], Target::Widget),
];

/// Handler for one entry of [`ASSET_COMMANDS`].
pub struct AssetHandler {
    def: &'static AssetCommand,
    host: SharedHost,
}

impl AssetHandler {
    pub fn new(def: &'static AssetCommand, host: SharedHost) -> Self {
        Self { def, host }
    }

    fn run(&self, params: &Params) -> HostResult<Response> {
        let request = self.def.request(params)?;
        let result = self
            .host
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .asset_command(&request)?;
        debug!(command = self.def.name, path = %request.path, "asset command applied");
        Ok(Response::success_with(result))
    }
}

impl CommandHandler for AssetHandler {
    fn name(&self) -> &str {
        self.def.name
    }

    fn execute(&self, params: &Params, _client: &ClientInfo) -> Response {
        self.run(params).unwrap_or_else(|e| {
            warn!(command = self.def.name, error = %e, "asset command failed");
            e.into_response()
        })
    }
}
