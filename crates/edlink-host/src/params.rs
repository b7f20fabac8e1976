//! Typed access to handler params.

use edlink_server::Params;
use serde::Serialize;
use serde_json::Value;

use crate::error::{HostError, HostResult};
use crate::host::Vec3;

/// Returns a required string field.
pub(crate) fn required_str<'a>(params: &'a Params, key: &str) -> HostResult<&'a str> {
    optional_str(params, key).ok_or_else(|| HostError::MissingField(key.to_string()))
}

/// Returns a string field. Fields of any other type read as absent.
pub(crate) fn optional_str<'a>(params: &'a Params, key: &str) -> Option<&'a str> {
    params.get(key).and_then(Value::as_str)
}

/// Like [`optional_str`], but an empty string also reads as absent.
pub(crate) fn non_empty_str<'a>(params: &'a Params, key: &str) -> Option<&'a str> {
    optional_str(params, key).filter(|s| !s.is_empty())
}

pub(crate) fn bool_or(params: &Params, key: &str, default: bool) -> bool {
    params.get(key).and_then(Value::as_bool).unwrap_or(default)
}

pub(crate) fn object<'a>(params: &'a Params, key: &str) -> Option<&'a Params> {
    params.get(key).and_then(Value::as_object)
}

/// Reads an optional `[x, y, z]` array.
///
/// Anything other than exactly three numbers is an invalid field.
pub(crate) fn vec3(params: &Params, key: &str) -> HostResult<Option<Vec3>> {
    let Some(value) = params.get(key) else {
        return Ok(None);
    };
    let invalid = || HostError::InvalidField(key.to_string());
    match value.as_array().map(Vec::as_slice) {
        Some([x, y, z]) => Ok(Some([
            x.as_f64().ok_or_else(invalid)?,
            y.as_f64().ok_or_else(invalid)?,
            z.as_f64().ok_or_else(invalid)?,
        ])),
        _ => Err(invalid()),
    }
}

/// Serializes a handler result.
pub(crate) fn encode<T: Serialize>(value: &T) -> HostResult<Value> {
    serde_json::to_value(value)
        .map_err(|e| HostError::Failed(format!("failed to encode result: {e}")))
}
