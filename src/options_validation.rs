//! Validation of driver-specific provider options.
//!
//! Called from [`AiConfig::validate`](crate::api::AiConfig::validate) so that
//! unknown or malformed options are rejected before any provider is
//! instantiated.

use crate::error::{AiError, Result};
use serde_json::Value;

/// Validate driver-specific options for the given `driver`.
///
/// Returns `Ok(())` if the options are valid or the driver is unknown (unknown
/// drivers are accepted so applications can register their own).
pub fn validate_provider_options(driver: &str, options: &Value) -> Result<()> {
    match driver {
        "openai" => validate_string_keys_only(driver, options, &["organization", "project"]),
        "anthropic" => validate_anthropic_options(driver, options),
        "gemini" => validate_string_keys_only(driver, options, &["api_version"]),
        "cohere" => validate_string_keys_only(driver, options, &["input_type"]),
        "loopback" => validate_string_keys_only(driver, options, &[]),
        _ => Ok(()),
    }
}

/// Parse `options` as a JSON object map, returning `None` for null and an
/// error for non-object types.
fn as_object<'a>(driver: &str, options: &'a Value) -> Result<Option<&'a serde_json::Map<String, Value>>> {
    match options {
        Value::Null => Ok(None),
        Value::Object(map) => Ok(Some(map)),
        _ => Err(AiError::Config(format!(
            "Options for driver '{}' must be a JSON object or null",
            driver
        ))),
    }
}

/// Return an error if `map` contains any key not in `allowed`.
fn reject_unknown_keys(
    driver: &str,
    map: &serde_json::Map<String, Value>,
    allowed: &[&str],
) -> Result<()> {
    for key in map.keys() {
        if !allowed.contains(&key.as_str()) {
            return Err(AiError::Config(format!(
                "Unknown option '{}' for driver '{}'",
                key, driver
            )));
        }
    }
    Ok(())
}

/// Require that all specified keys, if present, are strings.
fn require_string_keys(
    driver: &str,
    map: &serde_json::Map<String, Value>,
    keys: &[&str],
) -> Result<()> {
    for key in keys {
        if let Some(value) = map.get(*key)
            && !value.is_string()
        {
            return Err(AiError::Config(format!(
                "Option '{}' for driver '{}' must be a string",
                key, driver
            )));
        }
    }
    Ok(())
}

/// Require that the named key, if present, is a positive (> 0) integer.
fn require_positive_u64(
    driver: &str,
    map: &serde_json::Map<String, Value>,
    key: &str,
) -> Result<()> {
    if let Some(value) = map.get(key) {
        let Some(v) = value.as_u64() else {
            return Err(AiError::Config(format!(
                "Option '{}' for driver '{}' must be a positive integer",
                key, driver
            )));
        };
        if v == 0 {
            return Err(AiError::Config(format!(
                "Option '{}' for driver '{}' must be greater than 0",
                key, driver
            )));
        }
    }
    Ok(())
}

fn validate_string_keys_only(driver: &str, options: &Value, allowed_keys: &[&str]) -> Result<()> {
    let Some(map) = as_object(driver, options)? else {
        return Ok(());
    };
    reject_unknown_keys(driver, map, allowed_keys)?;
    require_string_keys(driver, map, allowed_keys)
}

/// Anthropic accepts a version header override and a `max_tokens` ceiling
/// (the Messages API requires one on every request).
fn validate_anthropic_options(driver: &str, options: &Value) -> Result<()> {
    let Some(map) = as_object(driver, options)? else {
        return Ok(());
    };
    reject_unknown_keys(driver, map, &["anthropic_version", "max_tokens"])?;
    require_string_keys(driver, map, &["anthropic_version"])?;
    require_positive_u64(driver, map, "max_tokens")
}
