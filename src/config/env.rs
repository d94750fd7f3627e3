//! Environment variable and config file support for [`ScopeConfig`].
//!
//! # Supported Environment Variables
//!
//! | Variable | Type | Maps to |
//! |----------|------|---------|
//! | `SCOPEKEEPER_LATE_REGISTRATION` | `strict` / `lenient` | `late_registration` |
//! | `SCOPEKEEPER_CATCH_FINALIZER_PANICS` | `bool` | `catch_finalizer_panics` |

use super::{ConfigError, LateRegistration, ScopeConfig};

/// Environment variable name for the late registration policy.
pub const ENV_LATE_REGISTRATION: &str = "SCOPEKEEPER_LATE_REGISTRATION";
/// Environment variable name for finalizer panic handling.
pub const ENV_CATCH_FINALIZER_PANICS: &str = "SCOPEKEEPER_CATCH_FINALIZER_PANICS";

/// Apply environment variable overrides to a [`ScopeConfig`].
///
/// Only variables that are set in the environment are applied.
/// Returns an error if a variable is set but contains an unparseable value.
pub fn apply_env_overrides(config: &mut ScopeConfig) -> Result<(), ConfigError> {
    if let Some(val) = read_env(ENV_LATE_REGISTRATION) {
        config.late_registration = parse_policy(ENV_LATE_REGISTRATION, &val)?;
    }
    if let Some(val) = read_env(ENV_CATCH_FINALIZER_PANICS) {
        config.catch_finalizer_panics = parse_bool(ENV_CATCH_FINALIZER_PANICS, &val)?;
    }
    Ok(())
}

fn read_env(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

fn parse_policy(var_name: &str, val: &str) -> Result<LateRegistration, ConfigError> {
    val.parse::<LateRegistration>()
        .map_err(|_| ConfigError::InvalidValue {
            name: var_name.to_string(),
            value: val.to_string(),
            expected: "strict or lenient",
        })
}

fn parse_bool(var_name: &str, val: &str) -> Result<bool, ConfigError> {
    match val.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            name: var_name.to_string(),
            value: val.to_string(),
            expected: "bool (true/false/1/0/yes/no)",
        }),
    }
}

// =========================================================================
// TOML config file support (feature-gated)
// =========================================================================

/// TOML-deserializable scope configuration.
///
/// ```toml
/// [scope]
/// late_registration = "lenient"
/// catch_finalizer_panics = true
/// ```
#[cfg(feature = "config-file")]
#[derive(serde::Deserialize, Default, Debug)]
pub struct ScopeTomlConfig {
    /// Scope settings.
    #[serde(default)]
    pub scope: ScopeToml,
}

/// Scope section of the TOML config.
#[cfg(feature = "config-file")]
#[derive(serde::Deserialize, Default, Debug)]
pub struct ScopeToml {
    /// Late registration policy.
    pub late_registration: Option<LateRegistration>,
    /// Finalizer panic handling.
    pub catch_finalizer_panics: Option<bool>,
}

/// Apply a parsed TOML config to a [`ScopeConfig`].
///
/// Only fields that are `Some` in the TOML struct override the config.
#[cfg(feature = "config-file")]
pub fn apply_toml_config(config: &mut ScopeConfig, toml: &ScopeTomlConfig) {
    if let Some(v) = toml.scope.late_registration {
        config.late_registration = v;
    }
    if let Some(v) = toml.scope.catch_finalizer_panics {
        config.catch_finalizer_panics = v;
    }
}

/// Parse a TOML string into a [`ScopeTomlConfig`].
#[cfg(feature = "config-file")]
pub fn parse_toml_str(toml_str: &str) -> Result<ScopeTomlConfig, ConfigError> {
    toml::from_str(toml_str).map_err(|e| ConfigError::Parse(e.to_string()))
}

/// Read and parse a TOML file into a [`ScopeTomlConfig`].
#[cfg(feature = "config-file")]
pub fn parse_toml_file(path: &std::path::Path) -> Result<ScopeTomlConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })?;
    parse_toml_str(&content)
}
