//! Scope manager configuration.
//!
//! # Configuration Precedence
//!
//! Settings are resolved in this order (highest priority first):
//!
//! 1. **Programmatic**: values set via builder methods (`with_late_registration`)
//! 2. **Environment variables**: values from `SCOPEKEEPER_*` env vars
//! 3. **Config file**: values loaded from a TOML file (requires `config-file` feature)
//! 4. **Defaults**: [`ScopeConfig::default()`]

pub mod env;

use core::fmt;
use core::str::FromStr;
use serde::{Deserialize, Serialize};

/// Errors raised while loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// An environment variable or file field held an unparseable value.
    #[error("invalid value for {name}: expected {expected}, got {value:?}")]
    InvalidValue {
        /// Variable or field name.
        name: String,
        /// The rejected value.
        value: String,
        /// Human-readable description of accepted values.
        expected: &'static str,
    },
    /// The config file could not be read.
    #[error("failed to read config file {path}: {source}")]
    Io {
        /// Path that failed.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The config file could not be parsed.
    #[error("failed to parse config: {0}")]
    Parse(String),
}

impl From<ConfigError> for crate::error::Error {
    fn from(err: ConfigError) -> Self {
        Self::config(err.to_string()).with_source(err)
    }
}

/// Policy for finalizers registered after a scope has begun closing.
///
/// Closing a scope never waits for in-flight work that merely references it,
/// so such work may try to register a finalizer late.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LateRegistration {
    /// Reject with [`ErrorKind::ScopeClosed`](crate::error::ErrorKind::ScopeClosed)
    /// once the scope leaves `Open`.
    #[default]
    Strict,
    /// Accept during `Closing` (the running pass picks the entry up next) and
    /// run immediately with the recorded signal after `Closed`.
    Lenient,
}

impl LateRegistration {
    /// Returns true for the lenient policy.
    #[must_use]
    pub const fn is_lenient(self) -> bool {
        matches!(self, Self::Lenient)
    }
}

impl fmt::Display for LateRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Strict => write!(f, "strict"),
            Self::Lenient => write!(f, "lenient"),
        }
    }
}

impl FromStr for LateRegistration {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "strict" => Ok(Self::Strict),
            "lenient" => Ok(Self::Lenient),
            _ => Err(ConfigError::InvalidValue {
                name: "late_registration".to_string(),
                value: s.to_string(),
                expected: "strict or lenient",
            }),
        }
    }
}

/// Configuration shared by every scope a manager creates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScopeConfig {
    /// Handling of finalizers registered after close began.
    pub late_registration: LateRegistration,
    /// When false, a panic raised by a finalizer is resumed after the close
    /// pass finishes (every other finalizer still runs first). When true the
    /// panic is only recorded as a failure.
    pub catch_finalizer_panics: bool,
}

impl Default for ScopeConfig {
    fn default() -> Self {
        Self {
            late_registration: LateRegistration::Strict,
            catch_finalizer_panics: true,
        }
    }
}

impl ScopeConfig {
    /// Creates the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the late registration policy.
    #[must_use]
    pub const fn with_late_registration(mut self, policy: LateRegistration) -> Self {
        self.late_registration = policy;
        self
    }

    /// Sets whether finalizer panics are swallowed into the composite failure.
    #[must_use]
    pub const fn with_catch_finalizer_panics(mut self, catch: bool) -> Self {
        self.catch_finalizer_panics = catch;
        self
    }

    /// Defaults overlaid with `SCOPEKEEPER_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        env::apply_env_overrides(&mut config)?;
        Ok(config)
    }

    /// Defaults overlaid with a TOML file, then environment variables.
    #[cfg(feature = "config-file")]
    pub fn load(path: &std::path::Path) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let toml = env::parse_toml_file(path)?;
        env::apply_toml_config(&mut config, &toml);
        env::apply_env_overrides(&mut config)?;
        Ok(config)
    }
}
