//! Configuration models and loaders.
//!
//! Precedence, lowest first: built-in defaults, a TOML or JSON file,
//! `ENGINE_*` environment variables, then CLI flags applied by the binary.

pub mod engine;

use std::net::SocketAddr;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::util::LogFormat;
pub use engine::{AdmissionMode, EngineConfig};

/// Configuration loading and validation failures.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    /// The TOML did not parse.
    #[error("invalid TOML: {0}")]
    Toml(#[from] toml::de::Error),
    /// The JSON did not parse.
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    /// An environment variable held an unusable value.
    #[error("invalid value {value:?} for {key}")]
    Env {
        /// Variable name.
        key: String,
        /// Raw value.
        value: String,
    },
    /// A value failed validation.
    #[error("{0}")]
    Invalid(String),
}

/// HTTP surface settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address.
    pub bind: SocketAddr,
    /// Log output format.
    pub log_format: LogFormat,
    /// After a shutdown signal, how long to keep serving with readiness
    /// failing before the listener stops.
    pub drain_delay_ms: u64,
}

impl ServerConfig {
    /// Drain delay as a duration.
    #[must_use]
    pub const fn drain_delay(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.drain_delay_ms)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], 8080)),
            log_format: LogFormat::Pretty,
            drain_delay_ms: 0,
        }
    }
}

/// Root configuration: `[server]` and `[engine]` sections.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// HTTP surface.
    pub server: ServerConfig,
    /// Engine tuning.
    pub engine: EngineConfig,
}

impl AppConfig {
    /// Parse TOML and validate.
    ///
    /// # Errors
    ///
    /// Parse or validation failure.
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let cfg: Self = toml::from_str(input)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Parse JSON and validate.
    ///
    /// # Errors
    ///
    /// Parse or validation failure.
    pub fn from_json_str(input: &str) -> Result<Self, ConfigError> {
        let cfg: Self = serde_json::from_str(input)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load a file; `.json` is read as JSON, anything else as TOML.
    ///
    /// # Errors
    ///
    /// I/O, parse, or validation failure.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        if is_json {
            Self::from_json_str(&content)
        } else {
            Self::from_toml_str(&content)
        }
    }

    /// Apply environment overrides read through `lookup`, including
    /// `ENGINE_BIND` and `ENGINE_LOG_FORMAT`.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Env`] for unparsable values.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = lookup("ENGINE_BIND") {
            self.server.bind = engine::parse_env("ENGINE_BIND", &raw)?;
        }
        if let Some(raw) = lookup("ENGINE_LOG_FORMAT") {
            self.server.log_format = engine::parse_env("ENGINE_LOG_FORMAT", &raw)?;
        }
        if let Some(raw) = lookup("ENGINE_DRAIN_DELAY_MS") {
            self.server.drain_delay_ms = engine::parse_env("ENGINE_DRAIN_DELAY_MS", &raw)?;
        }
        self.engine.apply_env_overrides(lookup)
    }

    /// Apply overrides from the process environment.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Env`] for unparsable values.
    pub fn apply_process_env(&mut self) -> Result<(), ConfigError> {
        self.apply_env_overrides(|key| std::env::var(key).ok())
    }

    /// Validate every section.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Invalid`] naming the offending option.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.engine.validate()
    }
}
