//! Bridge configuration.
//!
//! A `BridgeConfig` describes one embedding of the toolbar bridge: which
//! origin the panel frame is trusted at, how long requests may stay
//! outstanding, cache sizing, and the telemetry opt-in. Loaded from TOML
//! (`flagdeck.toml`) with serde defaults, so an empty file is a valid
//! configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::logging::LogConfig;

/// Default trusted origin of the hosted panel.
pub const DEFAULT_TRUSTED_ORIGIN: &str = "https://panel.flagdeck.dev";

/// Default request timeout in milliseconds.
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 30_000;

/// Default capacity of the content identity cache.
pub const DEFAULT_IDENTITY_CACHE_CAPACITY: usize = 512;

/// Default environment scope for context-kind fetches.
pub const DEFAULT_ENVIRONMENT_KEY: &str = "production";

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// Human-friendly output for interactive use.
    #[default]
    Pretty,
    /// JSON lines for CI and ops tooling.
    Json,
}

/// Configuration for one bridge embedding.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Exact origin inbound panel messages must match.
    pub trusted_origin: String,

    /// How long a request may stay outstanding before it times out.
    pub request_timeout_ms: u64,

    /// Capacity of the content tier of the identity hasher.
    pub identity_cache_capacity: usize,

    /// Opt-in for forwarding account/member identifiers to the
    /// telemetry-identity collaborator on authentication.
    pub enhanced_identification: bool,

    /// Environment scope for context-kind fetches.
    pub environment_key: String,

    /// Logging configuration.
    pub log: LogConfig,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            trusted_origin: DEFAULT_TRUSTED_ORIGIN.to_string(),
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            identity_cache_capacity: DEFAULT_IDENTITY_CACHE_CAPACITY,
            enhanced_identification: false,
            environment_key: DEFAULT_ENVIRONMENT_KEY.to_string(),
            log: LogConfig::default(),
        }
    }
}

impl BridgeConfig {
    /// Parse a config from TOML text and validate it.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self =
            toml::from_str(text).map_err(|err| ConfigError::ParseFailed(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a config file from disk and validate it.
    pub fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }
        let text = std::fs::read_to_string(path)
            .map_err(|err| ConfigError::ReadFailed(path.display().to_string(), err.to_string()))?;
        Self::from_toml_str(&text)
    }

    /// Check invariants that serde defaults cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.trusted_origin.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "trusted_origin must not be empty".to_string(),
            ));
        }
        if !self.trusted_origin.contains("://") {
            return Err(ConfigError::ValidationError(format!(
                "trusted_origin must include a scheme: {}",
                self.trusted_origin
            )));
        }
        if self.trusted_origin.ends_with('/') {
            return Err(ConfigError::ValidationError(
                "trusted_origin must be a bare origin with no trailing slash".to_string(),
            ));
        }
        if self.request_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "request_timeout_ms must be at least 1".to_string(),
            ));
        }
        if self.identity_cache_capacity == 0 {
            return Err(ConfigError::ValidationError(
                "identity_cache_capacity must be at least 1".to_string(),
            ));
        }
        if self.environment_key.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "environment_key must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// The request timeout as a [`std::time::Duration`].
    #[must_use]
    pub const fn request_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.request_timeout_ms)
    }
}
