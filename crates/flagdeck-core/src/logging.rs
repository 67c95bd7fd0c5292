//! Structured logging for flagdeck
//!
//! Logging rides on `tracing` with configurable output formats:
//!
//! - **Pretty format**: human-friendly output for interactive use
//! - **JSON format**: machine-parseable JSON lines for CI and ops
//! - **File output**: optional log file for diagnostic bundles
//!
//! Initialize once at startup:
//!
//! ```ignore
//! use flagdeck_core::logging::{LogConfig, init_logging};
//!
//! init_logging(&LogConfig::default())?;
//! ```
//!
//! # Correlation fields
//!
//! Use these field names consistently in spans and events:
//! - `request_id`: request correlation identifier
//! - `command`: panel command wire name
//! - `project_key`: selected project scope
//! - `origin`: message origin (only ever the trusted origin or a counter;
//!   never log untrusted payload contents)

pub use crate::config::LogFormat;
use serde::{Deserialize, Serialize};
use std::io;
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};
use tracing_subscriber::EnvFilter;

/// Global flag to track if logging has been initialized
static LOGGING_INITIALIZED: OnceLock<bool> = OnceLock::new();

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level filter (trace, debug, info, warn, error)
    /// Can be overridden by the RUST_LOG environment variable
    pub level: String,

    /// Output format (pretty or json)
    pub format: LogFormat,

    /// Optional path to a log file
    pub file: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
            file: None,
        }
    }
}

/// Error type for logging initialization
#[derive(Debug, thiserror::Error)]
pub enum LogError {
    #[error("logging already initialized")]
    AlreadyInitialized,

    #[error("failed to create log file: {0}")]
    FileCreate(#[from] io::Error),

    #[error("failed to set global subscriber: {0}")]
    SetSubscriber(String),
}

/// Initialize global logging from a [`LogConfig`].
///
/// Returns [`LogError::AlreadyInitialized`] on a second call; the first
/// subscriber wins.
pub fn init_logging(config: &LogConfig) -> Result<(), LogError> {
    if LOGGING_INITIALIZED.get().is_some() {
        return Err(LogError::AlreadyInitialized);
    }

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.clone()));

    let result = match (&config.file, config.format) {
        (Some(path), LogFormat::Pretty) => {
            let file = Arc::new(std::fs::File::create(path)?);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(file)
                .with_ansi(false)
                .try_init()
        }
        (Some(path), LogFormat::Json) => {
            let file = Arc::new(std::fs::File::create(path)?);
            tracing_subscriber::fmt()
                .json()
                .with_env_filter(filter)
                .with_writer(file)
                .try_init()
        }
        (None, LogFormat::Pretty) => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .try_init(),
        (None, LogFormat::Json) => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .try_init(),
    };
    result.map_err(|err| LogError::SetSubscriber(err.to_string()))?;

    let _ = LOGGING_INITIALIZED.set(true);
    tracing::debug!(level = %config.level, "logging initialized");
    Ok(())
}
