//! Error types for flagdeck-core

use std::fmt::Write;
use thiserror::Error;

/// Remediation command for resolving an error
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct RemediationCommand {
    /// Short label describing the command purpose
    pub label: String,
    /// Command to run
    pub command: String,
}

/// Actionable remediation guidance for an error
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Remediation {
    /// One-line summary of how to fix the issue
    pub summary: String,
    /// Suggested commands to resolve or diagnose the issue
    pub commands: Vec<RemediationCommand>,
    /// Additional alternative guidance
    pub alternatives: Vec<String>,
}

impl Remediation {
    /// Create a new remediation with a summary
    #[must_use]
    pub fn new(summary: impl Into<String>) -> Self {
        Self {
            summary: summary.into(),
            commands: Vec::new(),
            alternatives: Vec::new(),
        }
    }

    /// Add a suggested command
    #[must_use]
    pub fn command(mut self, label: impl Into<String>, command: impl Into<String>) -> Self {
        self.commands.push(RemediationCommand {
            label: label.into(),
            command: command.into(),
        });
        self
    }

    /// Add an alternative suggestion
    #[must_use]
    pub fn alternative(mut self, alternative: impl Into<String>) -> Self {
        self.alternatives.push(alternative.into());
        self
    }

    /// Render remediation text for human-readable output
    #[must_use]
    pub fn render_plain(&self) -> String {
        let mut output = String::new();
        let _ = writeln!(output, "To fix:");
        let _ = writeln!(output, "  {}", self.summary);

        if !self.commands.is_empty() {
            let _ = writeln!(output, "  Commands:");
            for cmd in &self.commands {
                let _ = writeln!(output, "    - {}: {}", cmd.label, cmd.command);
            }
        }

        if !self.alternatives.is_empty() {
            let _ = writeln!(output, "  Alternatives:");
            for alt in &self.alternatives {
                let _ = writeln!(output, "    - {alt}");
            }
        }

        output
    }
}

/// Result type alias using the library's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for flagdeck-core
#[derive(Error, Debug)]
pub enum Error {
    /// Bridge channel errors (frame not mounted, timeout, remote failure)
    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    /// Configuration errors
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Return remediation guidance when available.
    #[must_use]
    pub fn remediation(&self) -> Option<Remediation> {
        match self {
            Self::Channel(err) => Some(err.remediation()),
            Self::Config(err) => Some(err.remediation()),
            Self::Io(_) => Some(
                Remediation::new("Check filesystem permissions and paths, then retry.")
                    .command("Smoke test", "fdk demo")
                    .alternative("Verify the target path exists and is readable."),
            ),
            Self::Json(_) => Some(
                Remediation::new("Validate the JSON input and retry.")
                    .command("Validate JSON", "python -m json.tool < input.json")
                    .alternative("Check for trailing commas or invalid UTF-8."),
            ),
        }
    }
}

/// Errors on the frame channel between the host page and the panel frame.
///
/// An origin mismatch is deliberately NOT represented here: messages from an
/// untrusted origin are silently discarded, never surfaced to callers.
#[derive(Error, Debug)]
pub enum ChannelError {
    /// The panel frame has not mounted yet; fails fast, never queued.
    #[error("panel frame is not mounted; channel not ready")]
    NotReady,

    /// No response or error arrived within the timeout window. Terminal:
    /// a late response for the same request is dropped.
    #[error("request {command} timed out after {timeout_ms} ms")]
    Timeout {
        command: &'static str,
        timeout_ms: u64,
    },

    /// The panel explicitly reported failure for a request.
    #[error("panel reported failure for {command}: {message}")]
    Remote {
        command: &'static str,
        message: String,
    },

    /// The channel was torn down before the request settled.
    #[error("channel closed before a response arrived")]
    Closed,
}

impl ChannelError {
    #[must_use]
    pub fn remediation(&self) -> Remediation {
        match self {
            Self::NotReady => {
                Remediation::new("Mount the panel frame before issuing requests.")
                    .command("Smoke test", "fdk demo")
                    .alternative("Call mount() with the frame sink once the frame has loaded.")
            }
            Self::Timeout { .. } => Remediation::new(
                "Could not reach the authenticated panel. Check that the frame is responsive.",
            )
            .command("Smoke test", "fdk demo")
            .alternative("Reload the host page; in-flight requests do not survive a reload."),
            Self::Remote { .. } => Remediation::new(
                "Could not reach the authenticated panel. The panel rejected the request.",
            )
            .command("Smoke test", "fdk demo")
            .alternative("Check the panel session; re-authenticate if it expired."),
            Self::Closed => Remediation::new("The channel was torn down. Re-mount and retry.")
                .command("Smoke test", "fdk demo")
                .alternative("Reload the host page to re-establish the channel."),
        }
    }

    /// Short user-facing label for the error kind. Persistent failures
    /// present as unreachability rather than raw error text.
    #[must_use]
    pub const fn user_facing(&self) -> &'static str {
        match self {
            Self::NotReady => "panel is still loading",
            Self::Timeout { .. } | Self::Remote { .. } | Self::Closed => {
                "could not reach the authenticated panel"
            }
        }
    }
}

/// Configuration-specific errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    FileNotFound(String),

    #[error("Failed to read config file {0}: {1}")]
    ReadFailed(String, String),

    #[error("Failed to parse config: {0}")]
    ParseFailed(String),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

impl ConfigError {
    #[must_use]
    pub fn remediation(&self) -> Remediation {
        match self {
            Self::FileNotFound(path) => Remediation::new(format!(
                "Config file not found: {path}. Verify the path and retry."
            ))
            .command("Check path", format!("ls -l \"{path}\""))
            .alternative("Pass --config with the correct path."),
            Self::ReadFailed(path, _) => Remediation::new(format!(
                "Failed to read config file: {path}. Check permissions."
            ))
            .command("Check permissions", format!("ls -l \"{path}\""))
            .alternative("Ensure the file is readable by the current user."),
            Self::ParseFailed(_) => {
                Remediation::new("Config parse failed. Fix the TOML syntax and retry.")
                    .command("Smoke test", "fdk demo")
                    .alternative("Validate the config file format.")
            }
            Self::ValidationError(_) => {
                Remediation::new("Config validation failed. Fix the invalid fields and retry.")
                    .command("Smoke test", "fdk demo")
                    .alternative("Review validation errors and adjust flagdeck.toml.")
            }
        }
    }
}

/// Format an error with remediation guidance for display.
#[must_use]
pub fn format_error_with_remediation(error: &Error) -> String {
    let mut output = format!("Error: {error}");
    if let Some(remediation) = error.remediation() {
        output.push('\n');
        output.push('\n');
        output.push_str(&remediation.render_plain());
    }
    output
}
