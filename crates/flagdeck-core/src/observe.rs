//! Observability collaborator boundary.
//!
//! The bridge reports panel-side failures (remote command errors, auth
//! errors) to whatever error-tracking system the host application uses. The
//! host hands the bridge an [`ObservabilitySink`]; the default
//! [`TracingSink`] just logs through `tracing`, and [`RecordingSink`]
//! captures reports for assertions in tests.

use std::sync::Mutex;

/// A failure reported to the observability collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObservedFailure {
    /// The panel explicitly rejected a correlated request.
    Request { command: String, message: String },
    /// The panel reported an authentication error.
    Auth { message: String },
}

/// Receives failure reports from the bridge.
pub trait ObservabilitySink: Send + Sync {
    /// The panel rejected the request for `command`.
    fn request_failed(&self, command: &str, message: &str);

    /// The panel reported an authentication error.
    fn auth_error(&self, message: &str);
}

/// Default sink: structured warnings through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl ObservabilitySink for TracingSink {
    fn request_failed(&self, command: &str, message: &str) {
        tracing::warn!(command, message, "panel rejected request");
    }

    fn auth_error(&self, message: &str) {
        tracing::warn!(message, "panel reported auth error");
    }
}

/// Test double capturing every report in order.
#[derive(Debug, Default)]
pub struct RecordingSink {
    failures: Mutex<Vec<ObservedFailure>>,
}

impl RecordingSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the reports captured so far.
    #[must_use]
    pub fn failures(&self) -> Vec<ObservedFailure> {
        self.failures.lock().expect("failures lock poisoned").clone()
    }
}

impl ObservabilitySink for RecordingSink {
    fn request_failed(&self, command: &str, message: &str) {
        self.failures
            .lock()
            .expect("failures lock poisoned")
            .push(ObservedFailure::Request {
                command: command.to_string(),
                message: message.to_string(),
            });
    }

    fn auth_error(&self, message: &str) {
        self.failures
            .lock()
            .expect("failures lock poisoned")
            .push(ObservedFailure::Auth {
                message: message.to_string(),
            });
    }
}
