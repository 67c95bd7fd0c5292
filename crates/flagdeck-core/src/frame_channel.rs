//! The trusted channel endpoint: panel frame handle plus origin gate.
//!
//! Every other bridge component talks to the panel through this module. It
//! holds the single reference to the embedded privileged frame (mounted late,
//! once the frame element attaches) and the one origin string inbound
//! messages must match exactly.
//!
//! # Origin discipline
//!
//! Any inbound envelope whose origin does not exactly match
//! [`FrameChannel::trusted_origin`] must be silently discarded. This is the
//! sole defense against a hostile host page embedding the toolbar and
//! spoofing panel responses, so the check is exact string equality — no
//! prefix or wildcard matching.

use std::sync::Arc;
use std::sync::Mutex;

use serde_json::Value;

use crate::error::ChannelError;

/// Destination for messages posted into the panel frame.
///
/// In a real embedding this wraps the frame's content window; in tests it is
/// a recording double (see [`crate::testkit::MockPanelFrame`]).
pub trait FrameSink: Send + Sync {
    /// Post a message into the frame, addressed to the trusted origin.
    fn post(&self, message: Value) -> Result<(), ChannelError>;
}

/// An inbound message as delivered by the host environment: the raw payload
/// plus the origin it claims to come from.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub origin: String,
    pub message: Value,
}

impl Envelope {
    #[must_use]
    pub fn new(origin: impl Into<String>, message: Value) -> Self {
        Self {
            origin: origin.into(),
            message,
        }
    }
}

/// Owns the panel frame reference and the trusted origin string.
pub struct FrameChannel {
    trusted_origin: String,
    frame: Mutex<Option<Arc<dyn FrameSink>>>,
}

impl std::fmt::Debug for FrameChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameChannel")
            .field("trusted_origin", &self.trusted_origin)
            .field("mounted", &self.is_mounted())
            .finish()
    }
}

impl FrameChannel {
    /// Create an unmounted channel for the given trusted origin.
    #[must_use]
    pub fn new(trusted_origin: impl Into<String>) -> Self {
        Self {
            trusted_origin: trusted_origin.into(),
            frame: Mutex::new(None),
        }
    }

    /// The exact origin inbound envelopes must carry.
    #[must_use]
    pub fn trusted_origin(&self) -> &str {
        &self.trusted_origin
    }

    /// Exact-match origin check for an inbound envelope.
    #[must_use]
    pub fn accepts(&self, origin: &str) -> bool {
        origin == self.trusted_origin
    }

    /// Attach the frame sink once the frame has mounted.
    pub fn mount(&self, sink: Arc<dyn FrameSink>) {
        let mut frame = self.frame.lock().expect("frame lock poisoned");
        *frame = Some(sink);
        tracing::debug!(origin = %self.trusted_origin, "panel frame mounted");
    }

    /// Detach the frame sink (frame removed from the page). Outstanding
    /// requests are unaffected; they settle by timeout.
    pub fn unmount(&self) {
        let mut frame = self.frame.lock().expect("frame lock poisoned");
        *frame = None;
        tracing::debug!(origin = %self.trusted_origin, "panel frame unmounted");
    }

    /// Whether a frame sink is currently attached.
    #[must_use]
    pub fn is_mounted(&self) -> bool {
        self.frame.lock().expect("frame lock poisoned").is_some()
    }

    /// The frame sink, or [`ChannelError::NotReady`] if the frame has not
    /// mounted. Callers must fail fast on this rather than queue.
    pub fn frame(&self) -> Result<Arc<dyn FrameSink>, ChannelError> {
        self.frame
            .lock()
            .expect("frame lock poisoned")
            .clone()
            .ok_or(ChannelError::NotReady)
    }

    /// Post a message into the mounted frame.
    pub fn post(&self, message: Value) -> Result<(), ChannelError> {
        self.frame()?.post(message)
    }
}
