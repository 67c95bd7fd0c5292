//! Test doubles for hosts embedding the bridge.
//!
//! [`MockPanelFrame`] stands in for the privileged panel frame: it records
//! every message posted into it and answers known commands with canned
//! collections, queueing the reply envelopes on a channel the host drains
//! through [`crate::bridge::ToolbarBridge::pump`] (or dispatches manually).
//! Lifecycle events are emitted with [`MockPanelFrame::emit`].
//!
//! Used by the integration tests and by `fdk demo`.

use std::sync::{Arc, Mutex};

use serde_json::{Value, json};
use tokio::sync::mpsc;

use crate::error::ChannelError;
use crate::frame_channel::{Envelope, FrameSink};
use crate::protocol::{CommandKind, LOGOUT_COMMAND};

/// A scripted panel frame for tests and demos.
pub struct MockPanelFrame {
    origin: String,
    replies: mpsc::UnboundedSender<Envelope>,
    posted: Mutex<Vec<Value>>,
    items: Mutex<[(CommandKind, Vec<Value>); 3]>,
    auto_reply: Mutex<bool>,
}

impl MockPanelFrame {
    /// Create a frame claiming `origin`, plus the receiver the host drains
    /// for its replies.
    #[must_use]
    pub fn new(origin: impl Into<String>) -> (Arc<Self>, mpsc::UnboundedReceiver<Envelope>) {
        let (replies, receiver) = mpsc::unbounded_channel();
        let frame = Arc::new(Self {
            origin: origin.into(),
            replies,
            posted: Mutex::new(Vec::new()),
            items: Mutex::new([
                (CommandKind::GetProjects, Vec::new()),
                (CommandKind::GetFlags, Vec::new()),
                (CommandKind::GetContexts, Vec::new()),
            ]),
            auto_reply: Mutex::new(true),
        });
        (frame, receiver)
    }

    /// Replace the canned collection served for `command`.
    pub fn set_items(&self, command: CommandKind, items: Vec<Value>) {
        let mut canned = self.items.lock().expect("items lock poisoned");
        for (kind, slot) in canned.iter_mut() {
            if *kind == command {
                *slot = items;
                return;
            }
        }
    }

    /// Stop answering commands (posted messages are still recorded). Useful
    /// for driving timeout paths.
    pub fn set_auto_reply(&self, enabled: bool) {
        *self.auto_reply.lock().expect("auto reply lock poisoned") = enabled;
    }

    /// Every message posted into the frame so far.
    #[must_use]
    pub fn posted(&self) -> Vec<Value> {
        self.posted.lock().expect("posted lock poisoned").clone()
    }

    /// Emit a lifecycle-style message from the frame, e.g.
    /// `{"type": "authenticated", ...}`.
    pub fn emit(&self, message: Value) {
        let _ = self
            .replies
            .send(Envelope::new(self.origin.clone(), message));
    }

    /// Emit a message claiming a different origin (spoof simulation).
    pub fn emit_from(&self, origin: impl Into<String>, message: Value) {
        let _ = self.replies.send(Envelope::new(origin, message));
    }

    fn canned_items(&self, command: CommandKind) -> Vec<Value> {
        let canned = self.items.lock().expect("items lock poisoned");
        canned
            .iter()
            .find(|(kind, _)| *kind == command)
            .map(|(_, items)| items.clone())
            .unwrap_or_default()
    }

    fn reply_to(&self, message: &Value) {
        let Some(message_type) = message.get("type").and_then(Value::as_str) else {
            return;
        };
        if message_type == LOGOUT_COMMAND {
            self.emit(json!({ "type": "logout-response" }));
            return;
        }
        let Some(command) = CommandKind::from_wire(message_type) else {
            return;
        };
        let Some(request_id) = message.get("requestId").and_then(Value::as_str) else {
            return;
        };
        let items = self.canned_items(command);
        self.emit(json!({
            "type": format!("{}-response", command.wire_name()),
            "requestId": request_id,
            "data": { "items": items, "totalCount": items.len() },
        }));
    }
}

impl FrameSink for MockPanelFrame {
    fn post(&self, message: Value) -> Result<(), ChannelError> {
        self.posted
            .lock()
            .expect("posted lock poisoned")
            .push(message.clone());
        if *self.auto_reply.lock().expect("auto reply lock poisoned") {
            self.reply_to(&message);
        }
        Ok(())
    }
}
