//! Request/response correlation over the frame channel.
//!
//! The channel is one-way and asynchronous: commands go in, and at some
//! later point response messages come out, in no particular order. This
//! module matches each inbound response to the call that triggered it via a
//! unique request identifier, independent of arrival order.
//!
//! Every correlator instance owns its outstanding-request table; there is no
//! process-wide state, so independent embeddings (and tests) cannot
//! interfere with one another.
//!
//! # Settlement
//!
//! Exactly one terminal outcome fires per request:
//! - a `<command>-response` resolves it with the message's `data`;
//! - a `<command>-error` rejects it with [`ChannelError::Remote`] (reported
//!   to the observability sink first);
//! - the timeout rejects it with [`ChannelError::Timeout`] and removes the
//!   table entry, so a late response finds nothing to settle and is dropped.
//!   Callers must treat the timeout as authoritative.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::oneshot;

use crate::error::ChannelError;
use crate::frame_channel::{Envelope, FrameChannel};
use crate::observe::ObservabilitySink;
use crate::protocol::{CommandKind, InboundMessage, RequestId, outbound_command};

/// Default window a request may stay outstanding.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

struct PendingRequest {
    command: CommandKind,
    sender: oneshot::Sender<Result<Value, ChannelError>>,
}

/// Correlates outbound commands with inbound panel responses.
pub struct RequestCorrelator {
    channel: Arc<FrameChannel>,
    observer: Arc<dyn ObservabilitySink>,
    timeout: Duration,
    pending: Mutex<HashMap<RequestId, PendingRequest>>,
}

impl std::fmt::Debug for RequestCorrelator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestCorrelator")
            .field("timeout", &self.timeout)
            .field("outstanding", &self.outstanding())
            .finish()
    }
}

impl RequestCorrelator {
    /// Create a correlator over `channel` with the given request timeout.
    #[must_use]
    pub fn new(
        channel: Arc<FrameChannel>,
        timeout: Duration,
        observer: Arc<dyn ObservabilitySink>,
    ) -> Self {
        Self {
            channel,
            observer,
            timeout,
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Number of requests currently outstanding.
    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.pending.lock().expect("pending lock poisoned").len()
    }

    /// Send `command` into the panel and await its response.
    ///
    /// Fails immediately with [`ChannelError::NotReady`] if the frame has
    /// not mounted — never queued. Otherwise the call settles exactly once:
    /// with the response `data`, a remote error, or a timeout.
    pub async fn send(
        &self,
        command: CommandKind,
        payload: Value,
    ) -> Result<Value, ChannelError> {
        let frame = self.channel.frame()?;

        let (request_id, mut receiver) = {
            let mut pending = self.pending.lock().expect("pending lock poisoned");
            let mut request_id = RequestId::generate(command);
            // Identifiers are never reused while outstanding; re-roll on the
            // (unlikely) collision.
            while pending.contains_key(&request_id) {
                request_id = RequestId::generate(command);
            }
            let (sender, receiver) = oneshot::channel();
            pending.insert(request_id.clone(), PendingRequest { command, sender });
            (request_id, receiver)
        };

        tracing::debug!(request_id = %request_id, command = %command, "sending panel request");
        let message = outbound_command(command, &request_id, &payload);
        if let Err(err) = frame.post(message) {
            self.remove(&request_id);
            return Err(err);
        }

        match tokio::time::timeout(self.timeout, &mut receiver).await {
            Ok(Ok(outcome)) => outcome,
            // The correlator never drops a sender without settling; this arm
            // means the correlator itself was torn down mid-request.
            Ok(Err(_closed)) => Err(ChannelError::Closed),
            Err(_elapsed) => {
                let timed_out = self.remove(&request_id);
                if timed_out {
                    tracing::debug!(request_id = %request_id, "panel request timed out");
                    Err(self.timeout_error(command))
                } else {
                    // Settled in the race between the deadline firing and
                    // entry removal; prefer the real outcome.
                    receiver
                        .try_recv()
                        .map_or_else(|_| Err(self.timeout_error(command)), |outcome| outcome)
                }
            }
        }
    }

    /// Inspect an inbound envelope and settle the matching request, if any.
    ///
    /// Envelopes from an untrusted origin are silently discarded. Lifecycle
    /// events are not request-scoped and are ignored here (the bridge routes
    /// them to the session machine).
    pub fn handle_envelope(&self, envelope: &Envelope) {
        if !self.channel.accepts(&envelope.origin) {
            tracing::trace!(origin = %envelope.origin, "discarding envelope from untrusted origin");
            return;
        }
        match InboundMessage::parse(&envelope.message) {
            Some(message) => self.handle_message(message),
            None => {
                tracing::debug!("dropping unrecognized panel message");
            }
        }
    }

    /// Settle the request matching an already-parsed, already-origin-checked
    /// message. Lifecycle events are not request-scoped and are ignored.
    pub fn handle_message(&self, message: InboundMessage) {
        match message {
            InboundMessage::Response {
                command,
                request_id,
                data,
            } => self.settle(command, &request_id, Ok(data)),
            InboundMessage::CommandError {
                command,
                request_id,
                message,
            } => {
                self.observer.request_failed(command.wire_name(), &message);
                self.settle(
                    command,
                    &request_id,
                    Err(ChannelError::Remote {
                        command: command.wire_name(),
                        message,
                    }),
                );
            }
            InboundMessage::Lifecycle(_) => {}
        }
    }

    /// Settle the outstanding request for `request_id` with `outcome`.
    ///
    /// A message whose command does not match the registered request is
    /// dropped without disturbing the entry; a message for an unknown (or
    /// already-settled) identifier is dropped outright.
    pub fn settle(
        &self,
        command: CommandKind,
        request_id: &RequestId,
        outcome: Result<Value, ChannelError>,
    ) {
        let entry = {
            let mut pending = self.pending.lock().expect("pending lock poisoned");
            let registered_command = pending.get(request_id).map(|registered| registered.command);
            match registered_command {
                Some(registered) if registered == command => pending.remove(request_id),
                Some(registered) => {
                    tracing::warn!(
                        request_id = %request_id,
                        expected = %registered,
                        got = %command,
                        "response command does not match outstanding request"
                    );
                    None
                }
                None => {
                    tracing::debug!(request_id = %request_id, "dropping response with no outstanding request");
                    None
                }
            }
        };
        if let Some(pending) = entry {
            // Send fails only if the caller stopped waiting (timed out in
            // the same instant); the timeout outcome wins then.
            let _ = pending.sender.send(outcome);
        }
    }

    fn remove(&self, request_id: &RequestId) -> bool {
        self.pending
            .lock()
            .expect("pending lock poisoned")
            .remove(request_id)
            .is_some()
    }

    fn timeout_error(&self, command: CommandKind) -> ChannelError {
        ChannelError::Timeout {
            command: command.wire_name(),
            timeout_ms: self.timeout.as_millis() as u64,
        }
    }
}
