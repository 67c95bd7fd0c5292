//! The assembled bridge: the boundary handed to the rendering layer.
//!
//! `ToolbarBridge` composes the frame channel, request correlator, auth
//! session machine, identity hasher, and resource caches behind one small
//! surface:
//!
//! - an eventual-value request function ([`ToolbarBridge::send`]);
//! - a read-only auth state plus a logout action;
//! - an identity/equality function over arbitrary records;
//! - the three resource caches.
//!
//! It also owns the single shared inbound listener
//! ([`ToolbarBridge::dispatch`]): every envelope the host environment
//! receives is origin-checked once, parsed once, and routed — request-scoped
//! messages to the correlator, lifecycle events to the session machine. The
//! rendering layer never touches the outstanding-request table or the caches
//! directly.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use serde_json::Value;
use tokio::sync::{mpsc, watch};

use crate::auth_session::{AuthSessionMachine, AuthState, IdentitySink};
use crate::config::BridgeConfig;
use crate::correlator::RequestCorrelator;
use crate::entity_hash::EntityHasher;
use crate::error::ChannelError;
use crate::frame_channel::{Envelope, FrameChannel, FrameSink};
use crate::observe::{ObservabilitySink, TracingSink};
use crate::protocol::{CommandKind, InboundMessage};
use crate::resource_cache::{ResourceCache, ResourceCaches, ResourceGates};

/// External collaborators a host application can hand to the bridge.
pub struct BridgeCollaborators {
    /// Error-tracking sink for panel-side failures.
    pub observer: Arc<dyn ObservabilitySink>,
    /// Telemetry-identity sink (used only with the enhanced-identification
    /// opt-in).
    pub identity: Option<Arc<dyn IdentitySink>>,
    /// Per-surface visibility gates for the resource caches.
    pub gates: ResourceGates,
}

impl Default for BridgeCollaborators {
    fn default() -> Self {
        Self {
            observer: Arc::new(TracingSink),
            identity: None,
            gates: ResourceGates::default(),
        }
    }
}

/// One embedding of the toolbar bridge.
pub struct ToolbarBridge {
    channel: Arc<FrameChannel>,
    correlator: Arc<RequestCorrelator>,
    auth: Arc<AuthSessionMachine>,
    caches: ResourceCaches,
    hasher: Mutex<EntityHasher>,
    dropped_envelopes: AtomicU64,
}

impl std::fmt::Debug for ToolbarBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolbarBridge")
            .field("channel", &self.channel)
            .field("outstanding", &self.correlator.outstanding())
            .field("auth", &self.auth_state())
            .finish()
    }
}

impl ToolbarBridge {
    /// Build a bridge from configuration and collaborators.
    #[must_use]
    pub fn new(config: &BridgeConfig, collaborators: BridgeCollaborators) -> Self {
        let channel = Arc::new(FrameChannel::new(config.trusted_origin.clone()));
        let correlator = Arc::new(RequestCorrelator::new(
            channel.clone(),
            config.request_timeout(),
            collaborators.observer.clone(),
        ));
        let auth = Arc::new(AuthSessionMachine::new(
            channel.clone(),
            collaborators.observer,
            collaborators.identity,
            config.enhanced_identification,
        ));
        let caches = ResourceCaches::new(
            &correlator,
            &auth,
            &channel,
            collaborators.gates,
            &config.environment_key,
        );
        Self {
            channel,
            correlator,
            auth,
            caches,
            hasher: Mutex::new(EntityHasher::new(config.identity_cache_capacity)),
            dropped_envelopes: AtomicU64::new(0),
        }
    }

    // --- Channel lifecycle ---

    /// The underlying channel endpoint.
    #[must_use]
    pub fn channel(&self) -> &Arc<FrameChannel> {
        &self.channel
    }

    /// Attach the panel frame once it has mounted.
    pub fn mount_frame(&self, sink: Arc<dyn FrameSink>) {
        self.channel.mount(sink);
    }

    /// Detach the panel frame.
    pub fn unmount_frame(&self) {
        self.channel.unmount();
    }

    // --- Inbound routing ---

    /// The single shared inbound listener. Origin-checks, parses, and routes
    /// one envelope. Untrusted or unparseable envelopes are dropped silently
    /// (counted in [`ToolbarBridge::dropped_envelopes`]).
    pub fn dispatch(&self, envelope: &Envelope) {
        if !self.channel.accepts(&envelope.origin) {
            self.dropped_envelopes.fetch_add(1, Ordering::Relaxed);
            tracing::trace!(origin = %envelope.origin, "discarding envelope from untrusted origin");
            return;
        }
        match InboundMessage::parse(&envelope.message) {
            Some(InboundMessage::Lifecycle(event)) => self.auth.handle_event(&event),
            Some(message) => self.correlator.handle_message(message),
            None => {
                self.dropped_envelopes.fetch_add(1, Ordering::Relaxed);
                tracing::debug!("dropping unrecognized panel message");
            }
        }
    }

    /// Drain a receiver of inbound envelopes until the sender side closes.
    /// Convenience for hosts that deliver messages over a channel instead of
    /// calling [`ToolbarBridge::dispatch`] directly.
    pub async fn pump(&self, receiver: &mut mpsc::UnboundedReceiver<Envelope>) {
        while let Some(envelope) = receiver.recv().await {
            self.dispatch(&envelope);
        }
    }

    /// Number of envelopes dropped by the origin gate or the parser.
    #[must_use]
    pub fn dropped_envelopes(&self) -> u64 {
        self.dropped_envelopes.load(Ordering::Relaxed)
    }

    // --- Requests ---

    /// Send a correlated command and await its response.
    pub async fn send(&self, command: CommandKind, payload: Value) -> Result<Value, ChannelError> {
        self.correlator.send(command, payload).await
    }

    /// Number of requests currently outstanding (diagnostics).
    #[must_use]
    pub fn outstanding_requests(&self) -> usize {
        self.correlator.outstanding()
    }

    // --- Session ---

    /// Current auth state snapshot.
    #[must_use]
    pub fn auth_state(&self) -> AuthState {
        self.auth.state()
    }

    /// Subscribe to auth state changes.
    #[must_use]
    pub fn watch_auth(&self) -> watch::Receiver<AuthState> {
        self.auth.subscribe()
    }

    /// Enter the authenticating state before opening a login flow.
    pub fn begin_authenticating(&self) {
        self.auth.begin_authenticating();
    }

    /// Fire-and-forget logout through the channel.
    pub fn logout(&self) -> Result<(), ChannelError> {
        self.auth.logout()
    }

    /// Take the auth-error receiver (yields `Some` exactly once).
    #[must_use]
    pub fn take_auth_errors(&self) -> Option<mpsc::UnboundedReceiver<String>> {
        self.auth.take_error_receiver()
    }

    // --- Resources ---

    #[must_use]
    pub fn projects(&self) -> &ResourceCache<crate::protocol::Project> {
        &self.caches.projects
    }

    #[must_use]
    pub fn flags(&self) -> &ResourceCache<crate::protocol::FeatureFlag> {
        &self.caches.flags
    }

    #[must_use]
    pub fn contexts(&self) -> &ResourceCache<crate::protocol::ContextKind> {
        &self.caches.contexts
    }

    // --- Identity ---

    /// Content identity of a record (cached; see [`crate::entity_hash`]).
    pub fn identity_of(&self, record: Option<&Arc<Value>>) -> String {
        self.hasher
            .lock()
            .expect("hasher lock poisoned")
            .identity_of(record)
    }

    /// Content equality of two records via their identities.
    pub fn entities_equal(&self, a: Option<&Arc<Value>>, b: Option<&Arc<Value>>) -> bool {
        self.hasher
            .lock()
            .expect("hasher lock poisoned")
            .entities_equal(a, b)
    }
}
