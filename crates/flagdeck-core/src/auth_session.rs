//! Session state machine driven by panel lifecycle events.
//!
//! The panel frame owns the authenticated session; the host side only ever
//! observes it. This machine folds the unsolicited lifecycle events arriving
//! over the channel into a small state snapshot
//! ([`AuthState`]) published through a `watch` channel, and offers the two
//! host-initiated actions: entering the authenticating state before a login
//! flow opens, and a fire-and-forget logout.
//!
//! There are no terminal states; the machine cycles for the lifetime of the
//! host page. Transitions happen only on channel events or explicit
//! commands — never by polling.
//!
//! Auth errors are reported to the observability sink and delivered on an
//! explicit subscriber channel ([`AuthSessionMachine::take_error_receiver`]);
//! a host that cares installs a consumer deliberately instead of relying on
//! an exception escaping an event callback.

use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};

use crate::error::ChannelError;
use crate::frame_channel::FrameChannel;
use crate::observe::ObservabilitySink;
use crate::protocol::{LifecycleEvent, logout_message};

/// Snapshot of the session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthState {
    /// The panel session is authenticated.
    pub authenticated: bool,
    /// A login flow is underway (entered explicitly by the host).
    pub authenticating: bool,
    /// No lifecycle event has arrived yet.
    pub loading: bool,
}

impl AuthState {
    /// The state before any lifecycle event arrives.
    #[must_use]
    pub const fn initial() -> Self {
        Self {
            authenticated: false,
            authenticating: false,
            loading: true,
        }
    }

    const fn authenticated() -> Self {
        Self {
            authenticated: true,
            authenticating: false,
            loading: false,
        }
    }

    const fn unauthenticated() -> Self {
        Self {
            authenticated: false,
            authenticating: false,
            loading: false,
        }
    }

    const fn authenticating() -> Self {
        Self {
            authenticated: false,
            authenticating: true,
            loading: false,
        }
    }
}

impl Default for AuthState {
    fn default() -> Self {
        Self::initial()
    }
}

/// Receives the account/member pair for enhanced telemetry identification.
pub trait IdentitySink: Send + Sync {
    fn identify(&self, account_id: &str, member_id: &str);
}

/// Folds panel lifecycle events into an observable [`AuthState`].
pub struct AuthSessionMachine {
    channel: Arc<FrameChannel>,
    observer: Arc<dyn ObservabilitySink>,
    identity: Option<Arc<dyn IdentitySink>>,
    enhanced_identification: bool,
    state: watch::Sender<AuthState>,
    errors: mpsc::UnboundedSender<String>,
    error_receiver: Mutex<Option<mpsc::UnboundedReceiver<String>>>,
}

impl std::fmt::Debug for AuthSessionMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthSessionMachine")
            .field("state", &self.state())
            .field("enhanced_identification", &self.enhanced_identification)
            .finish()
    }
}

impl AuthSessionMachine {
    /// Create a machine over `channel`.
    ///
    /// `identity` and `enhanced_identification` control identity forwarding:
    /// the pair is forwarded only when the sink is present, the opt-in is
    /// true, and an `authenticated` event carries both identifiers.
    #[must_use]
    pub fn new(
        channel: Arc<FrameChannel>,
        observer: Arc<dyn ObservabilitySink>,
        identity: Option<Arc<dyn IdentitySink>>,
        enhanced_identification: bool,
    ) -> Self {
        let (state, _) = watch::channel(AuthState::initial());
        let (errors, error_receiver) = mpsc::unbounded_channel();
        Self {
            channel,
            observer,
            identity,
            enhanced_identification,
            state,
            errors,
            error_receiver: Mutex::new(Some(error_receiver)),
        }
    }

    /// Current state snapshot.
    #[must_use]
    pub fn state(&self) -> AuthState {
        *self.state.borrow()
    }

    /// Subscribe to state changes.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<AuthState> {
        self.state.subscribe()
    }

    /// Take the auth-error receiver. Yields `Some` exactly once; the host
    /// application installs its own consumer deliberately.
    #[must_use]
    pub fn take_error_receiver(&self) -> Option<mpsc::UnboundedReceiver<String>> {
        self.error_receiver
            .lock()
            .expect("error receiver lock poisoned")
            .take()
    }

    /// Enter the authenticating state (e.g. before opening a popup-based
    /// login flow).
    pub fn begin_authenticating(&self) {
        self.state.send_replace(AuthState::authenticating());
        tracing::debug!("session entering authenticating state");
    }

    /// Send the fire-and-forget logout command through the channel. The
    /// state transition happens when the panel acknowledges with a
    /// `logout-response` lifecycle event, not here.
    pub fn logout(&self) -> Result<(), ChannelError> {
        self.channel.post(logout_message())
    }

    /// Fold one lifecycle event into the state.
    pub fn handle_event(&self, event: &LifecycleEvent) {
        match event {
            LifecycleEvent::Authenticated {
                account_id,
                member_id,
            } => {
                self.state.send_replace(AuthState::authenticated());
                tracing::debug!("session authenticated");
                self.forward_identity(account_id.as_deref(), member_id.as_deref());
            }
            LifecycleEvent::AuthRequired => {
                self.state.send_replace(AuthState::unauthenticated());
                tracing::debug!("panel requires authentication");
            }
            LifecycleEvent::AuthError { error } => {
                self.state.send_replace(AuthState::unauthenticated());
                self.observer.auth_error(error);
                // Receiver may not be installed; the report above already
                // happened, so a missing consumer loses nothing vital.
                let _ = self.errors.send(error.clone());
            }
            LifecycleEvent::ApiReady => {
                tracing::debug!("panel api ready");
            }
            LifecycleEvent::LogoutResponse => {
                self.state.send_replace(AuthState::unauthenticated());
                tracing::debug!("session logged out");
            }
            LifecycleEvent::LogoutError { error } => {
                self.state.send_replace(AuthState::unauthenticated());
                self.observer.auth_error(error);
            }
        }
    }

    fn forward_identity(&self, account_id: Option<&str>, member_id: Option<&str>) {
        if !self.enhanced_identification {
            return;
        }
        let (Some(sink), Some(account_id), Some(member_id)) =
            (self.identity.as_ref(), account_id, member_id)
        else {
            return;
        };
        sink.identify(account_id, member_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame_channel::FrameSink;
    use crate::observe::{ObservedFailure, RecordingSink};
    use serde_json::Value;

    const ORIGIN: &str = "https://panel.example.com";

    #[derive(Default)]
    struct RecordingIdentity {
        identified: Mutex<Vec<(String, String)>>,
    }

    impl IdentitySink for RecordingIdentity {
        fn identify(&self, account_id: &str, member_id: &str) {
            self.identified
                .lock()
                .unwrap()
                .push((account_id.to_string(), member_id.to_string()));
        }
    }

    struct Recorder {
        posted: Mutex<Vec<Value>>,
    }

    impl FrameSink for Recorder {
        fn post(&self, message: Value) -> Result<(), ChannelError> {
            self.posted.lock().unwrap().push(message);
            Ok(())
        }
    }

    fn machine() -> (
        AuthSessionMachine,
        Arc<RecordingSink>,
        Arc<RecordingIdentity>,
    ) {
        machine_with(true)
    }

    fn machine_with(
        enhanced: bool,
    ) -> (
        AuthSessionMachine,
        Arc<RecordingSink>,
        Arc<RecordingIdentity>,
    ) {
        let channel = Arc::new(FrameChannel::new(ORIGIN));
        let sink = Arc::new(RecordingSink::new());
        let identity = Arc::new(RecordingIdentity::default());
        let machine = AuthSessionMachine::new(
            channel,
            sink.clone(),
            Some(identity.clone()),
            enhanced,
        );
        (machine, sink, identity)
    }

    fn authenticated_event(account: Option<&str>, member: Option<&str>) -> LifecycleEvent {
        LifecycleEvent::Authenticated {
            account_id: account.map(str::to_string),
            member_id: member.map(str::to_string),
        }
    }

    #[test]
    fn starts_loading_and_unauthenticated() {
        let (machine, _, _) = machine();
        assert_eq!(machine.state(), AuthState::initial());
        assert!(machine.state().loading);
        assert!(!machine.state().authenticated);
    }

    #[test]
    fn authenticated_event_clears_loading() {
        let (machine, _, _) = machine();
        machine.handle_event(&authenticated_event(Some("a1"), Some("m1")));
        let state = machine.state();
        assert!(state.authenticated);
        assert!(!state.loading);
        assert!(!state.authenticating);
    }

    #[test]
    fn identity_forwarded_once_with_both_ids_and_opt_in() {
        let (machine, _, identity) = machine();
        machine.handle_event(&authenticated_event(Some("a1"), Some("m1")));
        assert_eq!(
            identity.identified.lock().unwrap().clone(),
            vec![("a1".to_string(), "m1".to_string())]
        );
    }

    #[test]
    fn identity_not_forwarded_without_member_id() {
        let (machine, _, identity) = machine();
        machine.handle_event(&authenticated_event(Some("a1"), None));
        assert!(identity.identified.lock().unwrap().is_empty());
        // State still transitions.
        assert!(machine.state().authenticated);
    }

    #[test]
    fn identity_not_forwarded_without_account_id() {
        let (machine, _, identity) = machine();
        machine.handle_event(&authenticated_event(None, Some("m1")));
        assert!(identity.identified.lock().unwrap().is_empty());
    }

    #[test]
    fn identity_not_forwarded_without_opt_in() {
        let (machine, _, identity) = machine_with(false);
        machine.handle_event(&authenticated_event(Some("a1"), Some("m1")));
        assert!(identity.identified.lock().unwrap().is_empty());
    }

    #[test]
    fn identity_forwarded_per_authentication_event() {
        let (machine, _, identity) = machine();
        machine.handle_event(&authenticated_event(Some("a1"), Some("m1")));
        machine.handle_event(&authenticated_event(Some("a1"), Some("m1")));
        assert_eq!(identity.identified.lock().unwrap().len(), 2);
    }

    #[test]
    fn auth_required_moves_to_unauthenticated() {
        let (machine, _, _) = machine();
        machine.handle_event(&LifecycleEvent::AuthRequired);
        let state = machine.state();
        assert!(!state.authenticated);
        assert!(!state.loading);
    }

    #[test]
    fn auth_error_reports_and_delivers_on_error_channel() {
        let (machine, sink, _) = machine();
        let mut errors = machine.take_error_receiver().unwrap();

        machine.handle_event(&authenticated_event(Some("a1"), Some("m1")));
        machine.handle_event(&LifecycleEvent::AuthError {
            error: "token expired".to_string(),
        });

        assert!(!machine.state().authenticated);
        assert_eq!(
            sink.failures(),
            vec![ObservedFailure::Auth {
                message: "token expired".to_string(),
            }]
        );
        assert_eq!(errors.try_recv().unwrap(), "token expired");
    }

    #[test]
    fn error_receiver_can_be_taken_once() {
        let (machine, _, _) = machine();
        assert!(machine.take_error_receiver().is_some());
        assert!(machine.take_error_receiver().is_none());
    }

    #[test]
    fn begin_authenticating_then_authenticated() {
        let (machine, _, _) = machine();
        machine.handle_event(&LifecycleEvent::AuthRequired);
        machine.begin_authenticating();
        let state = machine.state();
        assert!(state.authenticating);
        assert!(!state.authenticated);

        machine.handle_event(&authenticated_event(None, None));
        let state = machine.state();
        assert!(state.authenticated);
        assert!(!state.authenticating);
    }

    #[test]
    fn api_ready_does_not_change_state() {
        let (machine, _, _) = machine();
        machine.handle_event(&LifecycleEvent::ApiReady);
        assert_eq!(machine.state(), AuthState::initial());
    }

    #[test]
    fn logout_response_moves_to_unauthenticated() {
        let (machine, _, _) = machine();
        machine.handle_event(&authenticated_event(Some("a1"), Some("m1")));
        machine.handle_event(&LifecycleEvent::LogoutResponse);
        assert!(!machine.state().authenticated);
    }

    #[test]
    fn logout_error_reports_and_moves_to_unauthenticated() {
        let (machine, sink, _) = machine();
        machine.handle_event(&authenticated_event(Some("a1"), Some("m1")));
        machine.handle_event(&LifecycleEvent::LogoutError {
            error: "session already gone".to_string(),
        });
        assert!(!machine.state().authenticated);
        assert_eq!(sink.failures().len(), 1);
    }

    #[test]
    fn logout_posts_fire_and_forget_command() {
        let channel = Arc::new(FrameChannel::new(ORIGIN));
        let recorder = Arc::new(Recorder {
            posted: Mutex::new(Vec::new()),
        });
        channel.mount(recorder.clone());
        let machine = AuthSessionMachine::new(
            channel,
            Arc::new(RecordingSink::new()),
            None,
            false,
        );

        machine.logout().unwrap();
        let posted = recorder.posted.lock().unwrap();
        assert_eq!(posted.len(), 1);
        assert_eq!(posted[0]["type"], "logout");
        assert!(posted[0].get("requestId").is_none());
    }

    #[test]
    fn logout_before_mount_fails_fast() {
        let channel = Arc::new(FrameChannel::new(ORIGIN));
        let machine = AuthSessionMachine::new(
            channel,
            Arc::new(RecordingSink::new()),
            None,
            false,
        );
        assert!(matches!(machine.logout(), Err(ChannelError::NotReady)));
    }

    #[tokio::test]
    async fn watchers_observe_transitions() {
        let (machine, _, _) = machine();
        let mut watcher = machine.subscribe();
        assert_eq!(*watcher.borrow(), AuthState::initial());

        machine.handle_event(&authenticated_event(None, None));
        watcher.changed().await.unwrap();
        assert!(watcher.borrow().authenticated);
    }
}
