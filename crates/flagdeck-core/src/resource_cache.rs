//! Project-scoped fetch-and-cache for panel resource collections.
//!
//! Three collections back the toolbar surfaces: projects, feature flags, and
//! context kinds. Each is fetched through the correlator and cached per
//! project key, so re-renders and tab switches do not generate redundant
//! channel traffic.
//!
//! # Policy (shared by all three caches)
//!
//! - Channel not ready or session unauthenticated: resolve immediately to an
//!   empty collection. These are expected pre-conditions, not errors.
//! - Surface inactive (its tab is not focused): skip the fetch entirely.
//!   A collection already cached for the requested key is still returned —
//!   once fetched, a key is never re-fetched; revisiting it hits the cache.
//! - Genuine request failures are caught, logged, reported via the
//!   correlator's observability path, and degrade to an empty collection
//!   rather than crashing the UI layer.
//! - A manual out-of-band fetch for an arbitrary key is supported and leaves
//!   the cached state untouched.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::auth_session::AuthSessionMachine;
use crate::correlator::RequestCorrelator;
use crate::error::ChannelError;
use crate::frame_channel::FrameChannel;
use crate::protocol::{CommandKind, ContextKind, FeatureFlag, Paginated, Project};

/// Whether the UI surface consuming a resource currently needs fresh data
/// (e.g. its tab is focused). An inactive surface suppresses fetches.
pub trait SurfaceGate: Send + Sync {
    fn is_active(&self) -> bool;
}

/// Gate for embeddings without per-surface visibility tracking.
#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysActive;

impl SurfaceGate for AlwaysActive {
    fn is_active(&self) -> bool {
        true
    }
}

/// One project-scoped resource cache.
pub struct ResourceCache<T> {
    correlator: Arc<RequestCorrelator>,
    auth: Arc<AuthSessionMachine>,
    channel: Arc<FrameChannel>,
    gate: Arc<dyn SurfaceGate>,
    command: CommandKind,
    /// Extra payload fields sent with every fetch (e.g. `environmentKey`).
    scope: Mutex<Map<String, Value>>,
    entries: Mutex<HashMap<String, Paginated<T>>>,
}

impl<T> std::fmt::Debug for ResourceCache<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceCache")
            .field("command", &self.command)
            .field("cached_keys", &self.entries.lock().expect("entries lock poisoned").len())
            .finish()
    }
}

impl<T: DeserializeOwned + Clone> ResourceCache<T> {
    /// Create a cache issuing `command` fetches through `correlator`.
    #[must_use]
    pub fn new(
        command: CommandKind,
        correlator: Arc<RequestCorrelator>,
        auth: Arc<AuthSessionMachine>,
        channel: Arc<FrameChannel>,
        gate: Arc<dyn SurfaceGate>,
    ) -> Self {
        Self {
            correlator,
            auth,
            channel,
            gate,
            command,
            scope: Mutex::new(Map::new()),
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Set an extra payload field sent with every fetch. Changing the scope
    /// changes what cached entries mean, so the cache is cleared.
    pub fn set_scope_field(&self, key: impl Into<String>, value: Value) {
        self.scope
            .lock()
            .expect("scope lock poisoned")
            .insert(key.into(), value);
        self.invalidate();
    }

    /// Drop every cached entry.
    pub fn invalidate(&self) {
        self.entries.lock().expect("entries lock poisoned").clear();
    }

    /// Project keys currently cached (diagnostics).
    #[must_use]
    pub fn cached_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .entries
            .lock()
            .expect("entries lock poisoned")
            .keys()
            .cloned()
            .collect();
        keys.sort();
        keys
    }

    /// The collection for `project_key`, fetched once per key.
    ///
    /// Resolves immediately to the empty collection when the channel is not
    /// ready, the session is unauthenticated, or the surface is inactive and
    /// nothing is cached yet.
    pub async fn get_project_scoped(&self, project_key: &str) -> Paginated<T> {
        if !self.channel.is_mounted() {
            tracing::trace!(command = %self.command, "channel not ready; returning empty collection");
            return Paginated::empty();
        }
        if !self.auth.state().authenticated {
            tracing::trace!(command = %self.command, "unauthenticated; returning empty collection");
            return Paginated::empty();
        }

        if let Some(cached) = self
            .entries
            .lock()
            .expect("entries lock poisoned")
            .get(project_key)
        {
            return cached.clone();
        }

        if !self.gate.is_active() {
            tracing::debug!(
                command = %self.command,
                project_key,
                "surface inactive; skipping fetch"
            );
            return Paginated::empty();
        }

        match self.fetch_for(project_key).await {
            Ok(collection) => {
                self.entries
                    .lock()
                    .expect("entries lock poisoned")
                    .insert(project_key.to_string(), collection.clone());
                collection
            }
            Err(err) => {
                tracing::warn!(
                    command = %self.command,
                    project_key,
                    error = %err,
                    "fetch failed; {}",
                    err.user_facing()
                );
                Paginated::empty()
            }
        }
    }

    /// Fetch the collection for an arbitrary project key without touching
    /// the cached state.
    pub async fn fetch_for(&self, project_key: &str) -> Result<Paginated<T>, ChannelError> {
        let payload = self.payload_for(project_key);
        let data = self.correlator.send(self.command, payload).await?;
        match serde_json::from_value(data) {
            Ok(collection) => Ok(collection),
            Err(err) => {
                tracing::warn!(
                    command = %self.command,
                    project_key,
                    error = %err,
                    "panel returned an unexpected collection shape"
                );
                Ok(Paginated::empty())
            }
        }
    }

    fn payload_for(&self, project_key: &str) -> Value {
        let mut payload = self.scope.lock().expect("scope lock poisoned").clone();
        // get-projects is account-scoped; it takes no project key.
        if self.command != CommandKind::GetProjects {
            payload.insert(
                "projectKey".to_string(),
                Value::String(project_key.to_string()),
            );
        }
        Value::Object(payload)
    }
}

/// Per-surface visibility gates for the three resource caches.
#[derive(Clone)]
pub struct ResourceGates {
    pub projects: Arc<dyn SurfaceGate>,
    pub flags: Arc<dyn SurfaceGate>,
    pub contexts: Arc<dyn SurfaceGate>,
}

impl Default for ResourceGates {
    fn default() -> Self {
        let gate: Arc<dyn SurfaceGate> = Arc::new(AlwaysActive);
        Self {
            projects: gate.clone(),
            flags: gate.clone(),
            contexts: gate,
        }
    }
}

/// The three resource caches backing the toolbar surfaces.
pub struct ResourceCaches {
    pub projects: ResourceCache<Project>,
    pub flags: ResourceCache<FeatureFlag>,
    pub contexts: ResourceCache<ContextKind>,
}

impl ResourceCaches {
    /// Build the caches over a shared correlator and session machine.
    /// `environment_key` scopes context-kind fetches.
    #[must_use]
    pub fn new(
        correlator: &Arc<RequestCorrelator>,
        auth: &Arc<AuthSessionMachine>,
        channel: &Arc<FrameChannel>,
        gates: ResourceGates,
        environment_key: &str,
    ) -> Self {
        let contexts = ResourceCache::new(
            CommandKind::GetContexts,
            correlator.clone(),
            auth.clone(),
            channel.clone(),
            gates.contexts,
        );
        contexts.set_scope_field("environmentKey", Value::String(environment_key.to_string()));
        Self {
            projects: ResourceCache::new(
                CommandKind::GetProjects,
                correlator.clone(),
                auth.clone(),
                channel.clone(),
                gates.projects,
            ),
            flags: ResourceCache::new(
                CommandKind::GetFlags,
                correlator.clone(),
                auth.clone(),
                channel.clone(),
                gates.flags,
            ),
            contexts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::correlator::DEFAULT_REQUEST_TIMEOUT;
    use crate::frame_channel::{Envelope, FrameSink};
    use crate::observe::RecordingSink;
    use crate::protocol::LifecycleEvent;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, Ordering};

    const ORIGIN: &str = "https://panel.example.com";

    struct Recorder {
        posted: Mutex<Vec<Value>>,
    }

    impl Recorder {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                posted: Mutex::new(Vec::new()),
            })
        }

        fn post_count(&self) -> usize {
            self.posted.lock().unwrap().len()
        }

        fn last_posted(&self) -> Value {
            self.posted.lock().unwrap().last().cloned().expect("no posted request")
        }
    }

    impl FrameSink for Recorder {
        fn post(&self, message: Value) -> Result<(), ChannelError> {
            self.posted.lock().unwrap().push(message);
            Ok(())
        }
    }

    struct ToggleGate {
        active: AtomicBool,
    }

    impl SurfaceGate for ToggleGate {
        fn is_active(&self) -> bool {
            self.active.load(Ordering::SeqCst)
        }
    }

    struct Fixture {
        frame: Arc<Recorder>,
        correlator: Arc<RequestCorrelator>,
        auth: Arc<AuthSessionMachine>,
        channel: Arc<FrameChannel>,
    }

    fn fixture(mounted: bool, authenticated: bool) -> Fixture {
        let channel = Arc::new(FrameChannel::new(ORIGIN));
        let frame = Recorder::new();
        if mounted {
            channel.mount(frame.clone());
        }
        let sink = Arc::new(RecordingSink::new());
        let correlator = Arc::new(RequestCorrelator::new(
            channel.clone(),
            DEFAULT_REQUEST_TIMEOUT,
            sink.clone(),
        ));
        let auth = Arc::new(AuthSessionMachine::new(channel.clone(), sink, None, false));
        if authenticated {
            auth.handle_event(&LifecycleEvent::Authenticated {
                account_id: None,
                member_id: None,
            });
        }
        Fixture {
            frame,
            correlator,
            auth,
            channel,
        }
    }

    fn flags_cache(fx: &Fixture, gate: Arc<dyn SurfaceGate>) -> Arc<ResourceCache<FeatureFlag>> {
        Arc::new(ResourceCache::new(
            CommandKind::GetFlags,
            fx.correlator.clone(),
            fx.auth.clone(),
            fx.channel.clone(),
            gate,
        ))
    }

    fn respond_flags(fx: &Fixture, keys: &[&str]) {
        let posted = fx.frame.last_posted();
        let request_id = posted["requestId"].as_str().unwrap();
        let items: Vec<Value> = keys.iter().map(|key| json!({ "key": key })).collect();
        fx.correlator.handle_envelope(&Envelope::new(
            ORIGIN,
            json!({
                "type": "get-flags-response",
                "requestId": request_id,
                "data": { "items": items, "totalCount": keys.len() },
            }),
        ));
    }

    #[tokio::test]
    async fn unmounted_channel_yields_empty_without_traffic() {
        let fx = fixture(false, false);
        let cache = flags_cache(&fx, Arc::new(AlwaysActive));
        let collection = cache.get_project_scoped("p1").await;
        assert!(collection.items.is_empty());
        assert_eq!(fx.frame.post_count(), 0);
    }

    #[tokio::test]
    async fn unauthenticated_session_yields_empty_without_traffic() {
        let fx = fixture(true, false);
        let cache = flags_cache(&fx, Arc::new(AlwaysActive));
        let collection = cache.get_project_scoped("p1").await;
        assert!(collection.items.is_empty());
        assert_eq!(fx.frame.post_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn fetches_once_and_caches_per_project_key() {
        let fx = fixture(true, true);
        let cache = flags_cache(&fx, Arc::new(AlwaysActive));

        let first = {
            let cache = cache.clone();
            tokio::spawn(async move { cache.get_project_scoped("p1").await })
        };
        tokio::task::yield_now().await;
        respond_flags(&fx, &["f1"]);
        let collection = first.await.unwrap();
        assert_eq!(collection.items[0].key, "f1");
        assert_eq!(collection.total_count, 1);
        assert_eq!(fx.frame.post_count(), 1);

        // Second visit to the same key: cached, no new request.
        let again = cache.get_project_scoped("p1").await;
        assert_eq!(again.items[0].key, "f1");
        assert_eq!(fx.frame.post_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn project_switch_fetches_but_return_visit_is_cached() {
        let fx = fixture(true, true);
        let cache = flags_cache(&fx, Arc::new(AlwaysActive));

        let first = {
            let cache = cache.clone();
            tokio::spawn(async move { cache.get_project_scoped("a").await })
        };
        tokio::task::yield_now().await;
        respond_flags(&fx, &["flag-a"]);
        first.await.unwrap();

        let second = {
            let cache = cache.clone();
            tokio::spawn(async move { cache.get_project_scoped("b").await })
        };
        tokio::task::yield_now().await;
        respond_flags(&fx, &["flag-b"]);
        let b = second.await.unwrap();
        assert_eq!(b.items[0].key, "flag-b");
        assert_eq!(fx.frame.post_count(), 2);

        // Back to "a" with no intervening invalidation: no new request.
        let back = cache.get_project_scoped("a").await;
        assert_eq!(back.items[0].key, "flag-a");
        assert_eq!(fx.frame.post_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn inactive_surface_skips_fetch_but_serves_cached() {
        let fx = fixture(true, true);
        let gate = Arc::new(ToggleGate {
            active: AtomicBool::new(true),
        });
        let cache = flags_cache(&fx, gate.clone());

        let first = {
            let cache = cache.clone();
            tokio::spawn(async move { cache.get_project_scoped("p1").await })
        };
        tokio::task::yield_now().await;
        respond_flags(&fx, &["f1"]);
        first.await.unwrap();

        gate.active.store(false, Ordering::SeqCst);

        // New key with the surface inactive: no traffic, empty result.
        let other = cache.get_project_scoped("p2").await;
        assert!(other.items.is_empty());
        assert_eq!(fx.frame.post_count(), 1);

        // Already-cached key still served while inactive.
        let cached = cache.get_project_scoped("p1").await;
        assert_eq!(cached.items[0].key, "f1");
        assert_eq!(fx.frame.post_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn remote_failure_degrades_to_empty() {
        let fx = fixture(true, true);
        let cache = flags_cache(&fx, Arc::new(AlwaysActive));

        let task = {
            let cache = cache.clone();
            tokio::spawn(async move { cache.get_project_scoped("p1").await })
        };
        tokio::task::yield_now().await;
        let posted = fx.frame.last_posted();
        fx.correlator.handle_envelope(&Envelope::new(
            ORIGIN,
            json!({
                "type": "get-flags-error",
                "requestId": posted["requestId"],
                "error": "boom",
            }),
        ));

        let collection = task.await.unwrap();
        assert!(collection.items.is_empty());
        // The failure is not cached; the next visit retries.
        assert!(cache.cached_keys().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn manual_fetch_leaves_cached_state_untouched() {
        let fx = fixture(true, true);
        let cache = flags_cache(&fx, Arc::new(AlwaysActive));

        let first = {
            let cache = cache.clone();
            tokio::spawn(async move { cache.get_project_scoped("p1").await })
        };
        tokio::task::yield_now().await;
        respond_flags(&fx, &["f1"]);
        first.await.unwrap();

        let manual = {
            let cache = cache.clone();
            tokio::spawn(async move { cache.fetch_for("other").await })
        };
        tokio::task::yield_now().await;
        respond_flags(&fx, &["other-flag"]);
        let fetched = manual.await.unwrap().unwrap();
        assert_eq!(fetched.items[0].key, "other-flag");

        // The out-of-band fetch did not become the cached entry.
        assert_eq!(cache.cached_keys(), vec!["p1".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn payload_includes_project_key_and_scope_fields() {
        let fx = fixture(true, true);
        let cache = Arc::new(ResourceCache::<ContextKind>::new(
            CommandKind::GetContexts,
            fx.correlator.clone(),
            fx.auth.clone(),
            fx.channel.clone(),
            Arc::new(AlwaysActive),
        ));
        cache.set_scope_field("environmentKey", json!("production"));

        let task = {
            let cache = cache.clone();
            tokio::spawn(async move { cache.get_project_scoped("p1").await })
        };
        tokio::task::yield_now().await;

        let posted = fx.frame.last_posted();
        assert_eq!(posted["type"], "get-contexts");
        assert_eq!(posted["projectKey"], "p1");
        assert_eq!(posted["environmentKey"], "production");

        fx.correlator.handle_envelope(&Envelope::new(
            ORIGIN,
            json!({
                "type": "get-contexts-response",
                "requestId": posted["requestId"],
                "data": { "items": [], "totalCount": 0 },
            }),
        ));
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn get_projects_payload_omits_project_key() {
        let fx = fixture(true, true);
        let cache = Arc::new(ResourceCache::<Project>::new(
            CommandKind::GetProjects,
            fx.correlator.clone(),
            fx.auth.clone(),
            fx.channel.clone(),
            Arc::new(AlwaysActive),
        ));

        let task = {
            let cache = cache.clone();
            tokio::spawn(async move { cache.get_project_scoped("selected").await })
        };
        tokio::task::yield_now().await;

        let posted = fx.frame.last_posted();
        assert_eq!(posted["type"], "get-projects");
        assert!(posted.get("projectKey").is_none());

        fx.correlator.handle_envelope(&Envelope::new(
            ORIGIN,
            json!({
                "type": "get-projects-response",
                "requestId": posted["requestId"],
                "data": { "items": [{ "key": "selected" }], "totalCount": 1 },
            }),
        ));
        let collection = task.await.unwrap();
        assert_eq!(collection.items[0].key, "selected");
    }

    #[tokio::test(start_paused = true)]
    async fn scope_change_invalidates_cached_entries() {
        let fx = fixture(true, true);
        let cache = flags_cache(&fx, Arc::new(AlwaysActive));

        let first = {
            let cache = cache.clone();
            tokio::spawn(async move { cache.get_project_scoped("p1").await })
        };
        tokio::task::yield_now().await;
        respond_flags(&fx, &["f1"]);
        first.await.unwrap();
        assert_eq!(cache.cached_keys().len(), 1);

        cache.set_scope_field("limit", json!(100));
        assert!(cache.cached_keys().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_collection_shape_degrades_to_empty() {
        let fx = fixture(true, true);
        let cache = flags_cache(&fx, Arc::new(AlwaysActive));

        let task = {
            let cache = cache.clone();
            tokio::spawn(async move { cache.get_project_scoped("p1").await })
        };
        tokio::task::yield_now().await;
        let posted = fx.frame.last_posted();
        fx.correlator.handle_envelope(&Envelope::new(
            ORIGIN,
            json!({
                "type": "get-flags-response",
                "requestId": posted["requestId"],
                "data": { "items": "not-an-array" },
            }),
        ));

        let collection = task.await.unwrap();
        assert!(collection.items.is_empty());
    }

    #[tokio::test]
    async fn resource_caches_wire_environment_scope() {
        let fx = fixture(true, true);
        let caches = ResourceCaches::new(
            &fx.correlator,
            &fx.auth,
            &fx.channel,
            ResourceGates::default(),
            "staging",
        );
        // Scope is attached to the contexts cache only.
        let payload = caches.contexts.payload_for("p1");
        assert_eq!(payload["environmentKey"], "staging");
        assert_eq!(payload["projectKey"], "p1");
        let flags_payload = caches.flags.payload_for("p1");
        assert!(flags_payload.get("environmentKey").is_none());
    }
}
