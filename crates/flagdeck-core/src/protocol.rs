//! Message contract between the host page and the privileged panel frame.
//!
//! The panel frame owns the authenticated session; the host side talks to it
//! over a single one-way, asynchronous, origin-scoped message channel. This
//! module defines both directions of that contract:
//!
//! - **Outbound commands**: `{ type, requestId, ...payload }`, correlated by
//!   `requestId` (see [`crate::correlator`]), plus the fire-and-forget
//!   `logout` command.
//! - **Inbound messages**: a closed tagged union ([`InboundMessage`]) over
//!   every message kind the panel can emit. Adding a new command or lifecycle
//!   event is a compile-time-checked change, not a string comparison that
//!   silently falls through.
//!
//! Field names on the wire are camelCase (`requestId`, `projectKey`, ...);
//! this matches what the hosted panel emits.

use rand::distr::{Alphanumeric, SampleString};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Length of the random suffix appended to a request identifier.
const REQUEST_ID_SUFFIX_LEN: usize = 10;

/// Wire name of the fire-and-forget logout command.
pub const LOGOUT_COMMAND: &str = "logout";

// =============================================================================
// Commands
// =============================================================================

/// The correlated commands the panel understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CommandKind {
    /// List the projects visible to the authenticated member.
    GetProjects,
    /// List feature flags for a project (paginated, optionally filtered).
    GetFlags,
    /// List context kinds for a project/environment pair.
    GetContexts,
}

impl CommandKind {
    /// The `type` string this command is sent as.
    #[must_use]
    pub const fn wire_name(self) -> &'static str {
        match self {
            Self::GetProjects => "get-projects",
            Self::GetFlags => "get-flags",
            Self::GetContexts => "get-contexts",
        }
    }

    /// Resolve a wire name back to a command, if known.
    #[must_use]
    pub fn from_wire(name: &str) -> Option<Self> {
        match name {
            "get-projects" => Some(Self::GetProjects),
            "get-flags" => Some(Self::GetFlags),
            "get-contexts" => Some(Self::GetContexts),
            _ => None,
        }
    }
}

impl std::fmt::Display for CommandKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.wire_name())
    }
}

// =============================================================================
// Request identifiers
// =============================================================================

/// Unique identifier for one outstanding request: `<command>-<random suffix>`.
///
/// The command prefix makes identifiers self-describing in logs; uniqueness
/// comes from the random suffix. An identifier is never reused while its
/// request is outstanding (the correlator re-rolls on the unlikely collision).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(String);

impl RequestId {
    /// Generate a fresh identifier for `command`.
    #[must_use]
    pub fn generate(command: CommandKind) -> Self {
        let suffix = Alphanumeric.sample_string(&mut rand::rng(), REQUEST_ID_SUFFIX_LEN);
        Self(format!("{}-{suffix}", command.wire_name()))
    }

    /// Wrap an identifier received on the wire.
    #[must_use]
    pub fn from_wire(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// =============================================================================
// Outbound envelopes
// =============================================================================

/// Build the outbound message for a correlated command.
///
/// `payload` fields are merged at the top level next to `type` and
/// `requestId`. A non-object payload is ignored (the wire shape is flat).
#[must_use]
pub fn outbound_command(command: CommandKind, request_id: &RequestId, payload: &Value) -> Value {
    let mut message = Map::new();
    message.insert("type".to_string(), Value::String(command.wire_name().to_string()));
    message.insert("requestId".to_string(), Value::String(request_id.as_str().to_string()));
    if let Value::Object(fields) = payload {
        for (key, value) in fields {
            message.insert(key.clone(), value.clone());
        }
    }
    Value::Object(message)
}

/// Build the fire-and-forget logout message.
#[must_use]
pub fn logout_message() -> Value {
    serde_json::json!({ "type": LOGOUT_COMMAND })
}

/// Query payload for `get-flags`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlagsQuery {
    pub project_key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
}

/// Query payload for `get-contexts`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextsQuery {
    pub project_key: String,
    pub environment_key: String,
}

// =============================================================================
// Resource records
// =============================================================================

/// A paginated collection as the panel returns it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Paginated<T> {
    #[serde(default = "Vec::new")]
    pub items: Vec<T>,
    #[serde(default)]
    pub total_count: u64,
}

impl<T> Default for Paginated<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            total_count: 0,
        }
    }
}

impl<T> Paginated<T> {
    /// The empty collection substituted when the channel is not ready or the
    /// session is unauthenticated.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }
}

/// A project record. Only `key` is interpreted; other fields ride along.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub key: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A feature flag record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureFlag {
    pub key: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A context kind record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextKind {
    pub key: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

// =============================================================================
// Inbound messages
// =============================================================================

/// Lifecycle events the panel emits outside any request (no `requestId`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// The session is authenticated. Identifiers are optional; both must be
    /// present for identity forwarding (see [`crate::auth_session`]).
    Authenticated {
        account_id: Option<String>,
        member_id: Option<String>,
    },
    /// The panel needs the member to log in.
    AuthRequired,
    /// Authentication failed inside the panel.
    AuthError { error: String },
    /// The panel API surface finished loading.
    ApiReady,
    /// A logout completed.
    LogoutResponse,
    /// A logout failed inside the panel.
    LogoutError { error: String },
}

/// Every inbound message kind the bridge understands.
///
/// Anything that does not parse into one of these variants is dropped by the
/// dispatcher (with a debug log); there is no fallthrough string dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundMessage {
    /// `<command>-response`: settles the matching outstanding request.
    Response {
        command: CommandKind,
        request_id: RequestId,
        data: Value,
    },
    /// `<command>-error`: rejects the matching outstanding request.
    CommandError {
        command: CommandKind,
        request_id: RequestId,
        message: String,
    },
    /// A request-independent lifecycle event.
    Lifecycle(LifecycleEvent),
}

impl InboundMessage {
    /// Parse a raw channel message. Returns `None` for shapes the bridge does
    /// not understand (unknown `type`, unknown command, missing `requestId`).
    #[must_use]
    pub fn parse(value: &Value) -> Option<Self> {
        let message_type = value.get("type")?.as_str()?;
        match message_type {
            "authenticated" => Some(Self::Lifecycle(LifecycleEvent::Authenticated {
                account_id: string_field(value, "accountId"),
                member_id: string_field(value, "memberId"),
            })),
            "auth-required" => Some(Self::Lifecycle(LifecycleEvent::AuthRequired)),
            "auth-error" => Some(Self::Lifecycle(LifecycleEvent::AuthError {
                error: error_field(value),
            })),
            "api-ready" => Some(Self::Lifecycle(LifecycleEvent::ApiReady)),
            "logout-response" => Some(Self::Lifecycle(LifecycleEvent::LogoutResponse)),
            "logout-error" => Some(Self::Lifecycle(LifecycleEvent::LogoutError {
                error: error_field(value),
            })),
            other => {
                if let Some(wire) = other.strip_suffix("-response") {
                    let command = CommandKind::from_wire(wire)?;
                    let request_id = RequestId::from_wire(string_field(value, "requestId")?);
                    Some(Self::Response {
                        command,
                        request_id,
                        data: value.get("data").cloned().unwrap_or(Value::Null),
                    })
                } else if let Some(wire) = other.strip_suffix("-error") {
                    let command = CommandKind::from_wire(wire)?;
                    let request_id = RequestId::from_wire(string_field(value, "requestId")?);
                    Some(Self::CommandError {
                        command,
                        request_id,
                        message: error_field(value),
                    })
                } else {
                    None
                }
            }
        }
    }
}

fn string_field(value: &Value, field: &str) -> Option<String> {
    value.get(field).and_then(Value::as_str).map(str::to_string)
}

fn error_field(value: &Value) -> String {
    string_field(value, "error").unwrap_or_else(|| "unknown panel error".to_string())
}
