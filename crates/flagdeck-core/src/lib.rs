//! flagdeck-core: Core library for flagdeck
//!
//! This crate provides the communication core of an in-page feature-flag
//! toolbar: the host-side half of a trusted cross-context channel to a
//! privileged panel frame that owns the authenticated session.
//!
//! # Architecture
//!
//! ```text
//! host page ──► ToolbarBridge ──► FrameChannel ──► panel frame
//!                   │                                  │
//!                   ├── RequestCorrelator ◄── responses/errors
//!                   ├── AuthSessionMachine ◄── lifecycle events
//!                   ├── ResourceCaches (projects/flags/contexts)
//!                   └── EntityHasher (content-addressed identity)
//! ```
//!
//! # Modules
//!
//! - `frame_channel`: panel frame handle and origin gate
//! - `protocol`: the typed message contract over the channel
//! - `correlator`: request/response correlation with timeouts
//! - `auth_session`: session state machine driven by lifecycle events
//! - `entity_hash`: canonicalization and content-addressed identity
//! - `bounded_cache`: bounded map with oldest-insertion eviction
//! - `resource_cache`: project-scoped fetch-and-cache for collections
//! - `bridge`: the assembled surface handed to the rendering layer
//! - `observe`: observability collaborator boundary
//! - `config`: TOML configuration
//! - `logging`: structured logging setup
//! - `testkit`: scripted panel frame for tests and demos
//!
//! # Safety
//!
//! This crate forbids unsafe code.

#![forbid(unsafe_code)]

pub mod auth_session;
pub mod bounded_cache;
pub mod bridge;
pub mod config;
pub mod correlator;
pub mod entity_hash;
pub mod error;
pub mod frame_channel;
pub mod logging;
pub mod observe;
pub mod protocol;
pub mod resource_cache;
pub mod testkit;

pub use error::{Error, Result};
