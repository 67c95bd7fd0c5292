//! Content-addressed identity for context records.
//!
//! Toolbar surfaces re-render constantly, and every render may construct a
//! fresh context record that is structurally identical to the last one. This
//! module gives arbitrary nested records a stable identity string derived
//! purely from their content, so equality, deduplication, and caching survive
//! re-renders without reference equality.
//!
//! # Pipeline
//!
//! ```text
//! record ──► strip legacy slices (multi composites only)
//!        ──► canonicalize (sorted keys, order-normalized primitive arrays)
//!        ──► serialize ──► djb2 ──► base36 ──► "ctx-<hash>"
//! ```
//!
//! # Caching
//!
//! Identities are cached two ways:
//! - by record reference (`Arc` pointer identity), dropped when the record is
//!   no longer referenced anywhere else;
//! - by canonical serialization, in a capacity-bounded map with
//!   oldest-insertion eviction, so a freshly constructed but
//!   content-identical record still hits the cache.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::{SystemTime, UNIX_EPOCH};

use rand::distr::{Alphanumeric, SampleString};
use serde_json::{Map, Value};

use crate::bounded_cache::BoundedCache;

/// Prefix of every real content identity.
pub const IDENTITY_PREFIX: &str = "ctx-";

/// Prefix of the fallback identity handed out for a missing record. The
/// format is segregated from real identities so the two can never be
/// mistaken for one another.
pub const VOID_IDENTITY_PREFIX: &str = "ctx-void-";

/// Default capacity of the canonical-content identity cache.
pub const DEFAULT_CONTENT_CACHE_CAPACITY: usize = 512;

/// Composite records tagged with this `kind` get their legacy slices
/// stripped before hashing.
const MULTI_KIND: &str = "multi";

/// Keys dropped from each nested slice of a multi composite before hashing.
/// Older panel builds duplicated the slice kind inside every slice and
/// attached transient `_meta` blocks; neither carries identity-relevant
/// content, so composites differing only there must hash identically.
const DEPRECATED_SLICE_KEYS: [&str; 2] = ["kind", "_meta"];

/// Prune the reference cache once it holds this many entries.
const REF_CACHE_PRUNE_THRESHOLD: usize = 64;

// =============================================================================
// Canonicalization
// =============================================================================

/// Whether a value is a primitive (not an object or array).
const fn is_primitive(value: &Value) -> bool {
    !matches!(value, Value::Object(_) | Value::Array(_))
}

/// Produce the canonical structural form of a record:
///
/// - object keys sorted lexicographically at every nesting level;
/// - arrays whose every element is primitive are sorted by the string
///   rendering of their elements (their order is not semantically
///   meaningful);
/// - arrays containing objects or arrays keep their original order (order
///   there may be meaningful).
#[must_use]
pub fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(fields) => {
            let mut keys: Vec<&String> = fields.keys().collect();
            keys.sort();
            let mut sorted = Map::new();
            for key in keys {
                sorted.insert(key.clone(), canonicalize(&fields[key]));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => {
            let mut canonical: Vec<Value> = items.iter().map(canonicalize).collect();
            if canonical.iter().all(is_primitive) {
                canonical.sort_by_key(|item| item.to_string());
            }
            Value::Array(canonical)
        }
        primitive => primitive.clone(),
    }
}

/// Serialize the canonical form of `value` deterministically.
///
/// Keys are written in sorted order regardless of the map representation
/// underneath, so the output is stable across builds and feature sets.
#[must_use]
pub fn canonical_string(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(&canonicalize(value), &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(fields) => {
            out.push('{');
            let mut keys: Vec<&String> = fields.keys().collect();
            keys.sort();
            for (index, key) in keys.iter().enumerate() {
                if index > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String((*key).clone()).to_string());
                out.push(':');
                write_canonical(&fields[*key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (index, item) in items.iter().enumerate() {
                if index > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        primitive => out.push_str(&primitive.to_string()),
    }
}

/// Strip the deprecated per-slice keys from a multi-entity composite.
/// Non-composite records pass through untouched.
#[must_use]
pub fn strip_legacy_slices(value: &Value) -> Value {
    let Value::Object(fields) = value else {
        return value.clone();
    };
    if fields.get("kind").and_then(Value::as_str) != Some(MULTI_KIND) {
        return value.clone();
    }

    let mut stripped = Map::new();
    for (key, slice) in fields {
        if key == "kind" {
            stripped.insert(key.clone(), slice.clone());
            continue;
        }
        if let Value::Object(slice_fields) = slice {
            let mut clean = slice_fields.clone();
            for deprecated in DEPRECATED_SLICE_KEYS {
                clean.remove(deprecated);
            }
            stripped.insert(key.clone(), Value::Object(clean));
        } else {
            stripped.insert(key.clone(), slice.clone());
        }
    }
    Value::Object(stripped)
}

// =============================================================================
// Hashing
// =============================================================================

/// djb2-style rolling hash, folded to an unsigned 32-bit value.
fn djb2(bytes: &[u8]) -> u32 {
    let mut hash: u32 = 5381;
    for byte in bytes {
        hash = hash.wrapping_mul(33) ^ u32::from(*byte);
    }
    hash
}

/// Render a u32 in lowercase base36.
fn base36(mut n: u32) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if n == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while n > 0 {
        out.push(DIGITS[(n % 36) as usize]);
        n /= 36;
    }
    out.reverse();
    String::from_utf8(out).expect("base36 digits are ascii")
}

/// Compute the content identity of a record, bypassing all caches.
///
/// Pure function of content: two records with identical canonical form
/// always receive the same identity, regardless of key order or
/// primitive-array order.
#[must_use]
pub fn content_identity(record: &Value) -> String {
    let canonical = canonical_string(&strip_legacy_slices(record));
    format!("{IDENTITY_PREFIX}{}", base36(djb2(canonical.as_bytes())))
}

/// A deliberately non-deterministic identity for a missing record.
///
/// There is nothing to hash, so the fallback is always distinct: two
/// missing-record lookups never compare equal through their identities.
/// The `ctx-void-` prefix keeps the format segregated from real hashes.
#[must_use]
pub fn fallback_identity() -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or(0);
    let suffix = Alphanumeric.sample_string(&mut rand::rng(), 4);
    format!("{VOID_IDENTITY_PREFIX}{millis}-{suffix}")
}

// =============================================================================
// EntityHasher
// =============================================================================

struct RefEntry {
    record: Weak<Value>,
    identity: String,
}

/// Two-tier identity cache over [`content_identity`].
///
/// The fast path is keyed by `Arc` pointer identity; entries whose record
/// has been dropped everywhere else are pruned opportunistically. The second
/// tier is keyed by canonical serialization in a bounded map, so a fresh
/// allocation with identical content still avoids re-hashing.
pub struct EntityHasher {
    content: BoundedCache<String, String>,
    by_ref: HashMap<usize, RefEntry>,
}

impl std::fmt::Debug for EntityHasher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityHasher")
            .field("content", &self.content)
            .field("ref_entries", &self.by_ref.len())
            .finish()
    }
}

impl EntityHasher {
    /// Create a hasher whose content tier holds up to `capacity` identities.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            content: BoundedCache::new(capacity),
            by_ref: HashMap::new(),
        }
    }

    /// Identity of `record`, or an always-distinct fallback when missing.
    pub fn identity_of(&mut self, record: Option<&Arc<Value>>) -> String {
        let Some(record) = record else {
            return fallback_identity();
        };

        let ref_key = Arc::as_ptr(record) as usize;
        let mut cached_identity = None;
        let mut stale_slot = false;
        if let Some(entry) = self.by_ref.get(&ref_key) {
            // A dead weak entry can share an address with a new allocation;
            // only trust the slot if it still points at this exact record.
            match entry.record.upgrade() {
                Some(live) if Arc::ptr_eq(&live, record) => {
                    cached_identity = Some(entry.identity.clone());
                }
                _ => stale_slot = true,
            }
        }
        if let Some(identity) = cached_identity {
            return identity;
        }
        if stale_slot {
            self.by_ref.remove(&ref_key);
        }

        let canonical = canonical_string(&strip_legacy_slices(record));
        let identity = if let Some(cached) = self.content.get(&canonical) {
            cached.clone()
        } else {
            let identity = format!("{IDENTITY_PREFIX}{}", base36(djb2(canonical.as_bytes())));
            self.content.insert(canonical, identity.clone());
            identity
        };

        if self.by_ref.len() >= REF_CACHE_PRUNE_THRESHOLD {
            self.prune_dead_refs();
        }
        self.by_ref.insert(
            ref_key,
            RefEntry {
                record: Arc::downgrade(record),
                identity: identity.clone(),
            },
        );
        identity
    }

    /// Content equality via identity. Two missing records are equal; a
    /// missing record never equals a present one.
    pub fn entities_equal(&mut self, a: Option<&Arc<Value>>, b: Option<&Arc<Value>>) -> bool {
        match (a, b) {
            (None, None) => true,
            (None, Some(_)) | (Some(_), None) => false,
            (Some(a), Some(b)) => self.identity_of(Some(a)) == self.identity_of(Some(b)),
        }
    }

    /// Number of live reference-tier entries (diagnostics).
    #[must_use]
    pub fn ref_entries(&self) -> usize {
        self.by_ref.len()
    }

    /// Statistics of the content tier (diagnostics).
    #[must_use]
    pub fn content_stats(&self) -> &crate::bounded_cache::CacheStats {
        self.content.stats()
    }

    fn prune_dead_refs(&mut self) {
        self.by_ref
            .retain(|_, entry| entry.record.strong_count() > 0);
    }
}

impl Default for EntityHasher {
    fn default() -> Self {
        Self::new(DEFAULT_CONTENT_CACHE_CAPACITY)
    }
}
