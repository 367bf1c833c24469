//! Storage trait for incremental run state
//!
//! `RunStateStore` maps a repository identifier (`owner/name`) to the
//! timestamp of its last fully successful pipeline. Implementations must
//! serialize the whole read-merge-write cycle of `set`/`set_many` even
//! though concurrent callers always touch disjoint keys, because the
//! backing object is shared.
//!
//! In-memory fakes are provided for testing via the `fakes` module.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};

use crate::error::StateError;

/// Result type for state store operations
pub type StateResult<T> = std::result::Result<T, StateError>;

/// Durable "last successful run" store.
///
/// Guarantees:
/// - `get` of a key never written (or of a corrupt store) is `Ok(None)`.
/// - After `set(k, t)` returns `Ok`, a subsequent `get(k)` yields `t`.
/// - Concurrent `set` calls on different keys never lose each other's update.
#[async_trait]
pub trait RunStateStore: Send + Sync {
    /// Timestamp of the last successful run, if any.
    async fn get(&self, repo_id: &str) -> StateResult<Option<DateTime<Utc>>>;

    /// Record a successful run.
    async fn set(&self, repo_id: &str, at: DateTime<Utc>) -> StateResult<()>;

    /// Record several successful runs in one read-merge-write cycle.
    async fn set_many(&self, entries: &[(String, DateTime<Utc>)]) -> StateResult<()>;

    /// All known entries keyed by repository identifier.
    async fn snapshot(&self) -> StateResult<BTreeMap<String, DateTime<Utc>>>;
}

/// Canonical on-disk timestamp form (RFC 3339, UTC, microseconds).
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, false)
}

/// Parse a stored timestamp. Accepts RFC 3339 with any offset, and naive
/// ISO-8601 date-times which are taken as UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}
