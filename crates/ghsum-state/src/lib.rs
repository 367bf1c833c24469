//! ghsum-state: durable run state for ghsum
//!
//! ## Layer 0 - Persistence
//!
//! Holds the only piece of cross-run mutable state in the system: the
//! timestamp of each repository's last fully successful pipeline. Also owns
//! the bounded summary cache the feed is rendered from.
//!
//! ## Key Components
//!
//! - `RunStateStore`: async get/set contract, serialized read-merge-write
//! - `JsonRunStateStore`: single JSON file backend with atomic replace
//! - `JsonSummaryCache`: newest-first, deduplicated, size-capped entry list
//! - `fakes::MemoryRunStateStore`: in-memory store with write-failure injection

mod error;
pub mod fakes;
pub mod fs;
pub mod json_store;
pub mod storage_traits;
pub mod summary_cache;

pub use error::StateError;
pub use json_store::JsonRunStateStore;
pub use storage_traits::{format_timestamp, parse_timestamp, RunStateStore, StateResult};
pub use summary_cache::{CacheEntry, JsonSummaryCache, DEFAULT_MAX_ENTRIES};

/// Result type for ghsum-state operations
pub type Result<T> = std::result::Result<T, StateError>;
