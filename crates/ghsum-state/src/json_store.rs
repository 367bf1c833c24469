//! JSON-file backed `RunStateStore`.
//!
//! Layout: a single JSON object `{ "<key>": "<RFC 3339 timestamp>" }`.
//! Keys are the repository identifier, optionally prefixed with a namespace
//! (`<namespace>::<owner>/<name>`) so several configurations can share one
//! file without clobbering each other.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::fs::{atomic_write, read_optional};
use crate::storage_traits::{format_timestamp, parse_timestamp, RunStateStore, StateResult};

const NAMESPACE_SEPARATOR: &str = "::";

type RawMap = BTreeMap<String, String>;

pub struct JsonRunStateStore {
    path: PathBuf,
    namespace: Option<String>,
    // Held across the whole read-merge-write cycle.
    write_lock: Mutex<()>,
}

impl JsonRunStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            namespace: None,
            write_lock: Mutex::new(()),
        }
    }

    /// Prefix every key with `namespace::`.
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        let ns = namespace.into();
        self.namespace = if ns.is_empty() { None } else { Some(ns) };
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn key_for(&self, repo_id: &str) -> String {
        match &self.namespace {
            Some(ns) => format!("{ns}{NAMESPACE_SEPARATOR}{repo_id}"),
            None => repo_id.to_string(),
        }
    }

    fn strip_key<'a>(&self, key: &'a str) -> Option<&'a str> {
        match &self.namespace {
            Some(ns) => key
                .strip_prefix(ns.as_str())
                .and_then(|rest| rest.strip_prefix(NAMESPACE_SEPARATOR)),
            None => Some(key),
        }
    }

    /// Load the raw map for a read. Missing, unreadable or corrupt files all
    /// read as empty: absent state means "never run".
    async fn load(&self) -> RawMap {
        match self.load_for_update().await {
            Ok(map) => map,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "run state unreadable, treating as empty");
                RawMap::new()
            }
        }
    }

    /// Load the raw map before a merge-write. Only a missing or corrupt file
    /// counts as empty; I/O and worker failures are returned so the write
    /// cannot replace entries it never saw.
    async fn load_for_update(&self) -> StateResult<RawMap> {
        let path = self.path.clone();
        let bytes = tokio::task::spawn_blocking(move || read_optional(&path)).await??;
        Ok(self.parse_map(bytes))
    }

    fn parse_map(&self, bytes: Option<Vec<u8>>) -> RawMap {
        let Some(bytes) = bytes else {
            return RawMap::new();
        };
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return RawMap::new();
        }
        match serde_json::from_slice(&bytes) {
            Ok(map) => map,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "run state is not valid JSON, treating as empty");
                RawMap::new()
            }
        }
    }

    async fn store(&self, map: RawMap) -> StateResult<()> {
        let path = self.path.clone();
        let bytes = serde_json::to_vec_pretty(&map)?;
        tokio::task::spawn_blocking(move || atomic_write(&path, &bytes)).await??;
        Ok(())
    }
}

#[async_trait]
impl RunStateStore for JsonRunStateStore {
    async fn get(&self, repo_id: &str) -> StateResult<Option<DateTime<Utc>>> {
        let map = self.load().await;
        let key = self.key_for(repo_id);
        let Some(raw) = map.get(&key) else {
            return Ok(None);
        };
        match parse_timestamp(raw) {
            Some(at) => Ok(Some(at)),
            None => {
                warn!(key = %key, value = %raw, "invalid timestamp in run state, ignoring");
                Ok(None)
            }
        }
    }

    async fn set(&self, repo_id: &str, at: DateTime<Utc>) -> StateResult<()> {
        self.set_many(&[(repo_id.to_string(), at)]).await
    }

    async fn set_many(&self, entries: &[(String, DateTime<Utc>)]) -> StateResult<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let _guard = self.write_lock.lock().await;
        let mut map = self.load_for_update().await?;
        for (repo_id, at) in entries {
            map.insert(self.key_for(repo_id), format_timestamp(*at));
        }
        self.store(map).await?;
        debug!(path = %self.path.display(), updated = entries.len(), "run state saved");
        Ok(())
    }

    async fn snapshot(&self) -> StateResult<BTreeMap<String, DateTime<Utc>>> {
        let map = self.load().await;
        Ok(map
            .iter()
            .filter_map(|(key, raw)| {
                let repo = self.strip_key(key)?;
                parse_timestamp(raw).map(|at| (repo.to_string(), at))
            })
            .collect())
    }
}
