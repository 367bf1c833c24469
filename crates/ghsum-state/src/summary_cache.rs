//! Bounded cache of generated summaries, the source of the syndication feed.
//!
//! Entries are kept newest first, deduplicated by `id`, and pruned to
//! `max_entries`. The feed is always re-rendered from the whole cache so a
//! lost feed file is rebuilt by the next successful publish.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::warn;

use crate::fs::{atomic_write, read_optional};
use crate::Result;

pub const DEFAULT_MAX_ENTRIES: usize = 100;

/// One published summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub id: String,
    pub title: String,
    pub content: String,
    pub link: String,
    pub timestamp: DateTime<Utc>,
}

impl CacheEntry {
    /// Entry for a repository summary completed at `at`.
    pub fn for_repo(repo: &str, content: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            id: format!("{repo}-{}", at.to_rfc3339()),
            title: format!("Summary for {repo}"),
            content: content.into(),
            link: format!("https://github.com/{repo}"),
            timestamp: at,
        }
    }
}

pub struct JsonSummaryCache {
    path: PathBuf,
    max_entries: usize,
    lock: Mutex<()>,
}

impl JsonSummaryCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            max_entries: DEFAULT_MAX_ENTRIES,
            lock: Mutex::new(()),
        }
    }

    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = max_entries.max(1);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current entries, newest first. A missing, unreadable or corrupt cache
    /// is empty.
    pub async fn load(&self) -> Vec<CacheEntry> {
        match self.load_for_update().await {
            Ok(entries) => entries,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "summary cache unreadable, starting empty");
                Vec::new()
            }
        }
    }

    /// Like `load`, but I/O and worker failures are errors so `add` never
    /// overwrites entries it could not read.
    async fn load_for_update(&self) -> Result<Vec<CacheEntry>> {
        let path = self.path.clone();
        let bytes = tokio::task::spawn_blocking(move || read_optional(&path)).await??;
        let Some(bytes) = bytes else {
            return Ok(Vec::new());
        };
        match serde_json::from_slice::<Vec<CacheEntry>>(&bytes) {
            Ok(mut entries) => {
                entries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
                Ok(entries)
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "summary cache is not valid JSON, starting empty");
                Ok(Vec::new())
            }
        }
    }

    /// Insert `entry` (replacing any entry with the same id), re-sort, prune
    /// and persist. Returns the resulting entry list.
    pub async fn add(&self, entry: CacheEntry) -> Result<Vec<CacheEntry>> {
        let _guard = self.lock.lock().await;
        let mut entries = self.load_for_update().await?;
        entries.retain(|e| e.id != entry.id);
        entries.push(entry);
        entries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        entries.truncate(self.max_entries);

        let path = self.path.clone();
        let bytes = serde_json::to_vec_pretty(&entries)?;
        tokio::task::spawn_blocking(move || atomic_write(&path, &bytes)).await??;
        Ok(entries)
    }
}
