//! In-memory fakes for the state store (testing only)
//!
//! `MemoryRunStateStore` satisfies the `RunStateStore` contract without
//! touching the filesystem and can be told to reject writes, globally or for
//! specific repositories.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StateError;
use crate::storage_traits::{RunStateStore, StateResult};

#[derive(Debug, Default)]
pub struct MemoryRunStateStore {
    entries: Mutex<BTreeMap<String, DateTime<Utc>>>,
    reject_all: AtomicBool,
    reject_repos: Mutex<HashSet<String>>,
    set_calls: AtomicUsize,
}

impl MemoryRunStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an entry.
    pub fn with_entry(self, repo_id: &str, at: DateTime<Utc>) -> Self {
        self.entries
            .lock()
            .unwrap()
            .insert(repo_id.to_string(), at);
        self
    }

    /// Reject every subsequent write.
    pub fn reject_writes(&self, reject: bool) {
        self.reject_all.store(reject, Ordering::SeqCst);
    }

    /// Reject writes that touch `repo_id`.
    pub fn reject_writes_for(&self, repo_id: &str) {
        self.reject_repos
            .lock()
            .unwrap()
            .insert(repo_id.to_string());
    }

    /// Number of `set`/`set_many` calls observed, including rejected ones.
    pub fn set_calls(&self) -> usize {
        self.set_calls.load(Ordering::SeqCst)
    }

    pub fn peek(&self, repo_id: &str) -> Option<DateTime<Utc>> {
        self.entries.lock().unwrap().get(repo_id).copied()
    }
}

#[async_trait]
impl RunStateStore for MemoryRunStateStore {
    async fn get(&self, repo_id: &str) -> StateResult<Option<DateTime<Utc>>> {
        Ok(self.peek(repo_id))
    }

    async fn set(&self, repo_id: &str, at: DateTime<Utc>) -> StateResult<()> {
        self.set_many(&[(repo_id.to_string(), at)]).await
    }

    async fn set_many(&self, entries: &[(String, DateTime<Utc>)]) -> StateResult<()> {
        self.set_calls.fetch_add(1, Ordering::SeqCst);
        if self.reject_all.load(Ordering::SeqCst) {
            return Err(StateError::WriteRejected("all writes rejected".into()));
        }
        {
            let rejected = self.reject_repos.lock().unwrap();
            if let Some((repo, _)) = entries.iter().find(|(repo, _)| rejected.contains(repo)) {
                return Err(StateError::WriteRejected(repo.clone()));
            }
        }
        let mut map = self.entries.lock().unwrap();
        for (repo_id, at) in entries {
            map.insert(repo_id.clone(), *at);
        }
        Ok(())
    }

    async fn snapshot(&self) -> StateResult<BTreeMap<String, DateTime<Utc>>> {
        Ok(self.entries.lock().unwrap().clone())
    }
}
