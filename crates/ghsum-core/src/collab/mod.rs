//! Collaborator seams: the data fetcher, the summary generator and the
//! artifact publisher.
//!
//! The engine only ever talks to these traits. Wire formats, pagination,
//! prompt construction and retries live behind them.

pub mod throttle;

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{
    ActivityItems, ActivityPayload, FetchError, FilterConfig, GenerateError, ItemKind,
    PublishError, RepoId,
};

pub use throttle::GeneratorBudget;

/// Pulls activity for one repository and one item kind since a timestamp.
///
/// `filters` are the repository's effective filters; implementations may use
/// them to narrow the upstream query but the pipeline filters again anyway.
/// Transient failures are retried internally; an `Err` is final.
#[async_trait]
pub trait ActivityFetcher: Send + Sync {
    async fn fetch(
        &self,
        repo: &RepoId,
        kind: ItemKind,
        since: DateTime<Utc>,
        filters: &FilterConfig,
    ) -> Result<ActivityItems, FetchError>;
}

/// Turns a non-empty payload into summary text.
///
/// Transient failures are retried internally; an `Err` is final. Concurrency
/// is bounded by the caller through a `GeneratorBudget`.
#[async_trait]
pub trait SummaryGenerator: Send + Sync {
    async fn summarize(&self, payload: &ActivityPayload) -> Result<String, GenerateError>;
}

/// Which raw artifacts a run asked for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishFlags {
    pub json: bool,
    pub markdown: bool,
}

/// Everything PUBLISHING hands to the publisher.
#[derive(Debug, Clone, Copy)]
pub struct PublishRequest<'a> {
    pub payload: &'a ActivityPayload,
    pub summary: Option<&'a str>,
    pub flags: PublishFlags,
    pub completed_at: DateTime<Utc>,
}

/// Files written by one publish call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishReceipt {
    pub written: Vec<PathBuf>,
}

/// Writes output artifacts and feeds. A returned error fails PUBLISHING;
/// artifacts already written by the same call are left in place.
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, request: PublishRequest<'_>) -> Result<PublishReceipt, PublishError>;
}
