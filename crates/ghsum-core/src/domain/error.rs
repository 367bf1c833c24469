//! Error taxonomy for ghsum.
//!
//! Collaborator errors (`FetchError`, `GenerateError`, `PublishError`) are
//! terminal for the pipeline that sees them; transient failures are retried
//! inside the collaborator before they surface here. `ConfigError` is the only
//! error that can fail a whole batch.

use std::time::Duration;

/// Errors detected while loading or validating configuration, or while
/// checking a batch request before any pipeline starts.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {message}")]
    Parse { path: String, message: String },

    #[error("invalid repository id '{repo}': expected owner/name")]
    InvalidRepoId { repo: String },

    #[error("repository listed more than once: {repo}")]
    DuplicateRepository { repo: String },

    #[error("repository not found in configuration: {repo}")]
    UnknownRepository { repo: String },

    #[error("invalid budget {name}: must be a positive integer")]
    InvalidBudget { name: &'static str },

    #[error("invalid setting {name}: {reason}")]
    InvalidSetting { name: &'static str, reason: String },

    #[error("invalid cron expression '{expr}': {reason}")]
    InvalidCron { expr: String, reason: String },

    #[error("invalid timezone '{tz}'")]
    InvalidTimezone { tz: String },

    #[error("invalid regex in {field}: {reason}")]
    InvalidRegex { field: String, reason: String },

    #[error("missing credential: {0}")]
    MissingCredential(&'static str),
}

/// Final failure from the activity fetcher.
#[derive(Debug, Clone, thiserror::Error)]
pub enum FetchError {
    #[error("upstream rate limit exhausted{}", reset_suffix(.reset_at))]
    RateLimited {
        reset_at: Option<chrono::DateTime<chrono::Utc>>,
    },

    #[error("network error: {0}")]
    Network(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("upstream returned {status}: {message}")]
    Upstream { status: u16, message: String },

    #[error("repository not found upstream: {0}")]
    NotFound(String),

    #[error("unexpected response: {0}")]
    Decode(String),
}

fn reset_suffix(reset_at: &Option<chrono::DateTime<chrono::Utc>>) -> String {
    match reset_at {
        Some(at) => format!(" (resets at {})", at.to_rfc3339()),
        None => String::new(),
    }
}

impl FetchError {
    /// Worth another attempt inside the fetcher.
    pub fn is_transient(&self) -> bool {
        match self {
            FetchError::Network(_) | FetchError::Timeout(_) => true,
            FetchError::Upstream { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

/// Final failure from the summary generator.
#[derive(Debug, Clone, thiserror::Error)]
pub enum GenerateError {
    #[error("provider error: {0}")]
    Provider(String),

    #[error("generation timed out after {0:?}")]
    Timeout(Duration),
}

/// Failure while writing output artifacts or the feed.
#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("artifact write failed: {0}")]
    Write(#[from] ghsum_state::StateError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("feed rendering failed: {0}")]
    Feed(String),

    #[error("publish rejected for {repo}: {reason}")]
    Rejected { repo: String, reason: String },
}
