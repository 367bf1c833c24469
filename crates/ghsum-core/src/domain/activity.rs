//! Activity items and the per-run payload handed to the generator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::repo::{ItemKind, RepoId};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Commit {
    pub sha: String,
    pub author: Option<String>,
    pub message: String,
    pub date: DateTime<Utc>,
    pub html_url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PullRequest {
    pub number: u64,
    pub title: String,
    #[serde(default)]
    pub body: Option<String>,
    pub author: Option<String>,
    pub state: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub merged_at: Option<DateTime<Utc>>,
    pub html_url: String,
    #[serde(default)]
    pub labels: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    pub number: u64,
    pub title: String,
    #[serde(default)]
    pub body: Option<String>,
    pub author: Option<String>,
    pub state: String,
    pub created_at: DateTime<Utc>,
    pub html_url: String,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub milestone: Option<String>,
    #[serde(default)]
    pub assignees: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Discussion {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub body: Option<String>,
    pub author: Option<String>,
    pub created_at: DateTime<Utc>,
    pub html_url: String,
    #[serde(default)]
    pub labels: Vec<String>,
}

/// What a single fetch call returns. The variant must match the requested
/// `ItemKind`.
#[derive(Debug, Clone, PartialEq)]
pub enum ActivityItems {
    Commits(Vec<Commit>),
    PullRequests(Vec<PullRequest>),
    Issues(Vec<Issue>),
    Discussions(Vec<Discussion>),
}

impl ActivityItems {
    pub fn empty(kind: ItemKind) -> Self {
        match kind {
            ItemKind::Commits => ActivityItems::Commits(Vec::new()),
            ItemKind::PullRequests => ActivityItems::PullRequests(Vec::new()),
            ItemKind::Issues => ActivityItems::Issues(Vec::new()),
            ItemKind::Discussions => ActivityItems::Discussions(Vec::new()),
        }
    }

    pub fn kind(&self) -> ItemKind {
        match self {
            ActivityItems::Commits(_) => ItemKind::Commits,
            ActivityItems::PullRequests(_) => ItemKind::PullRequests,
            ActivityItems::Issues(_) => ItemKind::Issues,
            ActivityItems::Discussions(_) => ItemKind::Discussions,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            ActivityItems::Commits(v) => v.len(),
            ActivityItems::PullRequests(v) => v.len(),
            ActivityItems::Issues(v) => v.len(),
            ActivityItems::Discussions(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn into_commits(self) -> Option<Vec<Commit>> {
        match self {
            ActivityItems::Commits(v) => Some(v),
            _ => None,
        }
    }

    pub fn into_pull_requests(self) -> Option<Vec<PullRequest>> {
        match self {
            ActivityItems::PullRequests(v) => Some(v),
            _ => None,
        }
    }

    pub fn into_issues(self) -> Option<Vec<Issue>> {
        match self {
            ActivityItems::Issues(v) => Some(v),
            _ => None,
        }
    }

    pub fn into_discussions(self) -> Option<Vec<Discussion>> {
        match self {
            ActivityItems::Discussions(v) => Some(v),
            _ => None,
        }
    }
}

/// Half-open time window `[start, end)` a pipeline asks upstream about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// Item counts per kind, after filtering.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemCounts {
    pub commits: usize,
    pub pull_requests: usize,
    pub issues: usize,
    pub discussions: usize,
}

impl ItemCounts {
    pub fn total(&self) -> usize {
        self.commits + self.pull_requests + self.issues + self.discussions
    }
}

/// Filtered activity for one repository and one run. Owned by its pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityPayload {
    pub repo: RepoId,
    pub window: TimeWindow,
    pub commits: Vec<Commit>,
    pub pull_requests: Vec<PullRequest>,
    pub issues: Vec<Issue>,
    pub discussions: Vec<Discussion>,
}

impl ActivityPayload {
    pub fn empty(repo: RepoId, window: TimeWindow) -> Self {
        Self {
            repo,
            window,
            commits: Vec::new(),
            pull_requests: Vec::new(),
            issues: Vec::new(),
            discussions: Vec::new(),
        }
    }

    pub fn counts(&self) -> ItemCounts {
        ItemCounts {
            commits: self.commits.len(),
            pull_requests: self.pull_requests.len(),
            issues: self.issues.len(),
            discussions: self.discussions.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.counts().total() == 0
    }
}
