//! Repository identity and per-repository run targets.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::error::ConfigError;
use super::filter::{CompiledFilters, FilterConfig};

/// `owner/name` pair identifying a hosted repository.
///
/// The fields are private so every value has passed `RepoId::parse`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RepoId {
    owner: String,
    name: String,
}

impl RepoId {
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        let invalid = || ConfigError::InvalidRepoId {
            repo: raw.to_string(),
        };
        let (owner, name) = raw.split_once('/').ok_or_else(invalid)?;
        if !valid_segment(owner) || !valid_segment(name) {
            return Err(invalid());
        }
        Ok(Self {
            owner: owner.to_string(),
            name: name.to_string(),
        })
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// `owner_name`, used for artifact file names.
    pub fn file_stem(&self) -> String {
        format!("{}_{}", self.owner, self.name)
    }
}

fn valid_segment(s: &str) -> bool {
    !s.is_empty()
        && s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

impl fmt::Display for RepoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

impl TryFrom<String> for RepoId {
    type Error = ConfigError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        RepoId::parse(&s)
    }
}

impl From<RepoId> for String {
    fn from(id: RepoId) -> Self {
        id.to_string()
    }
}

/// Kinds of activity a pipeline can fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    Commits,
    PullRequests,
    Issues,
    Discussions,
}

impl ItemKind {
    pub const ALL: [ItemKind; 4] = [
        ItemKind::Commits,
        ItemKind::PullRequests,
        ItemKind::Issues,
        ItemKind::Discussions,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ItemKind::Commits => "commits",
            ItemKind::PullRequests => "pull_requests",
            ItemKind::Issues => "issues",
            ItemKind::Discussions => "discussions",
        }
    }
}

impl fmt::Display for ItemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-type inclusion flags. Everything is included unless switched off.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IncludeFlags {
    pub commits: bool,
    pub pull_requests: bool,
    pub issues: bool,
    pub discussions: bool,
}

impl Default for IncludeFlags {
    fn default() -> Self {
        Self {
            commits: true,
            pull_requests: true,
            issues: true,
            discussions: true,
        }
    }
}

impl IncludeFlags {
    pub fn enabled(&self, kind: ItemKind) -> bool {
        match kind {
            ItemKind::Commits => self.commits,
            ItemKind::PullRequests => self.pull_requests,
            ItemKind::Issues => self.issues,
            ItemKind::Discussions => self.discussions,
        }
    }

    /// Only the given kinds enabled.
    pub fn only(kinds: &[ItemKind]) -> Self {
        Self {
            commits: kinds.contains(&ItemKind::Commits),
            pull_requests: kinds.contains(&ItemKind::PullRequests),
            issues: kinds.contains(&ItemKind::Issues),
            discussions: kinds.contains(&ItemKind::Discussions),
        }
    }
}

/// Everything the orchestrator needs to run one repository.
///
/// Built from configuration with global and per-repository filters already
/// merged and compiled. Read-only for the whole batch.
#[derive(Debug, Clone)]
pub struct RepositoryTarget {
    pub id: RepoId,
    pub include: IncludeFlags,
    /// Effective (merged) filter settings, passed to the fetcher as hints.
    pub filters: FilterConfig,
    pub rules: CompiledFilters,
}

impl RepositoryTarget {
    pub fn new(id: RepoId, include: IncludeFlags, filters: FilterConfig) -> Result<Self, ConfigError> {
        let rules = filters.compile()?;
        Ok(Self {
            id,
            include,
            filters,
            rules,
        })
    }

    /// Target with every type enabled and no filters.
    pub fn unfiltered(id: RepoId) -> Self {
        Self {
            id,
            include: IncludeFlags::default(),
            filters: FilterConfig::default(),
            rules: CompiledFilters::default(),
        }
    }

    pub fn with_include(mut self, include: IncludeFlags) -> Self {
        self.include = include;
        self
    }
}
