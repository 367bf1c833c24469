//! Domain model for ghsum.
//!
//! - `RepoId` / `RepositoryTarget`: what to process
//! - `ActivityPayload`: filtered activity for one run
//! - `FilterConfig` / `CompiledFilters`: filter settings and predicates
//! - `RunOutcome` / `BatchReport`: what happened

pub mod activity;
pub mod error;
pub mod filter;
pub mod outcome;
pub mod repo;

pub use activity::{
    ActivityItems, ActivityPayload, Commit, Discussion, Issue, ItemCounts, PullRequest,
    TimeWindow,
};
pub use error::{ConfigError, FetchError, GenerateError, PublishError};
pub use filter::{
    CommitFilters, CompiledFilters, DateBasis, DiscussionFilters, FilterConfig, FilterRule,
    Filterable, IssueFilters, PullRequestFilters,
};
pub use outcome::{BatchReport, PipelineStage, RunOutcome, RunStatus, StageFailure};
pub use repo::{IncludeFlags, ItemKind, RepoId, RepositoryTarget};
