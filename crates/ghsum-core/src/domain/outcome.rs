//! Per-repository outcomes and the aggregated batch report.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::activity::{ItemCounts, TimeWindow};
use super::repo::RepoId;

/// Pipeline state machine. Linear; `Failed` is absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(u8)]
pub enum PipelineStage {
    Pending = 0,
    Fetching = 1,
    Filtering = 2,
    Summarizing = 3,
    Publishing = 4,
    StateUpdate = 5,
    Done = 6,
    Failed = 7,
}

impl PipelineStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineStage::Pending => "PENDING",
            PipelineStage::Fetching => "FETCHING",
            PipelineStage::Filtering => "FILTERING",
            PipelineStage::Summarizing => "SUMMARIZING",
            PipelineStage::Publishing => "PUBLISHING",
            PipelineStage::StateUpdate => "STATE_UPDATE",
            PipelineStage::Done => "DONE",
            PipelineStage::Failed => "FAILED",
        }
    }

    pub fn from_u8(raw: u8) -> Self {
        match raw {
            0 => PipelineStage::Pending,
            1 => PipelineStage::Fetching,
            2 => PipelineStage::Filtering,
            3 => PipelineStage::Summarizing,
            4 => PipelineStage::Publishing,
            5 => PipelineStage::StateUpdate,
            6 => PipelineStage::Done,
            _ => PipelineStage::Failed,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineStage::Done | PipelineStage::Failed)
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Succeeded,
    Failed,
    /// Stopped at a stage boundary because the batch was shut down.
    Cancelled,
}

/// Where and why a pipeline stopped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageFailure {
    pub stage: PipelineStage,
    pub error: String,
}

/// Result of one repository's pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunOutcome {
    pub repo: RepoId,
    pub status: RunStatus,
    pub counts: ItemCounts,
    pub window: Option<TimeWindow>,
    pub summary_generated: bool,
    /// RunState moved to the window end.
    pub state_advanced: bool,
    /// Set when publishing succeeded but recording the run did not; the next
    /// incremental run will fetch this window again.
    pub state_error: Option<String>,
    pub failure: Option<StageFailure>,
    pub elapsed_ms: u64,
}

impl RunOutcome {
    pub fn failed(
        repo: RepoId,
        stage: PipelineStage,
        error: impl Into<String>,
        elapsed_ms: u64,
    ) -> Self {
        Self {
            repo,
            status: RunStatus::Failed,
            counts: ItemCounts::default(),
            window: None,
            summary_generated: false,
            state_advanced: false,
            state_error: None,
            failure: Some(StageFailure {
                stage,
                error: error.into(),
            }),
            elapsed_ms,
        }
    }

    pub fn cancelled(repo: RepoId, stage: PipelineStage, elapsed_ms: u64) -> Self {
        Self {
            status: RunStatus::Cancelled,
            failure: Some(StageFailure {
                stage,
                error: "cancelled".to_string(),
            }),
            ..Self::failed(repo, stage, "cancelled", elapsed_ms)
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Succeeded
    }

    /// Stage the pipeline stopped at, if it did not succeed.
    pub fn failed_stage(&self) -> Option<PipelineStage> {
        self.failure.as_ref().map(|f| f.stage)
    }
}

/// Everything `run_batch` produced. No overall success flag; callers inspect
/// outcomes per repository.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchReport {
    pub batch_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub elapsed_ms: u64,
    pub outcomes: Vec<RunOutcome>,
}

impl BatchReport {
    pub fn outcome_for(&self, repo: &RepoId) -> Option<&RunOutcome> {
        self.outcomes.iter().find(|o| &o.repo == repo)
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    pub fn succeeded(&self) -> usize {
        self.count(RunStatus::Succeeded)
    }

    pub fn failed(&self) -> usize {
        self.count(RunStatus::Failed)
    }

    pub fn cancelled(&self) -> usize {
        self.count(RunStatus::Cancelled)
    }

    /// Successful runs whose state write failed.
    pub fn state_write_failures(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| o.state_error.is_some())
            .count()
    }

    fn count(&self, status: RunStatus) -> usize {
        self.outcomes.iter().filter(|o| o.status == status).count()
    }
}
