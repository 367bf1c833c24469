//! Structured observability hooks for batch and pipeline lifecycle events.
//!
//! Spans carry the batch and repository identity; the `emit_*` functions log
//! one event each with a stable `event` field so log pipelines can key on it.

use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::domain::{BatchReport, PipelineStage, RepoId, RunOutcome, RunStatus};

/// Span covering one `run_batch` call.
pub fn batch_span(batch_id: &Uuid) -> tracing::Span {
    tracing::info_span!("ghsum.batch", batch_id = %batch_id)
}

/// Span covering one repository pipeline.
pub fn pipeline_span(repo: &RepoId) -> tracing::Span {
    tracing::info_span!("ghsum.pipeline", repo = %repo)
}

pub fn emit_batch_started(
    batch_id: &Uuid,
    repos: usize,
    max_concurrent_repos: usize,
    generator_budget: usize,
) {
    info!(
        event = "batch.started",
        batch_id = %batch_id,
        repos = repos,
        max_concurrent_repos = max_concurrent_repos,
        generator_budget = generator_budget,
    );
}

pub fn emit_batch_finished(report: &BatchReport) {
    info!(
        event = "batch.finished",
        batch_id = %report.batch_id,
        duration_ms = report.elapsed_ms,
        succeeded = report.succeeded(),
        failed = report.failed(),
        cancelled = report.cancelled(),
    );
}

pub fn emit_stage_entered(repo: &RepoId, stage: PipelineStage) {
    debug!(event = "pipeline.stage", repo = %repo, stage = %stage);
}

/// Success at info, failure and cancellation at warn.
pub fn emit_pipeline_finished(outcome: &RunOutcome) {
    match (&outcome.status, &outcome.failure) {
        (RunStatus::Succeeded, _) => info!(
            event = "pipeline.finished",
            repo = %outcome.repo,
            duration_ms = outcome.elapsed_ms,
            items = outcome.counts.total(),
            summary = outcome.summary_generated,
            state_advanced = outcome.state_advanced,
        ),
        (status, Some(failure)) => warn!(
            event = "pipeline.finished",
            repo = %outcome.repo,
            duration_ms = outcome.elapsed_ms,
            status = ?status,
            stage = %failure.stage,
            error = %failure.error,
        ),
        (status, None) => warn!(
            event = "pipeline.finished",
            repo = %outcome.repo,
            status = ?status,
        ),
    }
}

/// The pipeline published but its run could not be recorded: the next
/// incremental run will fetch the same window again.
pub fn emit_state_write_failed(repo: &RepoId, error: &dyn std::fmt::Display) {
    error!(
        event = "state.write_failed",
        repo = %repo,
        error = %error,
        "run state not advanced; next run will re-fetch this window"
    );
}

pub fn emit_schedule_fired(group_id: &str, report: &BatchReport) {
    info!(
        event = "schedule.fired",
        group = %group_id,
        batch_id = %report.batch_id,
        repos = report.len(),
        succeeded = report.succeeded(),
        failed = report.failed(),
    );
}
