//! Repository pipeline: the per-repository unit of work.
//!
//! `PENDING -> FETCHING -> FILTERING -> SUMMARIZING (skippable) -> PUBLISHING
//! -> STATE_UPDATE -> DONE`, with `FAILED` reachable from any stage.
//!
//! RunState is only advanced after PUBLISHING succeeds. Shutdown is checked
//! at every stage boundary and a cancelled pipeline never touches RunState.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use ghsum_state::RunStateStore;
use tracing::{debug, warn};

use crate::collab::{
    ActivityFetcher, GeneratorBudget, PublishFlags, PublishRequest, Publisher, SummaryGenerator,
};
use crate::domain::{
    ActivityItems, ActivityPayload, FetchError, ItemCounts, ItemKind, PipelineStage,
    RepositoryTarget, RunOutcome, RunStatus, TimeWindow,
};
use crate::obs::{emit_pipeline_finished, emit_stage_entered, emit_state_write_failed};
use crate::shutdown::{self, ShutdownReceiver};

/// How the since-timestamp is chosen.
#[derive(Debug, Clone, Copy)]
pub struct PipelineSettings {
    /// Start from the last successful run and advance it afterwards.
    pub since_last_run: bool,
    /// Window length when there is no usable last run.
    pub fallback_lookback: chrono::Duration,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            since_last_run: true,
            fallback_lookback: chrono::Duration::days(7),
        }
    }
}

/// Run-mode flags for a batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunFlags {
    pub skip_summary: bool,
    pub persist_json: bool,
    pub persist_markdown: bool,
}

/// Collaborators shared by every pipeline of an orchestrator.
#[derive(Clone)]
pub struct PipelineDeps {
    pub fetcher: Arc<dyn ActivityFetcher>,
    /// `None` when no generator is configured; summarizing is then skipped.
    pub generator: Option<Arc<dyn SummaryGenerator>>,
    pub publisher: Arc<dyn Publisher>,
    pub state: Arc<dyn RunStateStore>,
    pub settings: PipelineSettings,
}

/// Current stage, readable from outside the pipeline future.
#[derive(Debug, Clone, Default)]
pub struct StageTracker(Arc<AtomicU8>);

impl StageTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enter(&self, stage: PipelineStage) {
        self.0.store(stage as u8, Ordering::SeqCst);
    }

    pub fn current(&self) -> PipelineStage {
        PipelineStage::from_u8(self.0.load(Ordering::SeqCst))
    }
}

enum Halt {
    Failed {
        stage: PipelineStage,
        error: String,
    },
    Cancelled {
        stage: PipelineStage,
    },
}

impl Halt {
    fn failed(stage: PipelineStage, error: impl std::fmt::Display) -> Self {
        Halt::Failed {
            stage,
            error: error.to_string(),
        }
    }
}

struct Completed {
    window: TimeWindow,
    counts: ItemCounts,
    summary_generated: bool,
    state_advanced: bool,
    state_error: Option<String>,
}

pub struct RepositoryPipeline {
    deps: PipelineDeps,
    target: RepositoryTarget,
    flags: RunFlags,
    generator_budget: GeneratorBudget,
    shutdown: ShutdownReceiver,
    tracker: StageTracker,
}

impl RepositoryPipeline {
    pub fn new(
        deps: PipelineDeps,
        target: RepositoryTarget,
        flags: RunFlags,
        generator_budget: GeneratorBudget,
        shutdown: ShutdownReceiver,
    ) -> Self {
        Self {
            deps,
            target,
            flags,
            generator_budget,
            shutdown,
            tracker: StageTracker::new(),
        }
    }

    pub fn tracker(&self) -> StageTracker {
        self.tracker.clone()
    }

    /// Run to completion. Never fails; every error ends up in the outcome.
    pub async fn run(self) -> RunOutcome {
        let started = Instant::now();
        let result = self.execute().await;
        let elapsed_ms = started.elapsed().as_millis() as u64;
        let repo = self.target.id.clone();

        let outcome = match result {
            Ok(done) => RunOutcome {
                repo,
                status: RunStatus::Succeeded,
                counts: done.counts,
                window: Some(done.window),
                summary_generated: done.summary_generated,
                state_advanced: done.state_advanced,
                state_error: done.state_error,
                failure: None,
                elapsed_ms,
            },
            Err(Halt::Failed { stage, error }) => {
                self.tracker.enter(PipelineStage::Failed);
                RunOutcome::failed(repo, stage, error, elapsed_ms)
            }
            Err(Halt::Cancelled { stage }) => RunOutcome::cancelled(repo, stage, elapsed_ms),
        };
        emit_pipeline_finished(&outcome);
        outcome
    }

    async fn execute(&self) -> Result<Completed, Halt> {
        self.checkpoint(PipelineStage::Pending)?;
        let window = self.determine_window().await;

        self.checkpoint(PipelineStage::Fetching)?;
        let mut payload = self
            .fetch_all(window)
            .await
            .map_err(|e| Halt::failed(PipelineStage::Fetching, e))?;

        self.checkpoint(PipelineStage::Filtering)?;
        let fetched = payload.counts().total();
        self.target.rules.apply(&mut payload);
        let counts = payload.counts();
        debug!(fetched, kept = counts.total(), "filters applied");

        let summary = self.summarize(&payload).await?;

        self.checkpoint(PipelineStage::Publishing)?;
        let request = PublishRequest {
            payload: &payload,
            summary: summary.as_deref(),
            flags: PublishFlags {
                json: self.flags.persist_json,
                markdown: self.flags.persist_markdown,
            },
            completed_at: Utc::now(),
        };
        let receipt = self
            .deps
            .publisher
            .publish(request)
            .await
            .map_err(|e| Halt::failed(PipelineStage::Publishing, e))?;
        debug!(artifacts = receipt.written.len(), "published");

        let (state_advanced, state_error) = if self.deps.settings.since_last_run {
            self.checkpoint(PipelineStage::StateUpdate)?;
            self.record_success(window.end).await
        } else {
            (false, None)
        };

        self.tracker.enter(PipelineStage::Done);
        Ok(Completed {
            window,
            counts,
            summary_generated: summary.is_some(),
            state_advanced,
            state_error,
        })
    }

    /// Stage boundary: stop here if shutdown was signalled, else enter `stage`.
    fn checkpoint(&self, stage: PipelineStage) -> Result<(), Halt> {
        if shutdown::is_triggered(&self.shutdown) {
            return Err(Halt::Cancelled { stage });
        }
        self.tracker.enter(stage);
        emit_stage_entered(&self.target.id, stage);
        Ok(())
    }

    async fn determine_window(&self) -> TimeWindow {
        let now = Utc::now();
        let fallback = now
            .checked_sub_signed(self.deps.settings.fallback_lookback)
            .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);
        if !self.deps.settings.since_last_run {
            return TimeWindow {
                start: fallback,
                end: now,
            };
        }

        let start = match self.deps.state.get(&self.target.id.to_string()).await {
            Ok(Some(last)) => last.min(now),
            Ok(None) => fallback,
            Err(e) => {
                warn!(error = %e, "run state unreadable, using fallback lookback");
                fallback
            }
        };
        TimeWindow { start, end: now }
    }

    async fn fetch_kind(
        &self,
        kind: ItemKind,
        since: DateTime<Utc>,
    ) -> Result<ActivityItems, FetchError> {
        if !self.target.include.enabled(kind) {
            return Ok(ActivityItems::empty(kind));
        }
        let items = self
            .deps
            .fetcher
            .fetch(&self.target.id, kind, since, &self.target.filters)
            .await?;
        debug!(kind = %kind, count = items.len(), "fetched");
        Ok(items)
    }

    /// Fetch every enabled kind concurrently; the first error wins.
    async fn fetch_all(&self, window: TimeWindow) -> Result<ActivityPayload, FetchError> {
        let since = window.start;
        let (commits, pull_requests, issues, discussions) = tokio::try_join!(
            self.fetch_kind(ItemKind::Commits, since),
            self.fetch_kind(ItemKind::PullRequests, since),
            self.fetch_kind(ItemKind::Issues, since),
            self.fetch_kind(ItemKind::Discussions, since),
        )?;

        let mut payload = ActivityPayload::empty(self.target.id.clone(), window);
        payload.commits = commits
            .into_commits()
            .ok_or_else(|| mismatch(ItemKind::Commits))?;
        payload.pull_requests = pull_requests
            .into_pull_requests()
            .ok_or_else(|| mismatch(ItemKind::PullRequests))?;
        payload.issues = issues
            .into_issues()
            .ok_or_else(|| mismatch(ItemKind::Issues))?;
        payload.discussions = discussions
            .into_discussions()
            .ok_or_else(|| mismatch(ItemKind::Discussions))?;
        Ok(payload)
    }

    /// SUMMARIZING, unless disabled, unconfigured, or the payload is empty.
    async fn summarize(&self, payload: &ActivityPayload) -> Result<Option<String>, Halt> {
        let generator = match &self.deps.generator {
            Some(generator) if !self.flags.skip_summary => generator,
            _ => return Ok(None),
        };
        if payload.is_empty() {
            debug!("nothing left after filtering, skipping summary");
            return Ok(None);
        }

        self.checkpoint(PipelineStage::Summarizing)?;
        let mut shutdown = self.shutdown.clone();
        let permit = tokio::select! {
            biased;
            _ = shutdown::wait_for(&mut shutdown) => {
                return Err(Halt::Cancelled { stage: PipelineStage::Summarizing });
            }
            permit = self.generator_budget.acquire() => permit,
        };
        let result = generator.summarize(payload).await;
        drop(permit);

        result
            .map(Some)
            .map_err(|e| Halt::failed(PipelineStage::Summarizing, e))
    }

    async fn record_success(&self, at: DateTime<Utc>) -> (bool, Option<String>) {
        match self.deps.state.set(&self.target.id.to_string(), at).await {
            Ok(()) => (true, None),
            Err(e) => {
                emit_state_write_failed(&self.target.id, &e);
                (false, Some(e.to_string()))
            }
        }
    }
}

fn mismatch(kind: ItemKind) -> FetchError {
    FetchError::Decode(format!("fetcher returned the wrong item type for {kind}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Commit, RepoId};
    use crate::fakes::{RecordingGenerator, RecordingPublisher, ScriptedFetcher};
    use chrono::Duration;
    use ghsum_state::fakes::MemoryRunStateStore;

    fn deps(
        fetcher: Arc<ScriptedFetcher>,
        generator: Arc<RecordingGenerator>,
        publisher: Arc<RecordingPublisher>,
        state: Arc<MemoryRunStateStore>,
    ) -> PipelineDeps {
        PipelineDeps {
            fetcher,
            generator: Some(generator),
            publisher,
            state,
            settings: PipelineSettings::default(),
        }
    }

    fn commit(sha: &str, age: Duration) -> Commit {
        Commit {
            sha: sha.to_string(),
            author: Some("ann".into()),
            message: format!("commit {sha}"),
            date: Utc::now() - age,
            html_url: String::new(),
        }
    }

    #[tokio::test]
    async fn disabled_kinds_are_not_fetched() {
        let repo = RepoId::parse("o/r").unwrap();
        let fetcher = Arc::new(ScriptedFetcher::new());
        fetcher.set_commits(&repo, vec![commit("a", Duration::hours(1))]);
        let generator = Arc::new(RecordingGenerator::new());
        let publisher = Arc::new(RecordingPublisher::new());
        let state = Arc::new(MemoryRunStateStore::new());

        let target = RepositoryTarget::unfiltered(repo.clone())
            .with_include(crate::domain::IncludeFlags::only(&[ItemKind::Commits]));
        let outcome = RepositoryPipeline::new(
            deps(fetcher.clone(), generator.clone(), publisher.clone(), state.clone()),
            target,
            RunFlags::default(),
            GeneratorBudget::new(1).unwrap(),
            shutdown::never(),
        )
        .run()
        .await;

        assert!(outcome.is_success());
        assert_eq!(fetcher.calls_for(&repo), 1);
        assert_eq!(outcome.counts.commits, 1);
        assert!(outcome.summary_generated);
        assert!(outcome.state_advanced);
        assert_eq!(state.peek("o/r"), outcome.window.map(|w| w.end));
    }

    #[tokio::test]
    async fn window_starts_at_last_run() {
        let repo = RepoId::parse("o/r").unwrap();
        let last = Utc::now() - Duration::hours(3);
        let fetcher = Arc::new(ScriptedFetcher::new());
        let state = Arc::new(MemoryRunStateStore::new().with_entry("o/r", last));

        let outcome = RepositoryPipeline::new(
            deps(
                fetcher.clone(),
                Arc::new(RecordingGenerator::new()),
                Arc::new(RecordingPublisher::new()),
                state,
            ),
            RepositoryTarget::unfiltered(repo.clone()),
            RunFlags::default(),
            GeneratorBudget::new(1).unwrap(),
            shutdown::never(),
        )
        .run()
        .await;

        assert_eq!(outcome.window.unwrap().start, last);
        assert!(fetcher.since_seen(&repo).iter().all(|s| *s == last));
    }

    #[tokio::test]
    async fn fallback_lookback_without_state() {
        let repo = RepoId::parse("o/r").unwrap();
        let mut d = deps(
            Arc::new(ScriptedFetcher::new()),
            Arc::new(RecordingGenerator::new()),
            Arc::new(RecordingPublisher::new()),
            Arc::new(MemoryRunStateStore::new()),
        );
        d.settings.fallback_lookback = Duration::days(2);

        let outcome = RepositoryPipeline::new(
            d,
            RepositoryTarget::unfiltered(repo),
            RunFlags::default(),
            GeneratorBudget::new(1).unwrap(),
            shutdown::never(),
        )
        .run()
        .await;

        let window = outcome.window.unwrap();
        assert_eq!(window.end - window.start, Duration::days(2));
    }

    #[tokio::test]
    async fn out_of_range_lookback_clamps_to_epoch() {
        let repo = RepoId::parse("o/r").unwrap();
        let mut d = deps(
            Arc::new(ScriptedFetcher::new()),
            Arc::new(RecordingGenerator::new()),
            Arc::new(RecordingPublisher::new()),
            Arc::new(MemoryRunStateStore::new()),
        );
        d.settings.fallback_lookback = Duration::days(1_000_000_000);

        let outcome = RepositoryPipeline::new(
            d,
            RepositoryTarget::unfiltered(repo),
            RunFlags::default(),
            GeneratorBudget::new(1).unwrap(),
            shutdown::never(),
        )
        .run()
        .await;

        assert!(outcome.is_success());
        assert_eq!(outcome.window.unwrap().start, DateTime::<Utc>::UNIX_EPOCH);
    }

    #[tokio::test]
    async fn since_last_run_disabled_leaves_state_alone() {
        let repo = RepoId::parse("o/r").unwrap();
        let state = Arc::new(MemoryRunStateStore::new());
        let mut d = deps(
            Arc::new(ScriptedFetcher::new()),
            Arc::new(RecordingGenerator::new()),
            Arc::new(RecordingPublisher::new()),
            state.clone(),
        );
        d.settings.since_last_run = false;

        let outcome = RepositoryPipeline::new(
            d,
            RepositoryTarget::unfiltered(repo),
            RunFlags::default(),
            GeneratorBudget::new(1).unwrap(),
            shutdown::never(),
        )
        .run()
        .await;

        assert!(outcome.is_success());
        assert!(!outcome.state_advanced);
        assert_eq!(state.set_calls(), 0);
    }

    #[tokio::test]
    async fn cancelled_before_start_touches_nothing() {
        let repo = RepoId::parse("o/r").unwrap();
        let fetcher = Arc::new(ScriptedFetcher::new());
        let state = Arc::new(MemoryRunStateStore::new());
        let (tx, rx) = shutdown::channel();
        tx.send(true).unwrap();

        let outcome = RepositoryPipeline::new(
            deps(
                fetcher.clone(),
                Arc::new(RecordingGenerator::new()),
                Arc::new(RecordingPublisher::new()),
                state.clone(),
            ),
            RepositoryTarget::unfiltered(repo.clone()),
            RunFlags::default(),
            GeneratorBudget::new(1).unwrap(),
            rx,
        )
        .run()
        .await;

        assert_eq!(outcome.status, RunStatus::Cancelled);
        assert_eq!(outcome.failed_stage(), Some(PipelineStage::Pending));
        assert_eq!(fetcher.calls_for(&repo), 0);
        assert_eq!(state.set_calls(), 0);
    }

    #[tokio::test]
    async fn wrong_item_type_is_a_fetch_failure() {
        let repo = RepoId::parse("o/r").unwrap();
        let fetcher = Arc::new(ScriptedFetcher::new());
        fetcher.answer_with_wrong_kind(&repo);

        let outcome = RepositoryPipeline::new(
            deps(
                fetcher,
                Arc::new(RecordingGenerator::new()),
                Arc::new(RecordingPublisher::new()),
                Arc::new(MemoryRunStateStore::new()),
            ),
            RepositoryTarget::unfiltered(repo),
            RunFlags::default(),
            GeneratorBudget::new(1).unwrap(),
            shutdown::never(),
        )
        .run()
        .await;

        assert_eq!(outcome.failed_stage(), Some(PipelineStage::Fetching));
        assert!(outcome.failure.unwrap().error.contains("wrong item type"));
    }
}
