//! RunState advancement rules across whole pipelines.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use ghsum_core::domain::{
    Commit, CommitFilters, FilterConfig, IncludeFlags, PullRequest, PullRequestFilters,
};
use ghsum_core::fakes::{RecordingGenerator, RecordingPublisher, ScriptedFetcher};
use ghsum_core::{
    Budgets, Orchestrator, OutputPublisher, PipelineDeps, PipelineSettings, PipelineStage, RepoId,
    RepositoryTarget, RunFlags, RunStateStore, RunStatus,
};
use ghsum_state::fakes::MemoryRunStateStore;
use ghsum_state::JsonRunStateStore;

fn repo() -> RepoId {
    RepoId::parse("octo/widgets").unwrap()
}

fn commit(sha: &str, author: &str, age: Duration) -> Commit {
    Commit {
        sha: sha.into(),
        author: Some(author.into()),
        message: format!("{sha} change"),
        date: Utc::now() - age,
        html_url: format!("https://github.com/octo/widgets/commit/{sha}"),
    }
}

fn pull_request(number: u64, created_age: Duration, updated_age: Duration) -> PullRequest {
    let now = Utc::now();
    PullRequest {
        number,
        title: format!("PR {number}"),
        body: None,
        author: Some("dev".into()),
        state: "OPEN".into(),
        created_at: now - created_age,
        updated_at: now - updated_age,
        merged_at: None,
        html_url: String::new(),
        labels: vec![],
    }
}

fn orchestrator(
    fetcher: &Arc<ScriptedFetcher>,
    generator: &Arc<RecordingGenerator>,
    publisher: Arc<dyn ghsum_core::Publisher>,
    state: Arc<dyn RunStateStore>,
) -> Orchestrator {
    Orchestrator::new(PipelineDeps {
        fetcher: fetcher.clone(),
        generator: Some(generator.clone()),
        publisher,
        state,
        settings: PipelineSettings::default(),
    })
}

fn t0() -> DateTime<Utc> {
    Utc::now() - Duration::days(2)
}

async fn run_once(orchestrator: &Orchestrator, target: RepositoryTarget) -> ghsum_core::RunOutcome {
    let mut report = orchestrator
        .run_batch(&[target], &Budgets::new(1, 1).unwrap(), RunFlags::default())
        .await
        .unwrap();
    report.outcomes.remove(0)
}

#[tokio::test]
async fn summarize_failure_leaves_state_unchanged() {
    let seeded = t0();
    let fetcher = Arc::new(ScriptedFetcher::new());
    fetcher.set_commits(&repo(), vec![commit("a1", "dev", Duration::hours(1))]);
    let generator = Arc::new(RecordingGenerator::new());
    generator.fail_for(&repo());
    let state = Arc::new(MemoryRunStateStore::new().with_entry("octo/widgets", seeded));
    let publisher = Arc::new(RecordingPublisher::new());

    let outcome = run_once(
        &orchestrator(&fetcher, &generator, publisher.clone(), state.clone()),
        RepositoryTarget::unfiltered(repo()),
    )
    .await;

    assert_eq!(outcome.failed_stage(), Some(PipelineStage::Summarizing));
    assert_eq!(state.peek("octo/widgets"), Some(seeded));
    assert!(publisher.records().is_empty());
}

#[tokio::test]
async fn publish_failure_leaves_state_unchanged() {
    let seeded = t0();
    let fetcher = Arc::new(ScriptedFetcher::new());
    fetcher.set_commits(&repo(), vec![commit("a1", "dev", Duration::hours(1))]);
    let generator = Arc::new(RecordingGenerator::new());
    let state = Arc::new(MemoryRunStateStore::new().with_entry("octo/widgets", seeded));
    let publisher = Arc::new(RecordingPublisher::new());
    publisher.fail_for(&repo());

    let outcome = run_once(
        &orchestrator(&fetcher, &generator, publisher, state.clone()),
        RepositoryTarget::unfiltered(repo()),
    )
    .await;

    assert_eq!(outcome.failed_stage(), Some(PipelineStage::Publishing));
    assert_eq!(generator.calls(), 1);
    assert_eq!(state.peek("octo/widgets"), Some(seeded));
}

#[tokio::test]
async fn partial_publish_fails_without_rollback() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("out");
    std::fs::create_dir_all(&out).unwrap();
    // A directory where the markdown file should go makes that write fail
    // after the json artifact is already on disk.
    std::fs::create_dir_all(out.join("octo_widgets_summary.md")).unwrap();

    let seeded = t0();
    let fetcher = Arc::new(ScriptedFetcher::new());
    fetcher.set_commits(&repo(), vec![commit("a1", "dev", Duration::hours(1))]);
    let generator = Arc::new(RecordingGenerator::new());
    let state = Arc::new(MemoryRunStateStore::new().with_entry("octo/widgets", seeded));
    let orchestrator = orchestrator(
        &fetcher,
        &generator,
        Arc::new(OutputPublisher::new(&out)),
        state.clone(),
    );

    let flags = RunFlags {
        persist_json: true,
        persist_markdown: true,
        ..RunFlags::default()
    };
    let report = orchestrator
        .run_batch(
            &[RepositoryTarget::unfiltered(repo())],
            &Budgets::new(1, 1).unwrap(),
            flags,
        )
        .await
        .unwrap();

    let outcome = &report.outcomes[0];
    assert_eq!(outcome.failed_stage(), Some(PipelineStage::Publishing));
    assert!(out.join("octo_widgets_summary.json").is_file());
    assert_eq!(state.peek("octo/widgets"), Some(seeded));
}

#[tokio::test]
async fn second_run_without_new_data_skips_generator() {
    let dir = tempfile::tempdir().unwrap();
    let state = Arc::new(JsonRunStateStore::new(dir.path().join("last_run.json")));
    let fetcher = Arc::new(ScriptedFetcher::new());
    fetcher.set_commits(&repo(), vec![commit("a1", "dev", Duration::hours(1))]);
    fetcher.set_pull_requests(&repo(), vec![pull_request(7, Duration::days(3), Duration::hours(2))]);
    let generator = Arc::new(RecordingGenerator::new());
    let orchestrator = orchestrator(
        &fetcher,
        &generator,
        Arc::new(RecordingPublisher::new()),
        state.clone(),
    );

    let first = run_once(&orchestrator, RepositoryTarget::unfiltered(repo())).await;
    assert!(first.is_success());
    assert_eq!(first.counts.total(), 2);
    assert_eq!(generator.calls(), 1);
    let recorded = state.get("octo/widgets").await.unwrap();
    assert_eq!(recorded, first.window.map(|w| w.end));

    let second = run_once(&orchestrator, RepositoryTarget::unfiltered(repo())).await;
    assert!(second.is_success());
    assert_eq!(second.counts.total(), 0);
    assert!(!second.summary_generated);
    assert_eq!(generator.calls(), 1);
    assert_eq!(second.window.unwrap().start, recorded.unwrap());
}

#[tokio::test]
async fn everything_filtered_out_is_a_success_without_summary() {
    let fetcher = Arc::new(ScriptedFetcher::new());
    fetcher.set_commits(
        &repo(),
        vec![
            commit("a1", "bot", Duration::hours(1)),
            commit("a2", "bot", Duration::hours(2)),
        ],
    );
    let generator = Arc::new(RecordingGenerator::new());
    let publisher = Arc::new(RecordingPublisher::new());
    let state = Arc::new(MemoryRunStateStore::new());

    let filters = FilterConfig {
        commits: CommitFilters {
            author: Some("human".into()),
            ..CommitFilters::default()
        },
        ..FilterConfig::default()
    };
    let target = RepositoryTarget::new(repo(), IncludeFlags::default(), filters).unwrap();

    let outcome = run_once(
        &orchestrator(&fetcher, &generator, publisher.clone(), state.clone()),
        target,
    )
    .await;

    assert_eq!(outcome.status, RunStatus::Succeeded);
    assert_eq!(outcome.counts.total(), 0);
    assert_eq!(generator.calls(), 0);
    assert!(outcome.state_advanced);
    assert_eq!(publisher.record_for(&repo()).unwrap().summary, None);
}

#[tokio::test]
async fn pull_request_date_basis_selects_timestamp() {
    let since = Utc::now() - Duration::days(1);
    // Old PR, recently updated.
    let pr = pull_request(1, Duration::days(10), Duration::hours(1));

    let mut by_created = FilterConfig::default();
    by_created.pull_requests = PullRequestFilters {
        since_filter_type: Some(ghsum_core::domain::DateBasis::Created),
        ..PullRequestFilters::default()
    };

    for (filters, expected) in [(FilterConfig::default(), 1), (by_created, 0)] {
        let fetcher = Arc::new(ScriptedFetcher::new());
        fetcher.set_pull_requests(&repo(), vec![pr.clone()]);
        let generator = Arc::new(RecordingGenerator::new());
        let state = Arc::new(MemoryRunStateStore::new().with_entry("octo/widgets", since));
        let target = RepositoryTarget::new(repo(), IncludeFlags::default(), filters).unwrap();

        let outcome = run_once(
            &orchestrator(&fetcher, &generator, Arc::new(RecordingPublisher::new()), state),
            target,
        )
        .await;

        assert_eq!(outcome.counts.pull_requests, expected);
    }
}

#[tokio::test]
async fn state_write_failure_is_reported_not_fatal() {
    let fetcher = Arc::new(ScriptedFetcher::new());
    fetcher.set_commits(&repo(), vec![commit("a1", "dev", Duration::hours(1))]);
    let generator = Arc::new(RecordingGenerator::new());
    let publisher = Arc::new(RecordingPublisher::new());
    let state = Arc::new(MemoryRunStateStore::new());
    state.reject_writes_for("octo/widgets");

    let report = orchestrator(&fetcher, &generator, publisher.clone(), state.clone())
        .run_batch(
            &[RepositoryTarget::unfiltered(repo())],
            &Budgets::new(1, 1).unwrap(),
            RunFlags::default(),
        )
        .await
        .unwrap();

    let outcome = &report.outcomes[0];
    assert!(outcome.is_success());
    assert!(!outcome.state_advanced);
    assert!(outcome.state_error.is_some());
    assert_eq!(report.state_write_failures(), 1);
    assert_eq!(publisher.records().len(), 1);
    assert_eq!(state.peek("octo/widgets"), None);
}

#[tokio::test]
async fn skip_summary_still_publishes_and_advances() {
    let fetcher = Arc::new(ScriptedFetcher::new());
    fetcher.set_commits(&repo(), vec![commit("a1", "dev", Duration::hours(1))]);
    let generator = Arc::new(RecordingGenerator::new());
    let publisher = Arc::new(RecordingPublisher::new());
    let state = Arc::new(MemoryRunStateStore::new());

    let flags = RunFlags {
        skip_summary: true,
        persist_json: true,
        ..RunFlags::default()
    };
    let report = orchestrator(&fetcher, &generator, publisher.clone(), state.clone())
        .run_batch(
            &[RepositoryTarget::unfiltered(repo())],
            &Budgets::new(1, 1).unwrap(),
            flags,
        )
        .await
        .unwrap();

    assert!(report.outcomes[0].is_success());
    assert_eq!(generator.calls(), 0);
    let record = publisher.record_for(&repo()).unwrap();
    assert!(record.flags.json);
    assert_eq!(record.counts.commits, 1);
    assert!(state.peek("octo/widgets").is_some());
}
