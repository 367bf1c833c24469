//! Batch-level behaviour of `Orchestrator::run_batch`: completeness, budgets,
//! failure isolation and cancellation.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use ghsum_core::domain::Commit;
use ghsum_core::fakes::{RecordingGenerator, RecordingPublisher, ScriptedFetcher};
use ghsum_core::shutdown;
use ghsum_core::{
    Budgets, FetchError, Orchestrator, PipelineDeps, PipelineSettings, PipelineStage, RepoId,
    RepositoryTarget, RunFlags, RunStatus,
};
use ghsum_state::fakes::MemoryRunStateStore;

struct Harness {
    fetcher: Arc<ScriptedFetcher>,
    generator: Arc<RecordingGenerator>,
    publisher: Arc<RecordingPublisher>,
    state: Arc<MemoryRunStateStore>,
}

impl Harness {
    fn new(fetcher: ScriptedFetcher, generator: RecordingGenerator) -> Self {
        Self {
            fetcher: Arc::new(fetcher),
            generator: Arc::new(generator),
            publisher: Arc::new(RecordingPublisher::new()),
            state: Arc::new(MemoryRunStateStore::new()),
        }
    }

    fn orchestrator(&self) -> Orchestrator {
        Orchestrator::new(PipelineDeps {
            fetcher: self.fetcher.clone(),
            generator: Some(self.generator.clone()),
            publisher: self.publisher.clone(),
            state: self.state.clone(),
            settings: PipelineSettings::default(),
        })
    }

    fn give_commit(&self, repo: &RepoId) {
        self.fetcher.set_commits(
            repo,
            vec![Commit {
                sha: format!("{}-1", repo.name()),
                author: Some("dev".into()),
                message: "change".into(),
                date: Utc::now() - chrono::Duration::hours(1),
                html_url: String::new(),
            }],
        );
    }
}

fn repos(n: usize) -> Vec<RepoId> {
    (0..n)
        .map(|i| RepoId::parse(&format!("fleet/repo{i}")).unwrap())
        .collect()
}

fn targets(ids: &[RepoId]) -> Vec<RepositoryTarget> {
    ids.iter().cloned().map(RepositoryTarget::unfiltered).collect()
}

#[tokio::test]
async fn one_outcome_per_distinct_repository() {
    let h = Harness::new(ScriptedFetcher::new(), RecordingGenerator::new());
    let ids = repos(6);
    h.fetcher
        .fail_for(&ids[1], FetchError::Network("connection reset".into()));
    h.generator.fail_for(&ids[2]);
    h.give_commit(&ids[2]);
    h.publisher.fail_for(&ids[3]);

    let mut input = targets(&ids);
    input.push(RepositoryTarget::unfiltered(ids[0].clone()));

    let report = h
        .orchestrator()
        .run_batch(&input, &Budgets::new(2, 1).unwrap(), RunFlags::default())
        .await
        .unwrap();

    assert_eq!(report.len(), ids.len());
    let seen: HashSet<_> = report.outcomes.iter().map(|o| o.repo.clone()).collect();
    assert_eq!(seen.len(), ids.len());
    assert_eq!(report.failed(), 3);
    assert_eq!(report.succeeded(), 3);
    assert_eq!(
        report.outcome_for(&ids[2]).unwrap().failed_stage(),
        Some(PipelineStage::Summarizing)
    );
    assert_eq!(
        report.outcome_for(&ids[3]).unwrap().failed_stage(),
        Some(PipelineStage::Publishing)
    );
}

#[tokio::test(start_paused = true)]
async fn repository_budget_bounds_active_pipelines() {
    let h = Harness::new(
        ScriptedFetcher::new().with_delay(Duration::from_millis(50)),
        RecordingGenerator::new(),
    );
    let ids = repos(10);

    let report = h
        .orchestrator()
        .run_batch(&targets(&ids), &Budgets::new(3, 3).unwrap(), RunFlags::default())
        .await
        .unwrap();

    assert_eq!(report.succeeded(), 10);
    assert_eq!(h.fetcher.max_concurrent_repos(), 3);
}

#[tokio::test(start_paused = true)]
async fn generator_budget_is_independent_of_repository_budget() {
    let h = Harness::new(
        ScriptedFetcher::new().with_delay(Duration::from_millis(5)),
        RecordingGenerator::new().with_delay(Duration::from_millis(100)),
    );
    let ids = repos(8);
    for id in &ids {
        h.give_commit(id);
    }

    let report = h
        .orchestrator()
        .run_batch(&targets(&ids), &Budgets::new(8, 2).unwrap(), RunFlags::default())
        .await
        .unwrap();

    assert_eq!(report.succeeded(), 8);
    assert_eq!(h.generator.calls(), 8);
    assert_eq!(h.generator.max_in_flight(), 2);
    assert_eq!(h.fetcher.max_concurrent_repos(), 8);
}

#[tokio::test]
async fn rate_limited_repository_does_not_affect_sibling() {
    let h = Harness::new(ScriptedFetcher::new(), RecordingGenerator::new());
    let a = RepoId::parse("octo/a").unwrap();
    let b = RepoId::parse("octo/b").unwrap();
    h.fetcher
        .fail_for(&a, FetchError::RateLimited { reset_at: None });
    h.give_commit(&b);

    let report = h
        .orchestrator()
        .run_batch(
            &targets(&[a.clone(), b.clone()]),
            &Budgets::new(4, 3).unwrap(),
            RunFlags::default(),
        )
        .await
        .unwrap();

    let failed = report.outcome_for(&a).unwrap();
    assert_eq!(failed.status, RunStatus::Failed);
    assert_eq!(failed.failed_stage(), Some(PipelineStage::Fetching));
    assert!(failed.failure.as_ref().unwrap().error.contains("rate limit"));
    assert!(report.outcome_for(&b).unwrap().is_success());
    assert!(h.state.peek("octo/a").is_none());
    assert!(h.state.peek("octo/b").is_some());
}

#[tokio::test]
async fn panicking_pipeline_becomes_a_failure_outcome() {
    let h = Harness::new(ScriptedFetcher::new(), RecordingGenerator::new());
    let a = RepoId::parse("octo/boom").unwrap();
    let b = RepoId::parse("octo/fine").unwrap();
    h.fetcher.panic_for(&a);

    let report = h
        .orchestrator()
        .run_batch(
            &targets(&[a.clone(), b.clone()]),
            &Budgets::new(2, 1).unwrap(),
            RunFlags::default(),
        )
        .await
        .unwrap();

    let failed = report.outcome_for(&a).unwrap();
    assert_eq!(failed.failed_stage(), Some(PipelineStage::Fetching));
    assert!(failed.failure.as_ref().unwrap().error.starts_with("panic:"));
    assert!(report.outcome_for(&b).unwrap().is_success());
    assert_eq!(report.outcomes[0].repo, a);
}

#[tokio::test]
async fn zero_repository_budget_rejects_batch() {
    let h = Harness::new(ScriptedFetcher::new(), RecordingGenerator::new());
    let budgets = Budgets {
        max_concurrent_repos: 0,
        generator: ghsum_core::GeneratorBudget::new(1).unwrap(),
    };

    let result = h
        .orchestrator()
        .run_batch(&targets(&repos(2)), &budgets, RunFlags::default())
        .await;

    assert!(result.is_err());
    assert_eq!(h.fetcher.total_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn shutdown_stops_pipelines_at_stage_boundary() {
    let h = Harness::new(
        ScriptedFetcher::new().with_delay(Duration::from_secs(10)),
        RecordingGenerator::new(),
    );
    let ids = repos(3);
    let (tx, rx) = shutdown::channel();
    let orchestrator = h.orchestrator().with_shutdown(rx);
    let budgets = Budgets::new(1, 1).unwrap();
    let input = targets(&ids);

    let (report, _) = tokio::join!(
        orchestrator.run_batch(&input, &budgets, RunFlags::default()),
        async {
            tokio::time::sleep(Duration::from_secs(1)).await;
            tx.send(true).unwrap();
        }
    );
    let report = report.unwrap();

    assert_eq!(report.len(), 3);
    assert_eq!(report.cancelled(), 3);
    let started: Vec<_> = report
        .outcomes
        .iter()
        .filter(|o| o.failed_stage() == Some(PipelineStage::Filtering))
        .collect();
    assert_eq!(started.len(), 1);
    assert_eq!(h.state.set_calls(), 0);
    assert!(h.publisher.records().is_empty());
}
