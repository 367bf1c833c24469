//! Schedule grouping and the scheduler's firing rules.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use ghsum_core::config::{Config, RepositoryConfig, ScheduleConfig};
use ghsum_core::fakes::{RecordingGenerator, RecordingPublisher, ScriptedFetcher};
use ghsum_core::scheduler::{register_schedules, BatchRunner, ReportScheduler};
use ghsum_core::{BatchReport, PipelineDeps, PipelineSettings, RepoId, ReportService};
use ghsum_state::fakes::MemoryRunStateStore;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// Runner whose batches block until released.
struct GatedRunner {
    calls: AtomicUsize,
    gate: Semaphore,
}

impl GatedRunner {
    fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            gate: Semaphore::new(0),
        }
    }
}

#[async_trait]
impl BatchRunner for GatedRunner {
    async fn run_group(&self, _repos: &[RepoId]) -> anyhow::Result<BatchReport> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let _permit = self.gate.acquire().await?;
        Ok(BatchReport {
            batch_id: uuid::Uuid::new_v4(),
            started_at: Utc::now(),
            elapsed_ms: 0,
            outcomes: Vec::new(),
        })
    }
}

fn schedule(cron: &str) -> Option<ScheduleConfig> {
    Some(ScheduleConfig {
        cron: cron.to_string(),
        timezone: None,
    })
}

fn three_repo_config() -> Config {
    let mut config = Config::default();
    config.schedule = schedule("0 6 * * *");
    let mut third = RepositoryConfig::new("octo/three");
    third.schedule = schedule("30 18 * * 1-5");
    config.repositories = vec![
        RepositoryConfig::new("octo/one"),
        RepositoryConfig::new("octo/two"),
        third,
    ];
    config
}

#[test]
fn identical_schedules_share_a_group() {
    let runner: Arc<dyn BatchRunner> = Arc::new(GatedRunner::new());
    let groups = register_schedules(&three_repo_config(), runner).unwrap();

    assert_eq!(groups.len(), 2);
    let names: Vec<String> = groups[0].repos.iter().map(RepoId::to_string).collect();
    assert_eq!(names, vec!["octo/one", "octo/two"]);
    assert_eq!(groups[0].id, "grouped_repos_octo/one_octo/two");
    assert_eq!(groups[1].repos.len(), 1);
    assert_eq!(groups[1].id, "repo_octo/three");
    assert_eq!(groups[1].schedule.cron, "30 18 * * 1-5");
}

#[test]
fn unscheduled_repositories_are_left_out() {
    let mut config = three_repo_config();
    config.schedule = None;
    let groups = register_schedules(&config, Arc::new(GatedRunner::new())).unwrap();
    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0].repos[0].to_string(), "octo/three");
}

#[tokio::test]
async fn reload_replaces_groups() {
    let scheduler = ReportScheduler::new(Arc::new(GatedRunner::new()));
    assert_eq!(scheduler.reload(&three_repo_config()).await.unwrap(), 2);

    let mut config = three_repo_config();
    config.repositories.truncate(2);
    assert_eq!(scheduler.reload(&config).await.unwrap(), 1);
    assert_eq!(scheduler.groups().await[0].repos.len(), 2);
}

#[tokio::test]
async fn next_fire_is_earliest_group() {
    let scheduler = ReportScheduler::new(Arc::new(GatedRunner::new()));
    scheduler.reload(&three_repo_config()).await.unwrap();

    // Monday 2025-06-02 07:00 UTC: the daily 06:00 is past, 18:30 is next.
    let after = Utc.with_ymd_and_hms(2025, 6, 2, 7, 0, 0).unwrap();
    assert_eq!(
        scheduler.next_fire(after).await,
        Some(Utc.with_ymd_and_hms(2025, 6, 2, 18, 30, 0).unwrap())
    );
}

#[tokio::test]
async fn in_flight_group_is_skipped() {
    let runner = Arc::new(GatedRunner::new());
    let scheduler = ReportScheduler::new(runner.clone());
    scheduler.reload(&three_repo_config()).await.unwrap();

    let mut tasks = JoinSet::new();
    let before = Utc.with_ymd_and_hms(2025, 6, 2, 5, 59, 0).unwrap();
    let at_six = Utc.with_ymd_and_hms(2025, 6, 2, 6, 0, 0).unwrap();

    let started = scheduler.fire_due(before, at_six, &mut tasks).await;
    assert_eq!(started, vec!["grouped_repos_octo/one_octo/two".to_string()]);
    tokio::task::yield_now().await;

    // Next day's occurrence while the first batch is still blocked.
    let next_before = Utc.with_ymd_and_hms(2025, 6, 3, 5, 59, 0).unwrap();
    let next_six = Utc.with_ymd_and_hms(2025, 6, 3, 6, 0, 0).unwrap();
    let started = scheduler.fire_due(next_before, next_six, &mut tasks).await;
    assert!(started.is_empty());

    runner.gate.add_permits(1);
    while let Some(joined) = tasks.join_next().await {
        joined.unwrap();
    }
    assert_eq!(runner.calls.load(Ordering::SeqCst), 1);

    let started = scheduler.fire_due(next_before, next_six, &mut tasks).await;
    assert_eq!(started.len(), 1);
    runner.gate.add_permits(1);
    while tasks.join_next().await.is_some() {}
    assert_eq!(runner.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn reload_reaches_the_service_before_groups_fire() {
    let mut config = Config::default();
    config.schedule = schedule("0 6 * * *");
    config.repositories = vec![RepositoryConfig::new("a/one")];

    let fetcher = Arc::new(ScriptedFetcher::new());
    let deps = PipelineDeps {
        fetcher: fetcher.clone(),
        generator: Some(Arc::new(RecordingGenerator::new())),
        publisher: Arc::new(RecordingPublisher::new()),
        state: Arc::new(MemoryRunStateStore::new()),
        settings: PipelineSettings::default(),
    };
    let service = Arc::new(ReportService::new(config.clone(), deps).unwrap());
    let scheduler = ReportScheduler::new(service.clone());
    scheduler.reload(&config).await.unwrap();

    config.repositories.push(RepositoryConfig::new("b/two"));
    assert_eq!(scheduler.reload(&config).await.unwrap(), 1);
    assert_eq!(service.config().await.repositories.len(), 2);

    let report = scheduler.groups().await[0].fire().await.unwrap();
    assert_eq!(report.len(), 2);
    assert!(report.outcomes.iter().all(|o| o.is_success()));
    assert!(fetcher.calls_for(&RepoId::parse("b/two").unwrap()) > 0);
}

#[tokio::test]
async fn rejected_reload_keeps_groups_and_service_config() {
    let mut config = Config::default();
    config.schedule = schedule("0 6 * * *");
    config.repositories = vec![RepositoryConfig::new("a/one")];
    let deps = PipelineDeps {
        fetcher: Arc::new(ScriptedFetcher::new()),
        generator: None,
        publisher: Arc::new(RecordingPublisher::new()),
        state: Arc::new(MemoryRunStateStore::new()),
        settings: PipelineSettings::default(),
    };
    let service = Arc::new(ReportService::new(config.clone(), deps).unwrap());
    let scheduler = ReportScheduler::new(service.clone());
    scheduler.reload(&config).await.unwrap();

    let mut broken = config.clone();
    broken.repositories.push(RepositoryConfig::new("b/two"));
    broken.fallback_lookback_days = 0;
    assert!(scheduler.reload(&broken).await.is_err());
    assert_eq!(scheduler.groups().await[0].repos.len(), 1);
    assert_eq!(service.config().await.repositories.len(), 1);
}
