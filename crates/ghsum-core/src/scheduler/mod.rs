//! Scheduler adapter: maps calendar triggers onto batch runs.
//!
//! Each repository's effective schedule is its own override, else the global
//! schedule, else none (never triggered automatically). Repositories whose
//! effective `(cron, timezone)` strings are identical form one
//! `ScheduleGroup`, and one firing runs the whole group as a single batch so
//! the repository budget applies across the cohort.

pub mod trigger;

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, Notify, RwLock};
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::config::{Config, RepositoryConfig};
use crate::domain::{BatchReport, ConfigError, RepoId};
use crate::obs::emit_schedule_fired;
use crate::shutdown::{self, ShutdownReceiver};

pub use trigger::CronTrigger;

/// Upper bound on one scheduler sleep, so wall-clock jumps are noticed.
const MAX_IDLE: Duration = Duration::from_secs(60);

/// Resolved schedule of one repository.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EffectiveSchedule {
    pub cron: String,
    pub timezone: String,
}

impl fmt::Display for EffectiveSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.cron, self.timezone)
    }
}

/// Per-repository override, else the global schedule, else `None`.
/// A missing timezone falls back to the config timezone, then UTC.
pub fn effective_schedule(repo: &RepositoryConfig, config: &Config) -> Option<EffectiveSchedule> {
    let chosen = repo.schedule.as_ref().or(config.schedule.as_ref())?;
    let timezone = chosen
        .timezone
        .clone()
        .or_else(|| config.timezone.clone())
        .unwrap_or_else(|| "UTC".to_string());
    Some(EffectiveSchedule {
        cron: chosen.cron.clone(),
        timezone,
    })
}

/// Grouping result before triggers and callbacks are attached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupPlan {
    pub schedule: EffectiveSchedule,
    pub repos: Vec<RepoId>,
}

/// Group scheduled repositories by identical effective schedule, in order of
/// first appearance. Unscheduled repositories are left out.
pub fn plan_groups(config: &Config) -> Result<Vec<GroupPlan>, ConfigError> {
    let mut plans: Vec<GroupPlan> = Vec::new();
    let mut index: HashMap<EffectiveSchedule, usize> = HashMap::new();
    for repo in &config.repositories {
        let id = RepoId::parse(&repo.name)?;
        let Some(schedule) = effective_schedule(repo, config) else {
            continue;
        };
        match index.get(&schedule) {
            Some(&i) => plans[i].repos.push(id),
            None => {
                index.insert(schedule.clone(), plans.len());
                plans.push(GroupPlan {
                    schedule,
                    repos: vec![id],
                });
            }
        }
    }
    Ok(plans)
}

/// Stable job id for a group.
pub fn group_job_id(repos: &[RepoId]) -> String {
    match repos {
        [single] => format!("repo_{single}"),
        _ => {
            let head: Vec<String> = repos.iter().take(3).map(RepoId::to_string).collect();
            let mut id = format!("grouped_repos_{}", head.join("_"));
            if repos.len() > 3 {
                id.push_str(&format!("_and_{}_more", repos.len() - 3));
            }
            id
        }
    }
}

/// Callback a group fires into. Implemented by the application service,
/// which resolves the repositories and calls `Orchestrator::run_batch`.
#[async_trait]
pub trait BatchRunner: Send + Sync {
    async fn run_group(&self, repos: &[RepoId]) -> anyhow::Result<BatchReport>;

    /// Adopt a new configuration before groups computed from it fire.
    async fn reload(&self, _config: &Config) -> Result<(), ConfigError> {
        Ok(())
    }
}

/// Repositories sharing one trigger, plus the callback that runs them.
pub struct ScheduleGroup {
    pub id: String,
    pub schedule: EffectiveSchedule,
    pub repos: Vec<RepoId>,
    trigger: CronTrigger,
    runner: Arc<dyn BatchRunner>,
}

impl fmt::Debug for ScheduleGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScheduleGroup")
            .field("id", &self.id)
            .field("schedule", &self.schedule)
            .field("repos", &self.repos)
            .finish()
    }
}

impl ScheduleGroup {
    pub fn trigger(&self) -> &CronTrigger {
        &self.trigger
    }

    pub fn next_after(&self, at: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.trigger.next_after(at)
    }

    /// Run the whole group as one batch.
    pub async fn fire(&self) -> anyhow::Result<BatchReport> {
        self.runner.run_group(&self.repos).await
    }
}

/// Compute groups and attach a compiled trigger and `runner` to each.
pub fn register_schedules(
    config: &Config,
    runner: Arc<dyn BatchRunner>,
) -> Result<Vec<ScheduleGroup>, ConfigError> {
    plan_groups(config)?
        .into_iter()
        .map(|plan| {
            let trigger = CronTrigger::parse(&plan.schedule.cron, &plan.schedule.timezone)?;
            Ok(ScheduleGroup {
                id: group_job_id(&plan.repos),
                schedule: plan.schedule,
                repos: plan.repos,
                trigger,
                runner: Arc::clone(&runner),
            })
        })
        .collect()
}

// ---------------------------------------------------------------------------
// ReportScheduler
// ---------------------------------------------------------------------------

/// Long-running loop that fires due groups.
///
/// A group whose previous firing is still running is skipped for that
/// occurrence rather than run twice concurrently.
pub struct ReportScheduler {
    runner: Arc<dyn BatchRunner>,
    groups: RwLock<Vec<Arc<ScheduleGroup>>>,
    in_flight: Arc<Mutex<HashSet<String>>>,
    reloaded: Notify,
}

impl ReportScheduler {
    pub fn new(runner: Arc<dyn BatchRunner>) -> Self {
        Self {
            runner,
            groups: RwLock::new(Vec::new()),
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            reloaded: Notify::new(),
        }
    }

    /// Hand `config` to the runner and replace all groups from it. Nothing
    /// changes if either step rejects the config. Returns the number of groups.
    pub async fn reload(&self, config: &Config) -> Result<usize, ConfigError> {
        let groups = register_schedules(config, Arc::clone(&self.runner))?;
        self.runner.reload(config).await?;
        for group in &groups {
            info!(
                event = "schedule.registered",
                group = %group.id,
                cron = %group.schedule.cron,
                timezone = %group.schedule.timezone,
                repos = group.repos.len(),
            );
        }
        if groups.is_empty() {
            warn!("no schedules configured");
        }
        let count = groups.len();
        *self.groups.write().await = groups.into_iter().map(Arc::new).collect();
        self.reloaded.notify_one();
        Ok(count)
    }

    pub async fn groups(&self) -> Vec<Arc<ScheduleGroup>> {
        self.groups.read().await.clone()
    }

    /// Earliest firing of any group strictly after `after`.
    pub async fn next_fire(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.groups
            .read()
            .await
            .iter()
            .filter_map(|g| g.next_after(after))
            .min()
    }

    /// Spawn every group with an occurrence in `(last_tick, now]` onto
    /// `tasks`. Returns the ids that were started.
    pub async fn fire_due(
        &self,
        last_tick: DateTime<Utc>,
        now: DateTime<Utc>,
        tasks: &mut JoinSet<()>,
    ) -> Vec<String> {
        let groups = self.groups().await;
        let mut started = Vec::new();
        for group in groups {
            let due = group.next_after(last_tick).is_some_and(|at| at <= now);
            if !due {
                continue;
            }
            if !self.in_flight.lock().await.insert(group.id.clone()) {
                warn!(group = %group.id, "previous run still in flight, skipping this occurrence");
                continue;
            }
            started.push(group.id.clone());
            let in_flight = Arc::clone(&self.in_flight);
            tasks.spawn(async move {
                match group.fire().await {
                    Ok(report) => emit_schedule_fired(&group.id, &report),
                    Err(e) => error!(group = %group.id, error = %e, "scheduled batch failed"),
                }
                in_flight.lock().await.remove(&group.id);
            });
        }
        started
    }

    /// Run until `shutdown` fires, then wait for in-flight groups. Their
    /// pipelines observe the same signal and stop at the next stage boundary.
    pub async fn run(&self, mut shutdown: ShutdownReceiver) {
        let mut tasks = JoinSet::new();
        let mut last_tick = Utc::now();
        info!(groups = self.groups.read().await.len(), "scheduler started");

        loop {
            if shutdown::is_triggered(&shutdown) {
                break;
            }
            let now = Utc::now();
            let wait = match self.next_fire(last_tick).await {
                Some(at) => (at - now).to_std().unwrap_or(Duration::ZERO).min(MAX_IDLE),
                None => MAX_IDLE,
            };

            tokio::select! {
                _ = shutdown::wait_for(&mut shutdown) => break,
                _ = self.reloaded.notified() => continue,
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(e) = joined {
                        error!(error = %e, "scheduled group task failed");
                    }
                    continue;
                }
                _ = tokio::time::sleep(wait) => {}
            }

            let now = Utc::now();
            self.fire_due(last_tick, now, &mut tasks).await;
            last_tick = now;
        }

        info!(in_flight = tasks.len(), "scheduler stopping, waiting for in-flight groups");
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "scheduled group task failed");
            }
        }
        info!("scheduler stopped");
    }
}
