//! Application service: configuration plus orchestrator, shared by the CLI
//! and the scheduler.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::config::Config;
use crate::domain::{BatchReport, ConfigError, RepoId, RepositoryTarget};
use crate::orchestrator::{Budgets, Orchestrator};
use crate::pipeline::{PipelineDeps, PipelineSettings, RunFlags};
use crate::scheduler::BatchRunner;
use crate::shutdown::ShutdownReceiver;

/// Environment override for the repository budget.
pub const CONCURRENT_REPOS_ENV: &str = "GHSUM_CONCURRENT_REPOS";

impl From<&Config> for PipelineSettings {
    fn from(config: &Config) -> Self {
        Self {
            since_last_run: config.since_last_run,
            fallback_lookback: config.fallback_lookback(),
        }
    }
}

/// Configuration and the orchestrator built from it, swapped as one unit.
struct Loaded {
    config: Arc<Config>,
    orchestrator: Orchestrator,
}

pub struct ReportService {
    loaded: RwLock<Arc<Loaded>>,
    budgets: Budgets,
}

impl ReportService {
    /// `deps.settings` is replaced by the values from `config`.
    pub fn new(config: Config, mut deps: PipelineDeps) -> Result<Self, ConfigError> {
        let budgets = Budgets::new(
            config.performance.max_concurrent_repos,
            config.performance.max_concurrent_llm,
        )?;
        deps.settings = PipelineSettings::from(&config);
        Ok(Self {
            loaded: RwLock::new(Arc::new(Loaded {
                config: Arc::new(config),
                orchestrator: Orchestrator::new(deps),
            })),
            budgets,
        })
    }

    pub fn with_shutdown(mut self, shutdown: ShutdownReceiver) -> Self {
        let loaded = self.loaded.get_mut();
        let orchestrator =
            Orchestrator::new(loaded.orchestrator.deps().clone()).with_shutdown(shutdown);
        *loaded = Arc::new(Loaded {
            config: Arc::clone(&loaded.config),
            orchestrator,
        });
        self
    }

    async fn loaded(&self) -> Arc<Loaded> {
        Arc::clone(&*self.loaded.read().await)
    }

    pub async fn config(&self) -> Arc<Config> {
        Arc::clone(&self.loaded().await.config)
    }

    /// Validate and swap in a new configuration together with the pipeline
    /// settings derived from it. Batches already running finish on the old
    /// one. The generator budget is process-wide and is kept.
    pub async fn reload(&self, config: Config) -> Result<(), ConfigError> {
        config.validate()?;
        if config.performance.max_concurrent_llm != self.budgets.generator.capacity() {
            warn!(
                configured = config.performance.max_concurrent_llm,
                active = self.budgets.generator.capacity(),
                "max_concurrent_llm changes take effect on restart"
            );
        }
        let mut loaded = self.loaded.write().await;
        let orchestrator = loaded
            .orchestrator
            .with_settings(PipelineSettings::from(&config));
        *loaded = Arc::new(Loaded {
            config: Arc::new(config),
            orchestrator,
        });
        info!("configuration reloaded");
        Ok(())
    }

    /// Targets for `names`, or every configured repository when empty.
    pub async fn targets(&self, names: &[String]) -> Result<Vec<RepositoryTarget>, ConfigError> {
        targets_in(&*self.config().await, names)
    }

    /// Run one batch. The repository budget is `max_concurrent_override`,
    /// else `GHSUM_CONCURRENT_REPOS`, else the configured value.
    pub async fn run(
        &self,
        names: &[String],
        flags: RunFlags,
        max_concurrent_override: Option<usize>,
    ) -> Result<BatchReport, ConfigError> {
        let loaded = self.loaded().await;
        let targets = targets_in(&loaded.config, names)?;
        let max_repos = match max_concurrent_override {
            Some(n) => n,
            None => {
                let env = std::env::var(CONCURRENT_REPOS_ENV).ok();
                loaded.config.effective_max_concurrent_repos(env.as_deref())
            }
        };
        let budgets = self.budgets.with_repos(max_repos)?;
        info!(repos = targets.len(), max_concurrent_repos = max_repos, "starting batch");
        loaded.orchestrator.run_batch(&targets, &budgets, flags).await
    }
}

fn targets_in(config: &Config, names: &[String]) -> Result<Vec<RepositoryTarget>, ConfigError> {
    if names.is_empty() {
        config.targets()
    } else {
        config.targets_named(names)
    }
}

#[async_trait]
impl BatchRunner for ReportService {
    async fn run_group(&self, repos: &[RepoId]) -> anyhow::Result<BatchReport> {
        let names: Vec<String> = repos.iter().map(RepoId::to_string).collect();
        Ok(self.run(&names, RunFlags::default(), None).await?)
    }

    async fn reload(&self, config: &Config) -> Result<(), ConfigError> {
        ReportService::reload(self, config.clone()).await
    }
}
