//! Builds the application service from a loaded configuration.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};

use ghsum_core::config::Config;
use ghsum_core::{
    ActivityFetcher, OutputPublisher, PipelineDeps, PipelineSettings, ReportService,
    SummaryGenerator,
};
use ghsum_github::GitHubClient;
use ghsum_llm::ChatSummarizer;
use ghsum_state::JsonRunStateStore;

/// Service plus the concrete GitHub client, kept for rate-limit reporting.
pub struct Wired {
    pub service: ReportService,
    pub github: Arc<GitHubClient>,
}

/// Summary generator for this run, `None` when summaries are off or no
/// `[llm]` section is configured.
pub fn build_generator(
    config: &Config,
    skip_summary: bool,
) -> Result<Option<Arc<dyn SummaryGenerator>>> {
    if skip_summary {
        return Ok(None);
    }
    let Some(llm) = config.llm.as_ref() else {
        warn!("no [llm] section configured, summaries disabled");
        return Ok(None);
    };
    let summarizer = ChatSummarizer::from_config(llm, config.summary_timezone())
        .context("failed to configure summary generator")?;
    info!(model = summarizer.model(), "summary generator ready");
    Ok(Some(Arc::new(summarizer)))
}

/// Run-state store keyed under the config path, so configs sharing one
/// state file keep separate timestamps.
pub fn build_state_store(config: &Config, config_path: &Path) -> JsonRunStateStore {
    JsonRunStateStore::new(config.state_file.clone())
        .with_namespace(config_path.display().to_string())
}

pub fn build_service(config: Config, config_path: &Path, skip_summary: bool) -> Result<Wired> {
    let github = Arc::new(
        GitHubClient::from_config(&config.github).context("failed to configure GitHub client")?,
    );
    let fetcher: Arc<dyn ActivityFetcher> = github.clone();
    let deps = PipelineDeps {
        fetcher,
        generator: build_generator(&config, skip_summary)?,
        publisher: Arc::new(OutputPublisher::from_config(&config)),
        state: Arc::new(build_state_store(&config, config_path)),
        settings: PipelineSettings::from(&config),
    };
    let service = ReportService::new(config, deps)?;
    Ok(Wired { service, github })
}

/// Log the last rate-limit headers GitHub returned, if any.
pub fn log_rate_limit(github: &GitHubClient) {
    match github.rate_limit() {
        Some(limit) => info!(
            limit = limit.limit,
            remaining = limit.remaining,
            reset_at = ?limit.reset_at,
            "github rate limit"
        ),
        None => info!("github rate limit unknown"),
    }
}
