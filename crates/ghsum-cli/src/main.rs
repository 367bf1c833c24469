//! ghsum - GitHub activity summarizer CLI
//!
//! ## Commands
//!
//! - `run`: fetch, filter, summarize and publish configured repositories once
//! - `schedule`: fire configured cron groups until Ctrl-C (SIGHUP reloads the config)
//! - `utils validate-config`: load a config and show what it would do
//! - `utils list-labels`: list a repository's labels for writing filters

mod wiring;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn, Level};

use ghsum_core::config::{Config, DEFAULT_CONFIG_PATH};
use ghsum_core::domain::{RepoId, RunOutcome, RunStatus};
use ghsum_core::scheduler::plan_groups;
use ghsum_core::telemetry::{init_tracing, parse_level};
use ghsum_core::{shutdown, BatchReport, ReportScheduler, RunFlags};
use ghsum_github::GitHubClient;

/// Rolling log files land here.
const LOG_DIR: &str = "log";

#[derive(Parser)]
#[command(name = "ghsum")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Summarize recent GitHub activity across repositories", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run every configured repository (or the selected ones) once
    Run {
        /// Repository to run, as owner/name (repeatable; default: all)
        #[arg(long = "repo")]
        repos: Vec<String>,

        /// Path to the configuration file
        #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,

        /// Write the filtered payload as JSON
        #[arg(long)]
        save_json: bool,

        /// Write the summary as markdown
        #[arg(long)]
        save_markdown: bool,

        /// Do not call the language model
        #[arg(long)]
        skip_summary: bool,

        /// Repositories processed at once (overrides config and environment)
        #[arg(long)]
        max_concurrent: Option<usize>,
    },

    /// Run scheduled groups until interrupted
    Schedule {
        /// Path to the configuration file
        #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,
    },

    /// Configuration and repository helpers
    Utils {
        #[command(subcommand)]
        action: UtilsAction,
    },
}

#[derive(Subcommand)]
enum UtilsAction {
    /// Load and validate a configuration, then print what it resolves to
    ValidateConfig {
        #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,
    },

    /// List the labels defined on a repository
    ListLabels {
        /// Repository as owner/name
        repo: String,

        #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,
    },
}

impl Commands {
    fn config_path(&self) -> &Path {
        match self {
            Commands::Run { config, .. } | Commands::Schedule { config } => config,
            Commands::Utils { action } => match action {
                UtilsAction::ValidateConfig { config } | UtilsAction::ListLabels { config, .. } => {
                    config
                }
            },
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    dotenvy::dotenv().ok();

    let config_path = cli.command.config_path().to_path_buf();
    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load {}", config_path.display()))?;

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        parse_level(&config.log_level)
    };
    let _log_guard = init_tracing(cli.json, level, Some(Path::new(LOG_DIR)));

    match cli.command {
        Commands::Run {
            repos,
            save_json,
            save_markdown,
            skip_summary,
            max_concurrent,
            ..
        } => {
            let flags = RunFlags {
                skip_summary,
                persist_json: save_json,
                persist_markdown: save_markdown,
            };
            cmd_run(config, &config_path, &repos, flags, max_concurrent).await
        }
        Commands::Schedule { .. } => cmd_schedule(config, &config_path).await,
        Commands::Utils { action } => match action {
            UtilsAction::ValidateConfig { .. } => cmd_validate_config(&config),
            UtilsAction::ListLabels { repo, .. } => cmd_list_labels(&config, &repo).await,
        },
    }
}

async fn cmd_run(
    config: Config,
    config_path: &Path,
    repos: &[String],
    flags: RunFlags,
    max_concurrent: Option<usize>,
) -> Result<()> {
    let wired = wiring::build_service(config, config_path, flags.skip_summary)?;
    let report = wired.service.run(repos, flags, max_concurrent).await?;
    wiring::log_rate_limit(&wired.github);

    for line in report_lines(&report) {
        println!("{line}");
    }
    // Per-repository failures are reported above, not through the exit code.
    Ok(())
}

async fn cmd_schedule(config: Config, config_path: &Path) -> Result<()> {
    let (shutdown_tx, shutdown_rx) = shutdown::channel();
    let wired = wiring::build_service(config.clone(), config_path, false)?;
    let service = Arc::new(wired.service.with_shutdown(shutdown_rx.clone()));
    let scheduler = Arc::new(ReportScheduler::new(service));

    let groups = scheduler.reload(&config).await?;
    println!("Registered {groups} schedule group(s)");
    if groups == 0 {
        println!("Nothing to schedule; add a [schedule] section or per-repository schedules.");
        return Ok(());
    }

    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("interrupt received, shutting down"),
            Err(e) => warn!(error = %e, "failed to listen for Ctrl-C, shutting down"),
        }
        let _ = shutdown_tx.send(true);
    });
    spawn_reload_on_hangup(Arc::clone(&scheduler), config_path.to_path_buf());

    scheduler.run(shutdown_rx).await;
    wiring::log_rate_limit(&wired.github);
    Ok(())
}

/// Re-read the config file on SIGHUP and hand it to the scheduler, which
/// updates the service before re-registering groups. A rejected file keeps
/// the running configuration.
#[cfg(unix)]
fn spawn_reload_on_hangup(scheduler: Arc<ReportScheduler>, config_path: PathBuf) {
    use tokio::signal::unix::{signal, SignalKind};

    let mut hangups = match signal(SignalKind::hangup()) {
        Ok(stream) => stream,
        Err(e) => {
            warn!(error = %e, "config reload on SIGHUP unavailable");
            return;
        }
    };
    tokio::spawn(async move {
        while hangups.recv().await.is_some() {
            let reloaded = match Config::load(&config_path) {
                Ok(config) => scheduler.reload(&config).await,
                Err(e) => Err(e),
            };
            match reloaded {
                Ok(groups) => info!(groups, path = %config_path.display(), "configuration reloaded"),
                Err(e) => warn!(error = %e, path = %config_path.display(), "config reload rejected"),
            }
        }
    });
}

#[cfg(not(unix))]
fn spawn_reload_on_hangup(_scheduler: Arc<ReportScheduler>, _config_path: PathBuf) {}

fn cmd_validate_config(config: &Config) -> Result<()> {
    for line in describe_config(config)? {
        println!("{line}");
    }
    Ok(())
}

async fn cmd_list_labels(config: &Config, repo: &str) -> Result<()> {
    let repo = RepoId::parse(repo)?;
    let client = GitHubClient::from_config(&config.github)?;
    let labels = client
        .list_labels(&repo)
        .await
        .with_context(|| format!("failed to list labels for {repo}"))?;

    println!("Labels for {repo} ({}):", labels.len());
    for label in labels {
        println!("  {label}");
    }
    Ok(())
}

/// Human-readable description of a validated configuration.
fn describe_config(config: &Config) -> Result<Vec<String>> {
    let targets = config.targets()?;
    let mut lines = vec![format!("Configuration OK: {} repositories", targets.len())];

    if config.github.token.as_deref().map_or(true, str::is_empty) {
        lines.push("warning: no GitHub token (set github.token or GITHUB_TOKEN)".to_string());
    }
    match &config.llm {
        Some(llm) if llm.api_key.as_deref().map_or(true, str::is_empty) => lines.push(
            "warning: [llm] configured without an API key (set llm.api_key or OPENAI_API_KEY)"
                .to_string(),
        ),
        Some(llm) => lines.push(format!("Summaries: {}", llm.model_name)),
        None => lines.push("Summaries: disabled (no [llm] section)".to_string()),
    }

    let groups = plan_groups(config)?;
    if groups.is_empty() {
        lines.push("Schedules: none".to_string());
    } else {
        lines.push(format!("Schedules: {} group(s)", groups.len()));
        for group in groups {
            let repos: Vec<String> = group.repos.iter().map(RepoId::to_string).collect();
            lines.push(format!("  {}: {}", group.schedule, repos.join(", ")));
        }
    }
    Ok(lines)
}

fn report_lines(report: &BatchReport) -> Vec<String> {
    let mut lines: Vec<String> = report.outcomes.iter().map(outcome_line).collect();
    lines.push(format!(
        "{} succeeded, {} failed, {} cancelled in {} ms",
        report.succeeded(),
        report.failed(),
        report.cancelled(),
        report.elapsed_ms
    ));
    lines
}

fn outcome_line(outcome: &RunOutcome) -> String {
    let repo = &outcome.repo;
    match outcome.status {
        RunStatus::Succeeded => {
            let mut line = format!(
                "{repo}: ok, {} items{}",
                outcome.counts.total(),
                if outcome.summary_generated {
                    ", summarized"
                } else {
                    ""
                }
            );
            if let Some(err) = &outcome.state_error {
                line.push_str(&format!(" (last-run time not saved: {err})"));
            }
            line
        }
        RunStatus::Failed => match &outcome.failure {
            Some(f) => format!("{repo}: failed during {}: {}", f.stage, f.error),
            None => format!("{repo}: failed"),
        },
        RunStatus::Cancelled => match outcome.failed_stage() {
            Some(stage) => format!("{repo}: cancelled before {stage}"),
            None => format!("{repo}: cancelled"),
        },
    }
}
