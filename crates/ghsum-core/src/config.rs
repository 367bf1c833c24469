//! TOML configuration: loading, environment fallbacks and validation.
//!
//! `Config::load` returns a fully validated structure. Everything that could
//! make a pipeline stage fail for configuration reasons (repository ids,
//! regexes, cron expressions, timezones, budgets) is checked here.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::domain::{ConfigError, FilterConfig, IncludeFlags, RepoId, RepositoryTarget};
use crate::scheduler::trigger::{parse_timezone, CronTrigger};

pub const DEFAULT_CONFIG_PATH: &str = "config/config.toml";
pub const DEFAULT_CRON: &str = "0 6 * * *";
pub const DEFAULT_MODEL: &str = "gpt-4.1";
/// Upper bound for `fallback_lookback_days`, about ten years.
pub const MAX_LOOKBACK_DAYS: u32 = 3650;

pub const DEFAULT_SYSTEM_PROMPT: &str = "\
You are a specialized assistant that writes in-depth technical summaries of GitHub repository activity for developers.

Synthesize the recent activity (commits, pull requests, issues, discussions) into a concise technical briefing. Assume the reader knows the project. Focus on the implications of the changes:

* Architectural evolution: significant refactoring, design pattern changes, module restructuring.
* API surface changes: new functions or endpoints, deprecations, and especially breaking changes.
* Performance: concrete improvements and the techniques behind them.
* Key bug fixes: high-impact resolutions.
* Direction: what discussions and large pull requests say about where the project is heading.

Use precise technical language. Present the summary as structured Markdown and link to the most relevant commits, pull requests and discussions.

The input is a JSON object with `repo`, `window`, `commits`, `pull_requests`, `issues` and `discussions`.";

fn default_true() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("output")
}

fn default_state_file() -> PathBuf {
    PathBuf::from("log/last_run_times.json")
}

fn default_lookback_days() -> u32 {
    7
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default = "default_state_file")]
    pub state_file: PathBuf,
    #[serde(default = "default_true")]
    pub since_last_run: bool,
    #[serde(default = "default_lookback_days")]
    pub fallback_lookback_days: u32,
    /// Timezone for rendering summaries and the default schedule timezone.
    #[serde(default)]
    pub timezone: Option<String>,
    #[serde(default)]
    pub github: GitHubConfig,
    #[serde(default)]
    pub llm: Option<LlmConfig>,
    #[serde(default)]
    pub performance: PerformanceConfig,
    #[serde(default)]
    pub schedule: Option<ScheduleConfig>,
    #[serde(default)]
    pub rss: Option<RssConfig>,
    #[serde(default)]
    pub filters: FilterConfig,
    #[serde(default)]
    pub repositories: Vec<RepositoryConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GitHubConfig {
    pub token: Option<String>,
    pub api_url: String,
    pub max_pages: u32,
    pub timeout_secs: u64,
    pub retries: u32,
}

impl Default for GitHubConfig {
    fn default() -> Self {
        Self {
            token: None,
            api_url: "https://api.github.com/graphql".to_string(),
            max_pages: 5,
            timeout_secs: 30,
            retries: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LlmConfig {
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub model_name: String,
    pub language: Option<String>,
    pub system_prompt: String,
    pub retries: u32,
    pub retry_delay_secs: u64,
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            api_key: None,
            model_name: DEFAULT_MODEL.to_string(),
            language: None,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            retries: 3,
            retry_delay_secs: 2,
            timeout_secs: 120,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PerformanceConfig {
    pub max_concurrent_repos: usize,
    pub max_concurrent_llm: usize,
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            max_concurrent_repos: 4,
            max_concurrent_llm: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ScheduleConfig {
    pub cron: String,
    pub timezone: Option<String>,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            cron: DEFAULT_CRON.to_string(),
            timezone: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RssConfig {
    pub title: String,
    pub link: String,
    pub description: String,
    pub filename: String,
    pub cache_file: PathBuf,
    pub max_entries: usize,
}

impl Default for RssConfig {
    fn default() -> Self {
        Self {
            title: "GitHub Activity Summaries".to_string(),
            link: "https://github.com".to_string(),
            description: "Generated summaries of recent repository activity".to_string(),
            filename: "rss.xml".to_string(),
            cache_file: PathBuf::from("cache/summary_cache.json"),
            max_entries: ghsum_state::DEFAULT_MAX_ENTRIES,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RepositoryConfig {
    pub name: String,
    #[serde(default = "default_true")]
    pub include_commits: bool,
    #[serde(default = "default_true")]
    pub include_pull_requests: bool,
    #[serde(default = "default_true")]
    pub include_issues: bool,
    #[serde(default = "default_true")]
    pub include_discussions: bool,
    #[serde(default)]
    pub filters: FilterConfig,
    #[serde(default)]
    pub schedule: Option<ScheduleConfig>,
}

impl RepositoryConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            include_commits: true,
            include_pull_requests: true,
            include_issues: true,
            include_discussions: true,
            filters: FilterConfig::default(),
            schedule: None,
        }
    }

    pub fn include_flags(&self) -> IncludeFlags {
        IncludeFlags {
            commits: self.include_commits,
            pull_requests: self.include_pull_requests,
            issues: self.include_issues,
            discussions: self.include_discussions,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            output_dir: default_output_dir(),
            state_file: default_state_file(),
            since_last_run: true,
            fallback_lookback_days: default_lookback_days(),
            timezone: None,
            github: GitHubConfig::default(),
            llm: None,
            performance: PerformanceConfig::default(),
            schedule: None,
            rss: None,
            filters: FilterConfig::default(),
            repositories: Vec::new(),
        }
    }
}

impl Config {
    /// Read, parse, apply environment fallbacks and validate.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let mut config = Self::parse(&raw, &path.display().to_string())?;
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Parse TOML without touching the environment or validating.
    pub fn parse(raw: &str, origin: &str) -> Result<Self, ConfigError> {
        toml::from_str(raw).map_err(|e| ConfigError::Parse {
            path: origin.to_string(),
            message: e.to_string(),
        })
    }

    /// Fill credentials and endpoints left empty in the file from the
    /// environment (`GITHUB_TOKEN`, `OPENAI_API_KEY`, `OPENAI_BASE_URL`).
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let env = |key: &str| lookup(key).filter(|v| !v.is_empty());
        if self.github.token.as_deref().map_or(true, str::is_empty) {
            self.github.token = env("GITHUB_TOKEN");
        }
        if let Some(llm) = self.llm.as_mut() {
            if llm.api_key.as_deref().map_or(true, str::is_empty) {
                llm.api_key = env("OPENAI_API_KEY");
            }
            if llm.base_url.is_none() {
                llm.base_url = env("OPENAI_BASE_URL");
            }
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.performance.max_concurrent_repos == 0 {
            return Err(ConfigError::InvalidBudget {
                name: "max_concurrent_repos",
            });
        }
        if self.performance.max_concurrent_llm == 0 {
            return Err(ConfigError::InvalidBudget {
                name: "max_concurrent_llm",
            });
        }
        if self.fallback_lookback_days == 0 || self.fallback_lookback_days > MAX_LOOKBACK_DAYS {
            return Err(ConfigError::InvalidSetting {
                name: "fallback_lookback_days",
                reason: format!("must be between 1 and {MAX_LOOKBACK_DAYS}"),
            });
        }
        if self.github.max_pages == 0 {
            return Err(ConfigError::InvalidSetting {
                name: "github.max_pages",
                reason: "must be at least 1".to_string(),
            });
        }
        if let Some(rss) = &self.rss {
            if rss.max_entries == 0 {
                return Err(ConfigError::InvalidSetting {
                    name: "rss.max_entries",
                    reason: "must be at least 1".to_string(),
                });
            }
            if rss.filename.is_empty() || rss.filename.contains(['/', '\\']) {
                return Err(ConfigError::InvalidSetting {
                    name: "rss.filename",
                    reason: format!("'{}' is not a plain file name", rss.filename),
                });
            }
        }
        if let Some(tz) = &self.timezone {
            parse_timezone(tz)?;
        }
        if let Some(schedule) = &self.schedule {
            self.check_schedule(schedule)?;
        }

        let mut seen = HashSet::new();
        for repo in &self.repositories {
            let id = RepoId::parse(&repo.name)?;
            if !seen.insert(id) {
                return Err(ConfigError::DuplicateRepository {
                    repo: repo.name.clone(),
                });
            }
            if let Some(schedule) = &repo.schedule {
                self.check_schedule(schedule)?;
            }
        }

        // compiles every regex
        self.targets()?;
        Ok(())
    }

    fn check_schedule(&self, schedule: &ScheduleConfig) -> Result<(), ConfigError> {
        let tz = schedule
            .timezone
            .as_deref()
            .or(self.timezone.as_deref())
            .unwrap_or("UTC");
        CronTrigger::parse(&schedule.cron, tz).map(|_| ())
    }

    /// Run targets for every configured repository, in configuration order.
    pub fn targets(&self) -> Result<Vec<RepositoryTarget>, ConfigError> {
        self.repositories
            .iter()
            .map(|repo| self.target_for(repo))
            .collect()
    }

    /// Run targets for the named repositories, in the given order.
    pub fn targets_named(&self, names: &[String]) -> Result<Vec<RepositoryTarget>, ConfigError> {
        names
            .iter()
            .map(|name| {
                let wanted = RepoId::parse(name)?;
                let repo = self.repository(&wanted).ok_or_else(|| {
                    ConfigError::UnknownRepository {
                        repo: name.clone(),
                    }
                })?;
                self.target_for(repo)
            })
            .collect()
    }

    pub fn repository(&self, id: &RepoId) -> Option<&RepositoryConfig> {
        self.repositories
            .iter()
            .find(|r| RepoId::parse(&r.name).ok().as_ref() == Some(id))
    }

    fn target_for(&self, repo: &RepositoryConfig) -> Result<RepositoryTarget, ConfigError> {
        let id = RepoId::parse(&repo.name)?;
        let filters = self.filters.merged_with(&repo.filters);
        RepositoryTarget::new(id, repo.include_flags(), filters)
    }

    /// `GHSUM_CONCURRENT_REPOS` wins over the file when it is a positive
    /// integer; anything else is ignored with a warning.
    pub fn effective_max_concurrent_repos(&self, env_value: Option<&str>) -> usize {
        match env_value.map(str::trim).filter(|v| !v.is_empty()) {
            None => self.performance.max_concurrent_repos,
            Some(raw) => match raw.parse::<usize>() {
                Ok(n) if n > 0 => n,
                _ => {
                    warn!(
                        value = raw,
                        fallback = self.performance.max_concurrent_repos,
                        "ignoring invalid GHSUM_CONCURRENT_REPOS"
                    );
                    self.performance.max_concurrent_repos
                }
            },
        }
    }

    pub fn fallback_lookback(&self) -> chrono::Duration {
        chrono::Duration::days(i64::from(self.fallback_lookback_days))
    }

    /// Summary timezone, UTC when unset.
    pub fn summary_timezone(&self) -> chrono_tz::Tz {
        self.timezone
            .as_deref()
            .and_then(|tz| parse_timezone(tz).ok())
            .unwrap_or(chrono_tz::UTC)
    }
}
