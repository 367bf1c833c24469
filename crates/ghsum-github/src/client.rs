//! GitHub GraphQL client
//!
//! One POST per page against the GraphQL endpoint, bearer-token
//! authenticated. Transient failures (transport errors, timeouts, 5xx) are
//! retried with the configured `RetryPolicy`; everything else surfaces as a
//! final `FetchError`.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use reqwest::header::HeaderMap;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use ghsum_core::config::GitHubConfig;
use ghsum_core::domain::{
    ActivityItems, Commit, ConfigError, Discussion, FetchError, FilterConfig, Issue, ItemKind,
    PullRequest, RepoId,
};
use ghsum_core::{ActivityFetcher, RetryPolicy};

use crate::queries;
use crate::wire::{
    CommitNode, Connection, DiscussionNode, GraphQlResponse, IssueNode, Named, PullRequestNode,
};

const USER_AGENT: &str = concat!("ghsum/", env!("CARGO_PKG_VERSION"));

/// Last rate-limit headers seen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RateLimit {
    pub limit: u64,
    pub remaining: u64,
    pub reset_at: Option<DateTime<Utc>>,
}

impl RateLimit {
    fn from_headers(headers: &HeaderMap) -> Option<Self> {
        let number = |name: &str| -> Option<u64> {
            headers.get(name)?.to_str().ok()?.trim().parse().ok()
        };
        Some(Self {
            limit: number("x-ratelimit-limit")?,
            remaining: number("x-ratelimit-remaining")?,
            reset_at: number("x-ratelimit-reset")
                .and_then(|secs| Utc.timestamp_opt(i64::try_from(secs).ok()?, 0).single()),
        })
    }
}

/// Client settings
#[derive(Debug, Clone)]
pub struct GitHubClientConfig {
    pub api_url: String,
    pub token: String,
    pub max_pages: u32,
    pub timeout: Duration,
    pub retry: RetryPolicy,
}

impl GitHubClientConfig {
    pub fn new(api_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            api_url: api_url.into(),
            token: token.into(),
            max_pages: 5,
            timeout: Duration::from_secs(30),
            retry: RetryPolicy::default(),
        }
    }

    /// From the `[github]` section. The token must already be resolved.
    pub fn from_config(config: &GitHubConfig) -> Result<Self, ConfigError> {
        let token = config
            .token
            .clone()
            .filter(|t| !t.trim().is_empty())
            .ok_or(ConfigError::MissingCredential("GITHUB_TOKEN"))?;
        Ok(Self {
            api_url: config.api_url.clone(),
            token,
            max_pages: config.max_pages.max(1),
            timeout: Duration::from_secs(config.timeout_secs),
            retry: RetryPolicy::with_retries(config.retries, Duration::from_secs(1)),
        })
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_max_pages(mut self, max_pages: u32) -> Self {
        self.max_pages = max_pages.max(1);
        self
    }
}

pub struct GitHubClient {
    config: GitHubClientConfig,
    http: reqwest::Client,
    rate_limit: Mutex<Option<RateLimit>>,
}

impl GitHubClient {
    pub fn new(config: GitHubClientConfig) -> Result<Self, ConfigError> {
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(config.timeout)
            .build()
            .map_err(|e| ConfigError::InvalidSetting {
                name: "github",
                reason: e.to_string(),
            })?;
        Ok(Self {
            config,
            http,
            rate_limit: Mutex::new(None),
        })
    }

    pub fn from_config(config: &GitHubConfig) -> Result<Self, ConfigError> {
        Self::new(GitHubClientConfig::from_config(config)?)
    }

    /// Rate-limit state from the most recent response, if any was reported.
    pub fn rate_limit(&self) -> Option<RateLimit> {
        self.rate_limit.lock().ok().and_then(|guard| *guard)
    }

    /// All label names defined on `repo`.
    pub async fn list_labels(&self, repo: &RepoId) -> Result<Vec<String>, FetchError> {
        let labels: Vec<Named> = self
            .paginate(
                queries::LABELS,
                repo_variables(repo),
                queries::LABELS_PATH,
                |_| false,
            )
            .await?;
        Ok(labels.into_iter().map(|l| l.name).collect())
    }

    pub async fn fetch_commits(
        &self,
        repo: &RepoId,
        since: DateTime<Utc>,
    ) -> Result<Vec<Commit>, FetchError> {
        let mut variables = repo_variables(repo);
        variables["since"] = json!(github_time(since));
        let nodes: Vec<CommitNode> = self
            .paginate(queries::COMMITS, variables, queries::COMMITS_PATH, |_| false)
            .await?;
        Ok(nodes.into_iter().map(Commit::from).collect())
    }

    /// Newest-updated first; paging stops once a page ends before `since`.
    pub async fn fetch_pull_requests(
        &self,
        repo: &RepoId,
        since: DateTime<Utc>,
        filters: &FilterConfig,
    ) -> Result<Vec<PullRequest>, FetchError> {
        let mut variables = repo_variables(repo);
        if let Some(state) = filters
            .pull_requests
            .state
            .as_deref()
            .and_then(pull_request_state)
        {
            variables["states"] = json!([state]);
        }
        if let Some(labels) = filters.pull_requests.labels.as_ref().filter(|l| !l.is_empty()) {
            variables["labels"] = json!(labels);
        }
        let nodes: Vec<PullRequestNode> = self
            .paginate(
                queries::PULL_REQUESTS,
                variables,
                queries::PULL_REQUESTS_PATH,
                |last: &PullRequestNode| last.updated_at < since,
            )
            .await?;
        Ok(nodes.into_iter().map(PullRequest::from).collect())
    }

    pub async fn fetch_issues(
        &self,
        repo: &RepoId,
        since: DateTime<Utc>,
    ) -> Result<Vec<Issue>, FetchError> {
        let variables = json!({
            "searchQuery": issue_search_query(repo, since),
            "cursor": Value::Null,
        });
        let nodes: Vec<IssueNode> = self
            .paginate(queries::ISSUES, variables, queries::ISSUES_PATH, |_| false)
            .await?;
        Ok(nodes.into_iter().map(Issue::from).collect())
    }

    pub async fn fetch_discussions(
        &self,
        repo: &RepoId,
        since: DateTime<Utc>,
    ) -> Result<Vec<Discussion>, FetchError> {
        let nodes: Vec<DiscussionNode> = self
            .paginate(
                queries::DISCUSSIONS,
                repo_variables(repo),
                queries::DISCUSSIONS_PATH,
                |last: &DiscussionNode| last.updated_at < since,
            )
            .await?;
        Ok(nodes.into_iter().map(Discussion::from).collect())
    }

    /// Follow `pageInfo` cursors for the connection at `path` (a JSON
    /// pointer into `data`), up to `max_pages`. `stop_after` is checked
    /// against the last node of each page.
    async fn paginate<N>(
        &self,
        query: &str,
        mut variables: Value,
        path: &str,
        stop_after: impl Fn(&N) -> bool,
    ) -> Result<Vec<N>, FetchError>
    where
        N: DeserializeOwned,
    {
        let mut items = Vec::new();
        let mut cursor: Option<String> = None;
        let mut pages = 0;
        let mut has_next = true;

        while has_next && pages < self.config.max_pages {
            variables["cursor"] = json!(cursor);
            let data = self.graphql(query, &variables).await?;
            pages += 1;

            let Some(raw) = data.pointer(path).filter(|v| !v.is_null()) else {
                if path.starts_with("/repository") && data["repository"].is_null() {
                    return Err(FetchError::NotFound(repository_name(&variables)));
                }
                debug!(path, "connection absent, treating as empty");
                break;
            };
            let page: Connection<Value> = serde_json::from_value(raw.clone())
                .map_err(|e| FetchError::Decode(format!("{path}: {e}")))?;

            let before = items.len();
            for node in page.nodes.into_iter().flatten() {
                // Search hits of another type come back as empty objects.
                if node.as_object().is_some_and(|o| o.is_empty()) {
                    continue;
                }
                let item: N = serde_json::from_value(node)
                    .map_err(|e| FetchError::Decode(format!("{path}: {e}")))?;
                items.push(item);
            }

            has_next = page.page_info.has_next_page;
            cursor = page.page_info.end_cursor;
            if items.len() > before && items.last().is_some_and(&stop_after) {
                debug!(path, pages, "reached items older than since, stopping");
                has_next = false;
            }
        }

        if has_next {
            warn!(
                path,
                max_pages = self.config.max_pages,
                "page limit reached, some items may be missing"
            );
        }
        debug!(path, items = items.len(), pages, "pagination finished");
        Ok(items)
    }

    async fn graphql(&self, query: &str, variables: &Value) -> Result<Value, FetchError> {
        self.config
            .retry
            .run(
                "github.graphql",
                || self.send_once(query, variables),
                FetchError::is_transient,
            )
            .await
    }

    async fn send_once(&self, query: &str, variables: &Value) -> Result<Value, FetchError> {
        let response = self
            .http
            .post(&self.config.api_url)
            .bearer_auth(&self.config.token)
            .json(&json!({ "query": query, "variables": variables }))
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        let rate_limit = RateLimit::from_headers(response.headers());
        let retry_after = header_u64(response.headers(), "retry-after");
        if let Some(limit) = rate_limit {
            if let Ok(mut slot) = self.rate_limit.lock() {
                *slot = Some(limit);
            }
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status, rate_limit, retry_after, body));
        }

        let body: GraphQlResponse = response
            .json()
            .await
            .map_err(|e| FetchError::Decode(e.to_string()))?;

        if !body.errors.is_empty() {
            let kinds: Vec<&str> = body.errors.iter().filter_map(|e| e.kind.as_deref()).collect();
            let message = body
                .errors
                .iter()
                .map(|e| e.message.as_str())
                .collect::<Vec<_>>()
                .join("; ");
            if kinds.contains(&"RATE_LIMITED") {
                return Err(FetchError::RateLimited {
                    reset_at: rate_limit.and_then(|r| r.reset_at),
                });
            }
            if kinds.contains(&"NOT_FOUND") {
                return Err(FetchError::NotFound(message));
            }
            return Err(FetchError::Upstream {
                status: status.as_u16(),
                message,
            });
        }

        body.data
            .ok_or_else(|| FetchError::Decode("response without data".to_string()))
    }

    fn transport_error(&self, err: reqwest::Error) -> FetchError {
        if err.is_timeout() {
            FetchError::Timeout(self.config.timeout)
        } else {
            FetchError::Network(err.to_string())
        }
    }
}

#[async_trait]
impl ActivityFetcher for GitHubClient {
    async fn fetch(
        &self,
        repo: &RepoId,
        kind: ItemKind,
        since: DateTime<Utc>,
        filters: &FilterConfig,
    ) -> Result<ActivityItems, FetchError> {
        let items = match kind {
            ItemKind::Commits => ActivityItems::Commits(self.fetch_commits(repo, since).await?),
            ItemKind::PullRequests => {
                ActivityItems::PullRequests(self.fetch_pull_requests(repo, since, filters).await?)
            }
            ItemKind::Issues => ActivityItems::Issues(self.fetch_issues(repo, since).await?),
            ItemKind::Discussions => {
                ActivityItems::Discussions(self.fetch_discussions(repo, since).await?)
            }
        };
        if let Some(limit) = self.rate_limit() {
            debug!(
                remaining = limit.remaining,
                limit = limit.limit,
                "github rate limit"
            );
            if limit.remaining == 0 {
                info!(reset_at = ?limit.reset_at, "github rate limit exhausted");
            }
        }
        Ok(items)
    }
}

fn repo_variables(repo: &RepoId) -> Value {
    json!({ "owner": repo.owner(), "repo": repo.name(), "cursor": Value::Null })
}

fn repository_name(variables: &Value) -> String {
    format!(
        "{}/{}",
        variables["owner"].as_str().unwrap_or_default(),
        variables["repo"].as_str().unwrap_or_default()
    )
}

/// GitHub wants second precision with a `Z` suffix.
pub fn github_time(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub fn issue_search_query(repo: &RepoId, since: DateTime<Utc>) -> String {
    format!("repo:{repo} is:issue created:>{}", github_time(since))
}

/// Map a configured state onto the `PullRequestState` enum; unknown values
/// get no server-side hint.
fn pull_request_state(raw: &str) -> Option<&'static str> {
    match raw.trim().to_ascii_uppercase().as_str() {
        "OPEN" => Some("OPEN"),
        "CLOSED" => Some("CLOSED"),
        "MERGED" => Some("MERGED"),
        _ => None,
    }
}

fn header_u64(headers: &HeaderMap, name: &str) -> Option<u64> {
    headers.get(name)?.to_str().ok()?.trim().parse().ok()
}

fn status_error(
    status: StatusCode,
    rate_limit: Option<RateLimit>,
    retry_after: Option<u64>,
    body: String,
) -> FetchError {
    let exhausted = rate_limit.is_some_and(|r| r.remaining == 0);
    match status {
        StatusCode::UNAUTHORIZED => FetchError::Auth(body),
        StatusCode::TOO_MANY_REQUESTS => FetchError::RateLimited {
            reset_at: reset_time(rate_limit, retry_after),
        },
        StatusCode::FORBIDDEN if exhausted || retry_after.is_some() => FetchError::RateLimited {
            reset_at: reset_time(rate_limit, retry_after),
        },
        StatusCode::FORBIDDEN => FetchError::Auth(body),
        StatusCode::NOT_FOUND => FetchError::NotFound(body),
        _ => FetchError::Upstream {
            status: status.as_u16(),
            message: body,
        },
    }
}

fn reset_time(rate_limit: Option<RateLimit>, retry_after: Option<u64>) -> Option<DateTime<Utc>> {
    rate_limit.and_then(|r| r.reset_at).or_else(|| {
        retry_after.and_then(|secs| {
            let wait = chrono::Duration::try_seconds(i64::try_from(secs).ok()?)?;
            Utc::now().checked_add_signed(wait)
        })
    })
}
