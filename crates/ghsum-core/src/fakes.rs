//! In-memory collaborator fakes (testing only)
//!
//! `ScriptedFetcher`, `RecordingGenerator` and `RecordingPublisher` satisfy
//! the collaborator traits without any network or filesystem access, and
//! record how they were called, including peak concurrency.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::collab::{
    ActivityFetcher, PublishFlags, PublishReceipt, PublishRequest, Publisher, SummaryGenerator,
};
use crate::domain::{
    ActivityItems, ActivityPayload, Commit, Discussion, FetchError, FilterConfig, GenerateError,
    Issue, ItemCounts, ItemKind, PublishError, PullRequest, RepoId,
};

// ---------------------------------------------------------------------------
// Gauge
// ---------------------------------------------------------------------------

/// Current and peak count of something in flight.
#[derive(Debug, Default)]
struct Gauge {
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl Gauge {
    fn enter(&self) -> GaugeGuard<'_> {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        GaugeGuard(self)
    }

    fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

struct GaugeGuard<'a>(&'a Gauge);

impl Drop for GaugeGuard<'_> {
    fn drop(&mut self) {
        self.0.current.fetch_sub(1, Ordering::SeqCst);
    }
}

// ---------------------------------------------------------------------------
// ScriptedFetcher
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Clone)]
struct RepoScript {
    commits: Vec<Commit>,
    pull_requests: Vec<PullRequest>,
    issues: Vec<Issue>,
    discussions: Vec<Discussion>,
    error: Option<FetchError>,
    panic: bool,
    wrong_kind: bool,
}

/// Fetcher answering from per-repository scripts. Unscripted repositories
/// have no activity.
#[derive(Debug, Default)]
pub struct ScriptedFetcher {
    scripts: Mutex<HashMap<RepoId, RepoScript>>,
    delay: Option<Duration>,
    calls: Mutex<HashMap<RepoId, usize>>,
    since_seen: Mutex<HashMap<RepoId, Vec<DateTime<Utc>>>>,
    active_repos: Mutex<HashMap<RepoId, usize>>,
    peak_repos: AtomicUsize,
    in_flight: Gauge,
}

impl ScriptedFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every fetch call sleeps this long before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    fn script(&self, repo: &RepoId, edit: impl FnOnce(&mut RepoScript)) {
        let mut scripts = self.scripts.lock().unwrap();
        edit(scripts.entry(repo.clone()).or_default());
    }

    pub fn set_commits(&self, repo: &RepoId, commits: Vec<Commit>) {
        self.script(repo, |s| s.commits = commits);
    }

    pub fn set_pull_requests(&self, repo: &RepoId, pull_requests: Vec<PullRequest>) {
        self.script(repo, |s| s.pull_requests = pull_requests);
    }

    pub fn set_issues(&self, repo: &RepoId, issues: Vec<Issue>) {
        self.script(repo, |s| s.issues = issues);
    }

    pub fn set_discussions(&self, repo: &RepoId, discussions: Vec<Discussion>) {
        self.script(repo, |s| s.discussions = discussions);
    }

    /// Every fetch for `repo` fails with `error`.
    pub fn fail_for(&self, repo: &RepoId, error: FetchError) {
        self.script(repo, |s| s.error = Some(error));
    }

    /// Every fetch for `repo` panics.
    pub fn panic_for(&self, repo: &RepoId) {
        self.script(repo, |s| s.panic = true);
    }

    /// Answer commit requests for `repo` with pull requests.
    pub fn answer_with_wrong_kind(&self, repo: &RepoId) {
        self.script(repo, |s| s.wrong_kind = true);
    }

    pub fn calls_for(&self, repo: &RepoId) -> usize {
        self.calls.lock().unwrap().get(repo).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().values().sum()
    }

    pub fn since_seen(&self, repo: &RepoId) -> Vec<DateTime<Utc>> {
        self.since_seen
            .lock()
            .unwrap()
            .get(repo)
            .cloned()
            .unwrap_or_default()
    }

    /// Peak number of concurrent fetch calls.
    pub fn max_concurrent_calls(&self) -> usize {
        self.in_flight.peak()
    }

    /// Peak number of distinct repositories with a fetch in flight.
    pub fn max_concurrent_repos(&self) -> usize {
        self.peak_repos.load(Ordering::SeqCst)
    }

    fn enter_repo(&self, repo: &RepoId) {
        let mut active = self.active_repos.lock().unwrap();
        *active.entry(repo.clone()).or_default() += 1;
        self.peak_repos.fetch_max(active.len(), Ordering::SeqCst);
    }

    fn leave_repo(&self, repo: &RepoId) {
        let mut active = self.active_repos.lock().unwrap();
        if let Some(n) = active.get_mut(repo) {
            *n -= 1;
            if *n == 0 {
                active.remove(repo);
            }
        }
    }
}

struct RepoGuard<'a> {
    fetcher: &'a ScriptedFetcher,
    repo: RepoId,
}

impl Drop for RepoGuard<'_> {
    fn drop(&mut self) {
        self.fetcher.leave_repo(&self.repo);
    }
}

#[async_trait]
impl ActivityFetcher for ScriptedFetcher {
    async fn fetch(
        &self,
        repo: &RepoId,
        kind: ItemKind,
        since: DateTime<Utc>,
        _filters: &FilterConfig,
    ) -> Result<ActivityItems, FetchError> {
        *self.calls.lock().unwrap().entry(repo.clone()).or_default() += 1;
        self.since_seen
            .lock()
            .unwrap()
            .entry(repo.clone())
            .or_default()
            .push(since);

        let _gauge = self.in_flight.enter();
        self.enter_repo(repo);
        let _repo = RepoGuard {
            fetcher: self,
            repo: repo.clone(),
        };

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let script = self
            .scripts
            .lock()
            .unwrap()
            .get(repo)
            .cloned()
            .unwrap_or_default();
        if script.panic {
            panic!("scripted fetch panic for {repo}");
        }
        if let Some(error) = script.error {
            return Err(error);
        }

        Ok(match kind {
            ItemKind::Commits if script.wrong_kind => {
                ActivityItems::PullRequests(script.pull_requests)
            }
            ItemKind::Commits => ActivityItems::Commits(script.commits),
            ItemKind::PullRequests => ActivityItems::PullRequests(script.pull_requests),
            ItemKind::Issues => ActivityItems::Issues(script.issues),
            ItemKind::Discussions => ActivityItems::Discussions(script.discussions),
        })
    }
}

// ---------------------------------------------------------------------------
// RecordingGenerator
// ---------------------------------------------------------------------------

/// Generator returning `"summary of <repo>: <n> items"`.
#[derive(Debug, Default)]
pub struct RecordingGenerator {
    delay: Option<Duration>,
    fail: Mutex<HashSet<RepoId>>,
    calls: Mutex<Vec<RepoId>>,
    in_flight: Gauge,
}

impl RecordingGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn fail_for(&self, repo: &RepoId) {
        self.fail.lock().unwrap().insert(repo.clone());
    }

    pub fn calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn called_for(&self, repo: &RepoId) -> bool {
        self.calls.lock().unwrap().contains(repo)
    }

    pub fn max_in_flight(&self) -> usize {
        self.in_flight.peak()
    }
}

#[async_trait]
impl SummaryGenerator for RecordingGenerator {
    async fn summarize(&self, payload: &ActivityPayload) -> Result<String, GenerateError> {
        self.calls.lock().unwrap().push(payload.repo.clone());
        let _gauge = self.in_flight.enter();
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail.lock().unwrap().contains(&payload.repo) {
            return Err(GenerateError::Provider(format!(
                "scripted failure for {}",
                payload.repo
            )));
        }
        Ok(format!(
            "summary of {}: {} items",
            payload.repo,
            payload.counts().total()
        ))
    }
}

// ---------------------------------------------------------------------------
// RecordingPublisher
// ---------------------------------------------------------------------------

/// What one publish call received.
#[derive(Debug, Clone, PartialEq)]
pub struct PublishedRecord {
    pub repo: RepoId,
    pub summary: Option<String>,
    pub flags: PublishFlags,
    pub counts: ItemCounts,
    pub completed_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct RecordingPublisher {
    records: Mutex<Vec<PublishedRecord>>,
    fail: Mutex<HashSet<RepoId>>,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_for(&self, repo: &RepoId) {
        self.fail.lock().unwrap().insert(repo.clone());
    }

    pub fn records(&self) -> Vec<PublishedRecord> {
        self.records.lock().unwrap().clone()
    }

    pub fn record_for(&self, repo: &RepoId) -> Option<PublishedRecord> {
        self.records
            .lock()
            .unwrap()
            .iter()
            .find(|r| &r.repo == repo)
            .cloned()
    }
}

#[async_trait]
impl Publisher for RecordingPublisher {
    async fn publish(&self, request: PublishRequest<'_>) -> Result<PublishReceipt, PublishError> {
        let repo = request.payload.repo.clone();
        if self.fail.lock().unwrap().contains(&repo) {
            return Err(PublishError::Rejected {
                repo: repo.to_string(),
                reason: "scripted failure".to_string(),
            });
        }
        self.records.lock().unwrap().push(PublishedRecord {
            repo,
            summary: request.summary.map(str::to_string),
            flags: request.flags,
            counts: request.payload.counts(),
            completed_at: request.completed_at,
        });
        Ok(PublishReceipt::default())
    }
}
