//! Filter configuration and the compiled predicate set applied in FILTERING.
//!
//! Configuration is a plain struct per item type (all fields optional). A
//! repository's effective filters are the global filters overridden field by
//! field by the repository's own. Compiling turns the effective filters into
//! a closed set of `FilterRule` predicates; regexes are compiled once, so
//! applying filters cannot fail.

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::activity::{ActivityPayload, Commit, Discussion, Issue, PullRequest};
use super::error::ConfigError;

/// Which pull request timestamp is compared against the since-timestamp.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DateBasis {
    Created,
    #[default]
    Updated,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CommitFilters {
    pub author: Option<String>,
    pub exclude_commit_messages_regex: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PullRequestFilters {
    pub author: Option<String>,
    pub state: Option<String>,
    pub labels: Option<Vec<String>>,
    pub exclude_pull_request_titles_regex: Option<String>,
    pub since_filter_type: Option<DateBasis>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct IssueFilters {
    pub author: Option<String>,
    pub milestone: Option<String>,
    pub labels: Option<Vec<String>>,
    pub assignee: Option<String>,
    pub exclude_issue_titles_regex: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DiscussionFilters {
    pub author: Option<String>,
    pub exclude_discussion_titles_regex: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FilterConfig {
    pub commits: CommitFilters,
    pub pull_requests: PullRequestFilters,
    pub issues: IssueFilters,
    pub discussions: DiscussionFilters,
}

fn pick<T: Clone>(over: &Option<T>, base: &Option<T>) -> Option<T> {
    over.clone().or_else(|| base.clone())
}

impl FilterConfig {
    /// Effective filters: every field set in `repo` wins over `self`.
    pub fn merged_with(&self, repo: &FilterConfig) -> FilterConfig {
        FilterConfig {
            commits: CommitFilters {
                author: pick(&repo.commits.author, &self.commits.author),
                exclude_commit_messages_regex: pick(
                    &repo.commits.exclude_commit_messages_regex,
                    &self.commits.exclude_commit_messages_regex,
                ),
            },
            pull_requests: PullRequestFilters {
                author: pick(&repo.pull_requests.author, &self.pull_requests.author),
                state: pick(&repo.pull_requests.state, &self.pull_requests.state),
                labels: pick(&repo.pull_requests.labels, &self.pull_requests.labels),
                exclude_pull_request_titles_regex: pick(
                    &repo.pull_requests.exclude_pull_request_titles_regex,
                    &self.pull_requests.exclude_pull_request_titles_regex,
                ),
                since_filter_type: pick(
                    &repo.pull_requests.since_filter_type,
                    &self.pull_requests.since_filter_type,
                ),
            },
            issues: IssueFilters {
                author: pick(&repo.issues.author, &self.issues.author),
                milestone: pick(&repo.issues.milestone, &self.issues.milestone),
                labels: pick(&repo.issues.labels, &self.issues.labels),
                assignee: pick(&repo.issues.assignee, &self.issues.assignee),
                exclude_issue_titles_regex: pick(
                    &repo.issues.exclude_issue_titles_regex,
                    &self.issues.exclude_issue_titles_regex,
                ),
            },
            discussions: DiscussionFilters {
                author: pick(&repo.discussions.author, &self.discussions.author),
                exclude_discussion_titles_regex: pick(
                    &repo.discussions.exclude_discussion_titles_regex,
                    &self.discussions.exclude_discussion_titles_regex,
                ),
            },
        }
    }

    pub fn pr_date_basis(&self) -> DateBasis {
        self.pull_requests.since_filter_type.unwrap_or_default()
    }

    /// Compile into predicates. Fails only on an invalid regex.
    pub fn compile(&self) -> Result<CompiledFilters, ConfigError> {
        let mut commits = Vec::new();
        push_author(&mut commits, &self.commits.author);
        push_exclude(
            &mut commits,
            "commits.exclude_commit_messages_regex",
            &self.commits.exclude_commit_messages_regex,
        )?;

        let pr = &self.pull_requests;
        let mut pull_requests = Vec::new();
        push_author(&mut pull_requests, &pr.author);
        if let Some(state) = non_empty(&pr.state) {
            pull_requests.push(FilterRule::StateEquals(state.to_string()));
        }
        push_labels(&mut pull_requests, &pr.labels);
        push_exclude(
            &mut pull_requests,
            "pull_requests.exclude_pull_request_titles_regex",
            &pr.exclude_pull_request_titles_regex,
        )?;

        let iss = &self.issues;
        let mut issues = Vec::new();
        push_author(&mut issues, &iss.author);
        push_labels(&mut issues, &iss.labels);
        if let Some(milestone) = non_empty(&iss.milestone) {
            issues.push(FilterRule::MilestoneEquals(milestone.to_string()));
        }
        if let Some(assignee) = non_empty(&iss.assignee) {
            issues.push(FilterRule::AssigneeIncludes(assignee.to_string()));
        }
        push_exclude(
            &mut issues,
            "issues.exclude_issue_titles_regex",
            &iss.exclude_issue_titles_regex,
        )?;

        let mut discussions = Vec::new();
        push_author(&mut discussions, &self.discussions.author);
        push_exclude(
            &mut discussions,
            "discussions.exclude_discussion_titles_regex",
            &self.discussions.exclude_discussion_titles_regex,
        )?;

        Ok(CompiledFilters {
            commits,
            pull_requests,
            issues,
            discussions,
            pr_date_basis: self.pr_date_basis(),
        })
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|s| !s.is_empty())
}

fn push_author(rules: &mut Vec<FilterRule>, author: &Option<String>) {
    if let Some(author) = non_empty(author) {
        rules.push(FilterRule::AuthorEquals(author.to_string()));
    }
}

fn push_labels(rules: &mut Vec<FilterRule>, labels: &Option<Vec<String>>) {
    if let Some(labels) = labels.as_ref().filter(|l| !l.is_empty()) {
        rules.push(FilterRule::LabelsSubset(labels.clone()));
    }
}

fn push_exclude(
    rules: &mut Vec<FilterRule>,
    field: &str,
    pattern: &Option<String>,
) -> Result<(), ConfigError> {
    if let Some(pattern) = non_empty(pattern) {
        let re = Regex::new(pattern).map_err(|e| ConfigError::InvalidRegex {
            field: field.to_string(),
            reason: e.to_string(),
        })?;
        rules.push(FilterRule::ExcludeMatching(re));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Predicates
// ---------------------------------------------------------------------------

/// Fields a predicate can inspect. Defaults describe items that lack the field.
pub trait Filterable {
    fn author(&self) -> Option<&str>;

    /// Title, or the message headline for commits.
    fn text(&self) -> &str;

    fn timestamp(&self, basis: DateBasis) -> DateTime<Utc>;

    fn labels(&self) -> &[String] {
        &[]
    }

    fn state(&self) -> Option<&str> {
        None
    }

    fn milestone(&self) -> Option<&str> {
        None
    }

    fn assignees(&self) -> &[String] {
        &[]
    }
}

/// One compiled filter predicate. New kinds of filtering are new variants.
#[derive(Debug, Clone)]
pub enum FilterRule {
    /// Keep items by this author. Items with no known author are kept.
    AuthorEquals(String),
    /// Keep items carrying every one of these labels.
    LabelsSubset(Vec<String>),
    /// Drop items whose title/message matches.
    ExcludeMatching(Regex),
    /// Keep items in this state (case-insensitive).
    StateEquals(String),
    /// Keep items in this milestone. Items without a milestone are kept.
    MilestoneEquals(String),
    /// Keep items assigned to this user.
    AssigneeIncludes(String),
}

impl FilterRule {
    pub fn keeps<T: Filterable>(&self, item: &T) -> bool {
        match self {
            FilterRule::AuthorEquals(author) => item.author().map_or(true, |a| a == author),
            FilterRule::LabelsSubset(required) => required
                .iter()
                .all(|label| item.labels().iter().any(|have| have == label)),
            FilterRule::ExcludeMatching(re) => !re.is_match(item.text()),
            FilterRule::StateEquals(state) => item
                .state()
                .map_or(true, |s| s.eq_ignore_ascii_case(state)),
            FilterRule::MilestoneEquals(milestone) => {
                item.milestone().map_or(true, |m| m == milestone)
            }
            FilterRule::AssigneeIncludes(user) => item.assignees().iter().any(|a| a == user),
        }
    }
}

/// Compiled predicates for every item type of one repository.
#[derive(Debug, Clone, Default)]
pub struct CompiledFilters {
    pub commits: Vec<FilterRule>,
    pub pull_requests: Vec<FilterRule>,
    pub issues: Vec<FilterRule>,
    pub discussions: Vec<FilterRule>,
    pub pr_date_basis: DateBasis,
}

fn retain_matching<T: Filterable>(
    items: &mut Vec<T>,
    rules: &[FilterRule],
    since: DateTime<Utc>,
    basis: DateBasis,
) {
    items.retain(|item| item.timestamp(basis) >= since && rules.iter().all(|r| r.keeps(item)));
}

impl CompiledFilters {
    /// Drop every item older than the payload window start or rejected by a
    /// rule. Never fails.
    pub fn apply(&self, payload: &mut ActivityPayload) {
        let since = payload.window.start;
        retain_matching(&mut payload.commits, &self.commits, since, DateBasis::Created);
        retain_matching(
            &mut payload.pull_requests,
            &self.pull_requests,
            since,
            self.pr_date_basis,
        );
        retain_matching(&mut payload.issues, &self.issues, since, DateBasis::Created);
        retain_matching(
            &mut payload.discussions,
            &self.discussions,
            since,
            DateBasis::Created,
        );
    }

    pub fn rule_count(&self) -> usize {
        self.commits.len() + self.pull_requests.len() + self.issues.len() + self.discussions.len()
    }
}

impl Filterable for Commit {
    fn author(&self) -> Option<&str> {
        self.author.as_deref()
    }

    fn text(&self) -> &str {
        &self.message
    }

    fn timestamp(&self, _basis: DateBasis) -> DateTime<Utc> {
        self.date
    }
}

impl Filterable for PullRequest {
    fn author(&self) -> Option<&str> {
        self.author.as_deref()
    }

    fn text(&self) -> &str {
        &self.title
    }

    fn timestamp(&self, basis: DateBasis) -> DateTime<Utc> {
        match basis {
            DateBasis::Created => self.created_at,
            DateBasis::Updated => self.updated_at,
        }
    }

    fn labels(&self) -> &[String] {
        &self.labels
    }

    fn state(&self) -> Option<&str> {
        Some(&self.state)
    }
}

impl Filterable for Issue {
    fn author(&self) -> Option<&str> {
        self.author.as_deref()
    }

    fn text(&self) -> &str {
        &self.title
    }

    fn timestamp(&self, _basis: DateBasis) -> DateTime<Utc> {
        self.created_at
    }

    fn labels(&self) -> &[String] {
        &self.labels
    }

    fn state(&self) -> Option<&str> {
        Some(&self.state)
    }

    fn milestone(&self) -> Option<&str> {
        self.milestone.as_deref()
    }

    fn assignees(&self) -> &[String] {
        &self.assignees
    }
}

impl Filterable for Discussion {
    fn author(&self) -> Option<&str> {
        self.author.as_deref()
    }

    fn text(&self) -> &str {
        &self.title
    }

    fn timestamp(&self, _basis: DateBasis) -> DateTime<Utc> {
        self.created_at
    }

    fn labels(&self) -> &[String] {
        &self.labels
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::activity::TimeWindow;
    use crate::domain::repo::RepoId;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 5, 1, 0, 0, 0).unwrap()
    }

    fn pr(number: u64, title: &str, author: &str, labels: &[&str], updated_days: i64) -> PullRequest {
        PullRequest {
            number,
            title: title.to_string(),
            body: None,
            author: Some(author.to_string()),
            state: "OPEN".to_string(),
            created_at: t0() - Duration::days(30),
            updated_at: t0() + Duration::days(updated_days),
            merged_at: None,
            html_url: format!("https://github.com/o/r/pull/{number}"),
            labels: labels.iter().map(|l| l.to_string()).collect(),
        }
    }

    fn issue(number: u64, milestone: Option<&str>, assignees: &[&str]) -> Issue {
        Issue {
            number,
            title: format!("issue {number}"),
            body: None,
            author: Some("ann".into()),
            state: "OPEN".into(),
            created_at: t0() + Duration::hours(1),
            html_url: String::new(),
            labels: vec![],
            milestone: milestone.map(str::to_string),
            assignees: assignees.iter().map(|a| a.to_string()).collect(),
        }
    }

    fn payload() -> ActivityPayload {
        ActivityPayload::empty(
            RepoId::parse("o/r").unwrap(),
            TimeWindow {
                start: t0(),
                end: t0() + Duration::days(7),
            },
        )
    }

    #[test]
    fn merge_prefers_repo_fields_individually() {
        let global = FilterConfig {
            pull_requests: PullRequestFilters {
                author: Some("global-bot".into()),
                state: Some("OPEN".into()),
                ..Default::default()
            },
            ..Default::default()
        };
        let repo = FilterConfig {
            pull_requests: PullRequestFilters {
                author: Some("alice".into()),
                since_filter_type: Some(DateBasis::Created),
                ..Default::default()
            },
            ..Default::default()
        };

        let merged = global.merged_with(&repo);
        assert_eq!(merged.pull_requests.author.as_deref(), Some("alice"));
        assert_eq!(merged.pull_requests.state.as_deref(), Some("OPEN"));
        assert_eq!(merged.pr_date_basis(), DateBasis::Created);
        assert_eq!(FilterConfig::default().pr_date_basis(), DateBasis::Updated);
    }

    #[test]
    fn compile_rejects_bad_regex() {
        let cfg = FilterConfig {
            issues: IssueFilters {
                exclude_issue_titles_regex: Some("([".into()),
                ..Default::default()
            },
            ..Default::default()
        };
        match cfg.compile() {
            Err(ConfigError::InvalidRegex { field, .. }) => {
                assert_eq!(field, "issues.exclude_issue_titles_regex")
            }
            other => panic!("expected InvalidRegex, got {other:?}"),
        }
    }

    #[test]
    fn empty_values_compile_to_no_rules() {
        let cfg = FilterConfig {
            commits: CommitFilters {
                author: Some(String::new()),
                exclude_commit_messages_regex: Some(String::new()),
            },
            pull_requests: PullRequestFilters {
                labels: Some(vec![]),
                ..Default::default()
            },
            ..Default::default()
        };
        assert_eq!(cfg.compile().unwrap().rule_count(), 0);
    }

    #[test]
    fn pull_request_rules_and_date_basis() {
        let cfg = FilterConfig {
            pull_requests: PullRequestFilters {
                labels: Some(vec!["bug".into(), "p1".into()]),
                exclude_pull_request_titles_regex: Some("^chore".into()),
                ..Default::default()
            },
            ..Default::default()
        };
        let rules = cfg.compile().unwrap();

        let mut p = payload();
        p.pull_requests = vec![
            pr(1, "fix crash", "ann", &["bug", "p1", "ui"], 1),
            pr(2, "fix other", "ann", &["bug"], 1),
            pr(3, "chore: bump", "bot", &["bug", "p1"], 1),
            pr(4, "old fix", "ann", &["bug", "p1"], -1),
        ];
        rules.apply(&mut p);
        let kept: Vec<u64> = p.pull_requests.iter().map(|pr| pr.number).collect();
        assert_eq!(kept, vec![1]);

        // created-basis: every PR was created 30 days before the window
        let created = FilterConfig {
            pull_requests: PullRequestFilters {
                since_filter_type: Some(DateBasis::Created),
                ..Default::default()
            },
            ..Default::default()
        }
        .compile()
        .unwrap();
        let mut p = payload();
        p.pull_requests = vec![pr(1, "a", "ann", &[], 1)];
        created.apply(&mut p);
        assert!(p.pull_requests.is_empty());
    }

    #[test]
    fn author_and_state_rules() {
        let rules = FilterConfig {
            pull_requests: PullRequestFilters {
                author: Some("ann".into()),
                state: Some("open".into()),
                ..Default::default()
            },
            ..Default::default()
        }
        .compile()
        .unwrap();

        let mut anonymous = pr(3, "ghost", "x", &[], 1);
        anonymous.author = None;
        let mut merged = pr(4, "merged", "ann", &[], 1);
        merged.state = "MERGED".into();

        let mut p = payload();
        p.pull_requests = vec![pr(1, "a", "ann", &[], 1), pr(2, "b", "bob", &[], 1), anonymous, merged];
        rules.apply(&mut p);
        let kept: Vec<u64> = p.pull_requests.iter().map(|pr| pr.number).collect();
        assert_eq!(kept, vec![1, 3]);
    }

    #[test]
    fn issue_milestone_and_assignee_rules() {
        let rules = FilterConfig {
            issues: IssueFilters {
                milestone: Some("v1".into()),
                assignee: Some("ann".into()),
                ..Default::default()
            },
            ..Default::default()
        }
        .compile()
        .unwrap();

        let mut p = payload();
        p.issues = vec![
            issue(1, Some("v1"), &["ann", "bob"]),
            issue(2, Some("v2"), &["ann"]),
            issue(3, None, &["ann"]),
            issue(4, Some("v1"), &[]),
        ];
        rules.apply(&mut p);
        let kept: Vec<u64> = p.issues.iter().map(|i| i.number).collect();
        assert_eq!(kept, vec![1, 3]);
    }

    #[test]
    fn commit_message_exclusion_and_since() {
        let rules = FilterConfig {
            commits: CommitFilters {
                exclude_commit_messages_regex: Some("(?i)^merge".into()),
                ..Default::default()
            },
            ..Default::default()
        }
        .compile()
        .unwrap();

        let commit = |sha: &str, msg: &str, offset_h: i64| Commit {
            sha: sha.into(),
            author: Some("ann".into()),
            message: msg.into(),
            date: t0() + Duration::hours(offset_h),
            html_url: String::new(),
        };
        let mut p = payload();
        p.commits = vec![
            commit("a", "Add feature", 2),
            commit("b", "Merge branch main", 2),
            commit("c", "Add older feature", -2),
            commit("d", "Boundary", 0),
        ];
        rules.apply(&mut p);
        let kept: Vec<&str> = p.commits.iter().map(|c| c.sha.as_str()).collect();
        assert_eq!(kept, vec!["a", "d"]);
    }
}
