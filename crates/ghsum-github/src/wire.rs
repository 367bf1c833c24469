//! Response shapes and their conversion into domain items.

use chrono::{DateTime, Utc};
use serde::Deserialize;

use ghsum_core::domain::{Commit, Discussion, Issue, PullRequest};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageInfo {
    pub end_cursor: Option<String>,
    pub has_next_page: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(bound(deserialize = "N: Deserialize<'de>"))]
pub struct Connection<N> {
    pub page_info: PageInfo,
    #[serde(default)]
    pub nodes: Vec<Option<N>>,
}

#[derive(Debug, Deserialize)]
pub struct GraphQlError {
    pub message: String,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct GraphQlResponse {
    #[serde(default)]
    pub data: Option<serde_json::Value>,
    #[serde(default)]
    pub errors: Vec<GraphQlError>,
}

#[derive(Debug, Deserialize)]
pub struct Actor {
    pub login: String,
}

#[derive(Debug, Deserialize)]
pub struct Named {
    pub name: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct NameList {
    #[serde(default)]
    pub nodes: Vec<Option<Named>>,
}

impl NameList {
    fn into_names(self) -> Vec<String> {
        self.nodes.into_iter().flatten().map(|n| n.name).collect()
    }
}

#[derive(Debug, Deserialize)]
pub struct GitActor {
    pub name: Option<String>,
    pub date: Option<DateTime<Utc>>,
    pub user: Option<Actor>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitNode {
    pub oid: String,
    pub message_headline: String,
    pub committed_date: DateTime<Utc>,
    pub author: Option<GitActor>,
    pub url: String,
}

impl From<CommitNode> for Commit {
    fn from(node: CommitNode) -> Self {
        let (author, date) = match node.author {
            Some(actor) => (actor.name, actor.date.unwrap_or(node.committed_date)),
            None => (None, node.committed_date),
        };
        Commit {
            sha: node.oid,
            author,
            message: node.message_headline,
            date,
            html_url: node.url,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullRequestNode {
    pub number: u64,
    pub title: String,
    pub body: Option<String>,
    pub author: Option<Actor>,
    pub state: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub merged_at: Option<DateTime<Utc>>,
    pub url: String,
    #[serde(default)]
    pub labels: Option<NameList>,
}

impl From<PullRequestNode> for PullRequest {
    fn from(node: PullRequestNode) -> Self {
        PullRequest {
            number: node.number,
            title: node.title,
            body: node.body,
            author: node.author.map(|a| a.login),
            state: node.state,
            created_at: node.created_at,
            updated_at: node.updated_at,
            merged_at: node.merged_at,
            html_url: node.url,
            labels: node.labels.unwrap_or_default().into_names(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct MilestoneRef {
    pub title: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct ActorList {
    #[serde(default)]
    pub nodes: Vec<Option<Actor>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssueNode {
    pub number: u64,
    pub title: String,
    pub body: Option<String>,
    pub author: Option<Actor>,
    pub state: String,
    pub created_at: DateTime<Utc>,
    pub url: String,
    #[serde(default)]
    pub labels: Option<NameList>,
    #[serde(default)]
    pub milestone: Option<MilestoneRef>,
    #[serde(default)]
    pub assignees: Option<ActorList>,
}

impl From<IssueNode> for Issue {
    fn from(node: IssueNode) -> Self {
        Issue {
            number: node.number,
            title: node.title,
            body: node.body,
            author: node.author.map(|a| a.login),
            state: node.state,
            created_at: node.created_at,
            html_url: node.url,
            labels: node.labels.unwrap_or_default().into_names(),
            milestone: node.milestone.map(|m| m.title),
            assignees: node
                .assignees
                .unwrap_or_default()
                .nodes
                .into_iter()
                .flatten()
                .map(|a| a.login)
                .collect(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscussionNode {
    pub id: String,
    pub title: String,
    pub body: Option<String>,
    pub author: Option<Actor>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub url: String,
    #[serde(default)]
    pub labels: Option<NameList>,
}

impl From<DiscussionNode> for Discussion {
    fn from(node: DiscussionNode) -> Self {
        Discussion {
            id: node.id,
            title: node.title,
            body: node.body,
            author: node.author.map(|a| a.login),
            created_at: node.created_at,
            html_url: node.url,
            labels: node.labels.unwrap_or_default().into_names(),
        }
    }
}
