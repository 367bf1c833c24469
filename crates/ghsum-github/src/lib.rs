//! ghsum-github: GitHub activity fetcher
//!
//! Implements `ghsum_core::ActivityFetcher` over the GitHub GraphQL API:
//! commits on the default branch, pull requests, issues (through search)
//! and discussions, each paginated 100 at a time up to a page limit.

mod client;
pub mod queries;
mod wire;

pub use client::{github_time, issue_search_query, GitHubClient, GitHubClientConfig, RateLimit};
