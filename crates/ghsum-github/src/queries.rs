//! GraphQL documents sent to the GitHub API.
//!
//! Every paginated query takes a `$cursor` and returns a connection with
//! `pageInfo { endCursor hasNextPage }` and `nodes`.

pub const COMMITS: &str = r#"
query($owner: String!, $repo: String!, $since: GitTimestamp, $cursor: String) {
  repository(owner: $owner, name: $repo) {
    defaultBranchRef {
      target {
        ... on Commit {
          history(first: 100, after: $cursor, since: $since) {
            pageInfo { endCursor hasNextPage }
            nodes {
              oid
              messageHeadline
              committedDate
              author { name date user { login } }
              url
            }
          }
        }
      }
    }
  }
}
"#;

pub const COMMITS_PATH: &str = "/repository/defaultBranchRef/target/history";

pub const PULL_REQUESTS: &str = r#"
query($owner: String!, $repo: String!, $states: [PullRequestState!], $labels: [String!], $cursor: String) {
  repository(owner: $owner, name: $repo) {
    pullRequests(first: 100, after: $cursor, orderBy: {field: UPDATED_AT, direction: DESC}, states: $states, labels: $labels) {
      pageInfo { endCursor hasNextPage }
      nodes {
        number
        title
        body
        author { login }
        state
        createdAt
        updatedAt
        mergedAt
        url
        labels(first: 20) { nodes { name } }
      }
    }
  }
}
"#;

pub const PULL_REQUESTS_PATH: &str = "/repository/pullRequests";

pub const ISSUES: &str = r#"
query($searchQuery: String!, $cursor: String) {
  search(query: $searchQuery, type: ISSUE, first: 100, after: $cursor) {
    pageInfo { endCursor hasNextPage }
    nodes {
      ... on Issue {
        number
        title
        body
        author { login }
        state
        createdAt
        url
        labels(first: 20) { nodes { name } }
        milestone { title }
        assignees(first: 10) { nodes { login } }
      }
    }
  }
}
"#;

pub const ISSUES_PATH: &str = "/search";

pub const DISCUSSIONS: &str = r#"
query($owner: String!, $repo: String!, $cursor: String) {
  repository(owner: $owner, name: $repo) {
    discussions(first: 100, after: $cursor, orderBy: {field: UPDATED_AT, direction: DESC}) {
      pageInfo { endCursor hasNextPage }
      nodes {
        id
        title
        body
        author { login }
        createdAt
        updatedAt
        url
        labels(first: 20) { nodes { name } }
      }
    }
  }
}
"#;

pub const DISCUSSIONS_PATH: &str = "/repository/discussions";

pub const LABELS: &str = r#"
query($owner: String!, $repo: String!, $cursor: String) {
  repository(owner: $owner, name: $repo) {
    labels(first: 100, after: $cursor) {
      pageInfo { endCursor hasNextPage }
      nodes { name }
    }
  }
}
"#;

pub const LABELS_PATH: &str = "/repository/labels";
