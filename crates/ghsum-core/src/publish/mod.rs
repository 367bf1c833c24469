//! Output publishing: raw payload JSON, markdown summaries and the feed.

pub mod artifacts;
pub mod feed;

use std::path::PathBuf;

use async_trait::async_trait;

use crate::collab::{PublishReceipt, PublishRequest, Publisher};
use crate::config::Config;
use crate::domain::PublishError;

pub use feed::{render_rss, FeedChannel, FeedSink};

/// Filesystem publisher.
///
/// Steps run in order (json, markdown, feed); the first failure aborts the
/// rest and files already written stay in place.
pub struct OutputPublisher {
    output_dir: PathBuf,
    feed: Option<FeedSink>,
}

impl OutputPublisher {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            feed: None,
        }
    }

    pub fn with_feed(mut self, feed: FeedSink) -> Self {
        self.feed = Some(feed);
        self
    }

    pub fn from_config(config: &Config) -> Self {
        let publisher = Self::new(config.output_dir.clone());
        match &config.rss {
            Some(rss) => {
                let feed = FeedSink::from_config(rss, &config.output_dir);
                publisher.with_feed(feed)
            }
            None => publisher,
        }
    }

    pub fn output_dir(&self) -> &std::path::Path {
        &self.output_dir
    }
}

#[async_trait]
impl Publisher for OutputPublisher {
    async fn publish(&self, request: PublishRequest<'_>) -> Result<PublishReceipt, PublishError> {
        let repo = &request.payload.repo;
        let mut receipt = PublishReceipt::default();

        if request.flags.json {
            let path = artifacts::write_json(&self.output_dir, request.payload).await?;
            receipt.written.push(path);
        }

        if let Some(summary) = request.summary {
            if request.flags.markdown {
                let path = artifacts::write_markdown(&self.output_dir, repo, summary).await?;
                receipt.written.push(path);
            }
            if let Some(feed) = &self.feed {
                let path = feed.append(repo, summary, request.completed_at).await?;
                receipt.written.push(path);
            }
        }

        Ok(receipt)
    }
}
