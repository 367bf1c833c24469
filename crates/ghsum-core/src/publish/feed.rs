//! RSS 2.0 feed rendered from the summary cache.

use std::io::Cursor;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use ghsum_state::{CacheEntry, JsonSummaryCache};
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use tokio::sync::Mutex;
use tracing::info;

use crate::config::RssConfig;
use crate::domain::{PublishError, RepoId};

use super::artifacts::write_file;

/// Channel-level metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedChannel {
    pub title: String,
    pub link: String,
    pub description: String,
}

impl From<&RssConfig> for FeedChannel {
    fn from(rss: &RssConfig) -> Self {
        Self {
            title: rss.title.clone(),
            link: rss.link.clone(),
            description: rss.description.clone(),
        }
    }
}

type XmlWriter = Writer<Cursor<Vec<u8>>>;

fn feed_err(e: impl std::fmt::Display) -> PublishError {
    PublishError::Feed(e.to_string())
}

fn write(writer: &mut XmlWriter, event: Event<'_>) -> Result<(), PublishError> {
    writer.write_event(event).map_err(feed_err)
}

fn text_element(writer: &mut XmlWriter, name: &str, text: &str) -> Result<(), PublishError> {
    write(writer, Event::Start(BytesStart::new(name)))?;
    write(writer, Event::Text(BytesText::new(text)))?;
    write(writer, Event::End(BytesEnd::new(name)))
}

/// Render `entries` (expected newest first) as an RSS 2.0 document.
pub fn render_rss(channel: &FeedChannel, entries: &[CacheEntry]) -> Result<String, PublishError> {
    let mut writer = Writer::new_with_indent(Cursor::new(Vec::new()), b' ', 2);

    write(&mut writer, Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
    write(
        &mut writer,
        Event::Start(BytesStart::new("rss").with_attributes([("version", "2.0")])),
    )?;
    write(&mut writer, Event::Start(BytesStart::new("channel")))?;
    text_element(&mut writer, "title", &channel.title)?;
    text_element(&mut writer, "link", &channel.link)?;
    text_element(&mut writer, "description", &channel.description)?;
    if let Some(newest) = entries.first() {
        text_element(&mut writer, "lastBuildDate", &newest.timestamp.to_rfc2822())?;
    }

    for entry in entries {
        write(&mut writer, Event::Start(BytesStart::new("item")))?;
        text_element(&mut writer, "title", &entry.title)?;
        text_element(&mut writer, "link", &entry.link)?;
        write(
            &mut writer,
            Event::Start(BytesStart::new("guid").with_attributes([("isPermaLink", "false")])),
        )?;
        write(&mut writer, Event::Text(BytesText::new(&entry.id)))?;
        write(&mut writer, Event::End(BytesEnd::new("guid")))?;
        text_element(&mut writer, "description", &entry.content)?;
        text_element(&mut writer, "pubDate", &entry.timestamp.to_rfc2822())?;
        write(&mut writer, Event::End(BytesEnd::new("item")))?;
    }

    write(&mut writer, Event::End(BytesEnd::new("channel")))?;
    write(&mut writer, Event::End(BytesEnd::new("rss")))?;

    String::from_utf8(writer.into_inner().into_inner()).map_err(feed_err)
}

/// Summary cache plus the feed file rendered from it.
pub struct FeedSink {
    cache: JsonSummaryCache,
    channel: FeedChannel,
    path: PathBuf,
    lock: Mutex<()>,
}

impl FeedSink {
    pub fn new(cache: JsonSummaryCache, channel: FeedChannel, path: impl Into<PathBuf>) -> Self {
        Self {
            cache,
            channel,
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn from_config(rss: &RssConfig, output_dir: &std::path::Path) -> Self {
        let cache = JsonSummaryCache::new(rss.cache_file.clone()).with_max_entries(rss.max_entries);
        Self::new(cache, FeedChannel::from(rss), output_dir.join(&rss.filename))
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    /// Record a summary and rewrite the whole feed.
    pub async fn append(
        &self,
        repo: &RepoId,
        summary: &str,
        at: DateTime<Utc>,
    ) -> Result<PathBuf, PublishError> {
        let _guard = self.lock.lock().await;
        let entries = self
            .cache
            .add(CacheEntry::for_repo(&repo.to_string(), summary, at))
            .await?;
        let xml = render_rss(&self.channel, &entries)?;
        let path = write_file(self.path.clone(), xml.into_bytes()).await?;
        info!(path = %path.display(), entries = entries.len(), "feed updated");
        Ok(path)
    }
}
