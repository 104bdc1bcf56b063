//! Syndication feed reader.
//!
//! Fetches one RSS or Atom document, pulls item blocks out by structural
//! pattern, and normalises each into a [`SourceItem`]. Items older than the
//! freshness window are dropped; items without a usable date are kept.
//!
//! Fetch failures never reach the caller: they are logged and the feed
//! simply contributes nothing to the run.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::BoxError;
use crate::config::FeedSource;
use crate::models::SourceItem;
use crate::utils::{strip_markup, truncate_chars};

/// Items older than this are discarded.
pub const FRESHNESS_WINDOW_HOURS: i64 = 48;
/// At most this many items are kept per feed.
pub const MAX_ITEMS_PER_FEED: usize = 10;
/// Snippets are cut to this many characters.
pub const MAX_SNIPPET_CHARS: usize = 500;

static ITEM_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<item\b[^>]*>(.*?)</item>").expect("valid item regex"));
static ENTRY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<entry\b[^>]*>(.*?)</entry>").expect("valid entry regex"));
static ATOM_HREF_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?is)<link\b[^>]*\bhref\s*=\s*["']([^"']+)["']"#).expect("valid href regex")
});

/// Contract the gatherer relies on; the HTTP reader is the production one.
#[async_trait]
pub trait FeedReader: Send + Sync {
    /// Read `feed`, returning at most [`MAX_ITEMS_PER_FEED`] fresh items.
    /// Never fails: problems yield an empty list.
    async fn read(&self, feed: &FeedSource) -> Vec<SourceItem>;
}

/// Reads feeds over HTTP with a bounded timeout and a distinct user agent.
#[derive(Debug, Clone)]
pub struct HttpFeedReader {
    client: Client,
}

impl HttpFeedReader {
    pub fn new(timeout: Duration, user_agent: &str) -> Result<Self, BoxError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .build()?;
        Ok(Self { client })
    }

    async fn fetch(&self, url: &str) -> Result<String, BoxError> {
        let res = self.client.get(url).send().await?.error_for_status()?;
        Ok(res.text().await?)
    }
}

#[async_trait]
impl FeedReader for HttpFeedReader {
    #[instrument(level = "info", skip_all, fields(url = %feed.url, category = %feed.category))]
    async fn read(&self, feed: &FeedSource) -> Vec<SourceItem> {
        match self.fetch(&feed.url).await {
            Ok(body) => {
                let items = parse_feed(&body, &source_name(&feed.url), Utc::now());
                info!(count = items.len(), "Parsed feed");
                items
            }
            Err(e) => {
                warn!(error = %e, "Feed fetch failed; skipping feed");
                Vec::new()
            }
        }
    }
}

/// Display name for a feed: its host without a leading `www.` / `feeds.`.
pub fn source_name(feed_url: &str) -> String {
    Url::parse(feed_url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_string()))
        .map(|host| {
            host.trim_start_matches("www.")
                .trim_start_matches("feeds.")
                .to_string()
        })
        .unwrap_or_else(|| feed_url.to_string())
}

/// Parse an RSS or Atom document into fresh, bounded [`SourceItem`]s.
pub fn parse_feed(xml: &str, source_name: &str, now: DateTime<Utc>) -> Vec<SourceItem> {
    let is_rss = ITEM_RE.is_match(xml);
    let blocks: Vec<&str> = if is_rss {
        ITEM_RE
            .captures_iter(xml)
            .filter_map(|c| c.get(1).map(|m| m.as_str()))
            .collect()
    } else {
        ENTRY_RE
            .captures_iter(xml)
            .filter_map(|c| c.get(1).map(|m| m.as_str()))
            .collect()
    };

    let cutoff = now - ChronoDuration::hours(FRESHNESS_WINDOW_HOURS);

    blocks
        .into_iter()
        .filter_map(|block| {
            let item = if is_rss {
                parse_rss_item(block, source_name)
            } else {
                parse_atom_entry(block, source_name)
            }?;
            match item.1 {
                Some(published) if published < cutoff => {
                    debug!(title = %item.0.title, %published, "Dropping stale feed item");
                    None
                }
                _ => Some(item.0),
            }
        })
        .take(MAX_ITEMS_PER_FEED)
        .collect()
}

type ParsedItem = (SourceItem, Option<DateTime<Utc>>);

fn parse_rss_item(block: &str, source_name: &str) -> Option<ParsedItem> {
    let title = tag_text(block, "title")?;
    let url = tag_text(block, "link").or_else(|| tag_text(block, "guid"))?;
    let description = tag_raw(block, "description")
        .or_else(|| tag_raw(block, "content:encoded"))
        .map(strip_markup)
        .unwrap_or_default();
    let published = tag_text(block, "pubDate")
        .or_else(|| tag_text(block, "dc:date"))
        .and_then(|raw| parse_date(&raw));
    Some(build_item(title, url, description, published, source_name))
}

fn parse_atom_entry(block: &str, source_name: &str) -> Option<ParsedItem> {
    let title = tag_text(block, "title")?;
    let url = ATOM_HREF_RE
        .captures(block)
        .and_then(|c| c.get(1))
        .map(|m| strip_markup(m.as_str()))?;
    let description = tag_raw(block, "summary")
        .or_else(|| tag_raw(block, "content"))
        .map(strip_markup)
        .unwrap_or_default();
    let published = tag_text(block, "published")
        .or_else(|| tag_text(block, "updated"))
        .and_then(|raw| parse_date(&raw));
    Some(build_item(title, url, description, published, source_name))
}

fn build_item(
    title: String,
    url: String,
    description: String,
    published: Option<DateTime<Utc>>,
    source_name: &str,
) -> ParsedItem {
    let item = SourceItem {
        url,
        title,
        snippet: truncate_chars(&description, MAX_SNIPPET_CHARS),
        source_name: source_name.to_string(),
        publish_date: published.map(|d| d.to_rfc3339()),
    };
    (item, published)
}

/// Inner markup of the first `<tag>…</tag>` in `block`, untouched.
fn tag_raw<'a>(block: &'a str, tag: &str) -> Option<&'a str> {
    let open = format!("<{tag}");
    let close = format!("</{tag}>");
    let mut search_from = 0;
    while let Some(rel) = block[search_from..].find(&open) {
        let start = search_from + rel;
        let after_name = start + open.len();
        // Reject longer tag names sharing the prefix (`<link` vs `<linkage`).
        match block[after_name..].chars().next() {
            Some(c) if c == '>' || c == '/' || c.is_whitespace() => {}
            _ => {
                search_from = after_name;
                continue;
            }
        }
        let gt = after_name + block[after_name..].find('>')?;
        if block[..gt].ends_with('/') {
            return None;
        }
        let end = gt + 1 + block[gt + 1..].find(&close)?;
        return Some(&block[gt + 1..end]);
    }
    None
}

/// Text content of the first `<tag>`, stripped of markup, or `None` if blank.
fn tag_text(block: &str, tag: &str) -> Option<String> {
    tag_raw(block, tag)
        .map(strip_markup)
        .filter(|s| !s.is_empty())
}

/// Parse RFC 2822 (RSS) or RFC 3339 (Atom) dates.
fn parse_date(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(raw.trim())
        .or_else(|_| DateTime::parse_from_rfc3339(raw.trim()))
        .map(|d| d.with_timezone(&Utc))
        .ok()
}
