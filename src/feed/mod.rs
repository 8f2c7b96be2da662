// src/feed/mod.rs
//! Feed reader: fetches a feed document over HTTP and turns it into an
//! ordered list of [`FeedItem`]s. RSS 2.0, Atom and JSON Feed are recognised
//! by sniffing the payload.

pub mod atom;
pub mod json_feed;
pub mod rss;

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use metrics::{counter, histogram};
use time::format_description::well_known::{Rfc2822, Rfc3339};
use time::OffsetDateTime;

use crate::config::HttpConfig;

/// One entry as read from the feed, before normalization.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct FeedItem {
    /// Feed-supplied GUID, falling back to the link.
    pub guid: String,
    pub title: Option<String>,
    pub summary: Option<String>,
    /// Raw (possibly HTML) body; `content:encoded` wins over `description`.
    pub content: Option<String>,
    pub link: Option<String>,
    pub author: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub categories: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedFormat {
    Rss,
    Atom,
    JsonFeed,
}

#[async_trait]
pub trait FeedReader: Send + Sync {
    /// Fetch and parse the feed at `url`, preserving document order.
    async fn fetch_feed(&self, url: &str) -> Result<Vec<FeedItem>>;
    /// Fetch a linked page for full-text extraction.
    async fn fetch_page(&self, url: &str) -> Result<String>;
}

/// Resolve the natural key of an entry: GUID first, link second.
pub(crate) fn resolve_guid(guid: Option<&str>, link: Option<&str>) -> Option<String> {
    guid.map(str::trim)
        .filter(|g| !g.is_empty())
        .or_else(|| link.map(str::trim).filter(|l| !l.is_empty()))
        .map(str::to_string)
}

/// Parse RFC 2822 (RSS) or RFC 3339 (Atom, JSON Feed) timestamps.
pub fn parse_feed_date(ts: &str) -> Option<DateTime<Utc>> {
    let ts = ts.trim();
    if ts.is_empty() {
        return None;
    }
    let unix = OffsetDateTime::parse(ts, &Rfc2822)
        .or_else(|_| OffsetDateTime::parse(ts, &Rfc3339))
        .map(|dt| dt.unix_timestamp())
        .ok()
        // "GMT"/"EST" style zones are obsolete in RFC 2822 but common in feeds.
        .or_else(|| {
            DateTime::parse_from_rfc2822(ts)
                .ok()
                .map(|dt| dt.timestamp())
        })?;
    DateTime::<Utc>::from_timestamp(unix, 0)
}

pub fn detect_format(body: &str) -> Option<FeedFormat> {
    let head = body.trim_start_matches('\u{feff}').trim_start();
    if head.starts_with('{') {
        return Some(FeedFormat::JsonFeed);
    }
    // Look past the prolog and comments for the root element.
    let sniff: String = head.chars().take(2048).collect();
    if sniff.contains("<rss") {
        Some(FeedFormat::Rss)
    } else if sniff.contains("<feed") {
        Some(FeedFormat::Atom)
    } else {
        None
    }
}

/// Parse a feed document of any supported format.
pub fn parse_feed(body: &str) -> Result<Vec<FeedItem>> {
    let t0 = std::time::Instant::now();
    let format = detect_format(body).ok_or_else(|| anyhow!("unrecognised feed document"))?;
    let items = match format {
        FeedFormat::Rss => rss::parse(body),
        FeedFormat::Atom => atom::parse(body),
        FeedFormat::JsonFeed => json_feed::parse(body),
    }?;

    let ms = t0.elapsed().as_secs_f64() * 1_000.0;
    histogram!("feed_parse_ms").record(ms);
    counter!("feed_items_parsed_total").increment(items.len() as u64);
    Ok(items)
}

/// Replace HTML-only named entities that XML parsers reject.
pub(crate) fn scrub_html_entities_for_xml(s: &str) -> String {
    s.replace("&nbsp;", "&#160;")
        .replace("&ndash;", "-")
        .replace("&mdash;", "-")
        .replace("&ldquo;", "\"")
        .replace("&rdquo;", "\"")
        .replace("&lsquo;", "'")
        .replace("&rsquo;", "'")
        .replace("&hellip;", "...")
}

/// Reader backed by `reqwest`.
pub struct HttpFeedReader {
    client: reqwest::Client,
}

impl HttpFeedReader {
    pub fn new(cfg: &HttpConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(cfg.user_agent.clone())
            .connect_timeout(Duration::from_secs(cfg.connect_timeout_secs))
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()
            .context("building feed http client")?;
        Ok(Self { client })
    }

    async fn get_text(&self, url: &str) -> Result<String> {
        let resp = match self.client.get(url).send().await {
            Ok(resp) => resp,
            Err(e) => {
                tracing::warn!(target: "feed", error = ?e, url, "feed http error");
                counter!("feed_http_errors_total").increment(1);
                return Err(e).with_context(|| format!("GET {url}"));
            }
        };
        let status = resp.status();
        if !status.is_success() {
            counter!("feed_http_errors_total").increment(1);
            bail!("HTTP {status} for {url}");
        }
        resp.text()
            .await
            .with_context(|| format!("reading body of {url}"))
    }
}

#[async_trait]
impl FeedReader for HttpFeedReader {
    async fn fetch_feed(&self, url: &str) -> Result<Vec<FeedItem>> {
        let body = self.get_text(url).await?;
        parse_feed(&body).with_context(|| format!("parsing feed {url}"))
    }

    async fn fetch_page(&self, url: &str) -> Result<String> {
        self.get_text(url).await
    }
}

/// Reader serving canned documents; used by tests and local runs.
#[derive(Debug, Default)]
pub struct FixtureFeedReader {
    feeds: std::sync::RwLock<HashMap<String, String>>,
    pages: std::sync::RwLock<HashMap<String, String>>,
}

impl FixtureFeedReader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_feed(self, url: &str, body: &str) -> Self {
        self.set_feed(url, body);
        self
    }

    pub fn with_page(self, url: &str, html: &str) -> Self {
        self.pages
            .write()
            .expect("fixture lock poisoned")
            .insert(url.to_string(), html.to_string());
        self
    }

    /// Replace the document served for `url`.
    pub fn set_feed(&self, url: &str, body: &str) {
        self.feeds
            .write()
            .expect("fixture lock poisoned")
            .insert(url.to_string(), body.to_string());
    }

    pub fn remove_feed(&self, url: &str) {
        self.feeds.write().expect("fixture lock poisoned").remove(url);
    }
}

#[async_trait]
impl FeedReader for FixtureFeedReader {
    async fn fetch_feed(&self, url: &str) -> Result<Vec<FeedItem>> {
        let body = self
            .feeds
            .read()
            .expect("fixture lock poisoned")
            .get(url)
            .cloned()
            .ok_or_else(|| anyhow!("no fixture feed for {url}"))?;
        parse_feed(&body).with_context(|| format!("parsing fixture feed {url}"))
    }

    async fn fetch_page(&self, url: &str) -> Result<String> {
        self.pages
            .read()
            .expect("fixture lock poisoned")
            .get(url)
            .cloned()
            .ok_or_else(|| anyhow!("no fixture page for {url}"))
    }
}
