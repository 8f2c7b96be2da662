// src/feed/json_feed.rs
//! JSON Feed 1.0 / 1.1.

use anyhow::{Context, Result};
use serde::Deserialize;

use super::{parse_feed_date, resolve_guid, FeedItem};

#[derive(Debug, Deserialize)]
struct JsonFeed {
    #[serde(default)]
    items: Vec<JsonItem>,
}

#[derive(Debug, Deserialize)]
struct Author {
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct JsonItem {
    // Declared as a string, but numeric ids occur in the wild.
    id: Option<serde_json::Value>,
    url: Option<String>,
    title: Option<String>,
    summary: Option<String>,
    content_html: Option<String>,
    content_text: Option<String>,
    date_published: Option<String>,
    date_modified: Option<String>,
    /// 1.0
    author: Option<Author>,
    /// 1.1
    #[serde(default)]
    authors: Vec<Author>,
    #[serde(default)]
    tags: Vec<String>,
}

fn id_string(v: Option<serde_json::Value>) -> Option<String> {
    match v? {
        serde_json::Value::String(s) => Some(s),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn non_empty(s: Option<String>) -> Option<String> {
    s.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

pub(crate) fn parse(s: &str) -> Result<Vec<FeedItem>> {
    let feed: JsonFeed = serde_json::from_str(s).context("parsing json feed")?;

    let mut out = Vec::with_capacity(feed.items.len());
    for it in feed.items {
        let link = non_empty(it.url);
        let id = non_empty(id_string(it.id));
        let Some(guid) = resolve_guid(id.as_deref(), link.as_deref()) else {
            tracing::debug!(target: "feed", "json feed item without id or url skipped");
            continue;
        };

        let author = it
            .authors
            .into_iter()
            .chain(it.author)
            .find_map(|a| non_empty(a.name));

        out.push(FeedItem {
            guid,
            title: non_empty(it.title),
            summary: non_empty(it.summary),
            content: non_empty(it.content_html).or_else(|| non_empty(it.content_text)),
            link,
            author,
            published_at: it
                .date_published
                .as_deref()
                .or(it.date_modified.as_deref())
                .and_then(parse_feed_date),
            categories: it.tags,
        });
    }
    Ok(out)
}
