// src/feed/atom.rs
use anyhow::{Context, Result};
use quick_xml::de::from_str;
use serde::Deserialize;

use super::{parse_feed_date, resolve_guid, scrub_html_entities_for_xml, FeedItem};

#[derive(Debug, Deserialize)]
struct Feed {
    #[serde(rename = "entry", default)]
    entry: Vec<Entry>,
}

#[derive(Debug, Deserialize)]
struct Text {
    #[serde(rename = "$text", default)]
    value: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Link {
    #[serde(rename = "@href")]
    href: Option<String>,
    #[serde(rename = "@rel")]
    rel: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Person {
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Category {
    #[serde(rename = "@term")]
    term: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Entry {
    id: Option<String>,
    title: Option<Text>,
    #[serde(rename = "link", default)]
    links: Vec<Link>,
    published: Option<String>,
    updated: Option<String>,
    summary: Option<Text>,
    content: Option<Text>,
    #[serde(rename = "author", default)]
    authors: Vec<Person>,
    #[serde(rename = "category", default)]
    categories: Vec<Category>,
}

fn non_empty(s: Option<String>) -> Option<String> {
    s.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

/// `rel="alternate"` (or no rel) is the entry's permalink.
fn alternate_link(links: &[Link]) -> Option<String> {
    links
        .iter()
        .find(|l| matches!(l.rel.as_deref(), None | Some("alternate")))
        .or_else(|| links.first())
        .and_then(|l| non_empty(l.href.clone()))
}

pub(crate) fn parse(s: &str) -> Result<Vec<FeedItem>> {
    let xml_clean = scrub_html_entities_for_xml(s);
    let feed: Feed = from_str(&xml_clean).context("parsing atom xml")?;

    let mut out = Vec::with_capacity(feed.entry.len());
    for e in feed.entry {
        let link = alternate_link(&e.links);
        let id = non_empty(e.id);
        let Some(guid) = resolve_guid(id.as_deref(), link.as_deref()) else {
            tracing::debug!(target: "feed", "atom entry without id or link skipped");
            continue;
        };

        let summary = non_empty(e.summary.and_then(|t| t.value));
        let (summary, content) = match non_empty(e.content.and_then(|t| t.value)) {
            Some(full) => (summary, Some(full)),
            None => (None, summary),
        };

        out.push(FeedItem {
            guid,
            title: non_empty(e.title.and_then(|t| t.value)),
            summary,
            content,
            link,
            author: e.authors.into_iter().find_map(|p| non_empty(p.name)),
            published_at: e
                .published
                .as_deref()
                .or(e.updated.as_deref())
                .and_then(parse_feed_date),
            categories: e
                .categories
                .into_iter()
                .filter_map(|c| non_empty(c.term))
                .collect(),
        });
    }
    Ok(out)
}
