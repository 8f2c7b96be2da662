// src/feed/rss.rs
use anyhow::{Context, Result};
use quick_xml::de::from_str;
use serde::Deserialize;

use super::{parse_feed_date, resolve_guid, scrub_html_entities_for_xml, FeedItem};

#[derive(Debug, Deserialize)]
struct Rss {
    channel: Channel,
}

#[derive(Debug, Deserialize)]
struct Channel {
    #[serde(rename = "item", default)]
    item: Vec<Item>,
}

#[derive(Debug, Deserialize)]
struct Text {
    #[serde(rename = "$text", default)]
    value: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Item {
    title: Option<String>,
    link: Option<String>,
    guid: Option<Text>,
    #[serde(rename = "pubDate")]
    pub_date: Option<String>,
    description: Option<String>,
    #[serde(rename = "content:encoded")]
    content_encoded: Option<String>,
    author: Option<String>,
    #[serde(rename = "dc:creator")]
    creator: Option<String>,
    #[serde(rename = "category", default)]
    categories: Vec<Text>,
}

fn non_empty(s: Option<String>) -> Option<String> {
    s.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

pub(crate) fn parse(s: &str) -> Result<Vec<FeedItem>> {
    let xml_clean = scrub_html_entities_for_xml(s);
    let rss: Rss = from_str(&xml_clean).context("parsing rss xml")?;

    let mut out = Vec::with_capacity(rss.channel.item.len());
    for it in rss.channel.item {
        let link = non_empty(it.link);
        let guid_raw = it.guid.and_then(|g| g.value);
        let Some(guid) = resolve_guid(guid_raw.as_deref(), link.as_deref()) else {
            tracing::debug!(target: "feed", title = ?it.title, "rss item without guid or link skipped");
            continue;
        };

        let description = non_empty(it.description);
        // content:encoded carries the full body; description is then the teaser.
        let (summary, content) = match non_empty(it.content_encoded) {
            Some(full) => (description, Some(full)),
            None => (None, description),
        };

        out.push(FeedItem {
            guid,
            title: non_empty(it.title),
            summary,
            content,
            link,
            author: non_empty(it.creator).or_else(|| non_empty(it.author)),
            published_at: it.pub_date.as_deref().and_then(parse_feed_date),
            categories: it
                .categories
                .into_iter()
                .filter_map(|c| non_empty(c.value))
                .collect(),
        });
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    const XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0" xmlns:content="http://purl.org/rss/1.0/modules/content/" xmlns:dc="http://purl.org/dc/elements/1.1/">
  <channel>
    <title>Example</title>
    <item>
      <title>First&nbsp;post</title>
      <link>https://example.org/1</link>
      <guid isPermaLink="false">post-1</guid>
      <pubDate>Mon, 06 Oct 2025 09:00:00 +0000</pubDate>
      <description>Short teaser</description>
      <content:encoded><![CDATA[<p>Full <b>body</b></p>]]></content:encoded>
      <dc:creator>Ann</dc:creator>
      <category>rust</category>
      <category domain="x">feeds</category>
    </item>
    <item>
      <title>No guid</title>
      <link>https://example.org/2</link>
      <description>Only a description</description>
    </item>
    <item>
      <title>Orphan</title>
    </item>
  </channel>
</rss>"#;

    #[test]
    fn rss_items_keep_order_and_fallbacks() {
        let items = parse(XML).unwrap();
        assert_eq!(items.len(), 2);

        let a = &items[0];
        assert_eq!(a.guid, "post-1");
        assert_eq!(a.title.as_deref(), Some("First\u{a0}post"));
        assert_eq!(a.summary.as_deref(), Some("Short teaser"));
        assert_eq!(a.content.as_deref(), Some("<p>Full <b>body</b></p>"));
        assert_eq!(a.author.as_deref(), Some("Ann"));
        assert_eq!(a.categories, vec!["rust", "feeds"]);
        assert!(a.published_at.is_some());

        let b = &items[1];
        assert_eq!(b.guid, "https://example.org/2");
        assert_eq!(b.summary, None);
        assert_eq!(b.content.as_deref(), Some("Only a description"));
    }

    #[test]
    fn empty_channel_is_ok() {
        let xml = r#"<rss version="2.0"><channel><title>t</title></channel></rss>"#;
        assert!(parse(xml).unwrap().is_empty());
    }
}
