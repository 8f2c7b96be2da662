// src/normalize.rs
//! Content normalization: markup stripping, whitespace collapse, and
//! selector-based extraction of a canonical content block from a full page.

use anyhow::{anyhow, Result};
use once_cell::sync::OnceCell;
use regex::Regex;
use scraper::{Html, Selector};

/// Selector tried when a source asks for full text but the page has no better hint.
pub const DEFAULT_CONTENT_SELECTOR: &str = "article, .post-content, .article-content, .content";

fn re_script_style() -> &'static Regex {
    static RE: OnceCell<Regex> = OnceCell::new();
    RE.get_or_init(|| {
        Regex::new(r"(?is)<(script|style|noscript)\b[^>]*>.*?</(script|style|noscript)\s*>")
            .expect("script/style regex")
    })
}

fn re_tags() -> &'static Regex {
    static RE: OnceCell<Regex> = OnceCell::new();
    RE.get_or_init(|| Regex::new(r"(?is)<!--.*?-->|</?[a-z!][^>]*>").expect("tag regex"))
}

fn re_ws() -> &'static Regex {
    static RE: OnceCell<Regex> = OnceCell::new();
    RE.get_or_init(|| Regex::new(r"\s+").expect("whitespace regex"))
}

/// Collapse runs of whitespace into single spaces and trim.
pub fn clean_text(s: &str) -> String {
    re_ws().replace_all(s, " ").trim().to_string()
}

/// Strip scripts, styles and tags, decode entities, collapse whitespace.
pub fn clean_html(s: &str) -> String {
    // 1) Drop executable/styling blocks with their content
    let out = re_script_style().replace_all(s, " ");

    // 2) Strip remaining tags and comments
    let out = re_tags().replace_all(&out, " ");

    // 3) HTML entity decode (after stripping so escaped markup stays text)
    let out = html_escape::decode_html_entities(&out);

    // 4) Non-breaking spaces count as whitespace
    let out = out.replace('\u{00A0}', " ");

    // 5) Collapse whitespace
    clean_text(&out)
}

/// Extract the text of every element matching `selector` from a full page.
///
/// Returns `Ok(None)` when nothing matches or the matches are empty after
/// cleaning; an unparsable selector is an error.
pub fn extract_content(page_html: &str, selector: &str) -> Result<Option<String>> {
    let sel = Selector::parse(selector)
        .map_err(|e| anyhow!("invalid content selector `{selector}`: {e:?}"))?;
    let doc = Html::parse_document(page_html);

    let mut parts = Vec::new();
    for el in doc.select(&sel) {
        let cleaned = clean_html(&el.inner_html());
        if !cleaned.is_empty() {
            parts.push(cleaned);
        }
    }

    if parts.is_empty() {
        Ok(None)
    } else {
        Ok(Some(parts.join("\n\n")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_html_strips_scripts_tags_and_entities() {
        let s = r#"<p>Hello,&nbsp;&nbsp; <b>world</b></p>
            <script type="text/javascript">alert("x")</script>
            <style>.a { color: red }</style><!-- note -->  &amp; more"#;
        assert_eq!(clean_html(s), "Hello, world & more");
    }

    #[test]
    fn escaped_markup_is_kept_as_text() {
        assert_eq!(clean_html("use &lt;b&gt; for bold"), "use <b> for bold");
    }

    #[test]
    fn clean_text_collapses_ws() {
        assert_eq!(clean_text("  a \n\t b  "), "a b");
    }

    #[test]
    fn extract_content_uses_selector() {
        let page = r#"<html><head><title>T</title></head><body>
            <nav>menu</nav>
            <div class="post-content"><p>First  para.</p><script>x()</script></div>
            <div class="post-content"><p>Second.</p></div>
            </body></html>"#;
        let out = extract_content(page, ".post-content").unwrap();
        assert_eq!(out.as_deref(), Some("First para.\n\nSecond."));
        assert_eq!(extract_content(page, "article").unwrap(), None);
    }

    #[test]
    fn extract_content_rejects_bad_selector() {
        assert!(extract_content("<p>x</p>", "div[").is_err());
    }
}
