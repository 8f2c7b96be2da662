//! # Domain records
//!
//! Plain data shared by the store, the ingestion engine, the scheduler, and
//! the HTTP surface:
//!
//! - [`Source`]: a subscribed feed plus its health counters.
//! - [`Item`]: one ingested entry, keyed globally by `guid`.
//! - [`Checkpoint`]: resumable progress of one ingestion cycle.
//! - [`TranslationTask`]: status record for deferred translation.
//!
//! Behaviour lives elsewhere (`ingest::checkpoint` for checkpoint bookkeeping);
//! this module only fixes the shapes and their serde layout.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type SourceId = u64;

fn default_true() -> bool {
    true
}

fn default_update_interval() -> u32 {
    60
}

/// A subscribed feed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Source {
    pub id: SourceId,
    #[serde(default)]
    pub name: String,
    pub url: String,
    #[serde(default = "default_true")]
    pub active: bool,
    /// Minutes between successful refreshes.
    #[serde(default = "default_update_interval")]
    pub update_interval_minutes: u32,
    #[serde(default)]
    pub last_fetch_time: Option<DateTime<Utc>>,
    /// Start of the most recent cycle, successful or not.
    #[serde(default)]
    pub last_attempt_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub error_count: u32,
    #[serde(default)]
    pub last_error: Option<String>,
    /// CSS selector used to pull full text from the item's link.
    #[serde(default)]
    pub content_selector: Option<String>,
    /// Empty means "use the configured defaults".
    #[serde(default)]
    pub target_languages: Vec<String>,
    /// Translation engine name; unknown or missing falls back to the default engine.
    #[serde(default)]
    pub engine: Option<String>,
}

impl Source {
    pub fn new(id: SourceId, name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            url: url.into(),
            active: true,
            update_interval_minutes: default_update_interval(),
            last_fetch_time: None,
            last_attempt_time: None,
            error_count: 0,
            last_error: None,
            content_selector: None,
            target_languages: Vec::new(),
            engine: None,
        }
    }

    pub fn in_error_state(&self) -> bool {
        self.error_count > 0
    }
}

/// Token accounting reported by a translation engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Usage {
    #[serde(default)]
    pub prompt_tokens: Option<u32>,
    #[serde(default)]
    pub completion_tokens: Option<u32>,
    #[serde(default)]
    pub total_tokens: Option<u32>,
    #[serde(default)]
    pub model: Option<String>,
}

/// One translated rendition of an item, keyed by target language in [`Item::translations`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Translation {
    pub title: String,
    pub content: String,
    pub engine: String,
    #[serde(default)]
    pub quality: Option<f32>,
    #[serde(default)]
    pub usage: Option<Usage>,
    pub translated_at: DateTime<Utc>,
}

/// One ingested piece of content.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Item {
    pub source_id: SourceId,
    pub guid: String,
    pub title: String,
    #[serde(default)]
    pub summary: Option<String>,
    pub content: String,
    #[serde(default)]
    pub link: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub published_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default)]
    pub is_read: bool,
    #[serde(default)]
    pub is_favorite: bool,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub translations: BTreeMap<String, Translation>,
}

/// Summary of an item's translation map.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TranslationStats {
    pub total_languages: usize,
    pub languages: Vec<String>,
    /// Mean over the entries that report a quality.
    pub average_quality: Option<f32>,
    /// Entries per engine name.
    pub engine_usage: BTreeMap<String, usize>,
    pub total_tokens: u64,
    pub last_updated: Option<DateTime<Utc>>,
}

impl Item {
    pub fn translation_stats(&self) -> TranslationStats {
        let mut stats = TranslationStats {
            total_languages: self.translations.len(),
            languages: self.translations.keys().cloned().collect(),
            ..Default::default()
        };
        let mut quality_sum = 0.0;
        let mut quality_n = 0u32;
        for t in self.translations.values() {
            if let Some(q) = t.quality {
                quality_sum += q;
                quality_n += 1;
            }
            *stats.engine_usage.entry(t.engine.clone()).or_default() += 1;
            stats.total_tokens += t
                .usage
                .as_ref()
                .and_then(|u| u.total_tokens)
                .map_or(0, u64::from);
            stats.last_updated = stats.last_updated.max(Some(t.translated_at));
        }
        if quality_n > 0 {
            stats.average_quality = Some(quality_sum / quality_n as f32);
        }
        stats
    }
}

/// Position of the last item a cycle got past.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LastProcessed {
    pub guid: String,
    #[serde(default)]
    pub published_at: Option<DateTime<Utc>>,
}

/// Bookkeeping for an item whose processing failed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FailedItem {
    pub guid: String,
    pub error: String,
    pub retry_count: u32,
    pub last_retry: DateTime<Utc>,
}

/// Durable progress of one ingestion cycle for one source.
///
/// `processed_count` counts items with a final outcome: persisted, already
/// stored, abandoned after exhausting retries, or dropped by the feed. Items
/// that failed and are still retryable live in `failed_items` only.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Checkpoint {
    pub source_id: SourceId,
    pub processed_count: u32,
    pub total_count: u32,
    #[serde(default)]
    pub last_processed: Option<LastProcessed>,
    #[serde(default)]
    pub failed_items: BTreeMap<String, FailedItem>,
    #[serde(default)]
    pub abandoned_items: BTreeMap<String, FailedItem>,
    pub is_completed: bool,
    #[serde(default)]
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Queued,
    Processing,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

/// Status record of a deferred translation request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TranslationTask {
    pub task_id: String,
    pub status: TaskStatus,
    /// 0..=100
    pub progress: u8,
    #[serde(default)]
    pub result: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_defaults_fill_missing_fields() {
        let s: Source =
            serde_json::from_str(r#"{"id": 7, "url": "https://example.org/feed.xml"}"#).unwrap();
        assert!(s.active);
        assert_eq!(s.update_interval_minutes, 60);
        assert_eq!(s.error_count, 0);
        assert!(s.target_languages.is_empty());
        assert!(!s.in_error_state());
    }

    #[test]
    fn translation_stats_summarize_entries() {
        let now = Utc::now();
        let entry = |engine: &str, quality: Option<f32>, tokens: Option<u32>, mins: i64| Translation {
            title: "t".into(),
            content: "c".into(),
            engine: engine.into(),
            quality,
            usage: tokens.map(|n| Usage {
                total_tokens: Some(n),
                ..Default::default()
            }),
            translated_at: now - chrono::Duration::minutes(mins),
        };
        let mut item = Item {
            source_id: 1,
            guid: "g".into(),
            title: "t".into(),
            summary: None,
            content: "c".into(),
            link: None,
            author: None,
            published_at: None,
            categories: vec![],
            is_read: false,
            is_favorite: false,
            created_at: now,
            translations: BTreeMap::new(),
        };
        assert_eq!(item.translation_stats(), TranslationStats::default());

        item.translations.insert("fr".into(), entry("openai", Some(0.8), Some(30), 10));
        item.translations.insert("ja".into(), entry("openai", Some(0.6), None, 5));
        item.translations.insert("en".into(), entry("echo", None, Some(12), 20));
        let stats = item.translation_stats();
        assert_eq!(stats.total_languages, 3);
        assert_eq!(stats.languages, vec!["en", "fr", "ja"]);
        assert!((stats.average_quality.unwrap() - 0.7).abs() < 1e-6);
        assert_eq!(stats.engine_usage["openai"], 2);
        assert_eq!(stats.engine_usage["echo"], 1);
        assert_eq!(stats.total_tokens, 42);
        assert_eq!(stats.last_updated, Some(now - chrono::Duration::minutes(5)));
    }

    #[test]
    fn task_status_serializes_lowercase() {
        let v = serde_json::to_value(TaskStatus::Processing).unwrap();
        assert_eq!(v, serde_json::json!("processing"));
        assert!(TaskStatus::Failed.is_terminal());
        assert!(!TaskStatus::Queued.is_terminal());
    }
}
