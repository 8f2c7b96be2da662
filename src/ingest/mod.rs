// src/ingest/mod.rs
//! Resumable per-source ingestion.
//!
//! [`IngestEngine`] runs one cycle for one source: fetch the feed, drain the
//! retry path ([`retry::retry_failed`]), then walk the remaining items in
//! feed order, committing each item together with the advanced checkpoint.

pub mod checkpoint;
pub mod engine;
pub mod retry;

use async_trait::async_trait;
use chrono::Duration;
use metrics::{describe_counter, describe_gauge, describe_histogram};
use once_cell::sync::OnceCell;
use serde::Serialize;

pub use engine::IngestEngine;

use crate::config::{ai::normalize_langs, AppConfig};
use crate::model::{Item, Source, SourceId};

/// One-time metrics registration (so series show up on /metrics).
pub(crate) fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("ingest_cycles_total", "Ingestion cycles by outcome.");
        describe_counter!("ingest_items_persisted_total", "New items stored.");
        describe_counter!(
            "ingest_items_existing_total",
            "Feed items skipped because their guid was already stored."
        );
        describe_counter!(
            "ingest_items_failed_total",
            "Per-item failures recorded in checkpoints."
        );
        describe_counter!(
            "ingest_items_abandoned_total",
            "Failed items that exhausted their retry budget."
        );
        describe_counter!("ingest_retries_total", "Retry attempts of failed items.");
        describe_counter!(
            "ingest_sources_deactivated_total",
            "Sources switched off after repeated fatal cycles."
        );
        describe_histogram!("ingest_cycle_ms", "Ingestion cycle wall time in milliseconds.");
        describe_histogram!("feed_parse_ms", "Feed parse time in milliseconds.");
        describe_counter!("feed_items_parsed_total", "Entries parsed from feeds.");
        describe_counter!("feed_http_errors_total", "Feed fetch failures.");
        describe_gauge!(
            "ingest_last_cycle_ts",
            "Unix ts when an ingestion cycle last finished."
        );
    });
}

#[derive(Debug, Clone)]
pub struct IngestSettings {
    pub batch_size: usize,
    pub max_retry_count: u32,
    pub retry_cooldown: Duration,
    pub max_error_count: u32,
    /// Used when a source lists no target languages.
    pub default_languages: Vec<String>,
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

impl IngestSettings {
    pub fn from_config(cfg: &AppConfig) -> Self {
        Self {
            batch_size: cfg.ingest.batch_size,
            max_retry_count: cfg.ingest.max_retry_count,
            retry_cooldown: Duration::minutes(cfg.ingest.retry_delay_minutes),
            max_error_count: cfg.ingest.max_error_count,
            default_languages: cfg.translation.default_target_languages.clone(),
        }
    }

    pub fn languages_for(&self, source: &Source) -> Vec<String> {
        let own = normalize_langs(&source.target_languages);
        if own.is_empty() {
            self.default_languages.clone()
        } else {
            own
        }
    }
}

/// Result of the per-item unit.
#[derive(Debug)]
pub enum ItemOutcome {
    Persisted(Box<Item>),
    /// Guid already stored; nothing to do.
    Existing,
    Failed { guid: String, error: String },
}

/// Summary of one ingestion cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub source_id: SourceId,
    /// Continued an incomplete checkpoint.
    pub resumed: bool,
    pub fetched: usize,
    pub persisted: usize,
    pub existing: usize,
    pub failed: usize,
    pub retried: usize,
    pub recovered: usize,
    pub abandoned: usize,
    pub dropped: usize,
    pub processed_count: u32,
    pub total_count: u32,
    pub completed: bool,
}

/// What the scheduler drives.
#[async_trait]
pub trait Ingestor: Send + Sync {
    async fn ingest(&self, source_id: SourceId, force_refresh: bool) -> anyhow::Result<IngestReport>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_languages_override_defaults() {
        let st = IngestSettings::default();
        let mut s = Source::new(1, "n", "https://x");
        assert_eq!(st.languages_for(&s), vec!["zh"]);
        s.target_languages = vec!["JA".into(), "ja".into(), "en".into()];
        assert_eq!(st.languages_for(&s), vec!["ja", "en"]);
    }
}
