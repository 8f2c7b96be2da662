// src/store/mod.rs
//! Persistence boundary: sources, items and checkpoints.
//!
//! The ingestion engine only needs [`IngestStore`]; its two `commit_*`
//! operations must apply all of their writes or none of them.

pub mod memory;

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{Checkpoint, Item, Source, SourceId, Translation};

pub use memory::MemoryStore;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("item with guid `{0}` already exists")]
    DuplicateGuid(String),
    #[error("unknown source {0}")]
    UnknownSource(SourceId),
    #[error("snapshot i/o failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("snapshot encoding failed: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Which sources a scheduler tick should pick up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DuePolicy {
    /// Wait before re-attempting a source in error state.
    pub error_backoff: Duration,
    /// Sources at or above this count are never due.
    pub max_error_count: u32,
    pub max_due: usize,
}

impl Default for DuePolicy {
    fn default() -> Self {
        Self {
            error_backoff: Duration::minutes(60),
            max_error_count: 5,
            max_due: 10,
        }
    }
}

impl DuePolicy {
    pub fn is_due(&self, s: &Source, now: DateTime<Utc>) -> bool {
        if !s.active || s.error_count >= self.max_error_count {
            return false;
        }
        if s.error_count == 0 {
            let interval = Duration::minutes(i64::from(s.update_interval_minutes));
            s.last_fetch_time.map_or(true, |t| now - t >= interval)
        } else {
            s.last_attempt_time
                .or(s.last_fetch_time)
                .map_or(true, |t| now - t >= self.error_backoff)
        }
    }

    /// Due sources, least recently attempted first, capped at `max_due`.
    pub fn select(&self, sources: Vec<Source>, now: DateTime<Utc>) -> Vec<Source> {
        let mut due: Vec<Source> = sources.into_iter().filter(|s| self.is_due(s, now)).collect();
        due.sort_by_key(|s| (s.last_attempt_time.or(s.last_fetch_time), s.id));
        due.truncate(self.max_due);
        due
    }
}

#[async_trait]
pub trait SourceRegistry: Send + Sync {
    async fn get_source(&self, id: SourceId) -> Result<Option<Source>, StoreError>;

    /// Insert or replace.
    async fn save_source(&self, source: &Source) -> Result<(), StoreError>;

    async fn active_sources(&self) -> Result<Vec<Source>, StoreError>;

    async fn due_sources(
        &self,
        now: DateTime<Utc>,
        policy: &DuePolicy,
    ) -> Result<Vec<Source>, StoreError> {
        Ok(policy.select(self.active_sources().await?, now))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemFilter {
    #[serde(default)]
    pub source_id: Option<SourceId>,
    #[serde(default)]
    pub unread_only: bool,
    #[serde(default)]
    pub favorite_only: bool,
    /// 1-based.
    #[serde(default)]
    pub page: Option<usize>,
    #[serde(default)]
    pub limit: Option<usize>,
}

impl ItemFilter {
    pub const DEFAULT_LIMIT: usize = 20;
    pub const MAX_LIMIT: usize = 100;

    pub fn page(&self) -> usize {
        self.page.unwrap_or(1).max(1)
    }

    pub fn limit(&self) -> usize {
        self.limit
            .unwrap_or(Self::DEFAULT_LIMIT)
            .clamp(1, Self::MAX_LIMIT)
    }

    pub fn matches(&self, it: &Item) -> bool {
        self.source_id.map_or(true, |id| it.source_id == id)
            && (!self.unread_only || !it.is_read)
            && (!self.favorite_only || it.is_favorite)
    }
}

#[async_trait]
pub trait ItemStore: Send + Sync {
    async fn find_by_guid(&self, guid: &str) -> Result<Option<Item>, StoreError>;

    /// Fails with [`StoreError::DuplicateGuid`] when the guid is taken.
    async fn save_item(&self, item: &Item) -> Result<(), StoreError>;

    /// Newest first; returns the page and the total number of matches.
    async fn list_items(&self, filter: &ItemFilter) -> Result<(Vec<Item>, usize), StoreError>;

    /// `false` when the guid is unknown.
    async fn set_read(&self, guid: &str, read: bool) -> Result<bool, StoreError>;

    /// New favorite state, `None` when the guid is unknown.
    async fn toggle_favorite(&self, guid: &str) -> Result<Option<bool>, StoreError>;

    /// Add or replace translation entries on a stored item. Returns the
    /// updated item, `None` when the guid is unknown.
    async fn put_translations(
        &self,
        guid: &str,
        entries: &BTreeMap<String, Translation>,
    ) -> Result<Option<Item>, StoreError>;

    /// Remove one language (or all with `lang = None`). Returns how many
    /// entries went away, `None` when the guid is unknown.
    async fn clear_translations(
        &self,
        guid: &str,
        lang: Option<&str>,
    ) -> Result<Option<usize>, StoreError>;
}

#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// The most recent checkpoint of `source_id` if it is not completed.
    async fn active_checkpoint(&self, source_id: SourceId)
        -> Result<Option<Checkpoint>, StoreError>;

    async fn latest_checkpoint(&self, source_id: SourceId)
        -> Result<Option<Checkpoint>, StoreError>;

    /// Insert or replace (matched by source and `created_at`).
    async fn save_checkpoint(&self, cp: &Checkpoint) -> Result<(), StoreError>;
}

#[async_trait]
pub trait IngestStore: SourceRegistry + ItemStore + CheckpointStore {
    /// Persist `item` (if any) and `cp` together. A duplicate guid rejects
    /// the whole commit.
    async fn commit_item(&self, item: Option<&Item>, cp: &Checkpoint) -> Result<(), StoreError>;

    /// Persist the final checkpoint and the source health update together.
    async fn commit_cycle(&self, cp: &Checkpoint, source: &Source) -> Result<(), StoreError>;
}
