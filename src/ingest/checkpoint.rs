// src/ingest/checkpoint.rs
//! Checkpoint bookkeeping.
//!
//! Counting rules:
//! - `processed_count` grows only on a final outcome (persisted, already
//!   stored, abandoned, or dropped from the feed).
//! - A retryable failure lives in `failed_items` and does not count.
//! - `last_processed` moves past every item the main loop handles,
//!   failed or not.
//! - Complete once `processed_count >= total_count` and nothing is pending retry.

use chrono::{DateTime, Duration, Utc};

use crate::feed::FeedItem;
use crate::model::{Checkpoint, FailedItem, LastProcessed, SourceId};

impl Checkpoint {
    pub fn fresh(source_id: SourceId, now: DateTime<Utc>) -> Self {
        Self {
            source_id,
            processed_count: 0,
            total_count: 0,
            last_processed: None,
            failed_items: Default::default(),
            abandoned_items: Default::default(),
            is_completed: false,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = now;
    }

    /// Index of the first feed item after the cursor.
    ///
    /// A cursor guid missing from `feed` resumes from the top; guid
    /// de-duplication makes the re-visit harmless.
    pub fn resume_index(&self, feed: &[FeedItem]) -> usize {
        match &self.last_processed {
            None => 0,
            Some(lp) => feed
                .iter()
                .position(|f| f.guid == lp.guid)
                .map(|i| i + 1)
                .unwrap_or(0),
        }
    }

    /// Items the main loop still has to visit: after the cursor and not
    /// owned by the retry path.
    pub fn pending<'a>(&self, feed: &'a [FeedItem]) -> Vec<&'a FeedItem> {
        feed[self.resume_index(feed).min(feed.len())..]
            .iter()
            .filter(|f| !self.failed_items.contains_key(&f.guid))
            .collect()
    }

    /// Size the work set of this cycle: final outcomes so far, open
    /// failures, and what the main loop will visit.
    pub fn plan(&mut self, pending: usize, now: DateTime<Utc>) {
        let failed = u32::try_from(self.failed_items.len()).unwrap_or(u32::MAX);
        let pending = u32::try_from(pending).unwrap_or(u32::MAX);
        self.total_count = self
            .processed_count
            .saturating_add(failed)
            .saturating_add(pending);
        self.touch(now);
    }

    pub fn advance(&mut self, item: &FeedItem, now: DateTime<Utc>) {
        self.last_processed = Some(LastProcessed {
            guid: item.guid.clone(),
            published_at: item.published_at,
        });
        self.touch(now);
    }

    pub fn mark_processed(&mut self, now: DateTime<Utc>) {
        self.processed_count = self.processed_count.saturating_add(1);
        self.touch(now);
    }

    /// First failure starts at `retry_count = 0`; a repeat bumps the count.
    pub fn record_failure(&mut self, guid: &str, error: impl Into<String>, now: DateTime<Utc>) {
        let error = error.into();
        self.failed_items
            .entry(guid.to_string())
            .and_modify(|f| {
                f.retry_count = f.retry_count.saturating_add(1);
                f.error = error.clone();
                f.last_retry = now;
            })
            .or_insert_with(|| FailedItem {
                guid: guid.to_string(),
                error: error.clone(),
                retry_count: 0,
                last_retry: now,
            });
        self.touch(now);
    }

    /// Failed guids whose cool-down has elapsed and budget is left, oldest first.
    pub fn retry_candidates(
        &self,
        now: DateTime<Utc>,
        cooldown: Duration,
        max_retries: u32,
    ) -> Vec<String> {
        let mut due: Vec<&FailedItem> = self
            .failed_items
            .values()
            .filter(|f| f.retry_count < max_retries && now - f.last_retry >= cooldown)
            .collect();
        due.sort_by_key(|f| f.last_retry);
        due.into_iter().map(|f| f.guid.clone()).collect()
    }

    /// A retried item succeeded (or turned out to be stored already).
    pub fn resolve_failure(&mut self, guid: &str, now: DateTime<Utc>) -> bool {
        if self.failed_items.remove(guid).is_some() {
            self.mark_processed(now);
            true
        } else {
            false
        }
    }

    /// A retry failed again. Returns `true` when the item was abandoned.
    pub fn note_retry_failure(
        &mut self,
        guid: &str,
        error: impl Into<String>,
        now: DateTime<Utc>,
        max_retries: u32,
    ) -> bool {
        let Some(f) = self.failed_items.get_mut(guid) else {
            return false;
        };
        f.retry_count = f.retry_count.saturating_add(1);
        f.error = error.into();
        f.last_retry = now;
        if f.retry_count >= max_retries {
            self.abandon(guid, now);
            true
        } else {
            self.touch(now);
            false
        }
    }

    /// Move entries with no retry budget left to `abandoned_items`.
    pub fn abandon_exhausted(&mut self, max_retries: u32, now: DateTime<Utc>) -> Vec<String> {
        let exhausted: Vec<String> = self
            .failed_items
            .values()
            .filter(|f| f.retry_count >= max_retries)
            .map(|f| f.guid.clone())
            .collect();
        for g in &exhausted {
            self.abandon(g, now);
        }
        exhausted
    }

    fn abandon(&mut self, guid: &str, now: DateTime<Utc>) {
        if let Some(f) = self.failed_items.remove(guid) {
            self.abandoned_items.insert(guid.to_string(), f);
            self.mark_processed(now);
        }
    }

    /// The feed no longer carries `guid`; nothing left to retry.
    pub fn drop_failed(&mut self, guid: &str, now: DateTime<Utc>) -> bool {
        if self.failed_items.remove(guid).is_some() {
            self.mark_processed(now);
            true
        } else {
            false
        }
    }

    pub fn try_complete(&mut self, now: DateTime<Utc>) -> bool {
        if !self.is_completed
            && self.processed_count >= self.total_count
            && self.failed_items.is_empty()
        {
            self.is_completed = true;
            self.touch(now);
        }
        self.is_completed
    }
}
