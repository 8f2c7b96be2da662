// src/ingest/retry.rs
//! Retry path for items recorded in `failed_items`.
//!
//! Runs at the start of every cycle against the freshly fetched feed:
//! entries the feed no longer carries are dropped, entries without budget
//! are abandoned, and entries past their cool-down run the per-item unit
//! again. Each change is committed with the checkpoint.

use std::collections::HashMap;

use anyhow::Result;
use chrono::{DateTime, Utc};
use metrics::counter;
use tracing::{info, warn};

use super::engine::IngestEngine;
use super::ItemOutcome;
use crate::feed::FeedItem;
use crate::model::{Checkpoint, Source};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryReport {
    pub attempted: usize,
    pub recovered: usize,
    pub still_failing: usize,
    pub abandoned: usize,
    pub dropped: usize,
}

pub async fn retry_failed(
    engine: &IngestEngine,
    source: &Source,
    cp: &mut Checkpoint,
    feed: &[FeedItem],
    now: DateTime<Utc>,
) -> Result<RetryReport> {
    let mut report = RetryReport::default();
    if cp.failed_items.is_empty() {
        return Ok(report);
    }

    let settings = engine.settings();
    let by_guid: HashMap<&str, &FeedItem> = feed.iter().map(|f| (f.guid.as_str(), f)).collect();

    let gone: Vec<String> = cp
        .failed_items
        .keys()
        .filter(|g| !by_guid.contains_key(g.as_str()))
        .cloned()
        .collect();
    for guid in gone {
        cp.drop_failed(&guid, now);
        engine.commit(None, cp).await?;
        report.dropped += 1;
        info!(target: "ingest", source_id = source.id, guid = %guid, "failed item left the feed, dropped");
    }

    let exhausted = cp.abandon_exhausted(settings.max_retry_count, now);
    if !exhausted.is_empty() {
        engine.commit(None, cp).await?;
        report.abandoned += exhausted.len();
        counter!("ingest_items_abandoned_total").increment(exhausted.len() as u64);
    }

    for guid in cp.retry_candidates(now, settings.retry_cooldown, settings.max_retry_count) {
        let Some(fi) = by_guid.get(guid.as_str()).copied() else {
            continue;
        };
        report.attempted += 1;
        counter!("ingest_retries_total").increment(1);

        match engine.process_item(source, fi, now).await? {
            ItemOutcome::Persisted(item) => {
                cp.resolve_failure(&guid, now);
                engine.commit(Some(&*item), cp).await?;
                report.recovered += 1;
                counter!("ingest_items_persisted_total").increment(1);
            }
            ItemOutcome::Existing => {
                cp.resolve_failure(&guid, now);
                engine.commit(None, cp).await?;
                report.recovered += 1;
            }
            ItemOutcome::Failed { error, .. } => {
                let abandoned = cp.note_retry_failure(&guid, error.clone(), now, settings.max_retry_count);
                engine.commit(None, cp).await?;
                if abandoned {
                    report.abandoned += 1;
                    counter!("ingest_items_abandoned_total").increment(1);
                    warn!(target: "ingest", source_id = source.id, guid = %guid, error = %error, "item abandoned after max retries");
                } else {
                    report.still_failing += 1;
                    warn!(target: "ingest", source_id = source.id, guid = %guid, error = %error, "retry failed");
                }
            }
        }
    }

    if report != RetryReport::default() {
        info!(
            target: "ingest",
            source_id = source.id,
            attempted = report.attempted,
            recovered = report.recovered,
            abandoned = report.abandoned,
            dropped = report.dropped,
            "retry pass done"
        );
    }
    Ok(report)
}
