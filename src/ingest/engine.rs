// src/ingest/engine.rs
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use metrics::{counter, gauge, histogram};
use tracing::{debug, error, info, warn};

use super::{ensure_metrics_described, retry, IngestReport, IngestSettings, Ingestor, ItemOutcome};
use crate::feed::{FeedItem, FeedReader};
use crate::model::{Checkpoint, Item, Source, SourceId};
use crate::normalize::{clean_html, clean_text, extract_content, DEFAULT_CONTENT_SELECTOR};
use crate::store::{IngestStore, StoreError};
use crate::translate::Translator;

const UNTITLED: &str = "Untitled";

pub struct IngestEngine {
    store: Arc<dyn IngestStore>,
    reader: Arc<dyn FeedReader>,
    translator: Arc<Translator>,
    settings: IngestSettings,
}

impl IngestEngine {
    pub fn new(
        store: Arc<dyn IngestStore>,
        reader: Arc<dyn FeedReader>,
        translator: Arc<Translator>,
        settings: IngestSettings,
    ) -> Self {
        ensure_metrics_described();
        Self {
            store,
            reader,
            translator,
            settings,
        }
    }

    pub fn settings(&self) -> &IngestSettings {
        &self.settings
    }

    pub(crate) fn store(&self) -> &dyn IngestStore {
        self.store.as_ref()
    }

    /// Run one cycle for `source_id`.
    pub async fn ingest(&self, source_id: SourceId, force_refresh: bool) -> Result<IngestReport> {
        self.ingest_at(source_id, force_refresh, Utc::now()).await
    }

    /// [`ingest`](Self::ingest) with an explicit clock.
    pub async fn ingest_at(
        &self,
        source_id: SourceId,
        force_refresh: bool,
        now: DateTime<Utc>,
    ) -> Result<IngestReport> {
        let source = self
            .store
            .get_source(source_id)
            .await?
            .ok_or(StoreError::UnknownSource(source_id))?;

        let t0 = std::time::Instant::now();
        let out = self.run_cycle(&source, force_refresh, now).await;
        histogram!("ingest_cycle_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);
        gauge!("ingest_last_cycle_ts").set(Utc::now().timestamp() as f64);

        match out {
            Ok(report) => {
                counter!("ingest_cycles_total", "outcome" => "ok").increment(1);
                Ok(report)
            }
            Err(e) => {
                counter!("ingest_cycles_total", "outcome" => "fatal").increment(1);
                if let Err(rec) = self.record_fatal(source_id, &e, now).await {
                    error!(target: "ingest", source_id, error = ?rec, "failed to record fatal cycle");
                }
                Err(e)
            }
        }
    }

    /// Discard any incomplete checkpoint and start over.
    pub async fn reset(&self, source_id: SourceId) -> Result<IngestReport> {
        self.ingest(source_id, true).await
    }

    /// Latest checkpoint of `source_id`, completed or not.
    pub async fn progress(&self, source_id: SourceId) -> Result<Option<Checkpoint>> {
        Ok(self.store.latest_checkpoint(source_id).await?)
    }

    async fn run_cycle(
        &self,
        source: &Source,
        force_refresh: bool,
        now: DateTime<Utc>,
    ) -> Result<IngestReport> {
        let existing = if force_refresh {
            None
        } else {
            self.store.active_checkpoint(source.id).await?
        };
        let resumed = existing.is_some();
        let mut cp = match existing {
            Some(cp) => cp,
            None => {
                let cp = Checkpoint::fresh(source.id, now);
                self.store.save_checkpoint(&cp).await?;
                cp
            }
        };

        info!(
            target: "ingest",
            source_id = source.id,
            url = %source.url,
            resumed,
            force_refresh,
            "ingest cycle start"
        );

        let mut feed = self
            .reader
            .fetch_feed(&source.url)
            .await
            .with_context(|| format!("fetching feed for source {}", source.id))?;
        feed.truncate(self.settings.batch_size);

        let pending: Vec<FeedItem> = cp.pending(&feed).into_iter().cloned().collect();
        cp.plan(pending.len(), now);

        let mut report = IngestReport {
            source_id: source.id,
            resumed,
            fetched: feed.len(),
            ..Default::default()
        };

        let r = retry::retry_failed(self, source, &mut cp, &feed, now).await?;
        report.retried = r.attempted;
        report.recovered = r.recovered;
        report.abandoned = r.abandoned;
        report.dropped = r.dropped;

        for fi in &pending {
            let outcome = self.process_item(source, fi, now).await?;
            cp.advance(fi, now);
            match outcome {
                ItemOutcome::Persisted(item) => {
                    cp.mark_processed(now);
                    if self.commit(Some(&*item), &cp).await? {
                        report.persisted += 1;
                        counter!("ingest_items_persisted_total").increment(1);
                    } else {
                        report.existing += 1;
                    }
                }
                ItemOutcome::Existing => {
                    cp.mark_processed(now);
                    self.commit(None, &cp).await?;
                    report.existing += 1;
                    counter!("ingest_items_existing_total").increment(1);
                }
                ItemOutcome::Failed { guid, error } => {
                    warn!(target: "ingest", source_id = source.id, guid = %guid, error = %error, "item failed");
                    cp.record_failure(&guid, error, now);
                    self.commit(None, &cp).await?;
                    report.failed += 1;
                    counter!("ingest_items_failed_total").increment(1);
                }
            }
        }

        cp.try_complete(now);
        let mut updated = self
            .store
            .get_source(source.id)
            .await?
            .unwrap_or_else(|| source.clone());
        updated.last_fetch_time = Some(now);
        updated.last_attempt_time = Some(now);
        if cp.failed_items.is_empty() {
            updated.error_count = 0;
            updated.last_error = None;
        } else {
            updated.last_error = Some(format!("{} items failed to process", cp.failed_items.len()));
        }
        self.store.commit_cycle(&cp, &updated).await?;

        report.processed_count = cp.processed_count;
        report.total_count = cp.total_count;
        report.completed = cp.is_completed;

        info!(
            target: "ingest",
            source_id = source.id,
            fetched = report.fetched,
            persisted = report.persisted,
            existing = report.existing,
            failed = report.failed,
            recovered = report.recovered,
            abandoned = report.abandoned,
            processed = cp.processed_count,
            total = cp.total_count,
            completed = cp.is_completed,
            "ingest cycle done"
        );
        Ok(report)
    }

    /// Commit an item with the checkpoint. Returns `false` when the guid
    /// turned out to be stored already, in which case only the checkpoint
    /// is written.
    pub(crate) async fn commit(&self, item: Option<&Item>, cp: &Checkpoint) -> Result<bool> {
        match self.store.commit_item(item, cp).await {
            Ok(()) => Ok(item.is_some()),
            Err(StoreError::DuplicateGuid(guid)) => {
                debug!(target: "ingest", guid = %guid, "guid stored concurrently, keeping existing item");
                self.store.commit_item(None, cp).await?;
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// The failure-isolated per-item unit. Only store errors escape.
    pub(crate) async fn process_item(
        &self,
        source: &Source,
        fi: &FeedItem,
        now: DateTime<Utc>,
    ) -> Result<ItemOutcome> {
        if self.store.find_by_guid(&fi.guid).await?.is_some() {
            return Ok(ItemOutcome::Existing);
        }
        match self.build_item(source, fi, now).await {
            Ok(item) => Ok(ItemOutcome::Persisted(Box::new(item))),
            Err(e) => Ok(ItemOutcome::Failed {
                guid: fi.guid.clone(),
                error: format!("{e:#}"),
            }),
        }
    }

    async fn build_item(&self, source: &Source, fi: &FeedItem, now: DateTime<Utc>) -> Result<Item> {
        let title = fi
            .title
            .as_deref()
            .map(clean_html)
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| UNTITLED.to_string());
        let summary = fi
            .summary
            .as_deref()
            .map(clean_html)
            .filter(|s| !s.is_empty());

        let mut content = fi
            .content
            .as_deref()
            .map(clean_html)
            .filter(|c| !c.is_empty())
            .or_else(|| summary.clone())
            .unwrap_or_default();

        if let (Some(selector), Some(link)) = (source.content_selector.as_deref(), fi.link.as_deref()) {
            let page = self
                .reader
                .fetch_page(link)
                .await
                .with_context(|| format!("fetching full text from {link}"))?;
            let selector = if selector.trim().is_empty() {
                DEFAULT_CONTENT_SELECTOR
            } else {
                selector
            };
            match extract_content(&page, selector)? {
                Some(full) => content = full,
                None => debug!(target: "ingest", guid = %fi.guid, selector, "selector matched nothing, keeping feed content"),
            }
        }

        let mut item = Item {
            source_id: source.id,
            guid: fi.guid.clone(),
            title,
            summary,
            content,
            link: fi.link.clone(),
            author: fi.author.as_deref().map(clean_text).filter(|a| !a.is_empty()),
            published_at: fi.published_at,
            categories: fi
                .categories
                .iter()
                .map(|c| clean_text(c))
                .filter(|c| !c.is_empty())
                .collect(),
            is_read: false,
            is_favorite: false,
            created_at: now,
            translations: Default::default(),
        };

        let languages = self.settings.languages_for(source);
        item.translations = self
            .translator
            .translate_item(&item, &languages, source.engine.as_deref())
            .await
            .context("translating item")?;
        Ok(item)
    }

    async fn record_fatal(&self, source_id: SourceId, err: &anyhow::Error, now: DateTime<Utc>) -> Result<()> {
        let Some(mut source) = self.store.get_source(source_id).await? else {
            return Ok(());
        };
        let msg = format!("{err:#}");
        source.error_count = source.error_count.saturating_add(1);
        source.last_error = Some(msg.clone());
        source.last_attempt_time = Some(now);
        if source.error_count >= self.settings.max_error_count && source.active {
            source.active = false;
            counter!("ingest_sources_deactivated_total").increment(1);
            warn!(
                target: "ingest",
                source_id,
                error_count = source.error_count,
                "source deactivated after repeated failures"
            );
        }
        error!(
            target: "ingest",
            source_id,
            error_count = source.error_count,
            error = %msg,
            "ingest cycle failed"
        );

        match self.store.active_checkpoint(source_id).await? {
            Some(mut cp) => {
                cp.last_error = Some(msg);
                cp.touch(now);
                self.store.commit_cycle(&cp, &source).await?;
            }
            None => self.store.save_source(&source).await?,
        }
        Ok(())
    }
}

#[async_trait]
impl Ingestor for IngestEngine {
    async fn ingest(&self, source_id: SourceId, force_refresh: bool) -> Result<IngestReport> {
        IngestEngine::ingest(self, source_id, force_refresh).await
    }
}
