// src/translate/items.rs
//! On-demand translation of items that are already stored.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use super::engine::TranslateError;
use super::service::Translator;
use crate::config::ai::normalize_langs;
use crate::model::{Item, TranslationStats};
use crate::store::{IngestStore, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum ItemTranslateError {
    #[error("unknown item {0}")]
    UnknownItem(String),
    #[error(transparent)]
    Translate(#[from] TranslateError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Outcome of a batch request, per guid.
#[derive(Debug, Default, Serialize)]
pub struct BatchReport {
    pub translated: Vec<String>,
    pub missing: Vec<String>,
    pub failed: BTreeMap<String, String>,
}

pub struct ItemTranslator {
    store: Arc<dyn IngestStore>,
    translator: Arc<Translator>,
    /// Used when neither the request nor the item's source names languages.
    default_languages: Vec<String>,
}

impl ItemTranslator {
    pub fn new(
        store: Arc<dyn IngestStore>,
        translator: Arc<Translator>,
        default_languages: Vec<String>,
    ) -> Self {
        Self {
            store,
            translator,
            default_languages,
        }
    }

    async fn languages_for(&self, item: &Item, requested: &[String]) -> Result<Vec<String>, StoreError> {
        let requested = normalize_langs(requested);
        if !requested.is_empty() {
            return Ok(requested);
        }
        let own = match self.store.get_source(item.source_id).await? {
            Some(s) => normalize_langs(&s.target_languages),
            None => Vec::new(),
        };
        Ok(if own.is_empty() {
            self.default_languages.clone()
        } else {
            own
        })
    }

    /// Translate a stored item into `languages` (or its source's targets when
    /// empty) and store the new entries. Languages already present are kept
    /// unless `force` is set.
    pub async fn translate(
        &self,
        guid: &str,
        languages: &[String],
        engine: Option<&str>,
        force: bool,
    ) -> Result<Item, ItemTranslateError> {
        let item = self
            .store
            .find_by_guid(guid)
            .await?
            .ok_or_else(|| ItemTranslateError::UnknownItem(guid.to_string()))?;

        let engine = match engine {
            Some(name) => Some(name.to_string()),
            None => self
                .store
                .get_source(item.source_id)
                .await?
                .and_then(|s| s.engine),
        };
        let wanted: Vec<String> = self
            .languages_for(&item, languages)
            .await?
            .into_iter()
            .filter(|l| force || !item.translations.contains_key(l))
            .collect();
        if wanted.is_empty() {
            return Ok(item);
        }

        let entries = self
            .translator
            .translate_item(&item, &wanted, engine.as_deref())
            .await?;
        let updated = self
            .store
            .put_translations(guid, &entries)
            .await?
            .ok_or_else(|| ItemTranslateError::UnknownItem(guid.to_string()))?;
        info!(target: "translate", guid, languages = ?wanted, "item translated");
        Ok(updated)
    }

    /// Translate several items one after another; failures do not stop the batch.
    pub async fn translate_batch(
        &self,
        guids: &[String],
        languages: &[String],
        engine: Option<&str>,
    ) -> BatchReport {
        let mut report = BatchReport::default();
        for guid in guids {
            match self.translate(guid, languages, engine, false).await {
                Ok(_) => report.translated.push(guid.clone()),
                Err(ItemTranslateError::UnknownItem(_)) => report.missing.push(guid.clone()),
                Err(e) => {
                    warn!(target: "translate", guid = %guid, error = %e, "batch item failed");
                    report.failed.insert(guid.clone(), e.to_string());
                }
            }
        }
        report
    }

    pub async fn stats(&self, guid: &str) -> Result<TranslationStats, ItemTranslateError> {
        self.store
            .find_by_guid(guid)
            .await?
            .map(|it| it.translation_stats())
            .ok_or_else(|| ItemTranslateError::UnknownItem(guid.to_string()))
    }

    /// Remove one language or all of them; returns how many entries went.
    pub async fn clear(&self, guid: &str, lang: Option<&str>) -> Result<usize, ItemTranslateError> {
        let lang = lang.map(|l| l.trim().to_lowercase());
        self.store
            .clear_translations(guid, lang.as_deref())
            .await?
            .ok_or_else(|| ItemTranslateError::UnknownItem(guid.to_string()))
    }
}
