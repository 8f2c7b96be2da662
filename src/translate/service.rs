// src/translate/service.rs
//! The translation pipeline: cache → detect → rate limit → retry → engine.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use metrics::counter;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use super::detect::heuristic_language;
use super::engine::{ConfigOverrides, TranslateError, TranslateRequest, TranslationEngine};
use super::limiter::RateLimiter;
use super::registry::{DynEngine, EngineRegistry};
use super::retry::RetryPolicy;
use crate::cache::{get_json, set_json, KvCache};
use crate::model::{Item, Translation, Usage};
use crate::normalize::clean_text;

/// Outcome of one translation request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranslationResult {
    pub text: String,
    pub source_language: String,
    pub target_language: String,
    pub engine: String,
    pub quality: Option<f32>,
    pub usage: Option<Usage>,
    /// Served from the response cache.
    #[serde(default)]
    pub cached: bool,
}

/// Key prefix of response cache entries.
pub const CACHE_PREFIX: &str = "translation:";

/// Lowercased language code; empty and `auto` mean "detect".
fn language_hint(code: Option<&str>) -> Option<String> {
    code.map(|c| c.trim().to_lowercase())
        .filter(|c| !c.is_empty() && c != "auto")
}

/// Cache key over normalized text and the language pair.
pub fn cache_key(text: &str, from: Option<&str>, to: &str) -> String {
    let from = language_hint(from).unwrap_or_else(|| "auto".to_string());
    let mut h = Sha256::new();
    h.update(clean_text(text).as_bytes());
    h.update([0x1f]);
    h.update(from.as_bytes());
    h.update([0x1f]);
    h.update(to.trim().to_lowercase().as_bytes());
    let digest = h.finalize();
    let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
    format!("{CACHE_PREFIX}{hex}")
}

/// One response cache entry.
#[derive(Debug, Clone, Serialize)]
pub struct CachedTranslation {
    pub key: String,
    #[serde(flatten)]
    pub result: TranslationResult,
}

pub struct Translator {
    registry: Arc<EngineRegistry>,
    limiter: Arc<RateLimiter>,
    cache: Arc<dyn KvCache>,
    cache_ttl: Duration,
}

impl Translator {
    pub fn new(
        registry: Arc<EngineRegistry>,
        limiter: Arc<RateLimiter>,
        cache: Arc<dyn KvCache>,
        cache_ttl: Duration,
    ) -> Self {
        Self {
            registry,
            limiter,
            cache,
            cache_ttl,
        }
    }

    pub fn registry(&self) -> &EngineRegistry {
        &self.registry
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    fn engine(&self, name: Option<&str>) -> Result<DynEngine, TranslateError> {
        self.registry.resolve(name).ok_or_else(|| {
            TranslateError::NotConfigured(format!(
                "no translation engine available (default `{}`)",
                self.registry.default_name()
            ))
        })
    }

    /// Detect the language of `text`, falling back to the script heuristic
    /// when the engine fails.
    pub async fn detect(&self, engine: &dyn TranslationEngine, text: &str) -> String {
        let sample: String = text.chars().take(500).collect();
        let detected = self
            .limiter
            .run(|| engine.detect_language(&sample))
            .await;
        match detected {
            Ok(code) => code,
            Err(e) => {
                let guess = heuristic_language(&sample);
                debug!(target: "translate", engine = engine.name(), error = %e, guess, "detection failed, using heuristic");
                guess.to_string()
            }
        }
    }

    /// Translate one text.
    ///
    /// Empty input is returned unchanged without touching an engine. Cache
    /// hits bypass both the rate limiter and the engine.
    pub async fn translate(
        &self,
        req: &TranslateRequest,
        engine_name: Option<&str>,
        overrides: &ConfigOverrides,
    ) -> Result<TranslationResult, TranslateError> {
        let engine = self.engine(engine_name)?;
        let to = req.to.trim().to_lowercase();
        if !engine.supports(&to) {
            return Err(TranslateError::UnsupportedLanguage(to));
        }
        let from_hint = language_hint(req.from.as_deref());
        if let Some(f) = from_hint.as_deref().filter(|f| !engine.supports(f)) {
            return Err(TranslateError::UnsupportedLanguage(f.to_string()));
        }

        if req.text.trim().is_empty() {
            return Ok(TranslationResult {
                text: req.text.clone(),
                source_language: from_hint.unwrap_or_else(|| to.clone()),
                target_language: to,
                engine: engine.name().to_string(),
                quality: None,
                usage: None,
                cached: false,
            });
        }

        let key = cache_key(&req.text, from_hint.as_deref(), &to);
        if let Some(mut hit) = get_json::<TranslationResult>(self.cache.as_ref(), &key).await {
            counter!("translate_cache_hits_total").increment(1);
            hit.cached = true;
            return Ok(hit);
        }
        counter!("translate_cache_misses_total").increment(1);

        let from = match from_hint {
            Some(f) => f,
            None => self.detect(engine.as_ref(), &req.text).await,
        };

        let result = if from == to {
            TranslationResult {
                text: req.text.clone(),
                source_language: from,
                target_language: to,
                engine: engine.name().to_string(),
                quality: Some(1.0),
                usage: None,
                cached: false,
            }
        } else {
            let call = TranslateRequest {
                text: req.text.clone(),
                from: Some(from.clone()),
                to: to.clone(),
            };
            let cfg = overrides.merged(&engine.default_config());
            let policy = RetryPolicy::from_config(&cfg);
            let (limiter, eng, call, cfg) = (&*self.limiter, engine.as_ref(), &call, &cfg);
            // One permit per attempt; back-off sleeps do not hold a permit.
            let out = policy
                .run(move |_| limiter.run(move || eng.translate(call, cfg)))
                .await;
            let out = match out {
                Ok(out) => out,
                Err(e) => {
                    counter!("translate_failures_total", "engine" => engine.name().to_string())
                        .increment(1);
                    return Err(e);
                }
            };
            counter!("translate_requests_total", "engine" => engine.name().to_string())
                .increment(1);
            TranslationResult {
                text: out.text,
                source_language: from,
                target_language: to,
                engine: engine.name().to_string(),
                quality: out.quality,
                usage: out.usage,
                cached: false,
            }
        };

        if let Err(e) = set_json(self.cache.as_ref(), &key, &result, Some(self.cache_ttl)).await {
            warn!(target: "translate", error = %e, "failed to cache translation");
        }
        Ok(result)
    }

    /// Live response cache entries.
    pub async fn cached_translations(&self) -> Vec<CachedTranslation> {
        let mut out = Vec::new();
        for key in self.cache.keys(CACHE_PREFIX).await {
            if let Some(result) = get_json::<TranslationResult>(self.cache.as_ref(), &key).await {
                out.push(CachedTranslation { key, result });
            }
        }
        out
    }

    /// Drop every response cache entry. Task records are kept.
    pub async fn clear_cache(&self) -> usize {
        let n = self.cache.delete_prefix(CACHE_PREFIX).await;
        info!(target: "translate", cleared = n, "translation cache cleared");
        n
    }

    /// Produce one [`Translation`] per target language for `item`.
    ///
    /// The source language is detected once per item; targets equal to it
    /// get a verbatim copy.
    pub async fn translate_item(
        &self,
        item: &Item,
        languages: &[String],
        engine_name: Option<&str>,
    ) -> Result<BTreeMap<String, Translation>, TranslateError> {
        let mut out = BTreeMap::new();
        if languages.is_empty() {
            return Ok(out);
        }
        let engine = self.engine(engine_name)?;
        let sample = format!("{}\n{}", item.title, item.content);
        let source = self.detect(engine.as_ref(), &sample).await;
        // A detected code the engine does not list is left to per-call detection.
        let hint = engine.supports(&source).then(|| source.clone());
        let none = ConfigOverrides::default();

        for lang in languages {
            let now = Utc::now();
            if lang.eq_ignore_ascii_case(&source) {
                out.insert(
                    lang.clone(),
                    Translation {
                        title: item.title.clone(),
                        content: item.content.clone(),
                        engine: engine.name().to_string(),
                        quality: Some(1.0),
                        usage: None,
                        translated_at: now,
                    },
                );
                continue;
            }

            let title = self
                .translate(
                    &TranslateRequest {
                        text: item.title.clone(),
                        from: hint.clone(),
                        to: lang.clone(),
                    },
                    Some(engine.name()),
                    &none,
                )
                .await?;
            let content = self
                .translate(
                    &TranslateRequest {
                        text: item.content.clone(),
                        from: hint.clone(),
                        to: lang.clone(),
                    },
                    Some(engine.name()),
                    &none,
                )
                .await?;

            out.insert(
                lang.clone(),
                Translation {
                    title: title.text,
                    content: content.text,
                    engine: content.engine,
                    quality: content.quality,
                    usage: content.usage,
                    translated_at: now,
                },
            );
        }
        Ok(out)
    }
}
