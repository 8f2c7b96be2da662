// tests/common/mod.rs
//
// Shared fixtures for integration tests: a scriptable translation engine,
// an RSS builder and constructors for the wired components.
#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use feed_relay::cache::MemoryCache;
use feed_relay::feed::FixtureFeedReader;
use feed_relay::ingest::{IngestEngine, IngestSettings};
use feed_relay::model::Source;
use feed_relay::store::MemoryStore;
use feed_relay::translate::engine::COMMON_LANGUAGES;
use feed_relay::translate::{
    Backoff, EngineRegistry, RateLimiter, TranslateError, TranslateRequest, TranslationConfig,
    TranslationEngine, TranslationOutput, Translator,
};

pub const FEED_URL: &str = "https://news.example.org/feed.xml";

/// Engine that prefixes the target language, fails permanently on texts
/// containing a poisoned marker, and fails transiently a set number of times.
#[derive(Default)]
pub struct ScriptedEngine {
    poison: Mutex<HashSet<String>>,
    transient_failures: Mutex<u32>,
    delay: Mutex<Duration>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedEngine {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn poison(&self, marker: &str) {
        self.poison.lock().insert(marker.to_string());
    }

    pub fn heal(&self) {
        self.poison.lock().clear();
    }

    pub fn fail_transiently(&self, times: u32) {
        *self.transient_failures.lock() = times;
    }

    pub fn set_delay(&self, d: Duration) {
        *self.delay.lock() = d;
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

#[async_trait]
impl TranslationEngine for ScriptedEngine {
    fn name(&self) -> &str {
        "scripted"
    }

    fn description(&self) -> &str {
        "test engine"
    }

    fn supported_languages(&self) -> &[&'static str] {
        COMMON_LANGUAGES
    }

    fn default_config(&self) -> TranslationConfig {
        TranslationConfig {
            retry_count: 2,
            retry_delay: Duration::from_millis(1),
            backoff: Backoff::Fixed,
            ..TranslationConfig::default()
        }
    }

    async fn detect_language(&self, _text: &str) -> Result<String, TranslateError> {
        Ok("en".to_string())
    }

    async fn translate(
        &self,
        req: &TranslateRequest,
        _cfg: &TranslationConfig,
    ) -> Result<TranslationOutput, TranslateError> {
        self.calls.lock().push(req.text.clone());
        let delay = *self.delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        {
            let mut left = self.transient_failures.lock();
            if *left > 0 {
                *left -= 1;
                return Err(TranslateError::Api {
                    status: 503,
                    body: "overloaded".into(),
                });
            }
        }
        if self.poison.lock().iter().any(|m| req.text.contains(m.as_str())) {
            return Err(TranslateError::Api {
                status: 400,
                body: "content rejected".into(),
            });
        }
        Ok(TranslationOutput {
            text: format!("[{}] {}", req.to, req.text),
            quality: Some(0.9),
            usage: None,
        })
    }
}

pub fn translator_with(engine: Arc<dyn TranslationEngine>, max_concurrent: usize) -> Arc<Translator> {
    let reg = EngineRegistry::new(engine.name().to_string()).with(engine);
    Arc::new(Translator::new(
        Arc::new(reg),
        RateLimiter::shared(max_concurrent),
        Arc::new(MemoryCache::default()),
        Duration::from_secs(3600),
    ))
}

/// RSS 2.0 document with one item per `(guid, title)`.
pub fn rss(items: &[(&str, &str)]) -> String {
    let body: String = items
        .iter()
        .map(|(guid, title)| {
            format!(
                "<item><title>{title}</title><link>https://news.example.org/{guid}</link>\
                 <guid>{guid}</guid><description>Body of {title}</description></item>"
            )
        })
        .collect();
    format!(r#"<?xml version="1.0"?><rss version="2.0"><channel><title>News</title>{body}</channel></rss>"#)
}

pub fn source(id: u64, url: &str) -> Source {
    let mut s = Source::new(id, format!("source {id}"), url);
    s.target_languages = vec!["fr".into()];
    s
}

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub reader: Arc<FixtureFeedReader>,
    pub engine: Arc<ScriptedEngine>,
    pub ingest: Arc<IngestEngine>,
}

/// Store seeded with source 1 at [`FEED_URL`], serving `feed`.
pub fn harness(feed: &str) -> Harness {
    let store = Arc::new(MemoryStore::new());
    store.seed_sources(&[source(1, FEED_URL)]).unwrap();
    let reader = Arc::new(FixtureFeedReader::new().with_feed(FEED_URL, feed));
    let engine = ScriptedEngine::new();
    let ingest = Arc::new(IngestEngine::new(
        store.clone(),
        reader.clone(),
        translator_with(engine.clone(), 5),
        IngestSettings::default(),
    ));
    Harness {
        store,
        reader,
        engine,
        ingest,
    }
}
