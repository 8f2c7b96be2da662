// src/bootstrap.rs
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::info;

use crate::cache::{KvCache, MemoryCache};
use crate::config::AppConfig;
use crate::feed::{FeedReader, HttpFeedReader};
use crate::ingest::{IngestEngine, IngestSettings};
use crate::scheduler::{Scheduler, SchedulerSettings};
use crate::store::{IngestStore, MemoryStore, SourceRegistry};
use crate::translate::{EngineRegistry, ItemTranslator, RateLimiter, TaskQueue, Translator};

/// Everything the HTTP layer and the scheduler share.
pub struct Runtime {
    pub config: AppConfig,
    pub store: Arc<dyn IngestStore>,
    pub cache: Arc<dyn KvCache>,
    pub translator: Arc<Translator>,
    pub tasks: Arc<TaskQueue>,
    pub items: Arc<ItemTranslator>,
    pub engine: Arc<IngestEngine>,
    pub scheduler: Arc<Scheduler>,
}

impl Runtime {
    /// Wire the production components from `config`. Must run inside a
    /// tokio runtime (the task queue spawns its worker).
    pub fn from_config(config: AppConfig) -> Result<Self> {
        let store = match &config.storage.snapshot_path {
            Some(p) => MemoryStore::open(p)
                .with_context(|| format!("opening store snapshot {}", p.display()))?,
            None => MemoryStore::new(),
        };
        let seeded = store.seed_sources(&config.seed).context("seeding sources")?;
        let reader = HttpFeedReader::new(&config.http)?;
        let rt = Self::assemble(config, Arc::new(store), Arc::new(reader));
        info!(seeded, engines = ?rt.translator.registry().names(), "runtime ready");
        Ok(rt)
    }

    /// Wire the shared components around an existing store and feed reader.
    pub fn assemble<S>(config: AppConfig, store: Arc<S>, reader: Arc<dyn FeedReader>) -> Self
    where
        S: IngestStore + 'static,
    {
        let t = &config.translation;
        let cache: Arc<dyn KvCache> =
            Arc::new(MemoryCache::new(Duration::from_secs(t.cache_ttl_secs)));
        let registry = Arc::new(EngineRegistry::from_config(t));
        let limiter = RateLimiter::shared(t.max_concurrent);
        let translator = Arc::new(Translator::new(
            registry,
            limiter,
            cache.clone(),
            Duration::from_secs(t.cache_ttl_secs),
        ));
        let tasks = TaskQueue::start(
            translator.clone(),
            cache.clone(),
            Duration::from_secs(t.task_ttl_secs),
        );

        let ingest_store: Arc<dyn IngestStore> = store.clone();
        let items = Arc::new(ItemTranslator::new(
            ingest_store.clone(),
            translator.clone(),
            t.default_target_languages.clone(),
        ));
        let engine = Arc::new(IngestEngine::new(
            ingest_store.clone(),
            reader,
            translator.clone(),
            IngestSettings::from_config(&config),
        ));
        let sources: Arc<dyn SourceRegistry> = store;
        let scheduler = Scheduler::new(
            engine.clone(),
            sources,
            SchedulerSettings::from_config(&config),
        );

        Self {
            config,
            store: ingest_store,
            cache,
            translator,
            tasks,
            items,
            engine,
            scheduler,
        }
    }
}
