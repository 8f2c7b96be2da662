// src/config/mod.rs
//! Application configuration.
//!
//! Lookup order:
//! 1) `$FEED_RELAY_CONFIG_PATH`
//! 2) `config/feed_relay.toml`
//! 3) `config/feed_relay.json`
//! 4) built-in defaults

pub mod ai;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub use ai::{EngineConfig, EnginesConfig, TranslationSettings};

use crate::model::Source;

pub const ENV_PATH: &str = "FEED_RELAY_CONFIG_PATH";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub ingest: IngestConfig,
    pub scheduler: SchedulerConfig,
    pub translation: TranslationSettings,
    pub http: HttpConfig,
    pub storage: StorageConfig,
    /// Sources registered at startup when the store is empty.
    pub seed: Vec<Source>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Max feed items taken per cycle.
    pub batch_size: usize,
    /// Retries per failed item before it is abandoned.
    pub max_retry_count: u32,
    /// Cool-down between retries of one failed item.
    pub retry_delay_minutes: i64,
    /// Consecutive fatal cycles after which a source is deactivated.
    pub max_error_count: u32,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            batch_size: 50,
            max_retry_count: 3,
            retry_delay_minutes: 30,
            max_error_count: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub enabled: bool,
    pub tick_interval_secs: u64,
    pub max_concurrent_jobs: usize,
    /// Back-off before a source in error state is attempted again.
    pub error_backoff_minutes: i64,
    pub max_due_per_tick: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            tick_interval_secs: 60,
            max_concurrent_jobs: 5,
            error_backoff_minutes: 60,
            max_due_per_tick: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub user_agent: String,
    pub connect_timeout_secs: u64,
    pub timeout_secs: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            user_agent: concat!("feed-relay/", env!("CARGO_PKG_VERSION")).to_string(),
            connect_timeout_secs: 10,
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// JSON snapshot of the in-memory store; `None` keeps everything in memory.
    pub snapshot_path: Option<PathBuf>,
}

impl AppConfig {
    /// Load from an explicit path. Supports TOML or JSON formats.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        let ext = path
            .extension()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        let mut cfg = parse_config(&content, ext.as_str())
            .with_context(|| format!("parsing config {}", path.display()))?;
        cfg.sanitize();
        Ok(cfg)
    }

    /// Load using env var + fallbacks (see module docs).
    pub fn load_default() -> Result<Self> {
        if let Ok(p) = std::env::var(ENV_PATH) {
            let pb = PathBuf::from(p);
            if pb.exists() {
                return Self::load_from(&pb);
            } else {
                return Err(anyhow!("{ENV_PATH} points to non-existent path"));
            }
        }
        let toml_p = PathBuf::from("config/feed_relay.toml");
        if toml_p.exists() {
            return Self::load_from(&toml_p);
        }
        let json_p = PathBuf::from("config/feed_relay.json");
        if json_p.exists() {
            return Self::load_from(&json_p);
        }
        Ok(Self::default())
    }

    /// Clamp values that would stall the pipeline.
    fn sanitize(&mut self) {
        let d = IngestConfig::default();
        if self.ingest.batch_size == 0 {
            self.ingest.batch_size = d.batch_size;
        }
        if self.ingest.max_error_count == 0 {
            self.ingest.max_error_count = d.max_error_count;
        }
        if self.ingest.retry_delay_minutes < 0 {
            self.ingest.retry_delay_minutes = d.retry_delay_minutes;
        }
        let s = SchedulerConfig::default();
        if self.scheduler.max_concurrent_jobs == 0 {
            self.scheduler.max_concurrent_jobs = s.max_concurrent_jobs;
        }
        if self.scheduler.tick_interval_secs == 0 {
            self.scheduler.tick_interval_secs = s.tick_interval_secs;
        }
        self.translation.sanitize();
    }
}

fn parse_config(s: &str, hint_ext: &str) -> Result<AppConfig> {
    if hint_ext == "json" {
        return serde_json::from_str(s).context("invalid json config");
    }
    if hint_ext == "toml" {
        return toml::from_str(s).context("invalid toml config");
    }
    // Unknown extension: sniff.
    if s.trim_start().starts_with('{') {
        serde_json::from_str(s).context("invalid json config")
    } else {
        toml::from_str(s).context("invalid toml config")
    }
}
