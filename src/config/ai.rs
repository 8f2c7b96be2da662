// src/config/ai.rs
use serde::{Deserialize, Serialize};
use std::env;

fn default_engine() -> String {
    "openai".to_string()
}
fn default_targets() -> Vec<String> {
    vec!["zh".to_string()]
}
fn default_max_concurrent() -> usize {
    5
}
fn default_cache_ttl() -> u64 {
    3_600
}
fn default_task_ttl() -> u64 {
    86_400
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslationSettings {
    /// Engine used when a source names none or an unknown one.
    #[serde(default = "default_engine")]
    pub default_engine: String,
    #[serde(default = "default_targets")]
    pub default_target_languages: Vec<String>,
    /// Permits of the shared rate limiter.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_secs: u64,
    /// Retention of deferred-translation task records.
    #[serde(default = "default_task_ttl")]
    pub task_ttl_secs: u64,
    #[serde(default)]
    pub engines: EnginesConfig,
}

impl Default for TranslationSettings {
    fn default() -> Self {
        Self {
            default_engine: default_engine(),
            default_target_languages: default_targets(),
            max_concurrent: default_max_concurrent(),
            cache_ttl_secs: default_cache_ttl(),
            task_ttl_secs: default_task_ttl(),
            engines: EnginesConfig::default(),
        }
    }
}

impl TranslationSettings {
    pub(crate) fn sanitize(&mut self) {
        self.default_engine = self.default_engine.trim().to_lowercase();
        if self.default_engine.is_empty() {
            self.default_engine = default_engine();
        }
        if self.max_concurrent == 0 {
            self.max_concurrent = default_max_concurrent();
        }
        self.default_target_languages = normalize_langs(&self.default_target_languages);
        if self.default_target_languages.is_empty() {
            self.default_target_languages = default_targets();
        }
    }
}

/// Lowercase, trim, drop empties and duplicates (order kept).
pub fn normalize_langs(langs: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(langs.len());
    for l in langs {
        let l = l.trim().to_lowercase();
        if !l.is_empty() && !out.contains(&l) {
            out.push(l);
        }
    }
    out
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EnginesConfig {
    #[serde(default)]
    pub openai: Option<EngineConfig>,
    #[serde(default)]
    pub deepseek: Option<EngineConfig>,
}

/// Connection and tuning parameters for one chat-completions engine.
/// Unset tuning fields fall back to the engine's own defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// "ENV" means: read from OPENAI_API_KEY / DEEPSEEK_API_KEY (by engine)
    #[serde(default = "default_env_key")]
    pub api_key: String,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub retry_count: Option<u32>,
    #[serde(default)]
    pub retry_delay_ms: Option<u64>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

fn default_true() -> bool {
    true
}
fn default_env_key() -> String {
    "ENV".to_string()
}

impl EngineConfig {
    /// Resolve the API key, reading the engine's env var when set to "ENV".
    pub fn resolve_api_key(&self, engine: &str) -> anyhow::Result<String> {
        if !self.api_key.trim().eq_ignore_ascii_case("env") {
            return Ok(self.api_key.trim().to_string());
        }
        let var = match engine {
            "openai" => "OPENAI_API_KEY",
            "deepseek" => "DEEPSEEK_API_KEY",
            other => anyhow::bail!("Unsupported engine in config: {other}"),
        };
        env::var(var)
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| anyhow::anyhow!("Missing {var} env var"))
    }
}
