// src/translate/engine.rs
//! Engine-facing types: the [`TranslationEngine`] trait, per-call configuration
//! and the error taxonomy shared by every backend.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::model::Usage;

#[derive(Debug, thiserror::Error)]
pub enum TranslateError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("API error: {status} - {body}")]
    Api { status: u16, body: String },
    #[error("failed to parse response: {0}")]
    Parse(String),
    #[error("engine not configured: {0}")]
    NotConfigured(String),
    #[error("unsupported language: {0}")]
    UnsupportedLanguage(String),
    #[error("rate limiter closed")]
    LimiterClosed,
    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted {
        attempts: u32,
        last: Box<TranslateError>,
    },
}

impl TranslateError {
    /// Transient failures worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            TranslateError::Http(e) => !e.is_builder() && !e.is_decode(),
            TranslateError::Api { status, .. } => *status == 408 || *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backoff {
    Fixed,
    Exponential,
}

/// Tuning for one translation call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranslationConfig {
    pub model: Option<String>,
    pub temperature: f32,
    pub max_tokens: u32,
    /// Extra attempts after the first one.
    pub retry_count: u32,
    #[serde(with = "duration_ms")]
    pub retry_delay: Duration,
    pub backoff: Backoff,
}

impl Default for TranslationConfig {
    fn default() -> Self {
        Self {
            model: None,
            temperature: 0.3,
            max_tokens: 4096,
            retry_count: 2,
            retry_delay: Duration::from_millis(1_000),
            backoff: Backoff::Exponential,
        }
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

/// Per-call overrides; unset fields keep the engine default.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigOverrides {
    pub model: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub retry_count: Option<u32>,
    pub retry_delay_ms: Option<u64>,
}

impl ConfigOverrides {
    pub fn merged(&self, base: &TranslationConfig) -> TranslationConfig {
        TranslationConfig {
            model: self.model.clone().or_else(|| base.model.clone()),
            temperature: self.temperature.unwrap_or(base.temperature),
            max_tokens: self.max_tokens.unwrap_or(base.max_tokens),
            retry_count: self.retry_count.unwrap_or(base.retry_count),
            retry_delay: self
                .retry_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(base.retry_delay),
            backoff: base.backoff,
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranslateRequest {
    pub text: String,
    /// `None` asks the engine to detect the language.
    pub from: Option<String>,
    pub to: String,
}

impl TranslateRequest {
    pub fn new(text: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            from: None,
            to: to.into(),
        }
    }

    pub fn from_lang(mut self, from: impl Into<String>) -> Self {
        self.from = Some(from.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranslationOutput {
    pub text: String,
    /// 0.0..=1.0 as reported by the engine.
    pub quality: Option<f32>,
    pub usage: Option<Usage>,
}

/// A pluggable translation backend.
#[async_trait]
pub trait TranslationEngine: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    fn supported_languages(&self) -> &[&'static str];

    fn default_config(&self) -> TranslationConfig;

    fn supports(&self, lang: &str) -> bool {
        self.supported_languages()
            .iter()
            .any(|l| l.eq_ignore_ascii_case(lang))
    }

    /// ISO 639-1 code of `text`.
    async fn detect_language(&self, text: &str) -> Result<String, TranslateError>;

    /// One attempt; retries and rate limiting are applied by the caller.
    async fn translate(
        &self,
        req: &TranslateRequest,
        cfg: &TranslationConfig,
    ) -> Result<TranslationOutput, TranslateError>;
}

/// Languages the chat-completion engines are prompted with.
pub const COMMON_LANGUAGES: &[&str] = &[
    "en", "zh", "ja", "ko", "fr", "de", "es", "it", "pt", "ru", "ar", "th", "vi", "id", "nl",
    "pl", "tr", "uk",
];
