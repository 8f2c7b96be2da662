// src/translate/openai.rs
use std::time::Duration;

use async_trait::async_trait;

use super::chat::{parse_language_code, translation_prompt, ChatClient, DETECT_PROMPT};
use super::engine::{
    Backoff, TranslateError, TranslateRequest, TranslationConfig, TranslationEngine,
    TranslationOutput, COMMON_LANGUAGES,
};
use crate::config::EngineConfig;

const DEFAULT_BASE_URL: &str = "https://api.openai.com";
const DEFAULT_MODEL: &str = "gpt-4o-mini";
const QUALITY: f32 = 0.85;

/// OpenAI chat-completions engine. Retries back off exponentially.
pub struct OpenAiEngine {
    client: ChatClient,
    defaults: TranslationConfig,
}

impl OpenAiEngine {
    pub fn new(
        api_key: String,
        base_url: Option<&str>,
        timeout: Duration,
    ) -> Result<Self, TranslateError> {
        if api_key.is_empty() {
            return Err(TranslateError::NotConfigured("OPENAI_API_KEY not set".into()));
        }
        let client = ChatClient::new(
            api_key,
            base_url.unwrap_or(DEFAULT_BASE_URL),
            DEFAULT_MODEL,
            timeout,
        )?;
        Ok(Self {
            client,
            defaults: base_config(),
        })
    }

    pub fn from_config(cfg: &EngineConfig) -> anyhow::Result<Self> {
        let key = cfg.resolve_api_key("openai")?;
        let timeout = Duration::from_secs(cfg.timeout_secs.unwrap_or(60));
        let mut engine = Self::new(key, cfg.base_url.as_deref(), timeout)?;
        engine.defaults = apply_engine_config(base_config(), cfg);
        Ok(engine)
    }
}

fn base_config() -> TranslationConfig {
    TranslationConfig {
        model: None,
        temperature: 0.3,
        max_tokens: 4096,
        retry_count: 2,
        retry_delay: Duration::from_millis(1_000),
        backoff: Backoff::Exponential,
    }
}

/// Fold the optional tuning fields of an engine section into `base`.
pub(crate) fn apply_engine_config(mut base: TranslationConfig, cfg: &EngineConfig) -> TranslationConfig {
    if let Some(m) = &cfg.model {
        base.model = Some(m.clone());
    }
    if let Some(t) = cfg.temperature {
        base.temperature = t;
    }
    if let Some(t) = cfg.max_tokens {
        base.max_tokens = t;
    }
    if let Some(r) = cfg.retry_count {
        base.retry_count = r;
    }
    if let Some(d) = cfg.retry_delay_ms {
        base.retry_delay = Duration::from_millis(d);
    }
    base
}

#[async_trait]
impl TranslationEngine for OpenAiEngine {
    fn name(&self) -> &str {
        "openai"
    }

    fn description(&self) -> &str {
        "OpenAI chat completions"
    }

    fn supported_languages(&self) -> &[&'static str] {
        COMMON_LANGUAGES
    }

    fn default_config(&self) -> TranslationConfig {
        self.defaults.clone()
    }

    async fn detect_language(&self, text: &str) -> Result<String, TranslateError> {
        let cfg = TranslationConfig {
            temperature: 0.0,
            max_tokens: 8,
            ..self.defaults.clone()
        };
        let out = self.client.complete(DETECT_PROMPT, text, &cfg).await?;
        parse_language_code(&out.content)
    }

    async fn translate(
        &self,
        req: &TranslateRequest,
        cfg: &TranslationConfig,
    ) -> Result<TranslationOutput, TranslateError> {
        let out = self
            .client
            .complete(&translation_prompt(req), &req.text, cfg)
            .await?;
        Ok(TranslationOutput {
            text: out.content,
            quality: Some(QUALITY),
            usage: out.usage,
        })
    }
}
