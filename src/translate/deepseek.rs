// src/translate/deepseek.rs
use std::time::Duration;

use async_trait::async_trait;

use super::chat::{parse_language_code, translation_prompt, ChatClient, DETECT_PROMPT};
use super::engine::{
    Backoff, TranslateError, TranslateRequest, TranslationConfig, TranslationEngine,
    TranslationOutput, COMMON_LANGUAGES,
};
use super::openai::apply_engine_config;
use crate::config::EngineConfig;

const DEFAULT_BASE_URL: &str = "https://api.deepseek.com";
const DEFAULT_MODEL: &str = "deepseek-chat";
const QUALITY: f32 = 0.9;

/// DeepSeek engine over its OpenAI-compatible endpoint. Retries use a fixed delay.
pub struct DeepseekEngine {
    client: ChatClient,
    defaults: TranslationConfig,
}

impl DeepseekEngine {
    pub fn new(
        api_key: String,
        base_url: Option<&str>,
        timeout: Duration,
    ) -> Result<Self, TranslateError> {
        if api_key.is_empty() {
            return Err(TranslateError::NotConfigured("DEEPSEEK_API_KEY not set".into()));
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
        let key = cfg.resolve_api_key("deepseek")?;
        let timeout = Duration::from_secs(cfg.timeout_secs.unwrap_or(60));
        let mut engine = Self::new(key, cfg.base_url.as_deref(), timeout)?;
        engine.defaults = apply_engine_config(base_config(), cfg);
        Ok(engine)
    }
}

fn base_config() -> TranslationConfig {
    TranslationConfig {
        model: Some(DEFAULT_MODEL.to_string()),
        temperature: 0.2,
        max_tokens: 4000,
        retry_count: 3,
        retry_delay: Duration::from_millis(1_000),
        backoff: Backoff::Fixed,
    }
}

#[async_trait]
impl TranslationEngine for DeepseekEngine {
    fn name(&self) -> &str {
        "deepseek"
    }

    fn description(&self) -> &str {
        "DeepSeek chat completions"
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
