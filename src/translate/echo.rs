// src/translate/echo.rs
use async_trait::async_trait;

use super::detect::heuristic_language;
use super::engine::{
    Backoff, TranslateError, TranslateRequest, TranslationConfig, TranslationEngine,
    TranslationOutput, COMMON_LANGUAGES,
};

/// Identity engine: returns the input unchanged. Used in mock mode and tests.
#[derive(Debug, Default, Clone)]
pub struct EchoEngine;

#[async_trait]
impl TranslationEngine for EchoEngine {
    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Identity translation (no external calls)"
    }

    fn supported_languages(&self) -> &[&'static str] {
        COMMON_LANGUAGES
    }

    fn default_config(&self) -> TranslationConfig {
        TranslationConfig {
            retry_count: 0,
            retry_delay: std::time::Duration::ZERO,
            backoff: Backoff::Fixed,
            ..TranslationConfig::default()
        }
    }

    async fn detect_language(&self, text: &str) -> Result<String, TranslateError> {
        Ok(heuristic_language(text).to_string())
    }

    async fn translate(
        &self,
        req: &TranslateRequest,
        _cfg: &TranslationConfig,
    ) -> Result<TranslationOutput, TranslateError> {
        Ok(TranslationOutput {
            text: req.text.clone(),
            quality: Some(1.0),
            usage: None,
        })
    }
}
