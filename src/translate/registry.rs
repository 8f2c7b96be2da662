// src/translate/registry.rs
use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{info, warn};

use super::deepseek::DeepseekEngine;
use super::echo::EchoEngine;
use super::engine::TranslationEngine;
use super::openai::OpenAiEngine;
use crate::config::TranslationSettings;

pub type DynEngine = Arc<dyn TranslationEngine>;

/// Env switch forcing the identity engine (no external calls).
pub const AI_MODE_ENV: &str = "FEED_RELAY_AI_MODE";

/// Engines by name, with a default used for unknown or missing names.
pub struct EngineRegistry {
    engines: BTreeMap<String, DynEngine>,
    default: String,
}

impl EngineRegistry {
    pub fn new(default: impl Into<String>) -> Self {
        Self {
            engines: BTreeMap::new(),
            default: default.into(),
        }
    }

    /// Register (or replace) an engine under its own name.
    pub fn register(&mut self, engine: DynEngine) -> &mut Self {
        self.engines.insert(engine.name().to_string(), engine);
        self
    }

    pub fn with(mut self, engine: DynEngine) -> Self {
        self.register(engine);
        self
    }

    pub fn get(&self, name: &str) -> Option<DynEngine> {
        self.engines.get(name).cloned()
    }

    pub fn default_name(&self) -> &str {
        &self.default
    }

    pub fn get_default(&self) -> Option<DynEngine> {
        self.get(&self.default)
    }

    /// Engine by name, falling back to the default for unknown names.
    pub fn resolve(&self, name: Option<&str>) -> Option<DynEngine> {
        match name {
            Some(n) => self.get(n).or_else(|| {
                warn!(target: "translate", requested = n, fallback = %self.default, "unknown engine, using default");
                self.get_default()
            }),
            None => self.get_default(),
        }
    }

    pub fn names(&self) -> Vec<String> {
        self.engines.keys().cloned().collect()
    }

    pub fn engines(&self) -> impl Iterator<Item = &DynEngine> {
        self.engines.values()
    }

    /// Build from configuration and environment.
    ///
    /// * `FEED_RELAY_AI_MODE=mock` registers only the identity engine.
    /// * Otherwise every enabled engine whose key resolves is registered.
    /// * The identity engine is always present; it becomes the default when
    ///   the configured default could not be built.
    pub fn from_config(settings: &TranslationSettings) -> Self {
        if std::env::var(AI_MODE_ENV)
            .map(|v| v == "mock")
            .unwrap_or(false)
        {
            info!(target: "translate", "{AI_MODE_ENV}=mock, using echo engine");
            return Self::new("echo").with(Arc::new(EchoEngine));
        }

        let mut reg = Self::new(settings.default_engine.clone());
        reg.register(Arc::new(EchoEngine));

        if let Some(cfg) = settings.engines.openai.as_ref().filter(|c| c.enabled) {
            match OpenAiEngine::from_config(cfg) {
                Ok(e) => {
                    reg.register(Arc::new(e));
                }
                Err(e) => warn!(target: "translate", engine = "openai", error = %e, "engine not available"),
            }
        }
        if let Some(cfg) = settings.engines.deepseek.as_ref().filter(|c| c.enabled) {
            match DeepseekEngine::from_config(cfg) {
                Ok(e) => {
                    reg.register(Arc::new(e));
                }
                Err(e) => warn!(target: "translate", engine = "deepseek", error = %e, "engine not available"),
            }
        }

        if reg.get_default().is_none() {
            warn!(
                target: "translate",
                configured = %reg.default,
                "default engine not available, falling back to echo"
            );
            reg.default = "echo".to_string();
        }
        info!(target: "translate", engines = ?reg.names(), default = %reg.default, "engine registry ready");
        reg
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_falls_back_to_default() {
        let reg = EngineRegistry::new("echo").with(Arc::new(EchoEngine));
        assert_eq!(reg.resolve(Some("nope")).unwrap().name(), "echo");
        assert_eq!(reg.resolve(None).unwrap().name(), "echo");
        assert_eq!(reg.names(), vec!["echo"]);
        assert!(reg.get("nope").is_none());
    }

    #[test]
    fn empty_registry_resolves_nothing() {
        let reg = EngineRegistry::new("openai");
        assert!(reg.get_default().is_none());
        assert!(reg.resolve(Some("x")).is_none());
    }

    #[serial_test::serial]
    #[test]
    fn from_config_without_keys_uses_echo() {
        std::env::remove_var(AI_MODE_ENV);
        std::env::remove_var("OPENAI_API_KEY");
        let mut s = TranslationSettings::default();
        s.engines.openai = serde_json::from_str(r#"{"api_key": "ENV"}"#).ok();
        let reg = EngineRegistry::from_config(&s);
        assert_eq!(reg.default_name(), "echo");
        assert_eq!(reg.names(), vec!["echo"]);
    }

    #[serial_test::serial]
    #[test]
    fn literal_key_registers_engine() {
        std::env::remove_var(AI_MODE_ENV);
        let mut s = TranslationSettings::default();
        s.engines.openai = serde_json::from_str(r#"{"api_key": "sk-test"}"#).ok();
        let reg = EngineRegistry::from_config(&s);
        assert_eq!(reg.default_name(), "openai");
        assert_eq!(reg.names(), vec!["echo", "openai"]);
    }
}
