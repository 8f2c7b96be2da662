// src/translate/mod.rs
//! Pluggable translation backend.
//!
//! Engines implement [`TranslationEngine`] and are looked up by name in an
//! [`EngineRegistry`]. [`Translator`] wraps every call with the response
//! cache, language detection, the shared [`RateLimiter`] and a
//! [`RetryPolicy`]. [`TaskQueue`] runs translations in the background and
//! [`ItemTranslator`] adds translations to stored items on demand.

pub mod chat;
pub mod deepseek;
pub mod detect;
pub mod echo;
pub mod engine;
pub mod items;
pub mod limiter;
pub mod openai;
pub mod registry;
pub mod retry;
pub mod service;
pub mod tasks;

pub use detect::heuristic_language;
pub use echo::EchoEngine;
pub use engine::{
    Backoff, ConfigOverrides, TranslateError, TranslateRequest, TranslationConfig,
    TranslationEngine, TranslationOutput,
};
pub use items::{BatchReport, ItemTranslateError, ItemTranslator};
pub use limiter::RateLimiter;
pub use registry::{DynEngine, EngineRegistry};
pub use retry::RetryPolicy;
pub use service::{CachedTranslation, TranslationResult, Translator};
pub use tasks::TaskQueue;
