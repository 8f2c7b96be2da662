// tests/translator.rs
//
// Translation backend behavior through the public Translator: rate limiting,
// retry budget, response cache and background tasks.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{translator_with, ScriptedEngine};
use feed_relay::cache::{KvCache, MemoryCache};
use feed_relay::model::TaskStatus;
use feed_relay::translate::{
    ConfigOverrides, EchoEngine, EngineRegistry, RateLimiter, TaskQueue, TranslateError,
    TranslateRequest, Translator,
};

fn none() -> ConfigOverrides {
    ConfigOverrides::default()
}

#[tokio::test]
async fn concurrent_calls_never_exceed_the_limit() {
    let engine = ScriptedEngine::new();
    engine.set_delay(Duration::from_millis(20));
    let t = translator_with(engine.clone(), 5);

    let mut handles = Vec::new();
    for i in 0..12 {
        let t = t.clone();
        handles.push(tokio::spawn(async move {
            let req = TranslateRequest::new(format!("text {i}"), "fr").from_lang("en");
            t.translate(&req, None, &ConfigOverrides::default()).await
        }));
    }
    for h in handles {
        h.await.unwrap().unwrap();
    }

    assert_eq!(engine.call_count(), 12);
    let peak = t.limiter().peak();
    assert!(peak <= 5, "peak {peak} exceeded the limit");
    assert!(peak >= 2, "calls should overlap, peak {peak}");
    assert_eq!(t.limiter().in_flight(), 0);
}

#[tokio::test]
async fn transient_errors_are_retried_within_budget() {
    let engine = ScriptedEngine::new();
    engine.fail_transiently(2);
    let t = translator_with(engine.clone(), 2);

    let req = TranslateRequest::new("hello", "fr").from_lang("en");
    let out = t.translate(&req, None, &none()).await.unwrap();
    assert_eq!(out.text, "[fr] hello");
    assert_eq!(engine.call_count(), 3);
}

#[tokio::test]
async fn exhausted_budget_reports_attempts() {
    let engine = ScriptedEngine::new();
    engine.fail_transiently(10);
    let t = translator_with(engine.clone(), 2);

    let req = TranslateRequest::new("hello", "fr").from_lang("en");
    match t.translate(&req, None, &none()).await {
        Err(TranslateError::Exhausted { attempts, last }) => {
            assert_eq!(attempts, 3);
            assert!(matches!(*last, TranslateError::Api { status: 503, .. }));
        }
        other => panic!("expected exhausted, got {other:?}"),
    }

    let no_retry = ConfigOverrides {
        retry_count: Some(0),
        ..Default::default()
    };
    let before = engine.call_count();
    let err = t.translate(&req, None, &no_retry).await.unwrap_err();
    assert!(matches!(err, TranslateError::Exhausted { attempts: 1, .. }));
    assert_eq!(engine.call_count(), before + 1);
}

#[tokio::test]
async fn permanent_errors_are_not_retried() {
    let engine = ScriptedEngine::new();
    engine.poison("forbidden");
    let t = translator_with(engine.clone(), 2);

    let req = TranslateRequest::new("a forbidden word", "fr").from_lang("en");
    let err = t.translate(&req, None, &none()).await.unwrap_err();
    assert!(matches!(err, TranslateError::Api { status: 400, .. }));
    assert_eq!(engine.call_count(), 1);

    // Failures are not cached.
    engine.heal();
    assert!(t.translate(&req, None, &none()).await.is_ok());
}

#[tokio::test]
async fn cache_hits_skip_the_engine() {
    let engine = ScriptedEngine::new();
    let t = translator_with(engine.clone(), 2);

    let req = TranslateRequest::new("Good morning", "ja").from_lang("en");
    let first = t.translate(&req, None, &none()).await.unwrap();
    assert!(!first.cached);
    let second = t.translate(&req, None, &none()).await.unwrap();
    assert!(second.cached);
    assert_eq!(second.text, first.text);
    assert_eq!(engine.call_count(), 1);
}

#[tokio::test]
async fn same_language_is_copied() {
    let engine = ScriptedEngine::new();
    let t = translator_with(engine.clone(), 2);

    // Detection answers "en".
    let out = t
        .translate(&TranslateRequest::new("Plain text", "en"), None, &none())
        .await
        .unwrap();
    assert_eq!(out.text, "Plain text");
    assert_eq!(out.source_language, "en");
    assert_eq!(out.quality, Some(1.0));
    assert_eq!(engine.call_count(), 0);
}

#[tokio::test]
async fn unsupported_language_and_empty_text() {
    let engine = ScriptedEngine::new();
    let t = translator_with(engine.clone(), 2);

    let err = t
        .translate(&TranslateRequest::new("x", "tlh"), None, &none())
        .await
        .unwrap_err();
    assert!(matches!(err, TranslateError::UnsupportedLanguage(ref l) if l == "tlh"));

    let out = t
        .translate(&TranslateRequest::new("   ", "fr"), None, &none())
        .await
        .unwrap();
    assert_eq!(out.text, "   ");
    assert_eq!(engine.call_count(), 0);
}

#[tokio::test]
async fn unknown_engine_name_uses_default() {
    let engine = ScriptedEngine::new();
    let t = translator_with(engine.clone(), 2);
    let out = t
        .translate(
            &TranslateRequest::new("hi", "de").from_lang("en"),
            Some("nonexistent"),
            &none(),
        )
        .await
        .unwrap();
    assert_eq!(out.engine, "scripted");
}

#[tokio::test]
async fn identity_round_trip_restores_the_original() {
    let cache = Arc::new(MemoryCache::default());
    let t = Translator::new(
        Arc::new(EngineRegistry::new("echo").with(Arc::new(EchoEngine))),
        RateLimiter::shared(2),
        cache.clone(),
        Duration::from_secs(60),
    );
    let original = "The harbour opens at dawn.";

    let there = t
        .translate(&TranslateRequest::new(original, "de"), None, &none())
        .await
        .unwrap();
    assert_eq!(there.source_language, "en");
    assert_eq!(there.target_language, "de");
    assert!(!there.cached);

    let back_req = TranslateRequest::new(there.text.clone(), there.source_language.clone())
        .from_lang(there.target_language.clone());
    let back = t.translate(&back_req, None, &none()).await.unwrap();
    assert_eq!(back.text, original);
    assert_eq!((back.source_language.as_str(), back.target_language.as_str()), ("de", "en"));
    assert!(!back.cached, "reverse pair has its own cache entry");
    assert_eq!(cache.len(), 2);

    let again = t.translate(&back_req, None, &none()).await.unwrap();
    assert!(again.cached);
    assert_eq!(again.text, original);
}

async fn wait_terminal(q: &TaskQueue, id: &str) -> feed_relay::model::TranslationTask {
    for _ in 0..200 {
        if let Some(task) = q.status(id).await {
            if task.status.is_terminal() {
                return task;
            }
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("task {id} did not finish");
}

#[tokio::test]
async fn async_task_completes_with_result() {
    let engine = ScriptedEngine::new();
    let t = translator_with(engine.clone(), 2);
    let cache: Arc<dyn KvCache> = Arc::new(MemoryCache::default());
    let q = TaskQueue::start(t, cache, Duration::from_secs(60));

    let task = q
        .submit("hello".into(), "fr".into(), Some("en".into()), None)
        .await
        .unwrap();
    assert_eq!(task.status, TaskStatus::Queued);
    assert_eq!(task.progress, 0);

    let done = wait_terminal(&q, &task.task_id).await;
    assert_eq!(done.status, TaskStatus::Completed);
    assert_eq!(done.progress, 100);
    assert_eq!(done.result.as_deref(), Some("[fr] hello"));
}

#[tokio::test]
async fn async_task_records_failure() {
    let engine = ScriptedEngine::new();
    engine.poison("bad");
    let t = translator_with(engine.clone(), 2);
    let q = TaskQueue::start(t, Arc::new(MemoryCache::default()), Duration::from_secs(60));

    let task = q
        .submit("bad input".into(), "fr".into(), Some("en".into()), None)
        .await
        .unwrap();
    let done = wait_terminal(&q, &task.task_id).await;
    assert_eq!(done.status, TaskStatus::Failed);
    assert!(done.error.unwrap().contains("content rejected"));
    assert!(done.result.is_none());
    assert!(q.status("no-such-task").await.is_none());
}
