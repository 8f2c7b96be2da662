// src/translate/tasks.rs
//! Deferred translation: submit now, poll the task record later.
//!
//! Records live in the key-value cache under `translation_task:{id}`.
//! Lifecycle: `queued → processing(25) → processing(75) → completed(100)`,
//! or `failed` with the error message.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use metrics::counter;
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use super::engine::{ConfigOverrides, TranslateRequest};
use super::service::Translator;
use crate::cache::{get_json, set_json, KvCache};
use crate::model::{TaskStatus, TranslationTask};

pub fn task_key(task_id: &str) -> String {
    format!("translation_task:{task_id}")
}

struct Job {
    task_id: String,
    request: TranslateRequest,
    engine: Option<String>,
}

pub struct TaskQueue {
    cache: Arc<dyn KvCache>,
    ttl: Duration,
    tx: mpsc::UnboundedSender<Job>,
}

impl TaskQueue {
    /// Create the queue and spawn its worker on the current tokio runtime.
    pub fn start(translator: Arc<Translator>, cache: Arc<dyn KvCache>, ttl: Duration) -> Arc<Self> {
        let (tx, mut rx) = mpsc::unbounded_channel::<Job>();
        let worker_cache = cache.clone();
        tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                let translator = translator.clone();
                let cache = worker_cache.clone();
                tokio::spawn(async move {
                    if let Err(e) = run_job(&translator, cache.as_ref(), ttl, job).await {
                        warn!(target: "translate", error = ?e, "task bookkeeping failed");
                    }
                });
            }
        });
        Arc::new(Self { cache, ttl, tx })
    }

    pub async fn submit(
        &self,
        text: String,
        to: String,
        from: Option<String>,
        engine: Option<String>,
    ) -> Result<TranslationTask> {
        let now = Utc::now();
        let task = TranslationTask {
            task_id: Uuid::new_v4().to_string(),
            status: TaskStatus::Queued,
            progress: 0,
            result: None,
            error: None,
            created_at: now,
            updated_at: now,
        };
        set_json(self.cache.as_ref(), &task_key(&task.task_id), &task, Some(self.ttl)).await?;

        self.tx
            .send(Job {
                task_id: task.task_id.clone(),
                request: TranslateRequest { text, from, to },
                engine,
            })
            .context("translation task worker is gone")?;
        counter!("translate_tasks_submitted_total").increment(1);
        info!(target: "translate", task_id = %task.task_id, "translation task queued");
        Ok(task)
    }

    pub async fn status(&self, task_id: &str) -> Option<TranslationTask> {
        get_json(self.cache.as_ref(), &task_key(task_id)).await
    }
}

async fn update(
    cache: &dyn KvCache,
    ttl: Duration,
    task: &mut TranslationTask,
    status: TaskStatus,
    progress: u8,
) -> Result<()> {
    task.status = status;
    task.progress = progress;
    task.updated_at = Utc::now();
    set_json(cache, &task_key(&task.task_id), task, Some(ttl)).await
}

async fn run_job(translator: &Translator, cache: &dyn KvCache, ttl: Duration, job: Job) -> Result<()> {
    let Some(mut task) = get_json::<TranslationTask>(cache, &task_key(&job.task_id)).await else {
        warn!(target: "translate", task_id = %job.task_id, "task record expired before processing");
        return Ok(());
    };

    update(cache, ttl, &mut task, TaskStatus::Processing, 25).await?;
    let out = translator
        .translate(&job.request, job.engine.as_deref(), &ConfigOverrides::default())
        .await;

    match out {
        Ok(res) => {
            update(cache, ttl, &mut task, TaskStatus::Processing, 75).await?;
            task.result = Some(res.text);
            update(cache, ttl, &mut task, TaskStatus::Completed, 100).await?;
            counter!("translate_tasks_completed_total").increment(1);
        }
        Err(e) => {
            task.error = Some(e.to_string());
            let progress = task.progress;
            update(cache, ttl, &mut task, TaskStatus::Failed, progress).await?;
            counter!("translate_tasks_failed_total").increment(1);
            warn!(target: "translate", task_id = %task.task_id, error = %e, "translation task failed");
        }
    }
    Ok(())
}
