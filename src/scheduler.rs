// src/scheduler.rs
//! Periodic discovery of due sources and a bounded job queue in front of
//! the ingestion engine.
//!
//! - One tick at a time: an overlapping tick returns [`TickOutcome::Skipped`].
//! - A source is queued or running at most once (`refresh-feed-{id}`).
//! - At most `max_concurrent_jobs` cycles run at the same time, including
//!   synchronous runs started through [`Scheduler::run_now`].

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use metrics::{counter, describe_counter, describe_gauge, gauge};
use once_cell::sync::OnceCell;
use serde::Serialize;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::AppConfig;
use crate::ingest::{IngestReport, Ingestor};
use crate::model::SourceId;
use crate::store::{DuePolicy, SourceRegistry};

fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("scheduler_ticks_total", "Scheduler ticks by outcome.");
        describe_counter!("scheduler_jobs_total", "Finished refresh jobs by outcome.");
        describe_gauge!("scheduler_active_jobs", "Refresh jobs currently running.");
        describe_gauge!("scheduler_queue_len", "Refresh jobs waiting for a slot.");
    });
}

pub fn job_name(source_id: SourceId) -> String {
    format!("refresh-feed-{source_id}")
}

#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub tick_interval: Duration,
    pub max_concurrent_jobs: usize,
    pub due: DuePolicy,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

impl SchedulerSettings {
    pub fn from_config(cfg: &AppConfig) -> Self {
        Self {
            tick_interval: Duration::from_secs(cfg.scheduler.tick_interval_secs),
            max_concurrent_jobs: cfg.scheduler.max_concurrent_jobs.max(1),
            due: DuePolicy {
                error_backoff: chrono::Duration::minutes(cfg.scheduler.error_backoff_minutes),
                max_error_count: cfg.ingest.max_error_count,
                max_due: cfg.scheduler.max_due_per_tick,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Another tick was still running.
    Skipped,
    Ran { due: usize, enqueued: usize },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TriggerOutcome {
    Enqueued { job: String },
    /// The source is already queued or running.
    AlreadyScheduled { job: String },
}

/// Result of a synchronous run.
#[derive(Debug)]
pub enum RunOutcome {
    Ran(IngestReport),
    /// The source is already queued or running; nothing was started.
    AlreadyScheduled { job: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SchedulerStatus {
    pub ticking: bool,
    pub active: usize,
    pub queued: usize,
    /// Synchronous runs waiting for a slot.
    pub waiting: usize,
    pub max_concurrent_jobs: usize,
    pub in_flight: Vec<SourceId>,
}

#[derive(Debug)]
struct Job {
    name: String,
    source_id: SourceId,
    force: bool,
}

#[derive(Debug, Default)]
struct QueueState {
    active: usize,
    queue: VecDeque<Job>,
    /// Synchronous runs waiting for a slot. They go before queued jobs.
    waiting: usize,
    /// Queued, waiting or running.
    in_flight: HashSet<SourceId>,
}

impl QueueState {
    fn is_idle(&self) -> bool {
        self.active == 0 && self.waiting == 0 && self.queue.is_empty()
    }
}

pub struct Scheduler {
    ingestor: Arc<dyn Ingestor>,
    registry: Arc<dyn SourceRegistry>,
    settings: SchedulerSettings,
    running: AtomicBool,
    state: Mutex<QueueState>,
    idle: Notify,
    slot_freed: Notify,
}

/// Clears the tick flag however the tick ends.
struct TickGuard<'a>(&'a AtomicBool);

impl Drop for TickGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Releases the job slot even if the ingestor panics.
struct JobGuard {
    scheduler: Arc<Scheduler>,
    source_id: SourceId,
}

impl Drop for JobGuard {
    fn drop(&mut self) {
        self.scheduler.finish(self.source_id);
    }
}

/// A synchronous run. Owns its `in_flight` entry from the start and a slot
/// once `holds_slot` is set; dropping it gives back whatever it holds.
struct RunGuard {
    scheduler: Arc<Scheduler>,
    source_id: SourceId,
    holds_slot: bool,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        if self.holds_slot {
            self.scheduler.finish(self.source_id);
        } else {
            self.scheduler.abandon_wait(self.source_id);
        }
    }
}

impl Scheduler {
    pub fn new(
        ingestor: Arc<dyn Ingestor>,
        registry: Arc<dyn SourceRegistry>,
        settings: SchedulerSettings,
    ) -> Arc<Self> {
        ensure_metrics_described();
        Arc::new(Self {
            ingestor,
            registry,
            settings,
            running: AtomicBool::new(false),
            state: Mutex::new(QueueState::default()),
            idle: Notify::new(),
            slot_freed: Notify::new(),
        })
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub async fn tick(self: &Arc<Self>) -> Result<TickOutcome> {
        self.tick_at(Utc::now()).await
    }

    /// Discover due sources as of `now`, enqueue them and start what fits.
    pub async fn tick_at(self: &Arc<Self>, now: DateTime<Utc>) -> Result<TickOutcome> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!(target: "scheduler", "previous tick still running, skipping");
            counter!("scheduler_ticks_total", "outcome" => "skipped").increment(1);
            return Ok(TickOutcome::Skipped);
        }
        let _guard = TickGuard(&self.running);

        let due = match self.registry.due_sources(now, &self.settings.due).await {
            Ok(due) => due,
            Err(e) => {
                counter!("scheduler_ticks_total", "outcome" => "error").increment(1);
                return Err(e.into());
            }
        };
        let mut enqueued = 0;
        for s in &due {
            if self.enqueue(s.id, false) {
                enqueued += 1;
            }
        }
        self.pump();

        counter!("scheduler_ticks_total", "outcome" => "ran").increment(1);
        if !due.is_empty() {
            info!(target: "scheduler", due = due.len(), enqueued, "scheduler tick");
        }
        Ok(TickOutcome::Ran {
            due: due.len(),
            enqueued,
        })
    }

    /// Queue one source regardless of its schedule.
    pub fn trigger_source(self: &Arc<Self>, source_id: SourceId, force: bool) -> TriggerOutcome {
        let job = job_name(source_id);
        if self.enqueue(source_id, force) {
            self.pump();
            info!(target: "scheduler", source_id, force, job = %job, "manual refresh queued");
            TriggerOutcome::Enqueued { job }
        } else {
            TriggerOutcome::AlreadyScheduled { job }
        }
    }

    /// Queue every active source. Returns the ids actually queued.
    pub async fn trigger_all(self: &Arc<Self>, force: bool) -> Result<Vec<SourceId>> {
        let sources = self.registry.active_sources().await?;
        let queued: Vec<SourceId> = sources
            .iter()
            .filter(|s| self.enqueue(s.id, force))
            .map(|s| s.id)
            .collect();
        self.pump();
        info!(target: "scheduler", queued = queued.len(), total = sources.len(), force, "refresh of all sources queued");
        Ok(queued)
    }

    /// Run one source now and wait for its report. Shares the per-source
    /// de-duplication and the concurrency cap with queued jobs, and takes
    /// the next free slot ahead of them.
    pub async fn run_now(self: &Arc<Self>, source_id: SourceId, force: bool) -> Result<RunOutcome> {
        let job = job_name(source_id);
        {
            let mut st = self.lock();
            if !st.in_flight.insert(source_id) {
                debug!(target: "scheduler", source_id, "already queued or running");
                return Ok(RunOutcome::AlreadyScheduled { job });
            }
            st.waiting += 1;
        }
        let mut guard = RunGuard {
            scheduler: Arc::clone(self),
            source_id,
            holds_slot: false,
        };

        loop {
            let freed = self.slot_freed.notified();
            tokio::pin!(freed);
            freed.as_mut().enable();
            {
                let mut st = self.lock();
                if st.active < self.settings.max_concurrent_jobs {
                    st.waiting -= 1;
                    st.active += 1;
                    guard.holds_slot = true;
                    gauge!("scheduler_active_jobs").set(st.active as f64);
                    break;
                }
            }
            freed.await;
        }

        info!(target: "scheduler", source_id, force, job = %job, "synchronous refresh");
        let res = self.ingestor.ingest(source_id, force).await;
        let outcome = if res.is_ok() { "ok" } else { "error" };
        counter!("scheduler_jobs_total", "outcome" => outcome).increment(1);
        res.map(RunOutcome::Ran)
    }

    fn enqueue(&self, source_id: SourceId, force: bool) -> bool {
        let mut st = self.lock();
        if !st.in_flight.insert(source_id) {
            debug!(target: "scheduler", source_id, "already queued or running");
            return false;
        }
        st.queue.push_back(Job {
            name: job_name(source_id),
            source_id,
            force,
        });
        gauge!("scheduler_queue_len").set(st.queue.len() as f64);
        true
    }

    /// Start queued jobs while slots are free.
    fn pump(self: &Arc<Self>) {
        loop {
            let job = {
                let mut st = self.lock();
                if st.active + st.waiting >= self.settings.max_concurrent_jobs {
                    break;
                }
                let Some(job) = st.queue.pop_front() else {
                    break;
                };
                st.active += 1;
                gauge!("scheduler_active_jobs").set(st.active as f64);
                gauge!("scheduler_queue_len").set(st.queue.len() as f64);
                job
            };
            let this = Arc::clone(self);
            tokio::spawn(async move { this.run_job(job).await });
        }
    }

    async fn run_job(self: Arc<Self>, job: Job) {
        let _slot = JobGuard {
            scheduler: Arc::clone(&self),
            source_id: job.source_id,
        };
        debug!(target: "scheduler", job = %job.name, "job start");
        match self.ingestor.ingest(job.source_id, job.force).await {
            Ok(r) => {
                counter!("scheduler_jobs_total", "outcome" => "ok").increment(1);
                debug!(
                    target: "scheduler",
                    job = %job.name,
                    persisted = r.persisted,
                    failed = r.failed,
                    completed = r.completed,
                    "job done"
                );
            }
            Err(e) => {
                counter!("scheduler_jobs_total", "outcome" => "error").increment(1);
                warn!(target: "scheduler", job = %job.name, error = %format!("{e:#}"), "job failed");
            }
        }
    }

    fn finish(self: &Arc<Self>, source_id: SourceId) {
        let idle = {
            let mut st = self.lock();
            st.active = st.active.saturating_sub(1);
            st.in_flight.remove(&source_id);
            gauge!("scheduler_active_jobs").set(st.active as f64);
            st.is_idle()
        };
        self.slot_freed.notify_waiters();
        self.pump();
        if idle {
            self.idle.notify_waiters();
        }
    }

    fn abandon_wait(self: &Arc<Self>, source_id: SourceId) {
        let idle = {
            let mut st = self.lock();
            st.waiting = st.waiting.saturating_sub(1);
            st.in_flight.remove(&source_id);
            st.is_idle()
        };
        self.pump();
        if idle {
            self.idle.notify_waiters();
        }
    }

    pub fn is_idle(&self) -> bool {
        self.lock().is_idle()
    }

    /// Resolve once nothing is queued or running.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_idle() {
                return;
            }
            notified.await;
        }
    }

    pub fn status(&self) -> SchedulerStatus {
        let st = self.lock();
        let mut in_flight: Vec<SourceId> = st.in_flight.iter().copied().collect();
        in_flight.sort_unstable();
        SchedulerStatus {
            ticking: self.running.load(Ordering::SeqCst),
            active: st.active,
            queued: st.queue.len(),
            waiting: st.waiting,
            max_concurrent_jobs: self.settings.max_concurrent_jobs,
            in_flight,
        }
    }

    /// Drive ticks on a fixed interval. Each tick runs on its own task so a
    /// slow discovery shows up as skipped ticks instead of a drifting timer.
    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        let period = self.settings.tick_interval;
        info!(target: "scheduler", interval_secs = period.as_secs(), max_jobs = self.settings.max_concurrent_jobs, "scheduler started");
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let this = Arc::clone(&self);
                tokio::spawn(async move {
                    if let Err(e) = this.tick().await {
                        warn!(target: "scheduler", error = ?e, "scheduler tick failed");
                    }
                });
            }
        })
    }
}
