// tests/scheduler.rs
//
// Scheduler behavior with a recording ingestor: due selection, queue
// de-duplication, the concurrency cap and single-flight ticks.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::Semaphore;

use feed_relay::ingest::{IngestReport, Ingestor};
use feed_relay::model::{Source, SourceId};
use feed_relay::scheduler::{RunOutcome, Scheduler, SchedulerSettings, TickOutcome, TriggerOutcome};
use feed_relay::store::{DuePolicy, MemoryStore, SourceRegistry, StoreError};

#[derive(Default)]
struct RecordingIngestor {
    calls: Mutex<Vec<(SourceId, bool)>>,
    running: AtomicUsize,
    peak: AtomicUsize,
    delay: Duration,
    gate: Option<Semaphore>,
    fail: Vec<SourceId>,
}

impl RecordingIngestor {
    fn ids(&self) -> Vec<SourceId> {
        let mut ids: Vec<_> = self.calls.lock().iter().map(|(id, _)| *id).collect();
        ids.sort_unstable();
        ids
    }
}

#[async_trait]
impl Ingestor for RecordingIngestor {
    async fn ingest(&self, source_id: SourceId, force_refresh: bool) -> anyhow::Result<IngestReport> {
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        self.calls.lock().push((source_id, force_refresh));
        if let Some(gate) = &self.gate {
            let _permit = gate.acquire().await?;
        }
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.running.fetch_sub(1, Ordering::SeqCst);
        if self.fail.contains(&source_id) {
            anyhow::bail!("boom for {source_id}");
        }
        Ok(IngestReport {
            source_id,
            completed: true,
            ..Default::default()
        })
    }
}

/// Registry whose discovery takes a while, to overlap ticks.
struct SlowRegistry(MemoryStore);

#[async_trait]
impl SourceRegistry for SlowRegistry {
    async fn get_source(&self, id: SourceId) -> Result<Option<Source>, StoreError> {
        self.0.get_source(id).await
    }

    async fn save_source(&self, source: &Source) -> Result<(), StoreError> {
        self.0.save_source(source).await
    }

    async fn active_sources(&self) -> Result<Vec<Source>, StoreError> {
        tokio::time::sleep(Duration::from_millis(50)).await;
        self.0.active_sources().await
    }
}

fn settings(max_jobs: usize) -> SchedulerSettings {
    SchedulerSettings {
        tick_interval: Duration::from_secs(60),
        max_concurrent_jobs: max_jobs,
        due: DuePolicy::default(),
    }
}

fn store_with(ids: impl IntoIterator<Item = SourceId>) -> Arc<MemoryStore> {
    let store = MemoryStore::new();
    let sources: Vec<Source> = ids
        .into_iter()
        .map(|id| Source::new(id, format!("s{id}"), format!("https://example.org/{id}.xml")))
        .collect();
    store.seed_sources(&sources).unwrap();
    Arc::new(store)
}

async fn put(store: &MemoryStore, s: Source) {
    store.save_source(&s).await.unwrap();
}

#[tokio::test]
async fn tick_enqueues_only_due_sources() {
    let now: DateTime<Utc> = Utc::now();
    let store = store_with([]);
    let mut fresh = Source::new(1, "never fetched", "https://example.org/1.xml");
    put(&store, fresh.clone()).await;

    fresh.id = 2;
    fresh.update_interval_minutes = 60;
    fresh.last_fetch_time = Some(now - chrono::Duration::minutes(10));
    put(&store, fresh.clone()).await;

    let mut inactive = Source::new(3, "off", "https://example.org/3.xml");
    inactive.active = false;
    put(&store, inactive).await;

    let mut cooling = Source::new(4, "erroring", "https://example.org/4.xml");
    cooling.error_count = 2;
    cooling.last_attempt_time = Some(now - chrono::Duration::minutes(30));
    put(&store, cooling.clone()).await;

    cooling.id = 5;
    cooling.last_attempt_time = Some(now - chrono::Duration::hours(2));
    put(&store, cooling.clone()).await;

    cooling.id = 6;
    cooling.error_count = 5;
    put(&store, cooling).await;

    let ingestor = Arc::new(RecordingIngestor::default());
    let sched = Scheduler::new(ingestor.clone(), store.clone(), settings(5));

    let out = sched.tick_at(now).await.unwrap();
    assert_eq!(out, TickOutcome::Ran { due: 2, enqueued: 2 });
    sched.wait_idle().await;
    assert_eq!(ingestor.ids(), vec![1, 5]);
    assert!(ingestor.calls.lock().iter().all(|(_, force)| !force));
}

#[tokio::test]
async fn source_is_never_queued_twice() {
    let store = store_with([1, 2]);
    let ingestor = Arc::new(RecordingIngestor {
        gate: Some(Semaphore::new(0)),
        ..Default::default()
    });
    let sched = Scheduler::new(ingestor.clone(), store.clone(), settings(5));

    assert_eq!(
        sched.trigger_source(1, true),
        TriggerOutcome::Enqueued {
            job: "refresh-feed-1".into()
        }
    );
    assert_eq!(
        sched.trigger_source(1, false),
        TriggerOutcome::AlreadyScheduled {
            job: "refresh-feed-1".into()
        }
    );

    // Tick sees both sources due but only 2 is new.
    let out = sched.tick_at(Utc::now()).await.unwrap();
    assert_eq!(out, TickOutcome::Ran { due: 2, enqueued: 1 });
    assert_eq!(sched.status().in_flight, vec![1, 2]);

    ingestor.gate.as_ref().unwrap().add_permits(10);
    sched.wait_idle().await;
    assert_eq!(ingestor.ids(), vec![1, 2]);
    assert!(ingestor.calls.lock().contains(&(1, true)));

    // Finished jobs free their slot for the next trigger.
    assert!(matches!(
        sched.trigger_source(1, false),
        TriggerOutcome::Enqueued { .. }
    ));
    sched.wait_idle().await;
    assert_eq!(ingestor.calls.lock().len(), 3);
}

#[tokio::test]
async fn running_jobs_respect_the_cap() {
    let store = store_with(1..=12);
    let ingestor = Arc::new(RecordingIngestor {
        delay: Duration::from_millis(20),
        ..Default::default()
    });
    let sched = Scheduler::new(ingestor.clone(), store.clone(), settings(3));

    let queued = sched.trigger_all(false).await.unwrap();
    assert_eq!(queued.len(), 12);
    let st = sched.status();
    assert!(st.active <= 3);
    assert_eq!(st.active + st.queued, 12);

    sched.wait_idle().await;
    assert_eq!(ingestor.ids(), (1..=12).collect::<Vec<_>>());
    let peak = ingestor.peak.load(Ordering::SeqCst);
    assert!(peak <= 3, "peak {peak}");
    let st = sched.status();
    assert_eq!((st.active, st.queued), (0, 0));
    assert!(st.in_flight.is_empty());
}

#[tokio::test]
async fn overlapping_tick_is_skipped() {
    let store = MemoryStore::new();
    store
        .seed_sources(&[Source::new(1, "s", "https://example.org/1.xml")])
        .unwrap();
    let registry = Arc::new(SlowRegistry(store));
    let ingestor = Arc::new(RecordingIngestor::default());
    let sched = Scheduler::new(ingestor.clone(), registry, settings(2));

    let now = Utc::now();
    let (a, b) = tokio::join!(sched.tick_at(now), sched.tick_at(now));
    let mut outcomes = vec![a.unwrap(), b.unwrap()];
    outcomes.sort_by_key(|o| matches!(o, TickOutcome::Skipped));
    assert_eq!(outcomes[0], TickOutcome::Ran { due: 1, enqueued: 1 });
    assert_eq!(outcomes[1], TickOutcome::Skipped);

    sched.wait_idle().await;
    assert!(!sched.status().ticking);
    // The flag is released for the next tick.
    assert!(matches!(
        sched.tick_at(now).await.unwrap(),
        TickOutcome::Ran { .. }
    ));
    sched.wait_idle().await;
}

#[tokio::test]
async fn failed_job_releases_its_slot() {
    let store = store_with([7]);
    let ingestor = Arc::new(RecordingIngestor {
        fail: vec![7],
        ..Default::default()
    });
    let sched = Scheduler::new(ingestor.clone(), store.clone(), settings(1));

    sched.trigger_source(7, false);
    sched.wait_idle().await;
    assert!(sched.status().in_flight.is_empty());
    assert!(matches!(
        sched.trigger_source(7, false),
        TriggerOutcome::Enqueued { .. }
    ));
    sched.wait_idle().await;
    assert_eq!(ingestor.calls.lock().len(), 2);
}

#[tokio::test]
async fn synchronous_run_shares_dedup_with_queue() {
    let store = store_with([1, 2]);
    let ingestor = Arc::new(RecordingIngestor {
        gate: Some(Semaphore::new(0)),
        ..Default::default()
    });
    let sched = Scheduler::new(ingestor.clone(), store.clone(), settings(5));

    sched.trigger_source(1, false);
    match sched.run_now(1, true).await.unwrap() {
        RunOutcome::AlreadyScheduled { job } => assert_eq!(job, "refresh-feed-1"),
        other => panic!("expected a conflict, got {other:?}"),
    }

    let running = tokio::spawn({
        let sched = sched.clone();
        async move { sched.run_now(2, true).await }
    });
    while sched.status().active < 2 {
        tokio::task::yield_now().await;
    }
    assert_eq!(
        sched.trigger_source(2, false),
        TriggerOutcome::AlreadyScheduled {
            job: "refresh-feed-2".into()
        }
    );

    ingestor.gate.as_ref().unwrap().add_permits(10);
    match running.await.unwrap().unwrap() {
        RunOutcome::Ran(report) => assert_eq!(report.source_id, 2),
        other => panic!("expected a report, got {other:?}"),
    }
    sched.wait_idle().await;
    assert!(ingestor.calls.lock().contains(&(2, true)));
    assert!(sched.status().in_flight.is_empty());
}

#[tokio::test]
async fn synchronous_run_waits_for_a_slot_ahead_of_the_queue() {
    let store = store_with([1, 2, 3]);
    let ingestor = Arc::new(RecordingIngestor {
        gate: Some(Semaphore::new(0)),
        ..Default::default()
    });
    let sched = Scheduler::new(ingestor.clone(), store.clone(), settings(1));

    sched.trigger_source(1, false);
    let running = tokio::spawn({
        let sched = sched.clone();
        async move { sched.run_now(2, false).await }
    });
    while sched.status().waiting < 1 {
        tokio::task::yield_now().await;
    }
    assert!(matches!(
        sched.trigger_source(3, false),
        TriggerOutcome::Enqueued { .. }
    ));
    let st = sched.status();
    assert_eq!((st.active, st.waiting, st.queued), (1, 1, 1));

    ingestor.gate.as_ref().unwrap().add_permits(10);
    assert!(matches!(running.await.unwrap().unwrap(), RunOutcome::Ran(_)));
    sched.wait_idle().await;

    let order: Vec<SourceId> = ingestor.calls.lock().iter().map(|(id, _)| *id).collect();
    assert_eq!(order, vec![1, 2, 3]);
    assert_eq!(ingestor.peak.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn abandoned_synchronous_run_gives_back_its_claim() {
    let store = store_with([1, 2]);
    let ingestor = Arc::new(RecordingIngestor {
        gate: Some(Semaphore::new(0)),
        ..Default::default()
    });
    let sched = Scheduler::new(ingestor.clone(), store.clone(), settings(1));

    sched.trigger_source(1, false);
    let waiting = tokio::spawn({
        let sched = sched.clone();
        async move { sched.run_now(2, false).await }
    });
    while sched.status().waiting < 1 {
        tokio::task::yield_now().await;
    }
    waiting.abort();
    assert!(waiting.await.unwrap_err().is_cancelled());

    let st = sched.status();
    assert_eq!(st.waiting, 0);
    assert_eq!(st.in_flight, vec![1]);

    ingestor.gate.as_ref().unwrap().add_permits(10);
    sched.wait_idle().await;
    assert_eq!(ingestor.ids(), vec![1]);
}
