//! Integration tests for vigor-jobs

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use uuid::Uuid;
use vigor_config::SchedulerSettings;
use vigor_jobs::*;
use vigor_queue::{
    Clock, JobData, JobOutcome, JobState, ManualClock, MemoryQueueStore, NewJob, Queue, QueueStore,
    RetryPolicy, UpsertOutcome, Worker, WorkerConfig,
};

const DAY: Duration = Duration::from_secs(86_400);

struct Harness {
    clock: ManualClock,
    store: MemoryQueueStore,
    fitness: MemoryFitnessStore,
    queue: Queue<FitnessJob>,
    worker: Worker<FitnessJob, JobHandlers>,
}

fn harness() -> Harness {
    let clock = ManualClock::starting_now();
    let store = MemoryQueueStore::new();
    let fitness = MemoryFitnessStore::new();
    let queue = Queue::new(Arc::new(store.clone()))
        .with_clock(Arc::new(clock.clone()))
        .with_retry(RetryPolicy::fixed(3, Duration::from_secs(30)));
    let worker = Worker::new(&queue, JobHandlers::new(Arc::new(fitness.clone())));
    Harness {
        clock,
        store,
        fitness,
        queue,
        worker,
    }
}

fn fast_settings() -> SchedulerSettings {
    SchedulerSettings {
        poll_interval_ms: 5,
        ..Default::default()
    }
}

async fn wait_for_completed(queue: &Queue<FitnessJob>, expected: usize) {
    let inspector = queue.inspector();
    for _ in 0..500 {
        if inspector.counts().await.unwrap().completed >= expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("expected {} completed jobs", expected);
}

#[tokio::test]
async fn test_fasting_window_closes_when_due() {
    let h = harness();
    let start = h.clock.now();
    let entry = h.fitness.insert_fasting(start).await;
    let window_end = start + ChronoDuration::hours(2);

    schedule_fasting_close(&h.queue, entry, window_end)
        .await
        .unwrap();

    h.clock.advance(ChronoDuration::minutes(119));
    assert_eq!(h.worker.process_next().await.unwrap(), None);
    assert_eq!(h.fitness.fasting(entry).await.unwrap().finished_at, None);

    h.clock.advance(ChronoDuration::minutes(1));
    assert_eq!(
        h.worker.process_next().await.unwrap(),
        Some(JobOutcome::Completed)
    );
    assert_eq!(
        h.fitness.fasting(entry).await.unwrap().finished_at,
        Some(window_end)
    );
}

#[tokio::test]
async fn test_manual_finish_wins_over_scheduled_close() {
    let h = harness();
    let start = h.clock.now();
    let entry = h.fitness.insert_fasting(start).await;
    schedule_fasting_close(&h.queue, entry, start + ChronoDuration::hours(2))
        .await
        .unwrap();

    let manual = start + ChronoDuration::hours(1);
    h.clock.set(manual);
    assert!(h.fitness.finish_fasting_manually(entry, manual).await);

    h.clock.advance(ChronoDuration::hours(1));
    assert_eq!(
        h.worker.process_next().await.unwrap(),
        Some(JobOutcome::Completed)
    );
    assert_eq!(
        h.fitness.fasting(entry).await.unwrap().finished_at,
        Some(manual)
    );
}

#[tokio::test]
async fn test_elapsed_window_closes_promptly() {
    let h = harness();
    let start = h.clock.now();
    let entry = h.fitness.insert_fasting(start - ChronoDuration::hours(20)).await;
    let window_end = start - ChronoDuration::hours(4);

    schedule_fasting_close(&h.queue, entry, window_end)
        .await
        .unwrap();

    assert_eq!(
        h.worker.process_next().await.unwrap(),
        Some(JobOutcome::Completed)
    );
    assert_eq!(
        h.fitness.fasting(entry).await.unwrap().finished_at,
        Some(window_end)
    );
}

#[tokio::test]
async fn test_subscription_finishes_after_last_day() {
    let h = harness();
    let subscription = h.fitness.insert_subscription().await;
    let ends_at = h.clock.now() + ChronoDuration::days(30);

    schedule_subscription_finish(&h.queue, subscription, ends_at)
        .await
        .unwrap();

    h.clock.advance(ChronoDuration::days(29));
    assert_eq!(h.worker.drain().await.unwrap(), 0);
    h.clock.advance(ChronoDuration::days(1));
    assert_eq!(h.worker.drain().await.unwrap(), 1);

    assert_eq!(
        h.fitness.subscription(subscription).await.unwrap().finished_at,
        Some(ends_at)
    );
}

#[tokio::test]
async fn test_cleanups_declared_twice_fire_once_per_period() {
    let h = harness();
    h.fitness.insert_parent(CleanupTarget::WaterTarget, 0).await;
    h.fitness.insert_parent(CleanupTarget::WaterTarget, 2).await;

    let first = declare_cleanups(&h.queue, DAY).await.unwrap();
    assert!(first.iter().all(|(_, o)| *o == UpsertOutcome::Created));

    // Second process start with the same ids.
    let second = declare_cleanups(&h.queue, DAY).await.unwrap();
    assert!(second.iter().all(|(_, o)| *o == UpsertOutcome::Unchanged));

    let schedules = h.queue.inspector().schedules().await.unwrap();
    assert_eq!(schedules.len(), 4);
    assert!(schedules.iter().any(|s| s.id == "cleanup-water-target"));

    assert_eq!(h.worker.drain().await.unwrap(), 4);
    assert_eq!(h.fitness.parent_count(CleanupTarget::WaterTarget).await, 1);

    h.clock.advance(ChronoDuration::hours(23));
    assert_eq!(h.worker.drain().await.unwrap(), 0);
    h.clock.advance(ChronoDuration::hours(1));
    assert_eq!(h.worker.drain().await.unwrap(), 4);
}

#[tokio::test]
async fn test_removed_kind_is_buried_not_retried() {
    let h = harness();
    let now = h.clock.now();
    let id = h
        .store
        .push(
            NewJob {
                kind: "cleanupStepTarget".to_string(),
                payload: JobData::Null,
                run_at: now,
                retry: RetryPolicy::default(),
                schedule_id: Some("cleanup-step-target".to_string()),
            },
            now,
        )
        .await
        .unwrap();

    assert_eq!(
        h.worker.process_next().await.unwrap(),
        Some(JobOutcome::Buried)
    );

    for _ in 0..3 {
        h.clock.advance(ChronoDuration::hours(1));
        assert_eq!(h.worker.process_next().await.unwrap(), None);
    }

    let job = h.queue.inspector().job(id).await.unwrap().unwrap();
    assert_eq!(job.state, JobState::Dead);
    assert_eq!(job.attempts, 1);
    let stats = h.worker.stats();
    assert_eq!(stats.buried, 1);
    assert_eq!(stats.retried, 0);
}

#[tokio::test]
async fn test_database_outage_is_retried() {
    let h = harness();
    let entry = h.fitness.insert_fasting(h.clock.now()).await;
    let window_end = h.clock.now();
    schedule_fasting_close(&h.queue, entry, window_end)
        .await
        .unwrap();

    h.fitness.set_unavailable(true).await;
    assert!(matches!(
        h.worker.process_next().await.unwrap(),
        Some(JobOutcome::Retrying { .. })
    ));

    h.fitness.set_unavailable(false).await;
    h.clock.advance(ChronoDuration::seconds(30));
    assert_eq!(
        h.worker.process_next().await.unwrap(),
        Some(JobOutcome::Completed)
    );
    assert_eq!(
        h.fitness.fasting(entry).await.unwrap().finished_at,
        Some(window_end)
    );
}

#[tokio::test]
async fn test_log_job_runs() {
    let h = harness();
    schedule_log(&h.queue, h.clock.now(), "hello from the worker")
        .await
        .unwrap();
    assert_eq!(
        h.worker.process_next().await.unwrap(),
        Some(JobOutcome::Completed)
    );
}

/// Fitness store whose writes take a while, recording how many overlap.
#[derive(Default)]
struct SlowStore {
    running: AtomicUsize,
    peak: AtomicUsize,
    done: AtomicUsize,
}

#[async_trait]
impl FitnessStore for SlowStore {
    async fn finish_fasting_if_open(
        &self,
        _entry_id: Uuid,
        _at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(40)).await;
        self.running.fetch_sub(1, Ordering::SeqCst);
        self.done.fetch_add(1, Ordering::SeqCst);
        Ok(true)
    }

    async fn finish_subscription_if_active(
        &self,
        _subscription_id: Uuid,
        _at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        Ok(false)
    }

    async fn delete_orphans(&self, _target: CleanupTarget) -> StoreResult<u64> {
        Ok(0)
    }
}

#[tokio::test]
async fn test_twenty_jobs_five_slots() {
    let slow = Arc::new(SlowStore::default());
    let queue: Queue<FitnessJob> = Queue::new(Arc::new(MemoryQueueStore::new()));
    let config = WorkerConfig {
        concurrency: 5,
        poll_interval: Duration::from_millis(5),
        ..Default::default()
    };
    let mut worker = Worker::with_config(&queue, JobHandlers::new(slow.clone()), config);

    let now = Utc::now();
    for _ in 0..20 {
        schedule_fasting_close(&queue, Uuid::new_v4(), now)
            .await
            .unwrap();
    }

    worker.start().unwrap();
    wait_for_completed(&queue, 20).await;
    worker.shutdown().await.unwrap();

    assert_eq!(slow.done.load(Ordering::SeqCst), 20);
    assert_eq!(slow.peak.load(Ordering::SeqCst), 5);
    assert!(worker.stats().peak_in_flight <= 5);
}

#[tokio::test]
async fn test_runtime_restart_keeps_one_recurrence_per_cleanup() {
    let clock = ManualClock::starting_now();
    let store = MemoryQueueStore::new();
    let fitness = Arc::new(MemoryFitnessStore::new());

    let runtime = JobRuntime::with_store(
        fast_settings(),
        Arc::new(store.clone()),
        fitness.clone(),
        Arc::new(clock.clone()),
    )
    .await
    .unwrap();
    wait_for_completed(runtime.queue(), 4).await;
    runtime.shutdown().await.unwrap();

    let runtime = JobRuntime::with_store(
        fast_settings(),
        Arc::new(store.clone()),
        fitness.clone(),
        Arc::new(clock.clone()),
    )
    .await
    .unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;
    let counts = runtime.inspector().counts().await.unwrap();
    assert_eq!(counts.schedules, 4);
    assert_eq!(counts.completed, 4);

    clock.advance(ChronoDuration::days(1));
    wait_for_completed(runtime.queue(), 8).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(runtime.inspector().counts().await.unwrap().completed, 8);

    runtime.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_runtime_rejects_invalid_settings() {
    let settings = SchedulerSettings {
        concurrency: 0,
        ..Default::default()
    };
    let result = JobRuntime::with_store(
        settings,
        Arc::new(MemoryQueueStore::new()),
        Arc::new(MemoryFitnessStore::new()),
        Arc::new(ManualClock::starting_now()),
    )
    .await;
    assert!(matches!(result, Err(JobsError::Config(_))));
}

#[tokio::test]
async fn test_finished_jobs_do_not_pile_up() {
    let clock = ManualClock::starting_now();
    let store = MemoryQueueStore::new();
    let settings = SchedulerSettings {
        retention_secs: 3_600,
        purge_every_ms: 10,
        ..fast_settings()
    };

    let runtime = JobRuntime::with_store(
        settings,
        Arc::new(store.clone()),
        Arc::new(MemoryFitnessStore::new()),
        Arc::new(clock.clone()),
    )
    .await
    .unwrap();
    wait_for_completed(runtime.queue(), 4).await;

    // Each day produces four sweeps; only the latest day's survive an hour
    // of retention.
    let inspector = runtime.inspector();
    for day in 1..=3 {
        clock.advance(ChronoDuration::days(1));
        let today = clock.now();

        let mut settled = false;
        for _ in 0..500 {
            let done = inspector.list(JobState::Completed, 100).await.unwrap();
            if store.len().await == 4
                && done.len() == 4
                && done.iter().all(|job| job.finished_at == Some(today))
            {
                settled = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(settled, "finished jobs kept piling up on day {}", day);
    }

    runtime.shutdown().await.unwrap();
}
