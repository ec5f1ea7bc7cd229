//! Integration tests for common Vigor workflows.
//!
//! These exercise the facade the way the API server and the worker
//! process use it.

use async_trait::async_trait;
use chrono::Duration as ChronoDuration;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use vigor::prelude::*;

// =============================================================================
// Fitness Job Workflows
// =============================================================================

#[tokio::test]
async fn test_schedule_and_close_fasting_window() {
    let clock = ManualClock::starting_now();
    let fitness = MemoryFitnessStore::new();
    let queue: Queue<FitnessJob> =
        Queue::new(Arc::new(MemoryQueueStore::new())).with_clock(Arc::new(clock.clone()));
    let worker = Worker::new(&queue, JobHandlers::new(Arc::new(fitness.clone())));

    let start = clock.now();
    let entry = fitness.insert_fasting(start).await;
    let window_end = start + ChronoDuration::hours(16);
    schedule_fasting_close(&queue, entry, window_end)
        .await
        .unwrap();

    let counts = queue.inspector().counts().await.unwrap();
    assert_eq!(counts.delayed, 1);
    assert_eq!(counts.ready, 0);

    clock.set(window_end);
    assert_eq!(
        worker.process_next().await.unwrap(),
        Some(JobOutcome::Completed)
    );
    assert_eq!(
        fitness.fasting(entry).await.unwrap().finished_at,
        Some(window_end)
    );
}

#[tokio::test]
async fn test_subscription_and_cleanups_share_one_worker() {
    let clock = ManualClock::starting_now();
    let fitness = MemoryFitnessStore::new();
    let queue: Queue<FitnessJob> =
        Queue::new(Arc::new(MemoryQueueStore::new())).with_clock(Arc::new(clock.clone()));
    let worker = Worker::new(&queue, JobHandlers::new(Arc::new(fitness.clone())));

    let subscription = fitness.insert_subscription().await;
    let ends_at = clock.now() + ChronoDuration::days(7);
    schedule_subscription_finish(&queue, subscription, ends_at)
        .await
        .unwrap();
    declare_cleanups(&queue, Duration::from_secs(86_400))
        .await
        .unwrap();

    // Sweeps fire on registration; the subscription waits for its day.
    assert_eq!(worker.drain().await.unwrap(), CleanupTarget::ALL.len());
    assert_eq!(
        fitness.subscription(subscription).await.unwrap().finished_at,
        None
    );

    clock.set(ends_at);
    // Missed sweep periods collapse into one firing per target.
    assert_eq!(worker.drain().await.unwrap(), 1 + CleanupTarget::ALL.len());
    assert_eq!(
        fitness.subscription(subscription).await.unwrap().finished_at,
        Some(ends_at)
    );
}

// =============================================================================
// Custom Job Workflows
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "kebab-case")]
enum Reminder {
    Hydrate { glasses: u32 },
}

impl Job for Reminder {}

#[derive(Clone, Default)]
struct Tally(Arc<AtomicU32>);

#[async_trait]
impl Dispatch<Reminder> for Tally {
    async fn dispatch(&self, job: Reminder) -> JobResult {
        match job {
            Reminder::Hydrate { glasses } => {
                self.0.fetch_add(glasses, Ordering::SeqCst);
                Ok(())
            }
        }
    }
}

#[test]
fn test_custom_job_through_facade() {
    tokio_test::block_on(async {
        let clock = ManualClock::starting_now();
        let queue: Queue<Reminder> = Queue::new(Arc::new(MemoryQueueStore::new()))
            .with_clock(Arc::new(clock.clone()))
            .with_retry(RetryPolicy::none());
        let tally = Tally::default();
        let worker = Worker::new(&queue, tally.clone());

        queue
            .enqueue_after(Duration::from_secs(60), Reminder::Hydrate { glasses: 2 })
            .await
            .unwrap();
        queue
            .enqueue_now(Reminder::Hydrate { glasses: 1 })
            .await
            .unwrap();

        assert_eq!(worker.drain().await.unwrap(), 1);
        clock.advance(ChronoDuration::seconds(60));
        assert_eq!(worker.drain().await.unwrap(), 1);
        assert_eq!(tally.0.load(Ordering::SeqCst), 3);
    });
}

#[tokio::test]
async fn test_recurring_schedule_by_cron() {
    let queue: Queue<Reminder> = Queue::new(Arc::new(MemoryQueueStore::new()));

    let created = queue
        .schedule_recurring(
            "hourly-hydrate",
            Recurrence::cron("0 0 * * * *").unwrap(),
            Reminder::Hydrate { glasses: 1 },
        )
        .await
        .unwrap();
    assert_eq!(created, UpsertOutcome::Created);

    let again = queue
        .schedule_recurring(
            "hourly-hydrate",
            Recurrence::cron("0 0 * * * *").unwrap(),
            Reminder::Hydrate { glasses: 1 },
        )
        .await
        .unwrap();
    assert_eq!(again, UpsertOutcome::Unchanged);

    assert!(queue.unschedule("hourly-hydrate").await.unwrap());
    assert!(queue.inspector().schedules().await.unwrap().is_empty());
}

// =============================================================================
// Configuration Workflows
// =============================================================================

#[test]
fn test_default_settings_are_valid() {
    let settings = SchedulerSettings::default();
    assert!(settings.validate().is_ok());
    assert_eq!(settings.concurrency, 5);
}

#[test]
fn test_encoded_record_shape() {
    let (kind, payload) = vigor::vigor_queue::encode(&Reminder::Hydrate { glasses: 4 }).unwrap();
    assert_eq!(kind, "hydrate");
    assert_eq!(payload, serde_json::json!({ "glasses": 4 }));
}
