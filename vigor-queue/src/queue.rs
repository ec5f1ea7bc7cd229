//! Producer side: deferred jobs, recurring schedules and inspection.

use crate::clock::{Clock, SystemClock};
use crate::dispatch::{self, Described, Job};
use crate::error::{QueueError, QueueResult};
use crate::job::{
    JobId, JobState, NewJob, QueueCounts, RecurringSchedule, RetryPolicy, StoredJob,
    UpsertOutcome, chrono_duration,
};
use crate::store::QueueStore;
use chrono::{DateTime, Utc};
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;
use vigor_cron::Recurrence;
use vigor_log::{debug, info};

/// Delay between `now` and `at`, never negative.
pub fn delay_until(now: DateTime<Utc>, at: DateTime<Utc>) -> Duration {
    (at - now).to_std().unwrap_or(Duration::ZERO)
}

/// Typed handle for scheduling jobs of type `J`.
///
/// Cheap to clone; clones share the store and clock.
///
/// # Examples
///
/// ```no_run
/// use std::sync::Arc;
/// use vigor_queue::prelude::*;
/// # use serde::{Deserialize, Serialize};
/// # #[derive(Debug, Serialize, Deserialize)]
/// # #[serde(tag = "kind", content = "payload")]
/// # enum Work { #[serde(rename = "log")] Log(String) }
/// # impl Job for Work {}
///
/// # async fn example() -> QueueResult<()> {
/// let queue: Queue<Work> = Queue::new(Arc::new(MemoryQueueStore::new()));
/// let at = chrono::Utc::now() + chrono::Duration::hours(16);
/// queue.enqueue(at, Work::Log("fast ends".to_string())).await?;
/// # Ok(())
/// # }
/// ```
pub struct Queue<J> {
    store: Arc<dyn QueueStore>,
    clock: Arc<dyn Clock>,
    retry: RetryPolicy,
    _job: PhantomData<fn() -> J>,
}

impl<J> Clone for Queue<J> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            clock: self.clock.clone(),
            retry: self.retry,
            _job: PhantomData,
        }
    }
}

impl<J: Job> Queue<J> {
    pub fn new(store: Arc<dyn QueueStore>) -> Self {
        Self {
            store,
            clock: Arc::new(SystemClock),
            retry: RetryPolicy::default(),
            _job: PhantomData,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Retry policy stamped on every job this handle creates.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn store(&self) -> Arc<dyn QueueStore> {
        self.store.clone()
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        self.clock.clone()
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// Schedule `job` to run no earlier than `at`.
    ///
    /// A timestamp already in the past is clamped to a zero delay, so the
    /// job runs as soon as a worker is free.
    pub async fn enqueue(&self, at: DateTime<Utc>, job: impl Into<J>) -> QueueResult<JobId> {
        let job = job.into();
        let now = self.clock.now();
        let delay = delay_until(now, at);
        let (kind, payload) = dispatch::encode(&job)?;

        debug!(
            "Enqueueing {} to run in {}ms",
            Described(&kind, &payload),
            delay.as_millis()
        );

        self.store
            .push(
                NewJob {
                    kind,
                    payload,
                    run_at: now + chrono_duration(delay),
                    retry: self.retry,
                    schedule_id: None,
                },
                now,
            )
            .await
    }

    pub async fn enqueue_now(&self, job: impl Into<J>) -> QueueResult<JobId> {
        let now = self.clock.now();
        self.enqueue(now, job).await
    }

    pub async fn enqueue_after(&self, delay: Duration, job: impl Into<J>) -> QueueResult<JobId> {
        let at = self.clock.now() + chrono_duration(delay);
        self.enqueue(at, job).await
    }

    /// Register `job` to fire on `rule` under `id`.
    ///
    /// Registering the same id with the same rule and job again changes
    /// nothing, so this is safe to call on every boot. A different rule or
    /// job under an existing id replaces the definition.
    pub async fn schedule_recurring(
        &self,
        id: impl Into<String>,
        rule: Recurrence,
        job: impl Into<J>,
    ) -> QueueResult<UpsertOutcome> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(QueueError::Config(
                "recurring schedule id cannot be empty".to_string(),
            ));
        }
        rule.validate()?;

        let now = self.clock.now();
        let next_run = rule.first_run(now).ok_or_else(|| {
            QueueError::Config(format!("schedule '{}' never fires", id))
        })?;
        let (kind, payload) = dispatch::encode(&job.into())?;

        let outcome = self
            .store
            .upsert_recurring(
                RecurringSchedule {
                    id: id.clone(),
                    rule: rule.clone(),
                    kind,
                    payload,
                    retry: self.retry,
                    next_run,
                    created_at: now,
                    updated_at: now,
                    fired: 0,
                },
                now,
            )
            .await?;

        match outcome {
            UpsertOutcome::Unchanged => {
                debug!("Schedule '{}' already registered ({})", id, rule.describe())
            }
            _ => info!("Schedule '{}' {:?}: {}", id, outcome, rule.describe()),
        }
        Ok(outcome)
    }

    /// Remove a recurring schedule. Records it already produced still run.
    pub async fn unschedule(&self, id: &str) -> QueueResult<bool> {
        let removed = self.store.remove_recurring(id).await?;
        if removed {
            info!("Schedule '{}' removed", id);
        }
        Ok(removed)
    }

    pub fn inspector(&self) -> Inspector {
        Inspector {
            store: self.store.clone(),
            clock: self.clock.clone(),
        }
    }
}

/// Read and repair access to stored records, for operators.
#[derive(Clone)]
pub struct Inspector {
    store: Arc<dyn QueueStore>,
    clock: Arc<dyn Clock>,
}

impl Inspector {
    pub async fn counts(&self) -> QueueResult<QueueCounts> {
        self.store.counts(self.clock.now()).await
    }

    pub async fn list(&self, state: JobState, limit: usize) -> QueueResult<Vec<StoredJob>> {
        self.store.list(state, limit, self.clock.now()).await
    }

    pub async fn dead(&self, limit: usize) -> QueueResult<Vec<StoredJob>> {
        self.list(JobState::Dead, limit).await
    }

    pub async fn job(&self, id: JobId) -> QueueResult<Option<StoredJob>> {
        self.store.get(id).await
    }

    pub async fn schedules(&self) -> QueueResult<Vec<RecurringSchedule>> {
        self.store.recurring().await
    }

    pub async fn retry_dead(&self, id: JobId) -> QueueResult<bool> {
        let revived = self.store.retry_dead(id, self.clock.now()).await?;
        if revived {
            info!("Dead job {} requeued", id);
        }
        Ok(revived)
    }

    /// Drop completed and dead records that finished more than
    /// `older_than` ago.
    pub async fn purge_finished(&self, older_than: Duration) -> QueueResult<usize> {
        let before = self.clock.now() - chrono_duration(older_than);
        self.store.purge_finished(before).await
    }
}
