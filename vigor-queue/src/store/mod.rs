//! Durable storage behind the queue.
//!
//! A [`QueueStore`] owns every record and recurring definition. All
//! workers and producers sharing a store see the same records; the store is
//! responsible for handing each visible record to exactly one claimant and
//! for producing exactly one record per recurring firing.

use crate::error::QueueResult;
use crate::job::{
    FailOutcome, JobId, JobState, Lease, NewJob, QueueCounts, RecurringSchedule, StoredJob,
    UpsertOutcome,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;

mod memory;
mod redis;

pub use self::memory::MemoryQueueStore;
pub use self::redis::{RedisQueueStore, RedisStoreConfig};

/// Error text recorded when a lease runs out.
pub const LEASE_EXPIRED: &str = "lease expired before the job was acknowledged";

#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Persist a new record.
    async fn push(&self, job: NewJob, now: DateTime<Utc>) -> QueueResult<JobId>;

    /// Lease the earliest visible record.
    ///
    /// Before picking, the store fires every due recurring schedule and
    /// takes back records whose lease ran out (counted as a failed attempt).
    async fn claim(&self, now: DateTime<Utc>, lease: Duration) -> QueueResult<Option<StoredJob>>;

    /// Extend a held lease to `now + lease` while its handler is still running.
    async fn renew(&self, lease: &Lease, now: DateTime<Utc>, duration: Duration)
    -> QueueResult<()>;

    /// Mark a leased record completed.
    async fn ack(&self, lease: &Lease, now: DateTime<Utc>) -> QueueResult<()>;

    /// Record a failed attempt on a leased record.
    async fn fail(&self, lease: &Lease, now: DateTime<Utc>, error: &str)
    -> QueueResult<FailOutcome>;

    /// Move a leased record straight to dead.
    async fn bury(&self, lease: &Lease, now: DateTime<Utc>, error: &str) -> QueueResult<()>;

    /// Register or update a recurring schedule under its id.
    async fn upsert_recurring(
        &self,
        schedule: RecurringSchedule,
        now: DateTime<Utc>,
    ) -> QueueResult<UpsertOutcome>;

    async fn remove_recurring(&self, id: &str) -> QueueResult<bool>;

    async fn recurring(&self) -> QueueResult<Vec<RecurringSchedule>>;

    async fn get(&self, id: JobId) -> QueueResult<Option<StoredJob>>;

    /// Up to `limit` records in `state` as seen at `now`, earliest first.
    async fn list(
        &self,
        state: JobState,
        limit: usize,
        now: DateTime<Utc>,
    ) -> QueueResult<Vec<StoredJob>>;

    async fn counts(&self, now: DateTime<Utc>) -> QueueResult<QueueCounts>;

    /// Put a dead record back in line with a fresh set of attempts.
    async fn retry_dead(&self, id: JobId, now: DateTime<Utc>) -> QueueResult<bool>;

    /// Drop completed and dead records that finished before `before`.
    async fn purge_finished(&self, before: DateTime<Utc>) -> QueueResult<usize>;
}
