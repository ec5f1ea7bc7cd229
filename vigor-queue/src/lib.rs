//! Durable deferred and recurring jobs for Vigor services.
//!
//! - ⏰ One-shot jobs that run no earlier than a given instant
//! - 🔁 Recurring schedules keyed by id, idempotent to re-register
//! - 👷 A worker pool with a hard concurrency bound
//! - 🔄 Retries with fixed or exponential backoff
//! - 💀 Dead records kept for operators, with manual retry
//! - 📦 Redis-backed persistence, plus an in-memory store for tests
//!
//! ## Job kinds
//!
//! Every job a service runs is a variant of one enum. The enum is the
//! registry: the worker decodes records into it and dispatches with an
//! exhaustive `match`.
//!
//! ```
//! use serde::{Deserialize, Serialize};
//! use vigor_queue::{Job, decode, encode};
//!
//! #[derive(Debug, PartialEq, Serialize, Deserialize)]
//! #[serde(tag = "kind", content = "payload", rename_all = "kebab-case")]
//! enum Work {
//!     Log(String),
//!     Sweep,
//! }
//!
//! impl Job for Work {}
//!
//! assert_eq!(Work::kinds(), &["log", "sweep"]);
//! let (kind, payload) = encode(&Work::Log("hi".to_string())).unwrap();
//! assert_eq!(kind, "log");
//! assert_eq!(decode::<Work>(&kind, &payload).unwrap(), Work::Log("hi".to_string()));
//! assert!(decode::<Work>("cleanupStepTarget", &payload).is_err());
//! ```
//!
//! ## Scheduling and consuming
//!
//! ```
//! use async_trait::async_trait;
//! use serde::{Deserialize, Serialize};
//! use std::sync::Arc;
//! use vigor_queue::prelude::*;
//!
//! #[derive(Debug, Serialize, Deserialize)]
//! #[serde(tag = "kind", content = "payload")]
//! enum Work {
//!     #[serde(rename = "log")]
//!     Log(String),
//! }
//!
//! impl Job for Work {}
//!
//! struct Handlers;
//!
//! #[async_trait]
//! impl Dispatch<Work> for Handlers {
//!     async fn dispatch(&self, job: Work) -> JobResult {
//!         match job {
//!             Work::Log(line) => {
//!                 println!("{line}");
//!                 Ok(())
//!             }
//!         }
//!     }
//! }
//!
//! # #[tokio::main]
//! # async fn main() -> QueueResult<()> {
//! let clock = ManualClock::starting_now();
//! let queue: Queue<Work> = Queue::new(Arc::new(MemoryQueueStore::new()))
//!     .with_clock(Arc::new(clock.clone()));
//!
//! queue
//!     .enqueue_after(std::time::Duration::from_secs(3600), Work::Log("later".into()))
//!     .await?;
//!
//! let worker = Worker::new(&queue, Handlers);
//! assert_eq!(worker.process_next().await?, None);
//!
//! clock.advance(chrono::Duration::hours(1));
//! assert_eq!(worker.process_next().await?, Some(JobOutcome::Completed));
//! # Ok(())
//! # }
//! ```

pub mod clock;
pub mod dispatch;
pub mod error;
pub mod job;
pub mod queue;
pub mod store;
pub mod worker;

pub use clock::{Clock, ManualClock, SystemClock};
pub use dispatch::{
    DecodeError, Dispatch, Handler, Job, JobError, JobResult, KIND_FIELD, PAYLOAD_FIELD, decode,
    encode,
};
pub use error::{QueueError, QueueResult};
pub use job::{
    Backoff, FailOutcome, JobData, JobId, JobState, Lease, NewJob, QueueCounts,
    RecurringSchedule, RetryPolicy, StoredJob, UpsertOutcome,
};
pub use queue::{Inspector, Queue, delay_until};
pub use store::{MemoryQueueStore, QueueStore, RedisQueueStore, RedisStoreConfig};
pub use worker::{JobOutcome, Worker, WorkerConfig, WorkerStats, WorkerStatsSnapshot};

pub use vigor_cron::Recurrence;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::clock::{Clock, ManualClock, SystemClock};
    pub use crate::dispatch::{Dispatch, Handler, Job, JobError, JobResult};
    pub use crate::error::{QueueError, QueueResult};
    pub use crate::job::{JobId, JobState, RetryPolicy, UpsertOutcome};
    pub use crate::queue::{Inspector, Queue};
    pub use crate::store::{MemoryQueueStore, QueueStore, RedisQueueStore, RedisStoreConfig};
    pub use crate::worker::{JobOutcome, Worker, WorkerConfig};
    pub use vigor_cron::Recurrence;
}
