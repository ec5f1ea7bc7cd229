//! Deferred and recurring side effects of the Vigor fitness backend.
//!
//! - `close-fasting-window`: end a fast when its window is over
//! - `finish-challenge-subscription`: finish a challenge after its last day
//! - `periodic-cleanup:*`: sweep orphaned calorie, step and water rows
//! - `log`: write a timestamped line from the worker
//!
//! Each handler guards its write on current state, so a job that runs
//! twice, or fires after the user already acted, changes nothing the
//! second time.
//!
//! ```no_run
//! use std::sync::Arc;
//! use vigor_config::SchedulerSettings;
//! use vigor_jobs::{JobRuntime, MemoryFitnessStore, schedule_fasting_close};
//!
//! # async fn example() -> vigor_jobs::JobsResult<()> {
//! let settings = SchedulerSettings::builder().env("VIGOR").build()?;
//! let runtime = JobRuntime::boot(settings, Arc::new(MemoryFitnessStore::new())).await?;
//!
//! let window_end = chrono::Utc::now() + chrono::Duration::hours(16);
//! schedule_fasting_close(runtime.queue(), uuid::Uuid::new_v4(), window_end).await?;
//!
//! runtime.shutdown().await?;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod handlers;
pub mod kinds;
pub mod runtime;
pub mod schedule;
pub mod store;

pub use error::{JobsError, JobsResult};
pub use handlers::{JobHandlers, log_line};
pub use kinds::{CleanupTarget, CloseFastingWindow, FinishChallengeSubscription, FitnessJob, LogLine};
pub use runtime::{JobRuntime, connect_queue, retry_policy, worker_config};
pub use schedule::{declare_cleanups, schedule_fasting_close, schedule_log, schedule_subscription_finish};
pub use store::{
    ChallengeSubscription, FastingEntry, FitnessStore, MemoryFitnessStore, StoreError, StoreResult,
};
