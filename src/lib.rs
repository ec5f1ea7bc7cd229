// Vigor - deferred and recurring jobs for the fitness-tracking backend
//
// Request handlers schedule side effects (closing a fasting window, finishing
// a challenge subscription) for a future instant; periodic sweeps clean up
// orphaned rows. A bounded worker pool executes them from a durable queue.

// Logging is always available
pub use vigor_log;
pub use vigor_log::{debug, error, info, trace, warn};

// Re-export optional crates
#[cfg(feature = "config")]
pub use vigor_config;

#[cfg(feature = "cron")]
pub use vigor_cron;

#[cfg(feature = "queue")]
pub use vigor_queue;

#[cfg(feature = "jobs")]
pub use vigor_jobs;

// Prelude for common imports
pub mod prelude {
    #[cfg(feature = "config")]
    pub use vigor_config::{SchedulerSettings, Validate};

    #[cfg(feature = "cron")]
    pub use vigor_cron::{CronExpression, CronPresets, Recurrence};

    #[cfg(feature = "queue")]
    pub use vigor_queue::{
        Clock, Dispatch, Handler, Inspector, Job, JobError, JobId, JobOutcome, JobResult,
        JobState, ManualClock, MemoryQueueStore, Queue, QueueError, QueueResult, QueueStore,
        RedisQueueStore, RetryPolicy, SystemClock, UpsertOutcome, Worker, WorkerConfig,
    };

    #[cfg(feature = "jobs")]
    pub use vigor_jobs::{
        CleanupTarget, FitnessJob, FitnessStore, JobHandlers, JobRuntime, JobsError, JobsResult,
        MemoryFitnessStore, declare_cleanups, schedule_fasting_close,
        schedule_subscription_finish,
    };
}
