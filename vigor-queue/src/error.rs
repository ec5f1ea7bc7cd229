//! Error types for queue operations.

use crate::job::JobId;
use thiserror::Error;
use vigor_cron::CronError;

/// Result type for queue operations.
pub type QueueResult<T> = Result<T, QueueError>;

/// Queue-specific errors.
///
/// These surface on the producer side (enqueue, schedule registration) and
/// from the store inside the worker loop. Handler failures are reported
/// separately through [`crate::JobError`].
#[derive(Debug, Error)]
pub enum QueueError {
    /// The Redis store failed or is unreachable
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// A job payload or record could not be encoded
    #[error("Cannot encode job: {0}")]
    Serialization(String),

    /// A stored record could not be read back
    #[error("Corrupt job record: {0}")]
    Deserialization(String),

    #[error("Job {0} does not exist")]
    JobNotFound(JobId),

    /// The record is no longer held under the caller's lease
    #[error("Lease on job {0} was lost")]
    LeaseLost(JobId),

    /// Malformed or never-firing recurrence rule
    #[error("Invalid schedule: {0}")]
    InvalidSchedule(#[from] CronError),

    /// Invalid producer or worker setup
    #[error("Queue misconfigured: {0}")]
    Config(String),

    #[error("Worker is not running")]
    WorkerNotRunning,

    #[error("Worker is already running")]
    WorkerAlreadyRunning,
}

impl From<serde_json::Error> for QueueError {
    fn from(err: serde_json::Error) -> Self {
        if err.is_data() || err.is_syntax() || err.is_eof() {
            QueueError::Deserialization(err.to_string())
        } else {
            QueueError::Serialization(err.to_string())
        }
    }
}
