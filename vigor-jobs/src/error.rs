//! Error types for the job runtime.

use crate::store::StoreError;
use thiserror::Error;
use vigor_config::ConfigError;
use vigor_queue::QueueError;

pub type JobsResult<T> = Result<T, JobsError>;

#[derive(Debug, Error)]
pub enum JobsError {
    #[error("invalid scheduler settings: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Store(#[from] StoreError),
}
