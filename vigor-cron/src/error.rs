//! Error types for recurrence rules.

use thiserror::Error;

/// Result type for cron and recurrence operations.
pub type CronResult<T> = Result<T, CronError>;

/// Errors raised while building a recurrence rule.
///
/// Both variants are configuration errors: retrying never fixes them.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CronError {
    /// The cron pattern did not parse.
    #[error("Invalid cron expression: {0}")]
    InvalidExpression(String),

    /// The rule parsed but can never produce a firing.
    #[error("Invalid recurrence: {0}")]
    InvalidRecurrence(String),
}
