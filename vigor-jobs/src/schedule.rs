//! Producer helpers used by request handlers and at boot.

use crate::kinds::{CleanupTarget, CloseFastingWindow, FinishChallengeSubscription, FitnessJob, LogLine};
use chrono::{DateTime, Utc};
use std::time::Duration;
use uuid::Uuid;
use vigor_queue::{JobId, Queue, QueueResult, Recurrence, UpsertOutcome};

/// Close the fasting entry when its window ends.
///
/// A window that already ended is closed as soon as a worker is free.
pub async fn schedule_fasting_close(
    queue: &Queue<FitnessJob>,
    entry_id: Uuid,
    window_end: DateTime<Utc>,
) -> QueueResult<JobId> {
    queue
        .enqueue(
            window_end,
            CloseFastingWindow {
                entry_id,
                window_end,
            },
        )
        .await
}

/// Finish the subscription once its last day is over.
pub async fn schedule_subscription_finish(
    queue: &Queue<FitnessJob>,
    subscription_id: Uuid,
    ends_at: DateTime<Utc>,
) -> QueueResult<JobId> {
    queue
        .enqueue(
            ends_at,
            FinishChallengeSubscription {
                subscription_id,
                ends_at,
            },
        )
        .await
}

pub async fn schedule_log(
    queue: &Queue<FitnessJob>,
    at: DateTime<Utc>,
    message: impl Into<String>,
) -> QueueResult<JobId> {
    queue.enqueue(at, LogLine(message.into())).await
}

/// Register one recurring sweep per [`CleanupTarget`], firing `every`.
///
/// Schedule ids are stable, so calling this on every process start keeps a
/// single recurrence per target.
pub async fn declare_cleanups(
    queue: &Queue<FitnessJob>,
    every: Duration,
) -> QueueResult<Vec<(CleanupTarget, UpsertOutcome)>> {
    let mut outcomes = Vec::with_capacity(CleanupTarget::ALL.len());
    for target in CleanupTarget::ALL {
        let outcome = queue
            .schedule_recurring(target.schedule_id(), Recurrence::every(every), target)
            .await?;
        outcomes.push((target, outcome));
    }
    Ok(outcomes)
}
