//! Stored job records, retry policy and recurring schedule definitions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;
use vigor_cron::Recurrence;

/// Job unique identifier.
pub type JobId = Uuid;

/// Job payload as persisted.
pub type JobData = serde_json::Value;

/// Lifecycle of a stored record.
///
/// `Delayed` and `Ready` differ only in whether `run_at` has passed; a
/// store may keep a record labelled `Delayed` after it becomes visible,
/// so inspection goes through [`StoredJob::visible_state`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Waiting for `run_at`
    Delayed,
    /// Due and waiting for a free slot
    Ready,
    /// Leased by a worker slot
    Active,
    /// Handler returned success
    Completed,
    /// Failed and waiting for its retry time
    Failed,
    /// Retries exhausted or unrecoverable; kept for operators
    Dead,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Delayed => "delayed",
            JobState::Ready => "ready",
            JobState::Active => "active",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
            JobState::Dead => "dead",
        }
    }

    /// Records a worker may still claim.
    pub fn is_waiting(&self) -> bool {
        matches!(self, JobState::Delayed | JobState::Ready | JobState::Failed)
    }

    pub fn is_finished(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Dead)
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Delay curve between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Backoff {
    Fixed { delay_ms: u64 },
    /// `base_ms * 2^(attempt - 1)`, capped at `max_ms`.
    Exponential { base_ms: u64, max_ms: u64 },
}

/// How many times a job runs before it is dead, and how long to wait
/// between runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total executions allowed, including the first.
    pub max_attempts: u32,
    pub backoff: Backoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Backoff::Exponential {
                base_ms: 1_000,
                max_ms: 3_600_000,
            },
        }
    }
}

impl RetryPolicy {
    /// Run once; the first failure is final.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            backoff: Backoff::Fixed { delay_ms: 0 },
        }
    }

    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            backoff: Backoff::Fixed {
                delay_ms: millis(delay),
            },
        }
    }

    pub fn exponential(max_attempts: u32, base: Duration, max: Duration) -> Self {
        Self {
            max_attempts,
            backoff: Backoff::Exponential {
                base_ms: millis(base),
                max_ms: millis(max),
            },
        }
    }

    /// Whether another execution is allowed after `attempts` runs.
    pub fn can_retry(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }

    /// Wait before the next run, after the `attempt`-th run failed.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let ms = match self.backoff {
            Backoff::Fixed { delay_ms } => delay_ms,
            Backoff::Exponential { base_ms, max_ms } => {
                let factor = 1u64
                    .checked_shl(attempt.saturating_sub(1))
                    .unwrap_or(u64::MAX);
                base_ms.saturating_mul(factor).min(max_ms)
            }
        };
        Duration::from_millis(ms)
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

/// Saturates at a century so that adding it to a timestamp cannot overflow.
pub(crate) fn chrono_duration(d: Duration) -> chrono::Duration {
    let ceiling = chrono::Duration::days(36_500);
    chrono::Duration::from_std(d).map_or(ceiling, |d| d.min(ceiling))
}

/// A job as handed to a store by the producer.
#[derive(Debug, Clone, PartialEq)]
pub struct NewJob {
    pub kind: String,
    pub payload: JobData,
    pub run_at: DateTime<Utc>,
    pub retry: RetryPolicy,
    /// Set when the record was produced by a recurring schedule.
    pub schedule_id: Option<String>,
}

/// Proof that a worker holds a record. Acknowledgements carrying a stale
/// lease are rejected once the record has been reclaimed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lease {
    pub id: JobId,
    pub attempt: u32,
}

/// What happened to a failed record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailOutcome {
    /// Becomes visible again at `at`.
    Retry { at: DateTime<Utc> },
    Dead,
}

/// A persisted job record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredJob {
    pub id: JobId,

    /// Job kind, the tag of the job enum
    pub kind: String,

    pub payload: JobData,

    /// Recurring schedule that produced this record
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule_id: Option<String>,

    pub state: JobState,

    /// Executions started so far
    pub attempts: u32,

    pub retry: RetryPolicy,

    pub created_at: DateTime<Utc>,

    /// Not visible to workers before this instant
    pub run_at: DateTime<Utc>,

    pub started_at: Option<DateTime<Utc>>,

    /// Lease expiry while active
    pub lease_until: Option<DateTime<Utc>>,

    pub finished_at: Option<DateTime<Utc>>,

    pub last_error: Option<String>,
}

impl StoredJob {
    pub fn new(job: NewJob, now: DateTime<Utc>) -> Self {
        let state = if job.run_at <= now {
            JobState::Ready
        } else {
            JobState::Delayed
        };
        Self {
            id: Uuid::new_v4(),
            kind: job.kind,
            payload: job.payload,
            schedule_id: job.schedule_id,
            state,
            attempts: 0,
            retry: job.retry,
            created_at: now,
            run_at: job.run_at,
            started_at: None,
            lease_until: None,
            finished_at: None,
            last_error: None,
        }
    }

    /// Claimable at `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.state.is_waiting() && self.run_at <= now
    }

    pub fn lease_expired(&self, now: DateTime<Utc>) -> bool {
        self.state == JobState::Active && self.lease_until.is_some_and(|until| until <= now)
    }

    /// State as an operator should see it at `now`.
    pub fn visible_state(&self, now: DateTime<Utc>) -> JobState {
        match self.state {
            JobState::Delayed if self.run_at <= now => JobState::Ready,
            JobState::Ready if self.run_at > now => JobState::Delayed,
            state => state,
        }
    }

    pub fn lease(&self) -> Lease {
        Lease {
            id: self.id,
            attempt: self.attempts,
        }
    }

    pub fn holds(&self, lease: &Lease) -> bool {
        self.state == JobState::Active && self.id == lease.id && self.attempts == lease.attempt
    }

    /// Lease the record to a worker slot.
    pub fn claim(&mut self, now: DateTime<Utc>, lease: Duration) -> Lease {
        self.state = JobState::Active;
        self.attempts += 1;
        self.started_at = Some(now);
        self.lease_until = Some(now + chrono_duration(lease));
        self.lease()
    }

    /// Push the lease expiry out while the holder is still working.
    pub fn renew(&mut self, now: DateTime<Utc>, lease: Duration) {
        self.lease_until = Some(now + chrono_duration(lease));
    }

    pub fn complete(&mut self, now: DateTime<Utc>) {
        self.state = JobState::Completed;
        self.lease_until = None;
        self.finished_at = Some(now);
    }

    /// Record a failed attempt and decide between retry and dead.
    pub fn fail(&mut self, now: DateTime<Utc>, error: impl Into<String>) -> FailOutcome {
        self.last_error = Some(error.into());
        self.lease_until = None;

        if self.retry.can_retry(self.attempts) {
            let at = now + chrono_duration(self.retry.delay_for(self.attempts));
            self.state = JobState::Failed;
            self.run_at = at;
            FailOutcome::Retry { at }
        } else {
            self.state = JobState::Dead;
            self.finished_at = Some(now);
            FailOutcome::Dead
        }
    }

    /// Dead without scheduling a retry. The attempt that claimed the record
    /// stays counted.
    pub fn bury(&mut self, now: DateTime<Utc>, error: impl Into<String>) {
        self.state = JobState::Dead;
        self.last_error = Some(error.into());
        self.lease_until = None;
        self.finished_at = Some(now);
    }

    /// Operator retry of a dead record: a fresh set of attempts, visible now.
    pub fn revive(&mut self, now: DateTime<Utc>) {
        self.state = JobState::Ready;
        self.attempts = 0;
        self.run_at = now;
        self.started_at = None;
        self.finished_at = None;
    }
}

/// A named recurring definition. At most one exists per id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecurringSchedule {
    pub id: String,
    pub rule: Recurrence,
    pub kind: String,
    pub payload: JobData,
    pub retry: RetryPolicy,
    /// Next instant a record is produced
    pub next_run: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Records produced so far
    #[serde(default)]
    pub fired: u64,
}

impl RecurringSchedule {
    /// Same rule and template; timestamps and counters are ignored.
    pub fn same_definition(&self, other: &RecurringSchedule) -> bool {
        self.rule == other.rule
            && self.kind == other.kind
            && self.payload == other.payload
            && self.retry == other.retry
    }

    /// The record produced by the firing due at `due`.
    pub fn job_for(&self, due: DateTime<Utc>) -> NewJob {
        NewJob {
            kind: self.kind.clone(),
            payload: self.payload.clone(),
            run_at: due,
            retry: self.retry,
            schedule_id: Some(self.id.clone()),
        }
    }

    /// Fold a fresh registration into the stored definition.
    pub fn merge_registration(
        existing: Option<&RecurringSchedule>,
        mut incoming: RecurringSchedule,
        now: DateTime<Utc>,
    ) -> (RecurringSchedule, UpsertOutcome) {
        match existing {
            Some(current) if current.same_definition(&incoming) => {
                (current.clone(), UpsertOutcome::Unchanged)
            }
            Some(current) => {
                incoming.created_at = current.created_at;
                incoming.fired = current.fired;
                incoming.updated_at = now;
                (incoming, UpsertOutcome::Updated)
            }
            None => (incoming, UpsertOutcome::Created),
        }
    }
}

/// Result of registering a recurring schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Created,
    /// The definition changed; the next firing was recomputed.
    Updated,
    /// Identical definition already registered; nothing was touched.
    Unchanged,
}

/// Record counts per state. Records waiting for a retry are counted with
/// `ready` or `delayed` according to their retry time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueCounts {
    pub delayed: usize,
    pub ready: usize,
    pub active: usize,
    pub completed: usize,
    pub dead: usize,
    pub schedules: usize,
}
