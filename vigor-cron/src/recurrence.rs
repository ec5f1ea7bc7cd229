//! Recurrence rules for recurring schedules.

use crate::error::{CronError, CronResult};
use crate::expression::CronExpression;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// When a recurring schedule fires.
///
/// Serialized externally tagged, so a stored rule reads as
/// `{"every_ms": 86400000}` or `{"cron": "0 0 3 * * *"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Recurrence {
    /// Fixed period.
    #[serde(rename = "every_ms", with = "duration_ms")]
    Every(Duration),

    /// Calendar instants matching a cron pattern.
    #[serde(rename = "cron")]
    Cron(CronExpression),
}

impl Recurrence {
    /// Fire every `period`.
    pub fn every(period: Duration) -> Self {
        Recurrence::Every(period)
    }

    /// Fire every `ms` milliseconds.
    pub fn every_ms(ms: u64) -> Self {
        Recurrence::Every(Duration::from_millis(ms))
    }

    /// Fire on a cron pattern. Fails on a malformed pattern.
    pub fn cron(expression: &str) -> CronResult<Self> {
        CronExpression::parse(expression).map(Recurrence::Cron)
    }

    /// Reject rules that can never fire.
    pub fn validate(&self) -> CronResult<()> {
        match self {
            Recurrence::Every(period) if period.is_zero() => Err(CronError::InvalidRecurrence(
                "period must be greater than zero".to_string(),
            )),
            Recurrence::Every(period) => chrono::Duration::from_std(*period)
                .map(|_| ())
                .map_err(|_| CronError::InvalidRecurrence(format!("period {period:?} is too large"))),
            Recurrence::Cron(expr) => match expr.next_after(Utc::now()) {
                Some(_) => Ok(()),
                None => Err(CronError::InvalidRecurrence(format!(
                    "cron pattern '{}' has no upcoming instants",
                    expr
                ))),
            },
        }
    }

    /// First firing for a newly registered schedule.
    ///
    /// Periodic rules fire immediately on registration; cron rules wait
    /// for their next matching instant.
    pub fn first_run(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Recurrence::Every(_) => Some(now),
            Recurrence::Cron(expr) => expr.next_after(now),
        }
    }

    /// Next firing strictly after `after`.
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Recurrence::Every(period) => {
                let period = chrono::Duration::from_std(*period).ok()?;
                after.checked_add_signed(period)
            }
            Recurrence::Cron(expr) => expr.next_after(after),
        }
    }

    /// Re-arm after the firing that was due at `due`, observed at `now`.
    ///
    /// Periodic rules stay aligned to their original cadence: missed
    /// periods are skipped, never replayed one by one.
    pub fn next_firing(&self, due: DateTime<Utc>, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Recurrence::Every(period) => {
                let period_ms = i64::try_from(period.as_millis()).ok()?;
                if period_ms == 0 {
                    return None;
                }
                let behind_ms = (now - due).num_milliseconds().max(0);
                let periods = behind_ms / period_ms + 1;
                due.checked_add_signed(chrono::Duration::milliseconds(
                    periods.checked_mul(period_ms)?,
                ))
            }
            Recurrence::Cron(expr) => expr.next_after(now.max(due)),
        }
    }

    /// Short human description for logs and inspection.
    pub fn describe(&self) -> String {
        match self {
            Recurrence::Every(period) => format!("every {}ms", period.as_millis()),
            Recurrence::Cron(expr) => format!("cron '{}'", expr),
        }
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        let ms = u64::try_from(value.as_millis()).unwrap_or(u64::MAX);
        serializer.serialize_u64(ms)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
