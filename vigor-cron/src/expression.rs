//! Cron expression parsing and evaluation.

use crate::error::{CronError, CronResult};
use chrono::{DateTime, Utc};
use cron::Schedule;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// A parsed cron pattern.
///
/// Two expressions are equal when their source text is equal, which is what
/// recurring-schedule upserts compare.
#[derive(Clone)]
pub struct CronExpression {
    schedule: Schedule,
    expression: String,
}

impl CronExpression {
    /// Parse a cron pattern.
    ///
    /// Six fields (second, minute, hour, day of month, month, day of week),
    /// with an optional seventh year field.
    ///
    /// ```
    /// use vigor_cron::CronExpression;
    ///
    /// // Every day at 03:00 UTC
    /// let nightly = CronExpression::parse("0 0 3 * * *").unwrap();
    /// assert_eq!(nightly.expression(), "0 0 3 * * *");
    ///
    /// assert!(CronExpression::parse("every tuesday").is_err());
    /// ```
    pub fn parse(expression: &str) -> CronResult<Self> {
        let expression = expression.trim();
        let schedule = Schedule::from_str(expression)
            .map_err(|e| CronError::InvalidExpression(format!("{}: {}", expression, e)))?;

        Ok(Self {
            schedule,
            expression: expression.to_string(),
        })
    }

    /// First instant strictly after `after` that matches the pattern.
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.after(&after).next()
    }

    /// The source text.
    pub fn expression(&self) -> &str {
        &self.expression
    }
}

impl PartialEq for CronExpression {
    fn eq(&self, other: &Self) -> bool {
        self.expression == other.expression
    }
}

impl Eq for CronExpression {}

impl fmt::Debug for CronExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("CronExpression")
            .field(&self.expression)
            .finish()
    }
}

impl fmt::Display for CronExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.expression)
    }
}

impl FromStr for CronExpression {
    type Err = CronError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for CronExpression {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.expression)
    }
}

impl<'de> Deserialize<'de> for CronExpression {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Self::parse(&text).map_err(serde::de::Error::custom)
    }
}

/// Common cron patterns.
pub struct CronPresets;

impl CronPresets {
    pub const EVERY_MINUTE: &'static str = "0 * * * * *";
    pub const EVERY_15_MINUTES: &'static str = "0 */15 * * * *";
    pub const EVERY_HOUR: &'static str = "0 0 * * * *";
    /// Midnight UTC.
    pub const DAILY: &'static str = "0 0 0 * * *";
    /// 03:00 UTC, the usual slot for orphan sweeps.
    pub const NIGHTLY: &'static str = "0 0 3 * * *";
    /// Sunday midnight UTC.
    pub const WEEKLY: &'static str = "0 0 0 * * SUN";
    pub const MONTHLY: &'static str = "0 0 0 1 * *";
}
