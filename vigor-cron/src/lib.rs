//! Recurrence rules for Vigor recurring jobs.
//!
//! A recurring schedule fires either on a fixed period or on the calendar
//! instants matched by a cron pattern. The durable queue stores the rule
//! and uses it to re-arm the schedule after every firing.
//!
//! ## Fixed periods
//!
//! ```
//! use vigor_cron::Recurrence;
//! use std::time::Duration;
//!
//! let daily = Recurrence::every(Duration::from_secs(24 * 3600));
//! assert!(daily.validate().is_ok());
//!
//! let now = chrono::Utc::now();
//! assert_eq!(daily.first_run(now), Some(now));
//! ```
//!
//! ## Cron patterns
//!
//! ```
//! use vigor_cron::{CronPresets, Recurrence};
//!
//! let nightly = Recurrence::cron(CronPresets::NIGHTLY).unwrap();
//! let now = chrono::Utc::now();
//! assert!(nightly.next_after(now).unwrap() > now);
//!
//! assert!(Recurrence::cron("not a pattern").is_err());
//! ```

pub mod error;
pub mod expression;
pub mod recurrence;

pub use error::{CronError, CronResult};
pub use expression::{CronExpression, CronPresets};
pub use recurrence::Recurrence;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::error::{CronError, CronResult};
    pub use crate::expression::{CronExpression, CronPresets};
    pub use crate::recurrence::Recurrence;
}
