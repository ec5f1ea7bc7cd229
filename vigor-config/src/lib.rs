//! Settings for the Vigor job scheduler.
//!
//! Settings are layered: built-in defaults, then an optional `.toml` or
//! `.json` file, then an optional `.env` file, then `VIGOR_*` environment
//! variables, then explicit overrides. The result is validated before it is
//! handed to the runtime.
//!
//! ```
//! use vigor_config::SchedulerSettings;
//!
//! let settings = SchedulerSettings::builder()
//!     .set("concurrency", "8")
//!     .set("retry_max_attempts", "5")
//!     .build()
//!     .unwrap();
//!
//! assert_eq!(settings.concurrency, 8);
//! assert_eq!(settings.retry.max_attempts, 5);
//! ```

pub mod env;
pub mod error;
pub mod loader;
pub mod settings;
pub mod validation;

pub use env::EnvLoader;
pub use error::{ConfigError, Result};
pub use loader::{ConfigLoader, FileFormat};
pub use settings::{BackoffKind, RetrySettings, SchedulerSettings, SettingsBuilder};
pub use validation::{ConfigValidator, Validate};
