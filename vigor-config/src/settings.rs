// Scheduler settings and the layered builder that produces them

use crate::loader::{ConfigLoader, merge};
use crate::validation::{ConfigValidator, Validate};
use crate::{ConfigError, EnvLoader, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Retry backoff curve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BackoffKind {
    /// Always wait `base_ms`.
    Fixed,
    /// `base_ms * 2^(attempt - 1)`, capped at `max_ms`.
    #[default]
    Exponential,
}

/// How failed jobs are retried.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    /// Total executions allowed, including the first.
    pub max_attempts: u32,
    pub backoff: BackoffKind,
    pub base_ms: u64,
    pub max_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: BackoffKind::Exponential,
            base_ms: 1_000,
            max_ms: 3_600_000,
        }
    }
}

/// Everything the job runtime needs to connect, schedule and consume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerSettings {
    pub redis_url: String,
    pub queue_name: String,
    /// Defaults to `vigor:queue:{queue_name}`.
    pub key_prefix: Option<String>,
    /// Worker execution slots.
    pub concurrency: usize,
    pub poll_interval_ms: u64,
    /// How long a claimed job stays exclusively leased.
    pub lease_ms: u64,
    pub job_timeout_ms: u64,
    /// How long finished records are kept for inspection.
    pub retention_secs: u64,
    /// Period of the sweep dropping finished records past retention.
    pub purge_every_ms: u64,
    /// Period of the orphan cleanup sweeps.
    pub cleanup_every_ms: u64,
    pub retry: RetrySettings,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            redis_url: "redis://127.0.0.1:6379".to_string(),
            queue_name: "work".to_string(),
            key_prefix: None,
            concurrency: 5,
            poll_interval_ms: 1_000,
            lease_ms: 300_000,
            job_timeout_ms: 300_000,
            retention_secs: 7 * 86_400,
            purge_every_ms: 3_600_000,
            cleanup_every_ms: 86_400_000,
            retry: RetrySettings::default(),
        }
    }
}

impl SchedulerSettings {
    pub fn builder() -> SettingsBuilder {
        SettingsBuilder::new()
    }

    pub fn key_prefix(&self) -> String {
        self.key_prefix
            .clone()
            .unwrap_or_else(|| format!("vigor:queue:{}", self.queue_name))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn lease(&self) -> Duration {
        Duration::from_millis(self.lease_ms)
    }

    pub fn job_timeout(&self) -> Duration {
        Duration::from_millis(self.job_timeout_ms)
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }

    pub fn purge_every(&self) -> Duration {
        Duration::from_millis(self.purge_every_ms)
    }

    pub fn cleanup_every(&self) -> Duration {
        Duration::from_millis(self.cleanup_every_ms)
    }
}

impl Validate for SchedulerSettings {
    fn validate(&self) -> Result<()> {
        ConfigValidator::is_redis_url(&self.redis_url, "redis_url")?;
        ConfigValidator::not_empty(&self.queue_name, "queue_name")?;
        if let Some(prefix) = &self.key_prefix {
            ConfigValidator::not_empty(prefix, "key_prefix")?;
        }
        ConfigValidator::in_range(self.concurrency, 1, 256, "concurrency")?;
        ConfigValidator::at_least(self.poll_interval_ms, 1, "poll_interval_ms")?;
        ConfigValidator::at_least(self.job_timeout_ms, 1, "job_timeout_ms")?;
        ConfigValidator::at_least(self.cleanup_every_ms, 1, "cleanup_every_ms")?;
        ConfigValidator::at_least(self.purge_every_ms, 1, "purge_every_ms")?;
        if self.lease_ms < self.job_timeout_ms {
            return Err(ConfigError::ValidationError(format!(
                "lease_ms ({}) must not be shorter than job_timeout_ms ({})",
                self.lease_ms, self.job_timeout_ms
            )));
        }
        ConfigValidator::at_least(self.retry.max_attempts, 1, "retry.max_attempts")?;
        if self.retry.base_ms > self.retry.max_ms {
            return Err(ConfigError::ValidationError(format!(
                "retry.base_ms ({}) exceeds retry.max_ms ({})",
                self.retry.base_ms, self.retry.max_ms
            )));
        }
        Ok(())
    }
}

/// Flat override keys (as produced by [`EnvLoader`]) and where they land.
const OVERRIDE_KEYS: &[(&str, &[&str])] = &[
    ("redis_url", &["redis_url"]),
    ("queue_name", &["queue_name"]),
    ("key_prefix", &["key_prefix"]),
    ("concurrency", &["concurrency"]),
    ("poll_interval_ms", &["poll_interval_ms"]),
    ("lease_ms", &["lease_ms"]),
    ("job_timeout_ms", &["job_timeout_ms"]),
    ("retention_secs", &["retention_secs"]),
    ("purge_every_ms", &["purge_every_ms"]),
    ("cleanup_every_ms", &["cleanup_every_ms"]),
    ("retry_max_attempts", &["retry", "max_attempts"]),
    ("retry_backoff", &["retry", "backoff"]),
    ("retry_base_ms", &["retry", "base_ms"]),
    ("retry_max_ms", &["retry", "max_ms"]),
];

/// Layers settings sources. Later layers win:
/// defaults, then the settings file, then the `.env` file, then the process
/// environment, then explicit overrides.
#[derive(Debug, Default)]
pub struct SettingsBuilder {
    file: Option<PathBuf>,
    dotenv: Option<PathBuf>,
    env_prefix: Option<String>,
    overrides: HashMap<String, String>,
}

impl SettingsBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// A `.toml` or `.json` settings file.
    pub fn file(mut self, path: impl AsRef<Path>) -> Self {
        self.file = Some(path.as_ref().to_path_buf());
        self
    }

    /// A `.env` file read for `{prefix}_*` keys.
    pub fn dotenv(mut self, path: impl AsRef<Path>) -> Self {
        self.dotenv = Some(path.as_ref().to_path_buf());
        self
    }

    /// Read `{prefix}_*` variables from the process environment.
    pub fn env(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = Some(prefix.into());
        self
    }

    /// One flat override, e.g. `("retry_max_attempts", "5")`.
    pub fn set(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.overrides.insert(key.into(), value.into());
        self
    }

    pub fn build(self) -> Result<SchedulerSettings> {
        let mut tree = serde_json::to_value(SchedulerSettings::default())
            .map_err(|e| ConfigError::ParseError(e.to_string()))?;

        if let Some(path) = &self.file {
            let loaded = ConfigLoader::auto(path)?.load_file(path)?;
            merge(&mut tree, loaded);
        }

        let prefix = self.env_prefix.clone().unwrap_or_else(|| "VIGOR".to_string());
        let loader = EnvLoader::new(prefix);

        let mut flat = HashMap::new();
        if let Some(path) = &self.dotenv {
            flat.extend(loader.load_dotenv(path)?);
        }
        if self.env_prefix.is_some() {
            flat.extend(loader.load());
        }
        flat.extend(self.overrides);

        for (key, raw) in flat {
            apply_override(&mut tree, &key, &raw)?;
        }

        let settings: SchedulerSettings = serde_json::from_value(tree)
            .map_err(|e| ConfigError::ParseError(format!("settings: {}", e)))?;
        settings.validate()?;
        Ok(settings)
    }
}

fn apply_override(tree: &mut Value, key: &str, raw: &str) -> Result<()> {
    let Some((_, path)) = OVERRIDE_KEYS.iter().find(|(name, _)| *name == key) else {
        // Foreign keys sharing the prefix are not ours to reject.
        return Ok(());
    };

    let mut node = &mut *tree;
    for (i, segment) in path.iter().enumerate() {
        let map = node.as_object_mut().ok_or_else(|| ConfigError::InvalidValue {
            key: key.to_string(),
            reason: "settings tree is not a table".to_string(),
        })?;
        if i + 1 == path.len() {
            let value = scalar(map.get(*segment), raw);
            map.insert((*segment).to_string(), value);
            return Ok(());
        }
        node = map
            .entry((*segment).to_string())
            .or_insert_with(|| Value::Object(Default::default()));
    }
    Ok(())
}

/// Interpret an env string with the type of the value it replaces. Text
/// fields stay text even when they look numeric; a non-numeric string for a
/// numeric field is kept as a string so deserialization reports it.
fn scalar(current: Option<&Value>, raw: &str) -> Value {
    let trimmed = raw.trim();
    match current {
        Some(Value::Number(_)) => trimmed
            .parse::<u64>()
            .map(Value::from)
            .unwrap_or_else(|_| Value::String(trimmed.to_string())),
        Some(Value::Bool(_)) => match trimmed {
            "true" => Value::Bool(true),
            "false" => Value::Bool(false),
            _ => Value::String(trimmed.to_string()),
        },
        _ => Value::String(trimmed.to_string()),
    }
}
