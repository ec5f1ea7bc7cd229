// Environment variable loading

use crate::{ConfigError, Result};
use std::collections::HashMap;
use std::env;
use std::path::Path;

/// Collects `PREFIX_*` variables as lower-cased keys with the prefix removed,
/// so `VIGOR_RETRY_MAX_ATTEMPTS=5` becomes `retry_max_attempts = "5"`.
pub struct EnvLoader {
    prefix: String,
}

impl EnvLoader {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Matching variables from the process environment.
    pub fn load(&self) -> HashMap<String, String> {
        self.collect(env::vars())
    }

    /// Matching variables from a `.env` file, without touching the process
    /// environment.
    pub fn load_dotenv(&self, path: impl AsRef<Path>) -> Result<HashMap<String, String>> {
        let path = path.as_ref();
        let iter = dotenvy::from_path_iter(path).map_err(|e| {
            ConfigError::LoadError(format!("Failed to read {}: {}", path.display(), e))
        })?;

        let mut pairs = Vec::new();
        for item in iter {
            let (key, value) =
                item.map_err(|e| ConfigError::ParseError(format!("{}: {}", path.display(), e)))?;
            pairs.push((key, value));
        }

        Ok(self.collect(pairs))
    }

    /// Strip the prefix from one variable name, if it carries it.
    pub fn strip(&self, name: &str) -> Option<String> {
        let rest = name.strip_prefix(&self.prefix)?;
        let rest = rest.strip_prefix('_')?;
        if rest.is_empty() {
            return None;
        }
        Some(rest.to_ascii_lowercase())
    }

    fn collect(&self, vars: impl IntoIterator<Item = (String, String)>) -> HashMap<String, String> {
        vars.into_iter()
            .filter_map(|(key, value)| self.strip(&key).map(|key| (key, value)))
            .collect()
    }
}

impl Default for EnvLoader {
    fn default() -> Self {
        Self::new("VIGOR")
    }
}
