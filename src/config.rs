//! Runtime configuration.
//!
//! Configuration is read from TOML and may be overridden from the environment.
//! Every field has a default, so an empty document is a valid configuration.

use std::{env, path::Path};

use serde::Deserialize;

use crate::error::ConfigError;

/// Environment variable overriding [`Config::pool_size`].
pub const POOL_SIZE_ENV: &str = "TETHER_POOL_SIZE";

const DEFAULT_POOL_SIZE: usize = 4;
const DEFAULT_THREAD_NAME_PREFIX: &str = "tether";

/// Settings for the worker pool and timer threads.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Number of worker threads running asynchronous operations.
    pub pool_size: usize,

    /// Prefix used when naming pool and timer threads.
    pub thread_name_prefix: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            pool_size: DEFAULT_POOL_SIZE,
            thread_name_prefix: DEFAULT_THREAD_NAME_PREFIX.to_string(),
        }
    }
}

impl Config {
    /// Parses and validates a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads the configuration stored at `path`.
    ///
    /// A missing file is not an error and yields [`Config::default`].
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::debug!(path = %path.display(), "No config file, using defaults");
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// Applies overrides from the process environment.
    ///
    /// Unparsable values are ignored with a warning.
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(raw) = env::var(POOL_SIZE_ENV) {
            match raw.trim().parse::<usize>() {
                Ok(size) if size > 0 => self.pool_size = size,
                _ => tracing::warn!(value = %raw, "Ignoring invalid {POOL_SIZE_ENV}"),
            }
        }
        self
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.pool_size == 0 {
            return Err(ConfigError::Invalid {
                key: "pool_size",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.thread_name_prefix.trim().is_empty() {
            return Err(ConfigError::Invalid {
                key: "thread_name_prefix",
                reason: "must not be empty".to_string(),
            });
        }
        Ok(())
    }
}
