//! Configuration management for conflict-safe writes and change sync.
//!
//! Settings are merged from multiple sources with priority:
//! 1. Default values (hardcoded)
//! 2. Config file named by `KVSYNC_CONFIG_PATH` or passed explicitly
//! 3. Environment variables prefixed `KVSYNC__` (highest priority)
//!
//! ```ignore
//! // KVSYNC__RETRY__MAX_ATTEMPTS=5 overrides retry.max_attempts
//! let settings = Settings::new()?.validate()?;
//! ```

mod retry;
mod sync;
pub use retry::*;
pub use sync::*;


//---
use std::env;

use config::Config;
use config::Environment;
use config::File;
use serde::Deserialize;
use serde::Serialize;

use crate::Result;

const ENV_PREFIX: &str = "KVSYNC";
const ENV_CONFIG_PATH: &str = "KVSYNC_CONFIG_PATH";

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct Settings {
    /// Retry policy for conflict-safe writes
    #[serde(default)]
    pub retry: BackoffPolicy,
    /// Change propagation behavior
    #[serde(default)]
    pub sync: SyncConfig,
}

impl Settings {
    /// Builds settings from defaults, the optional `KVSYNC_CONFIG_PATH` file
    /// and `KVSYNC__*` environment variables. No validation.
    pub fn new() -> Result<Self> {
        let mut builder = Config::builder().add_source(Config::try_from(&Self::default())?);

        if let Ok(config_path) = env::var(ENV_CONFIG_PATH) {
            builder = builder.add_source(File::with_name(&config_path).required(true));
        }

        let settings: Self = builder.add_source(env_source()).build()?.try_deserialize()?;
        Ok(settings)
    }

    /// Loads settings, merging `path` over the defaults when given.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let base = Self::new()?;
        let settings = match path {
            Some(path) => base.with_override_config(path)?,
            None => base,
        };
        settings.validate()
    }

    /// Merges a config file over the current values. Environment variables
    /// still take precedence. No validation.
    pub fn with_override_config(
        &self,
        path: &str,
    ) -> Result<Self> {
        let settings: Self = Config::builder()
            .add_source(Config::try_from(self)?)
            .add_source(File::with_name(path).required(true))
            .add_source(env_source())
            .build()?
            .try_deserialize()?;
        Ok(settings)
    }

    /// Consumes self and returns it once every section is valid.
    pub fn validate(self) -> Result<Self> {
        self.retry.validate()?;
        self.sync.validate()?;
        Ok(self)
    }
}

fn env_source() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .separator("__")
        .ignore_empty(true)
        .try_parsing(true)
}
