use config::ConfigError;
use serde::Deserialize;
use serde::Serialize;

use crate::constants::DEFAULT_MAX_ATTEMPTS;
use crate::constants::DEFAULT_MAX_RETRY_DELAY_MS;
use crate::constants::DEFAULT_RETRY_DELAY_MS;
use crate::Error;
use crate::Result;

/// Delay growth between conflicting attempts
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// Same delay before every retry
    #[default]
    Fixed,
    /// Delay doubles per retry, capped at `max_delay_ms`
    Exponential,
}

/// Retry policy template for conflict-safe writes
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Total attempts, the first one included
    #[serde(default = "default_max_attempts")]
    pub max_attempts: usize,

    /// Backoff base (unit: milliseconds)
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Maximum backoff time (unit: milliseconds)
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    #[serde(default)]
    pub strategy: BackoffStrategy,

    /// Randomize each delay within [delay / 2, delay]
    #[serde(default)]
    pub jitter: bool,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            strategy: BackoffStrategy::default(),
            jitter: false,
        }
    }
}

impl BackoffPolicy {
    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(Error::Config(ConfigError::Message(
                "retry.max_attempts must be greater than 0".into(),
            )));
        }

        if self.max_delay_ms < self.base_delay_ms {
            return Err(Error::Config(ConfigError::Message(format!(
                "retry.max_delay_ms {}ms should not be less than base_delay_ms {}ms",
                self.max_delay_ms, self.base_delay_ms
            ))));
        }

        Ok(())
    }
}

fn default_max_attempts() -> usize {
    DEFAULT_MAX_ATTEMPTS
}
fn default_base_delay_ms() -> u64 {
    DEFAULT_RETRY_DELAY_MS
}
fn default_max_delay_ms() -> u64 {
    DEFAULT_MAX_RETRY_DELAY_MS
}
