use std::time::Duration;

use config::ConfigError;
use serde::Deserialize;
use serde::Serialize;

use crate::constants::DEFAULT_MAX_RESUBSCRIBE_ATTEMPTS;
use crate::constants::DEFAULT_RESUBSCRIBE_DELAY_MS;
use crate::Error;
use crate::Result;

/// Change propagation settings
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// Re-establish the watch when the feed closes without cancellation.
    /// Off by default: a closed feed ends the delivery loop.
    #[serde(default)]
    pub auto_resubscribe: bool,

    /// Pause before each resubscribe attempt (unit: milliseconds)
    #[serde(default = "default_resubscribe_delay_ms")]
    pub resubscribe_delay_ms: u64,

    /// Consecutive failed resubscribe attempts before the loop gives up
    #[serde(default = "default_max_resubscribe_attempts")]
    pub max_resubscribe_attempts: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            auto_resubscribe: false,
            resubscribe_delay_ms: default_resubscribe_delay_ms(),
            max_resubscribe_attempts: default_max_resubscribe_attempts(),
        }
    }
}

impl SyncConfig {
    pub fn validate(&self) -> Result<()> {
        if self.auto_resubscribe && self.resubscribe_delay_ms == 0 {
            return Err(Error::Config(ConfigError::Message(
                "sync.resubscribe_delay_ms must be > 0 when auto_resubscribe is enabled".into(),
            )));
        }

        if self.auto_resubscribe && self.max_resubscribe_attempts == 0 {
            return Err(Error::Config(ConfigError::Message(
                "sync.max_resubscribe_attempts must be > 0 when auto_resubscribe is enabled".into(),
            )));
        }

        Ok(())
    }

    pub fn resubscribe_delay(&self) -> Duration {
        Duration::from_millis(self.resubscribe_delay_ms)
    }
}

fn default_resubscribe_delay_ms() -> u64 {
    DEFAULT_RESUBSCRIBE_DELAY_MS
}
fn default_max_resubscribe_attempts() -> usize {
    DEFAULT_MAX_RESUBSCRIBE_ATTEMPTS
}
