use serde::{Deserialize, Serialize};

use crate::shared::ValidationError;

/// Settings controlling leadership acquisition retries.
///
/// Acquisition failures are retried with bounded exponential backoff computed
/// from the number of consecutive failed attempts.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LeadershipConfig {
    /// Delay, in milliseconds, before the first retry after a failed acquisition attempt.
    #[serde(default = "default_backoff_initial_ms")]
    pub backoff_initial_ms: u64,
    /// Upper bound, in milliseconds, for the retry delay.
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
}

impl LeadershipConfig {
    /// Default initial backoff delay in milliseconds.
    pub const DEFAULT_BACKOFF_INITIAL_MS: u64 = 500;

    /// Default backoff cap in milliseconds.
    pub const DEFAULT_BACKOFF_MAX_MS: u64 = 30_000;

    /// Validates leadership configuration settings.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.backoff_initial_ms == 0 {
            return Err(ValidationError::InvalidFieldValue {
                field: "leadership.backoff_initial_ms".to_string(),
                constraint: "must be greater than 0".to_string(),
            });
        }

        if self.backoff_max_ms < self.backoff_initial_ms {
            return Err(ValidationError::InvalidFieldValue {
                field: "leadership.backoff_max_ms".to_string(),
                constraint: "must be greater than or equal to `backoff_initial_ms`".to_string(),
            });
        }

        Ok(())
    }
}

impl Default for LeadershipConfig {
    fn default() -> Self {
        Self {
            backoff_initial_ms: default_backoff_initial_ms(),
            backoff_max_ms: default_backoff_max_ms(),
        }
    }
}

fn default_backoff_initial_ms() -> u64 {
    LeadershipConfig::DEFAULT_BACKOFF_INITIAL_MS
}

fn default_backoff_max_ms() -> u64 {
    LeadershipConfig::DEFAULT_BACKOFF_MAX_MS
}
