use serde::{Deserialize, Serialize};

use crate::shared::{BatchConfig, BrokerConfig, LeadershipConfig, ValidationError};

/// Configuration for a polling change source.
///
/// Describes the source table that carries unpublished events together with
/// the column used as the ordering key and the published-flag column that
/// records relay progress.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct PollingConfig {
    /// Interval, in milliseconds, to sleep when the source table has no pending rows.
    #[serde(default = "default_poll_interval_ms")]
    pub interval_ms: u64,
    /// Name of the source table to poll.
    #[serde(default = "default_source_table")]
    pub table: String,
    /// Name of the primary key column used for ordering and marking.
    #[serde(default = "default_id_column")]
    pub id_column: String,
    /// Name of the flag column that marks a row as published.
    #[serde(default = "default_published_flag_column")]
    pub published_flag_column: String,
}

impl PollingConfig {
    /// Default polling interval in milliseconds.
    pub const DEFAULT_POLL_INTERVAL_MS: u64 = 500;

    /// Validates polling configuration settings.
    ///
    /// The polling interval must be strictly positive.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.interval_ms == 0 {
            return Err(ValidationError::InvalidFieldValue {
                field: "polling.interval_ms".to_string(),
                constraint: "must be greater than 0".to_string(),
            });
        }

        if self.table.is_empty() {
            return Err(ValidationError::InvalidFieldValue {
                field: "polling.table".to_string(),
                constraint: "must not be empty".to_string(),
            });
        }

        Ok(())
    }
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_poll_interval_ms(),
            table: default_source_table(),
            id_column: default_id_column(),
            published_flag_column: default_published_flag_column(),
        }
    }
}

/// Configuration for a transaction-log based change source.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LogConfig {
    /// Source tables whose row-level changes are relayed; entries for other
    /// tables are skipped while tailing the log.
    pub tables: Vec<String>,
}

impl LogConfig {
    /// Validates log tailing configuration settings.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.tables.is_empty() {
            return Err(ValidationError::InvalidFieldValue {
                field: "log.tables".to_string(),
                constraint: "must contain at least one source table".to_string(),
            });
        }

        Ok(())
    }
}

/// Configuration for one capture pipeline.
///
/// One pipeline is one independently leader-elected unit of work. Many
/// pipelines, each with its own configuration, may coexist in one process.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct PipelineConfig {
    /// Name of the pipeline, unique per process.
    pub name: String,
    /// Identity of the captured source; leader election is keyed by this value,
    /// so at most one pipeline instance across the fleet relays for it.
    pub source_id: String,
    /// Source technology tag used by the pipeline factory registry
    /// (for example `polling` or `postgres-wal`).
    pub technology: String,
    /// Connection settings for the destination message broker.
    pub broker: BrokerConfig,
    /// Batch processing configuration.
    #[serde(default)]
    pub batch: BatchConfig,
    /// Leadership acquisition retry configuration.
    #[serde(default)]
    pub leadership: LeadershipConfig,
    /// Polling source settings; required when `technology` selects a polling source.
    #[serde(default)]
    pub polling: Option<PollingConfig>,
    /// Log tailing settings; required when `technology` selects a log-based source.
    #[serde(default)]
    pub log: Option<LogConfig>,
    /// Number of consecutive capture-loop errors tolerated before the pipeline
    /// stops and surfaces a fatal failure.
    #[serde(default = "default_max_consecutive_errors")]
    pub max_consecutive_errors: u32,
}

impl PipelineConfig {
    /// Default threshold of consecutive capture-loop errors.
    pub const DEFAULT_MAX_CONSECUTIVE_ERRORS: u32 = 10;

    /// Validates pipeline configuration settings.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.name.is_empty() {
            return Err(ValidationError::PipelineNameEmpty);
        }

        if self.source_id.is_empty() {
            return Err(ValidationError::SourceIdEmpty);
        }

        if self.technology.is_empty() {
            return Err(ValidationError::TechnologyEmpty);
        }

        self.broker.validate()?;
        self.batch.validate()?;
        self.leadership.validate()?;

        if let Some(polling) = &self.polling {
            polling.validate()?;
        }

        if let Some(log) = &self.log {
            log.validate()?;
        }

        if self.max_consecutive_errors == 0 {
            return Err(ValidationError::InvalidFieldValue {
                field: "max_consecutive_errors".to_string(),
                constraint: "must be greater than 0".to_string(),
            });
        }

        Ok(())
    }
}

fn default_poll_interval_ms() -> u64 {
    PollingConfig::DEFAULT_POLL_INTERVAL_MS
}

fn default_source_table() -> String {
    "events".to_string()
}

fn default_id_column() -> String {
    "event_id".to_string()
}

fn default_published_flag_column() -> String {
    "published".to_string()
}

fn default_max_consecutive_errors() -> u32 {
    PipelineConfig::DEFAULT_MAX_CONSECUTIVE_ERRORS
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> PipelineConfig {
        PipelineConfig {
            name: "orders".to_string(),
            source_id: "orders-db".to_string(),
            technology: "polling".to_string(),
            broker: BrokerConfig {
                endpoint: "localhost:9092".to_string(),
                client_id: None,
            },
            batch: BatchConfig::default(),
            leadership: LeadershipConfig::default(),
            polling: Some(PollingConfig::default()),
            log: None,
            max_consecutive_errors: PipelineConfig::DEFAULT_MAX_CONSECUTIVE_ERRORS,
        }
    }

    #[test]
    fn valid_config_passes_validation() {
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn empty_name_is_rejected() {
        let mut config = valid_config();
        config.name = String::new();
        assert!(matches!(
            config.validate(),
            Err(ValidationError::PipelineNameEmpty)
        ));
    }

    #[test]
    fn zero_poll_interval_is_rejected() {
        let mut config = valid_config();
        config.polling.as_mut().unwrap().interval_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn backoff_cap_below_initial_is_rejected() {
        let mut config = valid_config();
        config.leadership.backoff_initial_ms = 1000;
        config.leadership.backoff_max_ms = 100;
        assert!(config.validate().is_err());
    }

    #[test]
    fn polling_defaults_describe_the_events_table() {
        let polling = PollingConfig::default();
        assert_eq!(polling.table, "events");
        assert_eq!(polling.id_column, "event_id");
        assert_eq!(polling.published_flag_column, "published");
    }
}
