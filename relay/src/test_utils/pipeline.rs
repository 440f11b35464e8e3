use std::sync::Arc;

use relay_config::shared::{
    BatchConfig, BrokerConfig, LeadershipConfig, PipelineConfig, PollingConfig,
};

use crate::conversion::OutboxEventConverter;
use crate::pipeline::PipelineDeps;
use crate::publish::filter::AcceptAll;
use crate::publish::strategy::AggregateTopicStrategy;
use crate::test_utils::coordination::InMemoryCoordinationService;
use crate::test_utils::producer::{MemoryProducer, MemoryProducerFactory};
use crate::validation::NoopValidator;

/// Builds a pipeline configuration with fast timings suitable for tests.
pub fn fast_polling_config(name: &str, source_id: &str) -> PipelineConfig {
    PipelineConfig {
        name: name.to_string(),
        source_id: source_id.to_string(),
        technology: "polling".to_string(),
        broker: BrokerConfig {
            endpoint: "localhost:9092".to_string(),
            client_id: None,
        },
        batch: BatchConfig::default(),
        leadership: LeadershipConfig {
            backoff_initial_ms: 5,
            backoff_max_ms: 50,
        },
        polling: Some(PollingConfig {
            interval_ms: 10,
            ..Default::default()
        }),
        log: None,
        max_consecutive_errors: PipelineConfig::DEFAULT_MAX_CONSECUTIVE_ERRORS,
    }
}

/// Builds a log-based pipeline configuration with fast timings.
pub fn fast_log_config(name: &str, source_id: &str, tables: &[&str]) -> PipelineConfig {
    let mut config = fast_polling_config(name, source_id);
    config.technology = "postgres-wal".to_string();
    config.polling = None;
    config.log = Some(relay_config::shared::LogConfig {
        tables: tables.iter().map(|table| table.to_string()).collect(),
    });

    config
}

/// Wires pipeline collaborators around shared in-memory fakes.
pub fn memory_deps(
    producer: &MemoryProducer,
    coordination: &InMemoryCoordinationService,
) -> PipelineDeps {
    PipelineDeps {
        producer_factory: Arc::new(MemoryProducerFactory::new(producer.clone())),
        converter: Arc::new(OutboxEventConverter::new()),
        filter: Arc::new(AcceptAll),
        strategy: Arc::new(AggregateTopicStrategy::new()),
        coordination: Arc::new(coordination.clone()),
        validator: Arc::new(NoopValidator),
    }
}
