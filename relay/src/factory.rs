//! Technology-keyed construction of capture pipelines.
//!
//! Every supported source technology registers a [`PipelineFactory`] in the
//! [`PipelineFactoryRegistry`]; a pipeline is then built purely from its
//! [`PipelineConfig`], whose `technology` tag selects the factory. The wiring
//! layer supplies the environment (broker access, offset store, coordination
//! service) once per registry instead of once per pipeline.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use relay_config::shared::PipelineConfig;
use tracing::info;

use crate::bail;
use crate::conversion::{EventConverter, OutboxEventConverter};
use crate::error::{ErrorKind, RelayResult};
use crate::leadership::CoordinationService;
use crate::offset::OffsetStore;
use crate::pipeline::{Pipeline, PipelineDeps};
use crate::publish::filter::{AcceptAll, PublishingFilter};
use crate::publish::producer::ProducerFactory;
use crate::publish::strategy::{AggregateTopicStrategy, PublishingStrategy};
use crate::relay_error;
use crate::source::ChangeSource;
use crate::source::log::{LogBasedChangeSource, LogTailClient};
use crate::source::polling::{PendingEventsDao, PollingChangeSource};
use crate::validation::{NoopValidator, StartupValidator};

/// Technology tag of pipelines polling an outbox-style events table.
pub const POLLING_TECHNOLOGY: &str = "polling";
/// Technology tag of pipelines tailing a Postgres write-ahead log.
pub const POSTGRES_WAL_TECHNOLOGY: &str = "postgres-wal";

/// A fully type-erased pipeline, as produced by the factory registry.
pub type BoxedPipeline = Pipeline<Box<dyn ChangeSource>, Arc<dyn OffsetStore>>;

/// Connects the per-pipeline data access of a polling source.
#[async_trait]
pub trait PendingEventsDaoFactory: Send + Sync {
    /// Builds a DAO for the source table named in `config`.
    async fn connect(&self, config: &PipelineConfig) -> RelayResult<Arc<dyn PendingEventsDao>>;
}

/// Connects the per-pipeline log stream of a log-based source.
#[async_trait]
pub trait LogTailClientFactory: Send + Sync {
    /// Builds a client tailing the transaction log of the source in `config`.
    async fn connect(&self, config: &PipelineConfig) -> RelayResult<Box<dyn LogTailClient>>;
}

/// Shared infrastructure handed to every pipeline a registry creates.
///
/// The behavioral seams default to the outbox conventions (outbox column
/// mapping, publish everything, one topic per aggregate type) and can be
/// swapped with the builder methods.
#[derive(Clone)]
pub struct PipelineEnvironment {
    offsets: Arc<dyn OffsetStore>,
    producer_factory: Arc<dyn ProducerFactory>,
    coordination: Arc<dyn CoordinationService>,
    validator: Arc<dyn StartupValidator>,
    converter: Arc<dyn EventConverter>,
    filter: Arc<dyn PublishingFilter>,
    strategy: Arc<dyn PublishingStrategy>,
}

impl PipelineEnvironment {
    /// Creates an environment with default conversion, filtering, and routing.
    pub fn new(
        offsets: Arc<dyn OffsetStore>,
        producer_factory: Arc<dyn ProducerFactory>,
        coordination: Arc<dyn CoordinationService>,
    ) -> Self {
        Self {
            offsets,
            producer_factory,
            coordination,
            validator: Arc::new(NoopValidator),
            converter: Arc::new(OutboxEventConverter::new()),
            filter: Arc::new(AcceptAll),
            strategy: Arc::new(AggregateTopicStrategy::new()),
        }
    }

    /// Replaces the startup validator.
    pub fn with_validator(mut self, validator: Arc<dyn StartupValidator>) -> Self {
        self.validator = validator;
        self
    }

    /// Replaces the event converter.
    pub fn with_converter(mut self, converter: Arc<dyn EventConverter>) -> Self {
        self.converter = converter;
        self
    }

    /// Replaces the publishing filter.
    pub fn with_filter(mut self, filter: Arc<dyn PublishingFilter>) -> Self {
        self.filter = filter;
        self
    }

    /// Replaces the publishing strategy.
    pub fn with_strategy(mut self, strategy: Arc<dyn PublishingStrategy>) -> Self {
        self.strategy = strategy;
        self
    }

    fn deps(&self) -> PipelineDeps {
        PipelineDeps {
            producer_factory: self.producer_factory.clone(),
            converter: self.converter.clone(),
            filter: self.filter.clone(),
            strategy: self.strategy.clone(),
            coordination: self.coordination.clone(),
            validator: self.validator.clone(),
        }
    }
}

/// Builds pipelines for one source technology.
#[async_trait]
pub trait PipelineFactory: Send + Sync {
    /// Technology tag this factory builds pipelines for.
    fn technology(&self) -> &str;

    /// Whether this factory can build a pipeline for the given configuration.
    fn supports(&self, config: &PipelineConfig) -> bool {
        config.technology.eq_ignore_ascii_case(self.technology())
    }

    /// Builds a ready-to-start pipeline from a validated configuration.
    async fn create(&self, config: Arc<PipelineConfig>) -> RelayResult<BoxedPipeline>;
}

/// Factory for pipelines that poll an outbox-style events table.
pub struct PollingPipelineFactory {
    environment: PipelineEnvironment,
    dao_factory: Arc<dyn PendingEventsDaoFactory>,
}

impl PollingPipelineFactory {
    /// Creates a polling pipeline factory.
    pub fn new(
        environment: PipelineEnvironment,
        dao_factory: Arc<dyn PendingEventsDaoFactory>,
    ) -> Self {
        Self {
            environment,
            dao_factory,
        }
    }
}

#[async_trait]
impl PipelineFactory for PollingPipelineFactory {
    fn technology(&self) -> &str {
        POLLING_TECHNOLOGY
    }

    async fn create(&self, config: Arc<PipelineConfig>) -> RelayResult<BoxedPipeline> {
        let Some(polling) = config.polling.as_ref() else {
            bail!(
                ErrorKind::ConfigError,
                "Polling pipelines require a polling section",
                format!("pipeline '{}'", config.name)
            );
        };

        let dao = self.dao_factory.connect(&config).await?;
        let source = PollingChangeSource::new(
            dao,
            Duration::from_millis(polling.interval_ms),
            config.batch.max_size,
        );

        Ok(Pipeline::new(
            config.clone(),
            Box::new(source),
            self.environment.offsets.clone(),
            self.environment.deps(),
        ))
    }
}

/// Factory for pipelines that tail a Postgres write-ahead log.
pub struct PostgresWalPipelineFactory {
    environment: PipelineEnvironment,
    client_factory: Arc<dyn LogTailClientFactory>,
}

impl PostgresWalPipelineFactory {
    /// Creates a WAL pipeline factory.
    pub fn new(
        environment: PipelineEnvironment,
        client_factory: Arc<dyn LogTailClientFactory>,
    ) -> Self {
        Self {
            environment,
            client_factory,
        }
    }
}

#[async_trait]
impl PipelineFactory for PostgresWalPipelineFactory {
    fn technology(&self) -> &str {
        POSTGRES_WAL_TECHNOLOGY
    }

    async fn create(&self, config: Arc<PipelineConfig>) -> RelayResult<BoxedPipeline> {
        let Some(log) = config.log.as_ref() else {
            bail!(
                ErrorKind::ConfigError,
                "Log-based pipelines require a log section",
                format!("pipeline '{}'", config.name)
            );
        };

        let client = self.client_factory.connect(&config).await?;
        let source = LogBasedChangeSource::new(client, log.tables.iter().cloned());

        Ok(Pipeline::new(
            config.clone(),
            Box::new(source),
            self.environment.offsets.clone(),
            self.environment.deps(),
        ))
    }
}

/// Registry resolving pipeline configurations to factories by technology tag.
#[derive(Default)]
pub struct PipelineFactoryRegistry {
    factories: Vec<Arc<dyn PipelineFactory>>,
}

impl PipelineFactoryRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a factory.
    pub fn register(mut self, factory: Arc<dyn PipelineFactory>) -> Self {
        self.factories.push(factory);
        self
    }

    /// Validates the configuration and builds a pipeline through the factory
    /// registered for its technology tag.
    pub async fn create_pipeline(&self, config: PipelineConfig) -> RelayResult<BoxedPipeline> {
        config.validate().map_err(|err| {
            relay_error!(
                ErrorKind::ConfigError,
                "Invalid pipeline configuration",
                format!("pipeline '{}'", config.name),
                source: err
            )
        })?;

        let Some(factory) = self.factories.iter().find(|f| f.supports(&config)) else {
            bail!(
                ErrorKind::ConfigError,
                "No pipeline factory supports the configured technology",
                config.technology
            );
        };

        info!(
            pipeline = config.name,
            technology = config.technology,
            "creating pipeline"
        );

        factory.create(Arc::new(config)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::offset::memory::MemoryOffsetStore;
    use crate::test_utils::coordination::InMemoryCoordinationService;
    use crate::test_utils::dao::InMemoryPendingEventsDao;
    use crate::test_utils::pipeline::fast_polling_config;
    use crate::test_utils::producer::{MemoryProducer, MemoryProducerFactory};

    struct SharedDaoFactory(InMemoryPendingEventsDao);

    #[async_trait]
    impl PendingEventsDaoFactory for SharedDaoFactory {
        async fn connect(
            &self,
            _config: &PipelineConfig,
        ) -> RelayResult<Arc<dyn PendingEventsDao>> {
            Ok(Arc::new(self.0.clone()))
        }
    }

    fn polling_registry() -> PipelineFactoryRegistry {
        let environment = PipelineEnvironment::new(
            Arc::new(MemoryOffsetStore::new()),
            Arc::new(MemoryProducerFactory::new(MemoryProducer::new())),
            Arc::new(InMemoryCoordinationService::new()),
        );

        PipelineFactoryRegistry::new().register(Arc::new(PollingPipelineFactory::new(
            environment,
            Arc::new(SharedDaoFactory(InMemoryPendingEventsDao::new())),
        )))
    }

    #[tokio::test]
    async fn resolves_factories_by_technology_tag() {
        let pipeline = polling_registry()
            .create_pipeline(fast_polling_config("orders", "orders-db"))
            .await
            .unwrap();

        assert_eq!(pipeline.config().name, "orders");
    }

    #[tokio::test]
    async fn unknown_technology_is_a_config_error() {
        let mut config = fast_polling_config("orders", "orders-db");
        config.technology = "mysql-binlog".to_string();

        let err = polling_registry()
            .create_pipeline(config)
            .await
            .err()
            .unwrap();
        assert_eq!(err.kind(), ErrorKind::ConfigError);
    }

    #[tokio::test]
    async fn invalid_configuration_is_rejected_before_factory_lookup() {
        let config = fast_polling_config("", "orders-db");

        let err = polling_registry()
            .create_pipeline(config)
            .await
            .err()
            .unwrap();
        assert_eq!(err.kind(), ErrorKind::ConfigError);
    }

    #[tokio::test]
    async fn polling_factory_requires_a_polling_section() {
        let mut config = fast_polling_config("orders", "orders-db");
        config.polling = None;

        let err = polling_registry()
            .create_pipeline(config)
            .await
            .err()
            .unwrap();
        assert_eq!(err.kind(), ErrorKind::ConfigError);
    }
}
