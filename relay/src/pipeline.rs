use std::sync::Arc;

use relay_config::shared::PipelineConfig;
use tokio::sync::watch;
use tracing::info;

use crate::bail;
use crate::concurrency::ready::{ReadyRx, create_ready_signal};
use crate::error::RelayError;
use crate::concurrency::shutdown::{ShutdownRx, ShutdownTx, create_shutdown_channel};
use crate::conversion::EventConverter;
use crate::error::{ErrorKind, RelayResult};
use crate::leadership::{BackoffPolicy, CoordinationService, LeadershipCoordinator};
use crate::offset::OffsetStore;
use crate::publish::filter::PublishingFilter;
use crate::publish::producer::ProducerFactory;
use crate::publish::strategy::PublishingStrategy;
use crate::source::ChangeSource;
use crate::validation::StartupValidator;
use crate::workers::base::{Worker, WorkerHandle};
use crate::workers::capture::{CaptureState, CaptureWorker, CaptureWorkerHandle};

/// Collaborators a pipeline wires into its capture worker.
///
/// Bundled so factories can assemble the behavioral seams (conversion,
/// filtering, routing, broker access, coordination, validation) separately
/// from the source and offset store the pipeline is generic over.
pub struct PipelineDeps {
    pub producer_factory: Arc<dyn ProducerFactory>,
    pub converter: Arc<dyn EventConverter>,
    pub filter: Arc<dyn PublishingFilter>,
    pub strategy: Arc<dyn PublishingStrategy>,
    pub coordination: Arc<dyn CoordinationService>,
    pub validator: Arc<dyn StartupValidator>,
}

enum PipelineState<S, O> {
    NotStarted {
        source: S,
        offsets: O,
    },
    Started {
        worker: CaptureWorkerHandle,
        ready_rx: Option<ReadyRx>,
    },
}

/// A capture pipeline: one change source relayed to one broker under an
/// exclusive leadership lease.
///
/// The pipeline owns the lifecycle; the actual capturing happens in a
/// background [`CaptureWorker`] spawned by [`Pipeline::start`]. Shutdown is
/// signalled out-of-band through a broadcast channel, so it can be requested
/// from any task holding a clone of the transmitter.
pub struct Pipeline<S, O> {
    config: Arc<PipelineConfig>,
    deps: PipelineDeps,
    shutdown_tx: ShutdownTx,
    shutdown_rx: ShutdownRx,
    state: Option<PipelineState<S, O>>,
}

impl<S, O> Pipeline<S, O>
where
    S: ChangeSource + Send + 'static,
    O: OffsetStore + Send + Sync + 'static,
{
    /// Creates a pipeline in the not-started state.
    pub fn new(config: Arc<PipelineConfig>, source: S, offsets: O, deps: PipelineDeps) -> Self {
        let (shutdown_tx, shutdown_rx) = create_shutdown_channel();

        Self {
            config,
            deps,
            shutdown_tx,
            shutdown_rx,
            state: Some(PipelineState::NotStarted { source, offsets }),
        }
    }

    /// The configuration this pipeline runs under.
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Returns a clone of the shutdown transmitter.
    ///
    /// Useful to signal shutdown from signal handlers or supervisors while
    /// another task waits on the pipeline.
    pub fn shutdown_tx(&self) -> ShutdownTx {
        self.shutdown_tx.clone()
    }

    /// Starts the pipeline.
    ///
    /// Validates the environment, connects the broker producer, and spawns
    /// the capture worker. Errors with [`ErrorKind::InvalidState`] when called
    /// more than once. A validation or connection failure leaves the pipeline
    /// in the not-started state.
    pub async fn start(&mut self) -> RelayResult<()> {
        if !matches!(self.state, Some(PipelineState::NotStarted { .. })) {
            bail!(ErrorKind::InvalidState, "Pipeline has already been started");
        }

        info!(
            pipeline = self.config.name,
            source_id = self.config.source_id,
            technology = self.config.technology,
            "starting pipeline"
        );

        self.deps.validator.validate().await?;
        let producer = self.deps.producer_factory.create().await?;

        let Some(PipelineState::NotStarted { source, offsets }) = self.state.take() else {
            bail!(ErrorKind::InvalidState, "Pipeline has already been started");
        };

        let coordinator = LeadershipCoordinator::new(
            self.deps.coordination.clone(),
            self.config.source_id.as_str(),
            BackoffPolicy::from_config(&self.config.leadership),
        );

        let (ready_tx, ready_rx) = create_ready_signal();

        let worker = CaptureWorker::new(
            self.config.clone(),
            source,
            producer,
            offsets,
            self.deps.converter.clone(),
            self.deps.filter.clone(),
            self.deps.strategy.clone(),
            coordinator,
            self.shutdown_rx.clone(),
            ready_tx,
        )
        .start()
        .await?;

        self.state = Some(PipelineState::Started {
            worker,
            ready_rx: Some(ready_rx),
        });

        Ok(())
    }

    /// Waits until the pipeline has completed its first successful capture
    /// cycle.
    ///
    /// Resolves with the terminal error when the pipeline fails before ever
    /// becoming ready. Subsequent calls return immediately.
    pub async fn wait_until_ready(&mut self) -> RelayResult<()> {
        match &mut self.state {
            Some(PipelineState::Started { ready_rx, .. }) => match ready_rx.take() {
                Some(ready_rx) => ready_rx.ready().await,
                None => Ok(()),
            },
            _ => bail!(
                ErrorKind::InvalidState,
                "Pipeline must be started before waiting for readiness"
            ),
        }
    }

    /// Waits for the pipeline to finish.
    ///
    /// Returns the capture worker's terminal error for fatal failures; clean
    /// stops (shutdown, leadership loss) resolve successfully. Returns
    /// immediately when the pipeline was never started.
    pub async fn wait(self) -> RelayResult<()> {
        match self.state {
            Some(PipelineState::Started { worker, .. }) => worker.wait().await,
            _ => Ok(()),
        }
    }

    /// Requests a clean shutdown.
    ///
    /// Non-blocking and idempotent; a no-op when the pipeline was never
    /// started. The worker observes the signal at its next suspension point.
    pub fn shutdown(&self) {
        info!(pipeline = self.config.name, "shutting down pipeline");

        // The pipeline holds a receiver for its whole lifetime, so the send
        // cannot fail.
        let _ = self.shutdown_tx.shutdown();
    }

    /// Requests a clean shutdown and waits for the pipeline to finish.
    pub async fn shutdown_and_wait(self) -> RelayResult<()> {
        self.shutdown();
        self.wait().await
    }

    /// Returns a watch over the capture worker's state, when started.
    pub fn state_watch(&self) -> Option<watch::Receiver<CaptureState>> {
        match &self.state {
            Some(PipelineState::Started { worker, .. }) => Some(worker.state_watch()),
            _ => None,
        }
    }
}

/// Waits for several pipelines concurrently.
///
/// All pipelines are driven to completion even when some fail; the failures
/// are aggregated into one error.
pub async fn wait_all<S, O>(pipelines: Vec<Pipeline<S, O>>) -> RelayResult<()>
where
    S: ChangeSource + Send + 'static,
    O: OffsetStore + Send + Sync + 'static,
{
    let results = futures::future::join_all(pipelines.into_iter().map(Pipeline::wait)).await;

    let errors: Vec<RelayError> = results.into_iter().filter_map(Result::err).collect();
    if errors.is_empty() {
        Ok(())
    } else {
        Err(RelayError::from(errors))
    }
}
