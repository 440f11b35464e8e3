use std::sync::Arc;
use std::time::Duration;

use relay_config::shared::PipelineConfig;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{Instrument, debug, error, info, warn};

use crate::bail;
use crate::concurrency::ready::ReadyTx;
use crate::concurrency::shutdown::ShutdownRx;
use crate::conversion::EventConverter;
use crate::error::{ErrorKind, RelayError, RelayResult};
use crate::leadership::{Lease, LeadershipCoordinator};
use crate::offset::OffsetStore;
use crate::publish::{Producer, PublishingFilter, PublishingStrategy};
use crate::relay_error;
use crate::source::ChangeSource;
use crate::types::{ChangeRecord, PublishPosition};
use crate::workers::base::{Worker, WorkerHandle};

/// Pause between failed cycles for sources without a polling interval.
const ERROR_RETRY_PAUSE: Duration = Duration::from_millis(500);

/// Observable states of a capture worker.
///
/// `LeadingIdle` is the sub-state entered while a polling source sleeps
/// between empty cycles; log-based sources block inside the batch pull
/// instead and stay in `LeadingCapturing`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    Stopped,
    Starting,
    LeadingCapturing,
    LeadingIdle,
    Stopping,
}

/// Handle for monitoring and awaiting the capture worker of one pipeline.
#[derive(Debug)]
pub struct CaptureWorkerHandle {
    handle: Option<JoinHandle<RelayResult<()>>>,
    state_rx: watch::Receiver<CaptureState>,
}

impl CaptureWorkerHandle {
    /// Returns a watch over the worker's state transitions.
    pub fn state_watch(&self) -> watch::Receiver<CaptureState> {
        self.state_rx.clone()
    }
}

impl WorkerHandle<CaptureState> for CaptureWorkerHandle {
    fn state(&self) -> CaptureState {
        *self.state_rx.borrow()
    }

    /// Waits for the capture worker to complete.
    ///
    /// Returns the worker's terminal error for fatal failures; a clean stop
    /// (explicit shutdown or leadership loss) resolves successfully.
    async fn wait(mut self) -> RelayResult<()> {
        let Some(handle) = self.handle.take() else {
            return Ok(());
        };

        handle.await.map_err(|err| {
            if err.is_cancelled() {
                relay_error!(
                    ErrorKind::CaptureWorkerCancelled,
                    "Capture worker was cancelled",
                    source: err
                )
            } else {
                relay_error!(
                    ErrorKind::CaptureWorkerPanic,
                    "Capture worker panicked",
                    source: err
                )
            }
        })??;

        Ok(())
    }
}

/// Background worker owning the capture loop of one pipeline.
///
/// The worker acquires leadership, opens the change source at the stored
/// watermark, and relays batches until it is shut down, loses the lease, or
/// exceeds the error threshold. All resources (cursor, producer, lease) are
/// released on every exit path.
pub struct CaptureWorker<S, O> {
    pipeline_name: String,
    config: Arc<PipelineConfig>,
    source: S,
    producer: Arc<dyn Producer>,
    offsets: O,
    converter: Arc<dyn EventConverter>,
    filter: Arc<dyn PublishingFilter>,
    strategy: Arc<dyn PublishingStrategy>,
    coordinator: LeadershipCoordinator,
    shutdown_rx: ShutdownRx,
    ready_tx: ReadyTx,
}

impl<S, O> CaptureWorker<S, O> {
    /// Creates a capture worker with the given collaborators.
    #[expect(clippy::too_many_arguments)]
    pub fn new(
        config: Arc<PipelineConfig>,
        source: S,
        producer: Arc<dyn Producer>,
        offsets: O,
        converter: Arc<dyn EventConverter>,
        filter: Arc<dyn PublishingFilter>,
        strategy: Arc<dyn PublishingStrategy>,
        coordinator: LeadershipCoordinator,
        shutdown_rx: ShutdownRx,
        ready_tx: ReadyTx,
    ) -> Self {
        Self {
            pipeline_name: config.name.clone(),
            config,
            source,
            producer,
            offsets,
            converter,
            filter,
            strategy,
            coordinator,
            shutdown_rx,
            ready_tx,
        }
    }
}

impl<S, O> Worker<CaptureWorkerHandle, CaptureState> for CaptureWorker<S, O>
where
    S: ChangeSource + Send + 'static,
    O: OffsetStore + Send + Sync + 'static,
{
    type Error = RelayError;

    async fn start(self) -> Result<CaptureWorkerHandle, Self::Error> {
        info!(pipeline = self.pipeline_name, "starting capture worker");

        let (state_tx, state_rx) = watch::channel(CaptureState::Stopped);

        let span = tracing::info_span!(
            "capture_worker",
            pipeline = self.pipeline_name,
            source_id = self.config.source_id
        );
        let task = self.run(state_tx).instrument(span.or_current());
        let handle = tokio::spawn(task);

        Ok(CaptureWorkerHandle {
            handle: Some(handle),
            state_rx,
        })
    }
}

impl<S, O> CaptureWorker<S, O>
where
    S: ChangeSource + Send + 'static,
    O: OffsetStore + Send + Sync + 'static,
{
    async fn run(self, state_tx: watch::Sender<CaptureState>) -> RelayResult<()> {
        let CaptureWorker {
            pipeline_name,
            config,
            source,
            producer,
            offsets,
            converter,
            filter,
            strategy,
            mut coordinator,
            mut shutdown_rx,
            ready_tx,
        } = self;

        let _ = state_tx.send(CaptureState::Starting);

        let lease = match coordinator.acquire(&mut shutdown_rx).await {
            Ok(Some(lease)) => lease,
            Ok(None) => {
                info!("shutdown requested before leadership could be acquired");
                let _ = state_tx.send(CaptureState::Stopped);
                return Ok(());
            }
            Err(err) => {
                let _ = state_tx.send(CaptureState::Stopped);
                return Err(err);
            }
        };

        let mut capture = CaptureLoop {
            pipeline_name,
            config,
            source,
            producer: producer.clone(),
            offsets,
            converter,
            filter,
            strategy,
            lease,
            shutdown_rx,
            ready_tx,
            state_tx: state_tx.clone(),
            consecutive_errors: 0,
        };

        let result = capture.capture().await;

        // Teardown happens on every exit path, the error path included.
        let _ = state_tx.send(CaptureState::Stopping);

        if let Err(err) = capture.source.close().await {
            warn!("failed to close change source: {err}");
        }
        if let Err(err) = producer.close().await {
            warn!("failed to close producer: {err}");
        }
        if let Err(err) = coordinator.release(&capture.lease).await {
            warn!("failed to release leadership lease: {err}");
        }

        let _ = state_tx.send(CaptureState::Stopped);

        match result {
            Ok(()) => {
                info!("capture worker stopped");
                Ok(())
            }
            Err(err) if err.kind() == ErrorKind::LeadershipLost => {
                info!("leadership lost, stopped capturing so another instance can take over");
                capture.ready_tx.resolve_err(err);
                Ok(())
            }
            Err(err) => {
                capture.ready_tx.resolve_err(err.clone());
                error!("capture worker failed: {err}");
                Err(err)
            }
        }
    }
}

/// The capture loop proper: pulls batches while leadership holds and relays
/// them through conversion, filtering, and publication before advancing the
/// watermark.
struct CaptureLoop<S, O> {
    pipeline_name: String,
    config: Arc<PipelineConfig>,
    source: S,
    producer: Arc<dyn Producer>,
    offsets: O,
    converter: Arc<dyn EventConverter>,
    filter: Arc<dyn PublishingFilter>,
    strategy: Arc<dyn PublishingStrategy>,
    lease: Lease,
    shutdown_rx: ShutdownRx,
    ready_tx: ReadyTx,
    state_tx: watch::Sender<CaptureState>,
    consecutive_errors: u32,
}

impl<S, O> CaptureLoop<S, O>
where
    S: ChangeSource + Send,
    O: OffsetStore + Send + Sync,
{
    async fn capture(&mut self) -> RelayResult<()> {
        let start = self.offsets.load(&self.pipeline_name).await?;
        if let Some(start) = start {
            info!(watermark = %start, "resuming capture from stored watermark");
        }
        self.source.open(start).await?;

        loop {
            if self.shutdown_rx.is_shutting_down() {
                return Ok(());
            }
            if self.lease.is_lost() {
                bail!(ErrorKind::LeadershipLost, "Leadership lease was lost");
            }

            let _ = self.state_tx.send(CaptureState::LeadingCapturing);

            let batch = tokio::select! {
                biased;
                _ = self.shutdown_rx.shutting_down() => return Ok(()),
                _ = self.lease.wait_lost() => bail!(
                    ErrorKind::LeadershipLost,
                    "Leadership lease was lost while waiting for changes"
                ),
                batch = self.source.next_batch() => batch,
            };

            let batch = match batch {
                Ok(batch) => batch,
                Err(err) => {
                    self.note_cycle_error(err)?;
                    self.recover_source().await?;
                    self.pause_after_error().await?;
                    continue;
                }
            };

            if batch.is_empty() {
                self.consecutive_errors = 0;
                self.ready_tx.resolve_ok();
                self.idle().await?;
                continue;
            }

            debug!(count = batch.len(), "found change records to publish");

            match self.relay_batch(&batch).await {
                Ok(()) => {
                    self.consecutive_errors = 0;
                    self.ready_tx.resolve_ok();
                }
                Err(err)
                    if matches!(
                        err.kind(),
                        ErrorKind::LeadershipLost | ErrorKind::ErrorThresholdExceeded
                    ) =>
                {
                    return Err(err);
                }
                Err(err) => {
                    self.note_cycle_error(err)?;
                    self.recover_source().await?;
                    self.pause_after_error().await?;
                }
            }
        }
    }

    /// Relays one batch end to end.
    ///
    /// The watermark (and, for polling sources, the published marks) only
    /// move after every record of the batch has been acknowledged by the
    /// broker; any failure leaves both untouched so the whole batch is
    /// retried on a later cycle.
    async fn relay_batch(&mut self, batch: &[ChangeRecord]) -> RelayResult<()> {
        for record in batch {
            if self.lease.is_lost() {
                bail!(
                    ErrorKind::LeadershipLost,
                    "Leadership lease was lost mid-batch; discarding remaining records"
                );
            }

            let event = match self.converter.convert(record) {
                Ok(event) => event,
                Err(err) => {
                    warn!(position = %record.position, "skipping record that failed conversion: {err}");
                    self.note_record_error()?;
                    continue;
                }
            };

            if !self.filter.accepts(&event) {
                debug!(event_id = event.id, "event rejected by publishing filter");
                continue;
            }

            for target in self.strategy.destinations_for(&event) {
                let envelope = self.strategy.envelope(&event);
                self.producer
                    .publish(&target.topic, &target.key, envelope)
                    .await?;
            }
        }

        // Fencing: an acknowledgment observed after the lease was lost must
        // not move the watermark. A newly elected leader may republish this
        // batch, which at-least-once delivery accepts.
        if self.lease.is_lost() {
            bail!(
                ErrorKind::LeadershipLost,
                "Leadership lease was lost after publish; discarding acknowledgment"
            );
        }

        self.source.commit(batch).await?;

        if let Some(last) = batch.last() {
            self.offsets
                .advance(&self.pipeline_name, PublishPosition(last.position))
                .await?;
        }

        Ok(())
    }

    /// Sleeps out the polling interval, promptly interrupted by shutdown or
    /// leadership loss.
    async fn idle(&mut self) -> RelayResult<()> {
        let Some(interval) = self.source.poll_interval() else {
            return Ok(());
        };

        let _ = self.state_tx.send(CaptureState::LeadingIdle);
        debug!(
            interval_ms = interval.as_millis() as u64,
            "no pending changes, sleeping"
        );

        tokio::select! {
            biased;
            _ = self.shutdown_rx.shutting_down() => Ok(()),
            _ = self.lease.wait_lost() => bail!(
                ErrorKind::LeadershipLost,
                "Leadership lease was lost while idle"
            ),
            _ = sleep(interval) => Ok(()),
        }
    }

    async fn pause_after_error(&mut self) -> RelayResult<()> {
        let pause = self.source.poll_interval().unwrap_or(ERROR_RETRY_PAUSE);

        tokio::select! {
            biased;
            _ = self.shutdown_rx.shutting_down() => Ok(()),
            _ = self.lease.wait_lost() => bail!(
                ErrorKind::LeadershipLost,
                "Leadership lease was lost while backing off after an error"
            ),
            _ = sleep(pause) => Ok(()),
        }
    }

    /// Puts the source back into a readable state after a failed cycle.
    ///
    /// Polling sources re-read unmarked rows on their next query, so there is
    /// nothing to do. A log cursor has already advanced past the
    /// unacknowledged entries, so it is rewound to the stored watermark.
    async fn recover_source(&mut self) -> RelayResult<()> {
        if self.source.poll_interval().is_some() {
            return Ok(());
        }

        let resume = self.offsets.load(&self.pipeline_name).await?;
        let _ = self.source.close().await;
        self.source.open(resume).await
    }

    fn note_record_error(&mut self) -> RelayResult<()> {
        self.bump_errors(None)
    }

    fn note_cycle_error(&mut self, err: RelayError) -> RelayResult<()> {
        warn!("capture cycle failed: {err}");
        self.bump_errors(Some(err))
    }

    fn bump_errors(&mut self, last: Option<RelayError>) -> RelayResult<()> {
        self.consecutive_errors = self.consecutive_errors.saturating_add(1);

        if self.consecutive_errors >= self.config.max_consecutive_errors {
            let mut err = relay_error!(
                ErrorKind::ErrorThresholdExceeded,
                "Too many consecutive capture errors",
                format!(
                    "{} consecutive errors in pipeline '{}'",
                    self.consecutive_errors, self.pipeline_name
                )
            );
            if let Some(last) = last {
                err = err.with_source(last);
            }
            return Err(err);
        }

        Ok(())
    }
}
