use std::time::Duration;

use async_trait::async_trait;

use crate::error::RelayResult;
use crate::types::{ChangeRecord, PublishPosition};

/// Ordered producer of change records since a resumable position.
///
/// The single capability the capture loop is parameterized over. A source is
/// opened at the stored watermark, repeatedly asked for the next batch, told
/// to commit batches whose publish has been acknowledged, and closed on every
/// stop path.
#[async_trait]
pub trait ChangeSource: Send {
    /// Opens a cursor over the source, resuming after `start` when given.
    async fn open(&mut self, start: Option<PublishPosition>) -> RelayResult<()>;

    /// Returns the next batch of change records, ordered by commit order.
    ///
    /// An empty batch is not an error: a polling source returns it when the
    /// table has no pending rows (the capture loop then sleeps for
    /// [`ChangeSource::poll_interval`]), and a log-based source blocks inside
    /// this call until new log entries arrive.
    async fn next_batch(&mut self) -> RelayResult<Vec<ChangeRecord>>;

    /// Confirms that every record of `batch` has been published and
    /// acknowledged.
    ///
    /// Polling sources mark exactly these rows as published; log-based
    /// sources have nothing to do because progress lives in the watermark.
    /// Must be idempotent.
    async fn commit(&mut self, batch: &[ChangeRecord]) -> RelayResult<()>;

    /// Closes the cursor and releases source resources.
    async fn close(&mut self) -> RelayResult<()>;

    /// Interval to sleep when a batch comes back empty.
    ///
    /// `None` for sources that block inside [`ChangeSource::next_batch`]
    /// instead of polling.
    fn poll_interval(&self) -> Option<Duration>;
}

#[async_trait]
impl<S: ChangeSource + ?Sized> ChangeSource for Box<S> {
    async fn open(&mut self, start: Option<PublishPosition>) -> RelayResult<()> {
        (**self).open(start).await
    }

    async fn next_batch(&mut self) -> RelayResult<Vec<ChangeRecord>> {
        (**self).next_batch().await
    }

    async fn commit(&mut self, batch: &[ChangeRecord]) -> RelayResult<()> {
        (**self).commit(batch).await
    }

    async fn close(&mut self) -> RelayResult<()> {
        (**self).close().await
    }

    fn poll_interval(&self) -> Option<Duration> {
        (**self).poll_interval()
    }
}
