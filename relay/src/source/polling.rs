use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::bail;
use crate::error::{ErrorKind, RelayResult};
use crate::source::base::ChangeSource;
use crate::types::{ChangeRecord, PublishPosition, SourcePosition};

/// Narrow data-access collaborator for a polled events table.
///
/// The concrete query implementation lives outside the engine; the engine
/// only relies on the two operations below.
#[async_trait]
pub trait PendingEventsDao: Send + Sync {
    /// Returns rows not yet marked published, ordered by primary key,
    /// limited to `limit` rows.
    async fn find_pending(&self, limit: usize) -> RelayResult<Vec<ChangeRecord>>;

    /// Marks exactly the given row ids as published.
    ///
    /// Marking by explicit id list, not by range, tolerates rows committed
    /// concurrently with the current batch. Must be idempotent.
    async fn mark_published(&self, ids: &[i64]) -> RelayResult<()>;
}

#[async_trait]
impl<T: PendingEventsDao + ?Sized> PendingEventsDao for Arc<T> {
    async fn find_pending(&self, limit: usize) -> RelayResult<Vec<ChangeRecord>> {
        (**self).find_pending(limit).await
    }

    async fn mark_published(&self, ids: &[i64]) -> RelayResult<()> {
        (**self).mark_published(ids).await
    }
}

/// Change source that repeatedly queries the source table for unpublished rows.
///
/// A non-empty result is returned immediately so a backlog drains without
/// sleeping; only an empty result makes the capture loop pause for
/// [`ChangeSource::poll_interval`]. The published flag in the source table is
/// the resume truth, so the start position handed to [`ChangeSource::open`]
/// is informational here.
#[derive(Debug)]
pub struct PollingChangeSource<D> {
    dao: D,
    poll_interval: Duration,
    batch_size: usize,
    opened: bool,
}

impl<D: PendingEventsDao> PollingChangeSource<D> {
    /// Creates a polling source over the given DAO.
    pub fn new(dao: D, poll_interval: Duration, batch_size: usize) -> Self {
        Self {
            dao,
            poll_interval,
            batch_size,
            opened: false,
        }
    }

    fn row_ids(batch: &[ChangeRecord]) -> RelayResult<Vec<i64>> {
        let mut ids = Vec::with_capacity(batch.len());
        for record in batch {
            match record.position {
                SourcePosition::RowId(id) => ids.push(id),
                other => bail!(
                    ErrorKind::InvalidState,
                    "Polling source saw a non-row position",
                    format!("table {}, position {other}", record.table)
                ),
            }
        }
        Ok(ids)
    }
}

#[async_trait]
impl<D: PendingEventsDao> ChangeSource for PollingChangeSource<D> {
    async fn open(&mut self, start: Option<PublishPosition>) -> RelayResult<()> {
        if let Some(start) = start {
            debug!(watermark = %start, "opening polling source; unpublished rows drive the resume");
        }

        self.opened = true;
        Ok(())
    }

    async fn next_batch(&mut self) -> RelayResult<Vec<ChangeRecord>> {
        if !self.opened {
            bail!(ErrorKind::InvalidState, "Polling source was not opened");
        }

        self.dao.find_pending(self.batch_size).await
    }

    async fn commit(&mut self, batch: &[ChangeRecord]) -> RelayResult<()> {
        if batch.is_empty() {
            return Ok(());
        }

        let ids = Self::row_ids(batch)?;
        debug!(count = ids.len(), "marking rows as published");

        self.dao.mark_published(&ids).await
    }

    async fn close(&mut self) -> RelayResult<()> {
        self.opened = false;
        Ok(())
    }

    fn poll_interval(&self) -> Option<Duration> {
        Some(self.poll_interval)
    }
}
