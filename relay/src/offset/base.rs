use std::sync::Arc;

use async_trait::async_trait;

use crate::error::RelayResult;
use crate::types::PublishPosition;

/// Durable store for the publish watermark of each pipeline.
///
/// The watermark records that everything up to and including the stored
/// position has been published and acknowledged by the broker. It is read
/// once when a pipeline resumes and advanced only after a whole batch has
/// been acknowledged, never on failure.
///
/// Implementations must advance monotonically: an [`OffsetStore::advance`]
/// call with a position at or before the stored one leaves the store
/// unchanged. This keeps a crashed-and-restarted pipeline from moving its
/// watermark backwards.
#[async_trait]
pub trait OffsetStore: Send + Sync {
    /// Loads the stored watermark for the named pipeline, if any.
    async fn load(&self, pipeline_name: &str) -> RelayResult<Option<PublishPosition>>;

    /// Advances the watermark for the named pipeline.
    ///
    /// A no-op when `position` is not strictly after the stored watermark.
    async fn advance(&self, pipeline_name: &str, position: PublishPosition) -> RelayResult<()>;
}

#[async_trait]
impl<T: OffsetStore + ?Sized> OffsetStore for Arc<T> {
    async fn load(&self, pipeline_name: &str) -> RelayResult<Option<PublishPosition>> {
        (**self).load(pipeline_name).await
    }

    async fn advance(&self, pipeline_name: &str, position: PublishPosition) -> RelayResult<()> {
        (**self).advance(pipeline_name, position).await
    }
}
