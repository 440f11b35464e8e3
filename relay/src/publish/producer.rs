use std::sync::Arc;

use async_trait::async_trait;

use crate::error::RelayResult;

/// Producer handle for the destination message broker.
///
/// The engine treats a publish as a synchronous, at-least-once call: the
/// future resolves only once the broker has acknowledged the message, and no
/// watermark is advanced before every record of the current batch has been
/// acknowledged. Ordered delivery per key is assumed from the broker.
#[async_trait]
pub trait Producer: Send + Sync {
    /// Publishes one envelope and awaits the broker acknowledgment.
    async fn publish(
        &self,
        topic: &str,
        key: &str,
        envelope: serde_json::Value,
    ) -> RelayResult<()>;

    /// Closes the producer, flushing any internal buffers.
    async fn close(&self) -> RelayResult<()>;
}

#[async_trait]
impl<T: Producer + ?Sized> Producer for Arc<T> {
    async fn publish(&self, topic: &str, key: &str, envelope: serde_json::Value) -> RelayResult<()> {
        (**self).publish(topic, key, envelope).await
    }

    async fn close(&self) -> RelayResult<()> {
        (**self).close().await
    }
}

/// Creates producers connected to a broker endpoint.
///
/// One producer is created per pipeline start and closed on every stop path,
/// so reconnection after a restart goes through the factory again.
#[async_trait]
pub trait ProducerFactory: Send + Sync {
    /// Creates and connects a new producer.
    async fn create(&self) -> RelayResult<Arc<dyn Producer>>;
}
