use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::RelayResult;
use crate::offset::base::OffsetStore;
use crate::types::PublishPosition;

/// In-memory offset store for testing and development purposes.
///
/// Watermarks are held in memory and lost when the process terminates, so
/// this store gives crash-restart safety only within one process lifetime.
/// Production deployments use the Postgres-backed store.
#[derive(Debug, Clone, Default)]
pub struct MemoryOffsetStore {
    positions: Arc<Mutex<HashMap<String, PublishPosition>>>,
}

impl MemoryOffsetStore {
    /// Creates an empty in-memory offset store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OffsetStore for MemoryOffsetStore {
    async fn load(&self, pipeline_name: &str) -> RelayResult<Option<PublishPosition>> {
        let positions = self.positions.lock().await;
        Ok(positions.get(pipeline_name).copied())
    }

    async fn advance(&self, pipeline_name: &str, position: PublishPosition) -> RelayResult<()> {
        let mut positions = self.positions.lock().await;

        match positions.get(pipeline_name) {
            Some(current) if !position.position().is_after(&current.position()) => {
                debug!(
                    pipeline_name,
                    current = %current,
                    requested = %position,
                    "ignoring non-monotonic watermark advance"
                );
            }
            _ => {
                positions.insert(pipeline_name.to_string(), position);
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SourcePosition;

    #[tokio::test]
    async fn advance_is_monotonic() {
        let store = MemoryOffsetStore::new();

        store
            .advance("orders", PublishPosition(SourcePosition::RowId(12)))
            .await
            .unwrap();
        store
            .advance("orders", PublishPosition(SourcePosition::RowId(10)))
            .await
            .unwrap();

        let loaded = store.load("orders").await.unwrap();
        assert_eq!(loaded, Some(PublishPosition(SourcePosition::RowId(12))));
    }

    #[tokio::test]
    async fn pipelines_are_isolated() {
        let store = MemoryOffsetStore::new();

        store
            .advance("orders", PublishPosition(SourcePosition::RowId(5)))
            .await
            .unwrap();

        assert_eq!(store.load("customers").await.unwrap(), None);
    }
}
