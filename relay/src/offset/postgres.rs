use std::time::Duration;

use async_trait::async_trait;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use sqlx::Row;
use tokio::sync::OnceCell;
use tracing::debug;

use crate::error::{ErrorKind, RelayResult};
use crate::offset::base::OffsetStore;
use crate::relay_error;
use crate::types::PublishPosition;

/// Maximum number of connections in the pool.
///
/// The watermark is touched once per acknowledged batch, so two connections
/// are plenty.
const MAX_POOL_CONNECTIONS: u32 = 2;

/// Duration after which idle connections are closed.
const IDLE_TIMEOUT: Duration = Duration::from_secs(30);

/// Postgres-backed offset store.
///
/// Persists one watermark row per pipeline in the `relay_publish_positions`
/// table, created on first use. The position is stored as JSON so both row-id
/// and log-offset positions share one column.
#[derive(Debug, Clone)]
pub struct PostgresOffsetStore {
    pool: PgPool,
    schema_ready: std::sync::Arc<OnceCell<()>>,
}

impl PostgresOffsetStore {
    /// Creates a store over an existing connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            schema_ready: std::sync::Arc::new(OnceCell::new()),
        }
    }

    /// Creates a store with a lazily connected pool.
    ///
    /// Returns immediately without establishing any connections; connections
    /// are created on demand and closed again after [`IDLE_TIMEOUT`].
    pub fn connect_lazy(url: &str) -> RelayResult<Self> {
        let pool = PgPoolOptions::new()
            .min_connections(0)
            .max_connections(MAX_POOL_CONNECTIONS)
            .idle_timeout(Some(IDLE_TIMEOUT))
            .connect_lazy(url)
            .map_err(|err| {
                relay_error!(
                    ErrorKind::OffsetStoreError,
                    "Invalid offset store connection url",
                    source: err
                )
            })?;

        Ok(Self::new(pool))
    }

    async fn ensure_schema(&self) -> RelayResult<()> {
        self.schema_ready
            .get_or_try_init(|| async {
                sqlx::query(
                    r#"
                    create table if not exists relay_publish_positions (
                        pipeline_name text primary key,
                        position jsonb not null,
                        updated_at timestamptz not null default now()
                    )
                    "#,
                )
                .execute(&self.pool)
                .await
                .map_err(|err| {
                    relay_error!(
                        ErrorKind::OffsetStoreError,
                        "Failed to prepare offset store schema",
                        source: err
                    )
                })?;

                Ok::<_, crate::error::RelayError>(())
            })
            .await?;

        Ok(())
    }
}

#[async_trait]
impl OffsetStore for PostgresOffsetStore {
    async fn load(&self, pipeline_name: &str) -> RelayResult<Option<PublishPosition>> {
        self.ensure_schema().await?;

        let row =
            sqlx::query("select position from relay_publish_positions where pipeline_name = $1")
                .bind(pipeline_name)
                .fetch_optional(&self.pool)
                .await
                .map_err(|err| {
                    relay_error!(
                        ErrorKind::OffsetStoreError,
                        "Failed to load publish position",
                        source: err
                    )
                })?;

        let Some(row) = row else {
            return Ok(None);
        };

        let value: serde_json::Value = row.get("position");
        let position = serde_json::from_value(value).map_err(|err| {
            relay_error!(
                ErrorKind::OffsetStoreError,
                "Stored publish position is malformed",
                source: err
            )
        })?;

        Ok(Some(position))
    }

    async fn advance(&self, pipeline_name: &str, position: PublishPosition) -> RelayResult<()> {
        self.ensure_schema().await?;

        // Only the single leader for a pipeline writes its watermark, so a
        // read-then-upsert is enough to keep the advance monotonic.
        if let Some(current) = self.load(pipeline_name).await?
            && !position.position().is_after(&current.position())
        {
            debug!(
                pipeline_name,
                current = %current,
                requested = %position,
                "ignoring non-monotonic watermark advance"
            );
            return Ok(());
        }

        let value = serde_json::to_value(position).map_err(|err| {
            relay_error!(
                ErrorKind::OffsetStoreError,
                "Failed to serialize publish position",
                source: err
            )
        })?;

        sqlx::query(
            r#"
            insert into relay_publish_positions (pipeline_name, position, updated_at)
            values ($1, $2, now())
            on conflict (pipeline_name)
            do update set position = excluded.position, updated_at = now()
            "#,
        )
        .bind(pipeline_name)
        .bind(value)
        .execute(&self.pool)
        .await
        .map_err(|err| {
            relay_error!(
                ErrorKind::OffsetStoreError,
                "Failed to advance publish position",
                source: err
            )
        })?;

        Ok(())
    }
}
