//! `PostgreSQL` implementation of [`SnapshotStore`].

use crate::{version_from_db, version_to_db};
use eventum_core::snapshot::{SnapshotError, SnapshotMemento, SnapshotStore, StoredSnapshot};
use eventum_core::stream::{StreamId, Version};
use sqlx::postgres::PgPool;
use std::future::Future;
use std::pin::Pin;

const CREATE_SNAPSHOTS_TABLE: &str = r"
    CREATE TABLE IF NOT EXISTS snapshots (
        stream_id TEXT PRIMARY KEY,
        version BIGINT NOT NULL,
        memento JSONB NOT NULL,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )
";

/// PostgreSQL-backed snapshot store.
///
/// Keeps one row per stream; saving a snapshot replaces the previous one.
/// The memento is stored as a JSONB object of field name to value.
#[derive(Clone, Debug)]
pub struct PostgresSnapshotStore {
    pool: PgPool,
}

impl PostgresSnapshotStore {
    /// Use an existing connection pool (typically the event store's).
    #[must_use]
    pub const fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the `snapshots` table if it doesn't exist.
    ///
    /// # Errors
    ///
    /// Returns [`SnapshotError::Storage`] if the statement fails.
    pub async fn ensure_schema(&self) -> Result<(), SnapshotError> {
        sqlx::query(CREATE_SNAPSHOTS_TABLE)
            .execute(&self.pool)
            .await
            .map_err(|e| SnapshotError::Storage(format!("Failed to create schema: {e}")))?;
        Ok(())
    }
}

impl SnapshotStore for PostgresSnapshotStore {
    fn save_snapshot(
        &self,
        stream_id: StreamId,
        version: Version,
        memento: SnapshotMemento,
    ) -> Pin<Box<dyn Future<Output = Result<(), SnapshotError>> + Send + '_>> {
        Box::pin(async move {
            stream_id.validate()?;
            let version = version_to_db(version).map_err(SnapshotError::Storage)?;
            let memento = serde_json::to_value(&memento).map_err(|e| SnapshotError::Serialisation {
                field: "memento".to_string(),
                reason: e.to_string(),
            })?;

            sqlx::query(
                "INSERT INTO snapshots (stream_id, version, memento, created_at)
                 VALUES ($1, $2, $3, now())
                 ON CONFLICT (stream_id) DO UPDATE
                 SET version = EXCLUDED.version,
                     memento = EXCLUDED.memento,
                     created_at = EXCLUDED.created_at",
            )
            .bind(stream_id.as_str())
            .bind(version)
            .bind(memento)
            .execute(&self.pool)
            .await
            .map_err(|e| SnapshotError::Storage(format!("Failed to save snapshot: {e}")))?;

            tracing::trace!(stream_id = %stream_id, version, "Saved snapshot");
            Ok(())
        })
    }

    fn load_snapshot(
        &self,
        stream_id: StreamId,
    ) -> Pin<Box<dyn Future<Output = Result<Option<StoredSnapshot>, SnapshotError>> + Send + '_>>
    {
        Box::pin(async move {
            stream_id.validate()?;
            let row: Option<(i64, serde_json::Value)> =
                sqlx::query_as("SELECT version, memento FROM snapshots WHERE stream_id = $1")
                    .bind(stream_id.as_str())
                    .fetch_optional(&self.pool)
                    .await
                    .map_err(|e| SnapshotError::Storage(format!("Failed to load snapshot: {e}")))?;

            let Some((version, memento)) = row else {
                return Ok(None);
            };
            let version = version_from_db(version).map_err(SnapshotError::Storage)?;
            let memento: SnapshotMemento =
                serde_json::from_value(memento).map_err(|e| SnapshotError::Serialisation {
                    field: "memento".to_string(),
                    reason: e.to_string(),
                })?;
            Ok(Some((version, memento)))
        })
    }
}
