//! `PostgreSQL` implementation of [`EventStore`].

use crate::{version_from_db, version_to_db};
use chrono::{DateTime, Utc};
use eventum_core::event::{EventRecord, StoredEvent};
use eventum_core::event_store::{EventStore, EventStoreError};
use eventum_core::stream::{StreamId, Version};
use eventum_core::type_registry::TypeResolver;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use uuid::Uuid;

const CREATE_EVENTS_TABLE: &str = r"
    CREATE TABLE IF NOT EXISTS events (
        stream_id TEXT NOT NULL,
        version BIGINT NOT NULL,
        event_id UUID NOT NULL UNIQUE,
        event_type TEXT NOT NULL,
        event_time TIMESTAMPTZ NOT NULL,
        data JSONB NOT NULL,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        PRIMARY KEY (stream_id, version)
    )
";

const CREATE_EVENT_TYPE_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_events_type ON events(event_type)";

type EventRow = (Uuid, String, DateTime<Utc>, i64, serde_json::Value);

/// PostgreSQL-backed event store.
///
/// Events live in one `events` table keyed by `(stream_id, version)`. The
/// primary key makes two writers racing for the same version impossible: the
/// loser's insert hits a unique violation and its save reports `false`.
///
/// Payloads are stored as JSONB and decoded through the [`TypeResolver`]
/// given at construction. Every event type a stream contains must be
/// registered there.
#[derive(Clone)]
pub struct PostgresEventStore {
    pool: PgPool,
    types: Arc<dyn TypeResolver>,
}

impl PostgresEventStore {
    /// Connect to `database_url` with a pool of at most `max_connections`.
    ///
    /// # Errors
    ///
    /// Returns [`EventStoreError::Storage`] if the connection fails.
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        types: Arc<dyn TypeResolver>,
    ) -> Result<Self, EventStoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| EventStoreError::Storage(format!("Failed to connect: {e}")))?;
        Ok(Self::from_pool(pool, types))
    }

    /// Use an existing connection pool.
    #[must_use]
    pub fn from_pool(pool: PgPool, types: Arc<dyn TypeResolver>) -> Self {
        Self { pool, types }
    }

    /// Get the underlying connection pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create the `events` table and its indexes if they don't exist.
    ///
    /// # Errors
    ///
    /// Returns [`EventStoreError::Storage`] if a statement fails.
    pub async fn ensure_schema(&self) -> Result<(), EventStoreError> {
        for statement in [CREATE_EVENTS_TABLE, CREATE_EVENT_TYPE_INDEX] {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(|e| EventStoreError::Storage(format!("Failed to create schema: {e}")))?;
        }
        Ok(())
    }

    fn decode_row(&self, stream_id: &StreamId, row: EventRow) -> Result<EventRecord, EventStoreError> {
        let (id, event_type, event_time, version, data) = row;
        let stored = StoredEvent {
            stream_id: stream_id.clone(),
            id,
            event_type,
            event_time,
            version: version_from_db(version).map_err(EventStoreError::Serialisation)?,
            data,
        };
        Ok(self.types.decode(stored)?)
    }
}

impl fmt::Debug for PostgresEventStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PostgresEventStore").finish_non_exhaustive()
    }
}

impl EventStore for PostgresEventStore {
    fn load_events(
        &self,
        stream_id: StreamId,
        after: Version,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<EventRecord>, EventStoreError>> + Send + '_>> {
        Box::pin(async move {
            stream_id.validate()?;
            let after = version_to_db(after).map_err(EventStoreError::Storage)?;

            let rows: Vec<EventRow> = sqlx::query_as(
                "SELECT event_id, event_type, event_time, version, data
                 FROM events
                 WHERE stream_id = $1 AND version > $2
                 ORDER BY version ASC",
            )
            .bind(stream_id.as_str())
            .bind(after)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| EventStoreError::Storage(format!("Failed to load events: {e}")))?;

            tracing::trace!(stream_id = %stream_id, after, count = rows.len(), "Loaded events");
            rows.into_iter()
                .map(|row| self.decode_row(&stream_id, row))
                .collect()
        })
    }

    fn append_events(
        &self,
        stream_id: StreamId,
        expected_version: Version,
        events: Vec<EventRecord>,
    ) -> Pin<Box<dyn Future<Output = Result<bool, EventStoreError>> + Send + '_>> {
        Box::pin(async move {
            stream_id.validate()?;

            // Encode first so an unregistered type fails before touching the database
            let mut version = expected_version;
            let mut stored = Vec::with_capacity(events.len());
            for event in events {
                version = version.next();
                stored.push(self.types.encode(&event.with_version(version))?);
            }

            let mut tx = self
                .pool
                .begin()
                .await
                .map_err(|e| EventStoreError::Storage(format!("Failed to begin transaction: {e}")))?;

            let current: Option<i64> =
                sqlx::query_scalar("SELECT MAX(version) FROM events WHERE stream_id = $1")
                    .bind(stream_id.as_str())
                    .fetch_one(&mut *tx)
                    .await
                    .map_err(|e| {
                        EventStoreError::Storage(format!("Failed to read stream version: {e}"))
                    })?;
            let current = current
                .map_or(Ok(Version::INITIAL), version_from_db)
                .map_err(EventStoreError::Serialisation)?;

            if current != expected_version {
                tracing::debug!(
                    stream_id = %stream_id,
                    expected = %expected_version,
                    actual = %current,
                    "Append rejected, stream has moved on"
                );
                return Ok(false);
            }

            for event in &stored {
                let result = sqlx::query(
                    "INSERT INTO events (stream_id, version, event_id, event_type, event_time, data)
                     VALUES ($1, $2, $3, $4, $5, $6)",
                )
                .bind(stream_id.as_str())
                .bind(version_to_db(event.version).map_err(EventStoreError::Storage)?)
                .bind(event.id)
                .bind(&event.event_type)
                .bind(event.event_time)
                .bind(&event.data)
                .execute(&mut *tx)
                .await;

                match result {
                    Ok(_) => {}
                    // Another writer committed the same version after our check
                    Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                        tracing::debug!(stream_id = %stream_id, "Append lost a race");
                        return Ok(false);
                    }
                    Err(e) => {
                        return Err(EventStoreError::Storage(format!(
                            "Failed to insert event: {e}"
                        )));
                    }
                }
            }

            match tx.commit().await {
                Ok(()) => Ok(true),
                Err(sqlx::Error::Database(db)) if db.is_unique_violation() => Ok(false),
                Err(e) => Err(EventStoreError::Storage(format!(
                    "Failed to commit events: {e}"
                ))),
            }
        })
    }
}
