//! `PostgreSQL` implementation of [`ViewRepository`].
//!
//! # Overview
//!
//! Views are rows in one table, keyed by view name:
//!
//! ```sql
//! CREATE TABLE views (
//!     name TEXT PRIMARY KEY,
//!     changeset JSONB NOT NULL,
//!     view TEXT NOT NULL,
//!     etag TEXT NOT NULL,
//!     updated_at TIMESTAMPTZ NOT NULL
//! );
//! ```
//!
//! Every save writes a fresh etag. A save is conditional on the etag the view
//! was loaded with, so two projection cycles racing on the same view cannot
//! both win:
//!
//! - no etag (a view never stored): `INSERT .. ON CONFLICT DO NOTHING`
//! - an etag: `UPDATE .. WHERE etag = $old`
//!
//! Zero rows affected means another writer got there first.
//!
//! # Separate Database (CQRS)
//!
//! ```ignore
//! // Event store on one database
//! let event_store = PostgresEventStore::new("postgres://localhost/events", 10, types).await?;
//!
//! // Views on another
//! let views = PostgresViewRepository::new_with_separate_db(
//!     "postgres://localhost/views",
//!     10,
//!     "views",
//! ).await?;
//! views.ensure_schema().await?;
//! ```

use eventum_core::stream::ValidationError;
use eventum_core::view::{ViewRecord, ViewRepository, ViewRepositoryError};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::types::Json;
use std::future::Future;
use std::pin::Pin;
use uuid::Uuid;

/// Default table for views.
pub const DEFAULT_TABLE: &str = "views";

/// PostgreSQL-backed view repository with etag concurrency.
#[derive(Clone, Debug)]
pub struct PostgresViewRepository {
    pool: PgPool,
    table_name: String,
}

impl PostgresViewRepository {
    /// Create a repository storing views in `table_name`, using an existing
    /// connection pool.
    ///
    /// # Errors
    ///
    /// Returns [`ViewRepositoryError::Storage`] if `table_name` is not a plain
    /// SQL identifier.
    pub fn new(pool: PgPool, table_name: impl Into<String>) -> Result<Self, ViewRepositoryError> {
        let table_name = table_name.into();
        if !is_identifier(&table_name) {
            return Err(ViewRepositoryError::Storage(format!(
                "Invalid view table name '{table_name}'"
            )));
        }
        Ok(Self { pool, table_name })
    }

    /// Create a repository with its own pool of at most `max_connections`
    /// connections to `database_url`.
    ///
    /// # Errors
    ///
    /// Returns [`ViewRepositoryError::Storage`] if the connection fails or
    /// `table_name` is invalid.
    pub async fn new_with_separate_db(
        database_url: &str,
        max_connections: u32,
        table_name: impl Into<String>,
    ) -> Result<Self, ViewRepositoryError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| ViewRepositoryError::Storage(format!("Failed to connect: {e}")))?;
        Self::new(pool, table_name)
    }

    /// Create the view table if it doesn't exist.
    ///
    /// # Errors
    ///
    /// Returns [`ViewRepositoryError::Storage`] if the statement fails.
    pub async fn ensure_schema(&self) -> Result<(), ViewRepositoryError> {
        let statement = format!(
            "CREATE TABLE IF NOT EXISTS {} (
                name TEXT PRIMARY KEY,
                changeset JSONB NOT NULL,
                view TEXT NOT NULL,
                etag TEXT NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )",
            self.table_name
        );
        sqlx::query(&statement)
            .execute(&self.pool)
            .await
            .map_err(|e| ViewRepositoryError::Storage(format!("Failed to create schema: {e}")))?;
        Ok(())
    }

    /// Get the underlying connection pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Get the table name for this repository.
    #[must_use]
    pub fn table_name(&self) -> &str {
        &self.table_name
    }
}

impl ViewRepository for PostgresViewRepository {
    fn load_record(
        &self,
        name: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<ViewRecord>, ViewRepositoryError>> + Send + '_>>
    {
        let name = name.to_string();
        Box::pin(async move {
            ValidationError::require("view name", &name)?;
            let query = format!(
                "SELECT changeset, view, etag FROM {} WHERE name = $1",
                self.table_name
            );

            let row: Option<(Json<Vec<String>>, String, String)> = sqlx::query_as(&query)
                .bind(&name)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| ViewRepositoryError::Storage(format!("Failed to load view: {e}")))?;

            Ok(row.map(|(Json(changeset), view, etag)| ViewRecord {
                name,
                changeset,
                view,
                etag: Some(etag),
            }))
        })
    }

    fn save_record(
        &self,
        name: &str,
        record: ViewRecord,
    ) -> Pin<Box<dyn Future<Output = Result<bool, ViewRepositoryError>> + Send + '_>> {
        let name = name.to_string();
        Box::pin(async move {
            ValidationError::require("view name", &name)?;
            let etag = Uuid::new_v4().to_string();

            let result = match &record.etag {
                None => {
                    let query = format!(
                        "INSERT INTO {} (name, changeset, view, etag, updated_at)
                         VALUES ($1, $2, $3, $4, now())
                         ON CONFLICT (name) DO NOTHING",
                        self.table_name
                    );
                    sqlx::query(&query)
                        .bind(&name)
                        .bind(Json(&record.changeset))
                        .bind(&record.view)
                        .bind(&etag)
                        .execute(&self.pool)
                        .await
                }
                Some(expected) => {
                    let query = format!(
                        "UPDATE {}
                         SET changeset = $2, view = $3, etag = $4, updated_at = now()
                         WHERE name = $1 AND etag = $5",
                        self.table_name
                    );
                    sqlx::query(&query)
                        .bind(&name)
                        .bind(Json(&record.changeset))
                        .bind(&record.view)
                        .bind(&etag)
                        .bind(expected)
                        .execute(&self.pool)
                        .await
                }
            }
            .map_err(|e| ViewRepositoryError::Storage(format!("Failed to save view: {e}")))?;

            let saved = result.rows_affected() == 1;
            if !saved {
                tracing::debug!(view = %name, "View save rejected, etag changed");
            }
            Ok(saved)
        })
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|first| first.is_ascii_alphabetic() || first == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_names_must_be_identifiers() {
        assert!(is_identifier("views"));
        assert!(is_identifier("_user_views2"));
        assert!(!is_identifier(""));
        assert!(!is_identifier("2views"));
        assert!(!is_identifier("views; DROP TABLE events"));
    }
}
