//! View storage for Eventum projections.
//!
//! # Overview
//!
//! This crate provides the production [`ViewRepository`](eventum_core::view::ViewRepository):
//! - **`PostgreSQL`**: one row per view, JSONB changeset, etag-guarded saves
//!
//! # CQRS Separation
//!
//! Views can live in a different database from the event store:
//!
//! ```text
//! Event Store DB (Write)  →  ProjectionEngine  →  View DB (Read)
//! ```
//!
//! # Running Projections
//!
//! ```ignore
//! use eventum_projections::PostgresViewRepository;
//!
//! let views = PostgresViewRepository::new_with_separate_db(
//!     "postgres://localhost/views",
//!     10,
//!     "views",
//! ).await?;
//! views.ensure_schema().await?;
//!
//! let engine = ProjectionEngine::builder(Arc::new(views), Arc::new(JsonSerialiser::new()))
//!     .register::<UserProfileProjection>()
//!     .build();
//!
//! for record in new_events {
//!     engine.project(&record).await?;
//! }
//! ```

pub mod postgres;

pub use postgres::{DEFAULT_TABLE, PostgresViewRepository};
