//! `PostgreSQL` event and snapshot stores for Eventum.
//!
//! This crate implements the `EventStore` and `SnapshotStore` traits from
//! `eventum-core` on top of sqlx:
//!
//! - Compare-and-append with a transaction per save
//! - JSONB payloads decoded through a [`TypeRegistry`](eventum_core::type_registry::TypeRegistry)
//! - Latest-snapshot-per-stream storage
//! - Connection pooling, shareable between both stores
//!
//! # Example
//!
//! ```ignore
//! use eventum_postgres::{PostgresEventStore, PostgresSnapshotStore};
//! use eventum_core::type_registry::TypeRegistry;
//!
//! async fn example() -> Result<(), Box<dyn std::error::Error>> {
//!     let types = TypeRegistry::new().register::<UserRegistered>();
//!     let events = PostgresEventStore::new("postgres://localhost/mydb", 10, Arc::new(types)).await?;
//!     events.ensure_schema().await?;
//!
//!     let snapshots = PostgresSnapshotStore::from_pool(events.pool().clone());
//!     snapshots.ensure_schema().await?;
//!
//!     let repository = EventStreamRepository::new(Arc::new(events))
//!         .with_snapshots(Arc::new(snapshots));
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod event_store;
mod snapshot_store;

pub use event_store::PostgresEventStore;
pub use snapshot_store::PostgresSnapshotStore;

use eventum_core::stream::Version;

/// Versions are stored as `BIGINT`.
fn version_to_db(version: Version) -> Result<i64, String> {
    i64::try_from(version.value()).map_err(|_| format!("Version {version} exceeds BIGINT range"))
}

fn version_from_db(value: i64) -> Result<Version, String> {
    u64::try_from(value)
        .map(Version::new)
        .map_err(|_| format!("Negative version {value} in storage"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn versions_map_to_bigint() {
        assert_eq!(version_to_db(Version::new(42)), Ok(42));
        assert!(version_to_db(Version::new(u64::MAX)).is_err());
        assert_eq!(version_from_db(7), Ok(Version::new(7)));
        assert!(version_from_db(-1).is_err());
    }
}
