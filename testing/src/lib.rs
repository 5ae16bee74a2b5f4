//! # Eventum Testing
//!
//! Testing utilities and helpers for Eventum.
//!
//! This crate provides:
//! - In-memory implementations of the storage and telemetry traits
//! - A Given-When-Then harness for aggregates ([`StreamTest`])
//! - A projection harness running the real engine ([`ProjectionTestHarness`])
//! - Property-based testing strategies
//!
//! ## Example
//!
//! ```ignore
//! use eventum_testing::{InMemoryEventStore, init_test_tracing};
//! use eventum_core::repository::EventStreamRepository;
//!
//! #[tokio::test]
//! async fn test_user_flow() {
//!     init_test_tracing();
//!     let repository = EventStreamRepository::new(Arc::new(InMemoryEventStore::new()));
//!
//!     let mut stream = repository.load_stream::<User>("user-1").await.unwrap();
//!     stream.apply_new(UserRegistered { name: "Ada".into(), age: 30 }).unwrap();
//!     assert!(repository.save_stream(&stream, stream.committed_version()).await.unwrap());
//! }
//! ```

use chrono::{DateTime, Utc};

pub mod mocks;
mod projection_mocks;

/// Property-based testing utilities using proptest.
pub mod properties {
    use eventum_core::stream::{StreamId, Version};
    use proptest::prelude::*;

    /// Non-empty stream ids like `"order-42"`.
    pub fn arb_stream_id() -> impl Strategy<Value = StreamId> {
        "[a-z]{1,8}-[0-9]{1,4}".prop_map(StreamId::new)
    }

    /// Strictly ascending versions starting above [`Version::INITIAL`],
    /// possibly with gaps.
    pub fn arb_ascending_versions(max_len: usize) -> impl Strategy<Value = Vec<Version>> {
        prop::collection::vec(1_u64..4, 0..=max_len).prop_map(|steps| {
            steps
                .into_iter()
                .scan(0_u64, |version, step| {
                    *version += step;
                    Some(Version::new(*version))
                })
                .collect()
        })
    }
}

/// Fixed instant for deterministic event timestamps (2025-01-01 00:00:00 UTC)
///
/// # Panics
///
/// This function will panic if the hardcoded timestamp fails to parse,
/// which should never happen in practice.
#[must_use]
#[allow(clippy::expect_used)]
pub fn test_time() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
        .expect("hardcoded timestamp should always parse")
        .with_timezone(&Utc)
}

/// Install a `tracing` subscriber writing to the test output.
///
/// Honours `RUST_LOG`; safe to call from every test.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

// Re-export commonly used items
pub use mocks::{InMemoryEventStore, InMemorySnapshotStore, RecordingTelemetry, TelemetryItem};
pub use projection_mocks::{InMemoryViewRepository, ProjectionTestHarness};
pub use stream_test::{StreamTest, assertions};

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_time_is_fixed() {
        assert_eq!(test_time(), test_time());
        assert_eq!(test_time().to_rfc3339(), "2025-01-01T00:00:00+00:00");
    }

    proptest! {
        #[test]
        fn ascending_versions_are_strictly_increasing(
            versions in properties::arb_ascending_versions(20)
        ) {
            prop_assert!(versions.windows(2).all(|w| w[0] < w[1]));
            prop_assert!(versions.iter().all(|v| !v.is_initial()));
        }

        #[test]
        fn stream_ids_are_valid(id in properties::arb_stream_id()) {
            prop_assert!(id.validate().is_ok());
        }
    }
}
