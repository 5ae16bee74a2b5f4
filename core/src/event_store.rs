//! Event store contract.
//!
//! An event store keeps each stream's events in version order and appends to
//! a stream only if the caller's expected version matches the stored one
//! (compare-and-append). A mismatch is a normal outcome, reported as
//! `Ok(false)`, never as an error.
//!
//! # Implementations
//!
//! - `PostgresEventStore` (in `eventum-postgres`): production implementation
//! - `InMemoryEventStore` (in `eventum-testing`): fast, deterministic testing

use crate::aggregate::EventStreamHandlerError;
use crate::event::EventRecord;
use crate::snapshot::SnapshotError;
use crate::stream::{StreamId, ValidationError, Version};
use crate::type_registry::TypeResolutionError;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors raised while loading or saving streams.
#[derive(Error, Debug)]
pub enum EventStoreError {
    /// An argument was invalid (e.g. an empty stream id).
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// A stored event's type tag could not be resolved.
    #[error(transparent)]
    TypeResolution(#[from] TypeResolutionError),

    /// A loaded event could not be applied to the stream.
    #[error(transparent)]
    Handler(#[from] EventStreamHandlerError),

    /// A snapshot could not be captured, restored or stored.
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),

    /// Backend failure.
    #[error("Event storage error: {0}")]
    Storage(String),

    /// Stored data could not be decoded.
    #[error("Event serialisation error: {0}")]
    Serialisation(String),
}

/// Event storage with optimistic concurrency.
///
/// # Dyn Compatibility
///
/// Methods return boxed futures so the store can be shared as
/// `Arc<dyn EventStore>`.
pub trait EventStore: Send + Sync {
    /// Load the events of `stream_id` with a version greater than `after`,
    /// in ascending version order.
    ///
    /// Pass [`Version::INITIAL`] to load the whole stream. An unknown stream
    /// yields an empty list.
    ///
    /// # Errors
    ///
    /// Returns [`EventStoreError`] for an empty stream id, an unknown event
    /// type or a backend failure.
    fn load_events(
        &self,
        stream_id: StreamId,
        after: Version,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<EventRecord>, EventStoreError>> + Send + '_>>;

    /// Append `events` to `stream_id` if the stream is at `expected_version`.
    ///
    /// The events are stored with versions `expected_version + 1`,
    /// `expected_version + 2`, ... in the order given. Returns `Ok(false)`
    /// without storing anything if the stream has moved past
    /// `expected_version`.
    ///
    /// # Errors
    ///
    /// Returns [`EventStoreError`] for an empty stream id, an unregistered
    /// event type or a backend failure.
    fn append_events(
        &self,
        stream_id: StreamId,
        expected_version: Version,
        events: Vec<EventRecord>,
    ) -> Pin<Box<dyn Future<Output = Result<bool, EventStoreError>> + Send + '_>>;
}
