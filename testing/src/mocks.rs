//! In-memory collaborators for fast, deterministic tests.
//!
//! - [`InMemoryEventStore`]: compare-and-append event storage
//! - [`InMemorySnapshotStore`]: latest snapshot per stream
//! - [`RecordingTelemetry`]: captures every telemetry call for assertions
//!
//! The in-memory view repository lives in [`crate::projection_mocks`].

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)] // Locks only panic if a test already panicked

use eventum_core::event::EventRecord;
use eventum_core::event_store::{EventStore, EventStoreError};
use eventum_core::snapshot::{SnapshotError, SnapshotMemento, SnapshotStore, StoredSnapshot};
use eventum_core::stream::{StreamId, Version};
use eventum_core::telemetry::{Properties, Telemetry};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, RwLock};

/// In-memory event store with compare-and-append semantics.
///
/// # Example
///
/// ```
/// use eventum_testing::mocks::InMemoryEventStore;
/// use eventum_core::event_store::EventStore;
/// use eventum_core::stream::{StreamId, Version};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let store = InMemoryEventStore::new();
/// let events = store.load_events(StreamId::new("order-1"), Version::INITIAL).await?;
/// assert!(events.is_empty());
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug, Default)]
pub struct InMemoryEventStore {
    streams: Arc<RwLock<HashMap<StreamId, Vec<EventRecord>>>>,
}

impl InMemoryEventStore {
    /// An empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current version of `stream_id` ([`Version::INITIAL`] if unknown).
    #[must_use]
    pub fn version(&self, stream_id: &StreamId) -> Version {
        self.streams
            .read()
            .unwrap()
            .get(stream_id)
            .and_then(|events| events.last())
            .map_or(Version::INITIAL, EventRecord::version)
    }

    /// Every stored event of `stream_id`, in version order.
    #[must_use]
    pub fn events(&self, stream_id: &StreamId) -> Vec<EventRecord> {
        self.streams
            .read()
            .unwrap()
            .get(stream_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Total number of stored events across all streams.
    #[must_use]
    pub fn len(&self) -> usize {
        self.streams.read().unwrap().values().map(Vec::len).sum()
    }

    /// `true` if no events are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every stream (for test isolation).
    pub fn clear(&self) {
        self.streams.write().unwrap().clear();
    }
}

impl EventStore for InMemoryEventStore {
    fn load_events(
        &self,
        stream_id: StreamId,
        after: Version,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<EventRecord>, EventStoreError>> + Send + '_>> {
        Box::pin(async move {
            stream_id.validate()?;
            let streams = self.streams.read().unwrap();
            Ok(streams
                .get(&stream_id)
                .map(|events| {
                    events
                        .iter()
                        .filter(|e| e.version() > after)
                        .cloned()
                        .collect()
                })
                .unwrap_or_default())
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
            let mut streams = self.streams.write().unwrap();
            let stored = streams.entry(stream_id).or_default();

            let current = stored.last().map_or(Version::INITIAL, EventRecord::version);
            if current != expected_version {
                return Ok(false);
            }

            let mut version = expected_version;
            for event in events {
                version = version.next();
                stored.push(event.with_version(version));
            }
            Ok(true)
        })
    }
}

/// In-memory snapshot store keeping the latest snapshot per stream.
#[derive(Clone, Debug, Default)]
pub struct InMemorySnapshotStore {
    snapshots: Arc<RwLock<HashMap<StreamId, StoredSnapshot>>>,
}

impl InMemorySnapshotStore {
    /// An empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The stored snapshot of `stream_id`, if any.
    #[must_use]
    pub fn get(&self, stream_id: &StreamId) -> Option<StoredSnapshot> {
        self.snapshots.read().unwrap().get(stream_id).cloned()
    }

    /// Number of streams with a snapshot.
    #[must_use]
    pub fn len(&self) -> usize {
        self.snapshots.read().unwrap().len()
    }

    /// `true` if no snapshot is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.snapshots.read().unwrap().is_empty()
    }
}

impl SnapshotStore for InMemorySnapshotStore {
    fn save_snapshot(
        &self,
        stream_id: StreamId,
        version: Version,
        memento: SnapshotMemento,
    ) -> Pin<Box<dyn Future<Output = Result<(), SnapshotError>> + Send + '_>> {
        Box::pin(async move {
            stream_id.validate()?;
            self.snapshots
                .write()
                .unwrap()
                .insert(stream_id, (version, memento));
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
            Ok(self.snapshots.read().unwrap().get(&stream_id).cloned())
        })
    }
}

/// One captured telemetry call.
#[derive(Clone, Debug, PartialEq)]
pub enum TelemetryItem {
    /// [`Telemetry::track_metric`].
    Metric {
        /// Metric name.
        name: &'static str,
        /// Reported value.
        value: f64,
        /// Attached properties.
        properties: Vec<(&'static str, String)>,
    },
    /// [`Telemetry::track_event`].
    Event {
        /// Event name.
        name: &'static str,
        /// Attached properties.
        properties: Vec<(&'static str, String)>,
    },
    /// [`Telemetry::track_exception`].
    Exception {
        /// Rendered error message.
        message: String,
        /// Attached properties.
        properties: Vec<(&'static str, String)>,
    },
}

/// [`Telemetry`] that records every call.
#[derive(Clone, Debug, Default)]
pub struct RecordingTelemetry {
    items: Arc<Mutex<Vec<TelemetryItem>>>,
}

impl RecordingTelemetry {
    /// An empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything recorded so far, in call order.
    #[must_use]
    pub fn items(&self) -> Vec<TelemetryItem> {
        self.items.lock().unwrap().clone()
    }

    /// Sum of all values reported for metric `name`.
    #[must_use]
    pub fn metric_total(&self, name: &str) -> f64 {
        self.items
            .lock()
            .unwrap()
            .iter()
            .filter_map(|item| match item {
                TelemetryItem::Metric { name: n, value, .. } if *n == name => Some(*value),
                _ => None,
            })
            .sum()
    }

    /// Number of times metric `name` was reported.
    #[must_use]
    pub fn metric_count(&self, name: &str) -> usize {
        self.items
            .lock()
            .unwrap()
            .iter()
            .filter(|item| matches!(item, TelemetryItem::Metric { name: n, .. } if *n == name))
            .count()
    }

    /// Messages of all recorded exceptions.
    #[must_use]
    pub fn exceptions(&self) -> Vec<String> {
        self.items
            .lock()
            .unwrap()
            .iter()
            .filter_map(|item| match item {
                TelemetryItem::Exception { message, .. } => Some(message.clone()),
                _ => None,
            })
            .collect()
    }

    /// Forget everything recorded.
    pub fn clear(&self) {
        self.items.lock().unwrap().clear();
    }
}

impl Telemetry for RecordingTelemetry {
    fn track_metric(&self, name: &'static str, value: f64, properties: Properties<'_>) {
        self.items.lock().unwrap().push(TelemetryItem::Metric {
            name,
            value,
            properties: properties.to_vec(),
        });
    }

    fn track_event(&self, name: &'static str, properties: Properties<'_>) {
        self.items.lock().unwrap().push(TelemetryItem::Event {
            name,
            properties: properties.to_vec(),
        });
    }

    fn track_exception(
        &self,
        error: &(dyn std::error::Error + 'static),
        properties: Properties<'_>,
    ) {
        self.items.lock().unwrap().push(TelemetryItem::Exception {
            message: error.to_string(),
            properties: properties.to_vec(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use eventum_core::event::Event;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Serialize, Deserialize)]
    struct Pinged;
    impl Event for Pinged {
        const EVENT_TYPE: &'static str = "Pinged.v1";
    }

    fn pings(n: usize) -> Vec<EventRecord> {
        (0..n).map(|_| EventRecord::new("s-1", Pinged)).collect()
    }

    #[tokio::test]
    async fn append_assigns_consecutive_versions() {
        let store = InMemoryEventStore::new();
        let id = StreamId::new("s-1");

        assert!(store.append_events(id.clone(), Version::INITIAL, pings(2)).await.unwrap());
        assert!(store.append_events(id.clone(), Version::new(2), pings(1)).await.unwrap());

        let versions: Vec<_> = store
            .load_events(id.clone(), Version::INITIAL)
            .await
            .unwrap()
            .iter()
            .map(|e| e.version().value())
            .collect();
        assert_eq!(versions, vec![1, 2, 3]);
        assert_eq!(store.version(&id), Version::new(3));
    }

    #[tokio::test]
    async fn stale_append_is_rejected_without_side_effects() {
        let store = InMemoryEventStore::new();
        let id = StreamId::new("s-1");
        store.append_events(id.clone(), Version::INITIAL, pings(1)).await.unwrap();

        let appended = store
            .append_events(id.clone(), Version::INITIAL, pings(3))
            .await
            .unwrap();

        assert!(!appended);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn load_after_version_skips_earlier_events() {
        let store = InMemoryEventStore::new();
        let id = StreamId::new("s-1");
        store.append_events(id.clone(), Version::INITIAL, pings(4)).await.unwrap();

        let tail = store.load_events(id, Version::new(2)).await.unwrap();
        assert_eq!(tail.len(), 2);
        assert_eq!(tail[0].version(), Version::new(3));
    }

    #[tokio::test]
    async fn empty_stream_id_is_rejected() {
        let store = InMemoryEventStore::new();
        let result = store.load_events(StreamId::default(), Version::INITIAL).await;
        assert!(matches!(result, Err(EventStoreError::Validation(_))));
    }

    #[tokio::test]
    async fn snapshot_store_keeps_latest() {
        let store = InMemorySnapshotStore::new();
        let id = StreamId::new("s-1");
        store
            .save_snapshot(id.clone(), Version::new(1), SnapshotMemento::new())
            .await
            .unwrap();
        store
            .save_snapshot(id.clone(), Version::new(5), SnapshotMemento::new())
            .await
            .unwrap();

        let (version, _) = store.load_snapshot(id).await.unwrap().unwrap();
        assert_eq!(version, Version::new(5));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn snapshot_store_rejects_empty_stream_id() {
        let store = InMemorySnapshotStore::new();
        let saved = store
            .save_snapshot(StreamId::default(), Version::new(1), SnapshotMemento::new())
            .await;

        assert!(matches!(saved, Err(SnapshotError::Validation(_))));
        assert!(store.is_empty());
    }

    #[test]
    fn recording_telemetry_sums_metrics() {
        let telemetry = RecordingTelemetry::new();
        telemetry.track_metric("a_total", 2.0, &[]);
        telemetry.track_metric("a_total", 3.0, &[]);
        telemetry.track_exception(&std::fmt::Error, &[]);

        assert!((telemetry.metric_total("a_total") - 5.0).abs() < f64::EPSILON);
        assert_eq!(telemetry.metric_count("a_total"), 2);
        assert_eq!(telemetry.exceptions().len(), 1);
    }
}
