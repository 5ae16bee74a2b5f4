//! Integration tests for loading and saving event streams

#![allow(clippy::unwrap_used)] // Tests can unwrap

mod common;

use common::{PlainUser, User, UserDeleted, UserRegistered, UserRenamed, registered};
use eventum_core::aggregate::{EventStream, STREAM_ID_FIELD, VERSION_FIELD};
use eventum_core::config::EventumConfig;
use eventum_core::event::EventRecord;
use eventum_core::event_store::{EventStore, EventStoreError};
use eventum_core::repository::EventStreamRepository;
use eventum_core::snapshot::{SnapshotError, SnapshotMemento, SnapshotStore, StoredSnapshot};
use eventum_core::stream::{StreamId, Version};
use eventum_core::telemetry;
use eventum_testing::{
    InMemoryEventStore, InMemorySnapshotStore, RecordingTelemetry, TelemetryItem, init_test_tracing,
};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

struct Fixture {
    events: Arc<InMemoryEventStore>,
    snapshots: Arc<InMemorySnapshotStore>,
    telemetry: Arc<RecordingTelemetry>,
    repository: EventStreamRepository,
}

fn fixture(config: EventumConfig) -> Fixture {
    init_test_tracing();
    let events = Arc::new(InMemoryEventStore::new());
    let snapshots = Arc::new(InMemorySnapshotStore::new());
    let telemetry = Arc::new(RecordingTelemetry::new());
    let repository = EventStreamRepository::new(events.clone())
        .with_snapshots(snapshots.clone())
        .with_telemetry(telemetry.clone())
        .with_config(config);
    Fixture {
        events,
        snapshots,
        telemetry,
        repository,
    }
}

#[tokio::test]
async fn test_save_then_load_round_trip() {
    let f = fixture(EventumConfig::default());

    let mut stream = f.repository.load_stream::<User>("user-1").await.unwrap();
    assert_eq!(stream.version(), Version::INITIAL);

    stream
        .apply_new(UserRegistered {
            name: "Ada".into(),
            age: 30,
        })
        .unwrap();
    stream.apply_new(UserRenamed { name: "Grace".into() }).unwrap();
    assert!(
        f.repository
            .save_stream(&stream, stream.committed_version())
            .await
            .unwrap()
    );
    stream.clear_uncommitted_changes();

    let loaded = f.repository.load_stream::<User>("user-1").await.unwrap();
    assert_eq!(loaded.version(), Version::new(2));
    assert_eq!(loaded.state(), stream.state());
    assert!(loaded.uncommitted_changes().is_empty());

    assert_total(&f.telemetry, telemetry::EVENTS_APPENDED, 2.0);
    assert_total(&f.telemetry, telemetry::EVENTS_LOADED, 2.0);
}

#[tokio::test]
async fn test_stale_save_appends_nothing() {
    let f = fixture(EventumConfig::default());
    let id = StreamId::new("user-1");

    let mut first = f.repository.load_stream::<User>(id.clone()).await.unwrap();
    let mut second = f.repository.load_stream::<User>(id.clone()).await.unwrap();

    first
        .apply_new(UserRegistered {
            name: "Ada".into(),
            age: 30,
        })
        .unwrap();
    assert!(f.repository.save_stream(&first, Version::INITIAL).await.unwrap());

    second
        .apply_new(UserRegistered {
            name: "Grace".into(),
            age: 45,
        })
        .unwrap();
    second.apply_new(UserRenamed { name: "Hedy".into() }).unwrap();
    assert!(!f.repository.save_stream(&second, Version::INITIAL).await.unwrap());

    assert_eq!(f.events.version(&id), Version::new(1));
    assert_eq!(f.events.events(&id).len(), 1);
    assert_eq!(f.telemetry.metric_count(telemetry::APPEND_CONFLICTS), 1);
}

#[tokio::test]
async fn test_empty_stream_id_is_rejected() {
    let f = fixture(EventumConfig::default());

    let result = f.repository.load_stream::<User>("").await;

    assert!(matches!(result, Err(EventStoreError::Validation(_))));
}

#[tokio::test]
#[allow(clippy::panic)] // Intentional panic for test assertions
async fn test_unhandled_stored_event_fails_load() {
    let f = fixture(EventumConfig::default());
    let id = StreamId::new("user-1");
    f.events
        .append_events(
            id.clone(),
            Version::INITIAL,
            vec![registered("user-1", "Ada", 30), EventRecord::new("user-1", UserDeleted)],
        )
        .await
        .unwrap();

    let error = f.repository.load_stream::<User>(id).await.unwrap_err();

    match error {
        EventStoreError::Handler(handler) => {
            assert_eq!(handler.event_type, "UserDeleted.v1");
            assert_eq!(handler.version, Version::new(2));
        }
        other => panic!("expected a handler error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_load_restores_snapshot_then_replays_tail() {
    let f = fixture(EventumConfig::default());
    let id = StreamId::new("user-1");

    let mut stream = f.repository.load_stream::<User>(id.clone()).await.unwrap();
    stream
        .apply_new(UserRegistered {
            name: "Ada".into(),
            age: 30,
        })
        .unwrap();
    f.repository.save_stream(&stream, Version::INITIAL).await.unwrap();
    stream.clear_uncommitted_changes();
    assert!(f.repository.save_snapshot(&stream).await.unwrap());

    // Events written after the snapshot
    f.events
        .append_events(
            id.clone(),
            Version::new(1),
            vec![EventRecord::new("user-1", UserRenamed { name: "Grace".into() })],
        )
        .await
        .unwrap();
    f.telemetry.clear();

    let loaded = f.repository.load_stream::<User>(id.clone()).await.unwrap();

    assert_eq!(loaded.version(), Version::new(2));
    assert_eq!(loaded.state().name, "Grace");
    assert_eq!(loaded.state().age, 30);
    assert_total(&f.telemetry, telemetry::EVENTS_LOADED, 1.0);
}

#[tokio::test]
async fn test_snapshot_wins_over_history_for_state() {
    let f = fixture(EventumConfig::default());
    let id = StreamId::new("user-1");
    f.events
        .append_events(
            id.clone(),
            Version::INITIAL,
            vec![registered("user-1", "Ada", 30), registered("user-1", "Ada", 31)],
        )
        .await
        .unwrap();

    // A snapshot at version 2 whose state differs from replaying history
    let mut snapshot = snapshot_at(&id, 2);
    snapshot.insert("name", "Snap").unwrap();
    snapshot.insert("age", &99_u32).unwrap();
    f.snapshots
        .save_snapshot(id.clone(), Version::new(2), snapshot)
        .await
        .unwrap();

    let loaded = f.repository.load_stream::<User>(id).await.unwrap();

    assert_eq!(loaded.version(), Version::new(2));
    assert_eq!(loaded.state().name, "Snap");
    assert_eq!(loaded.state().age, 99);
}

#[tokio::test]
async fn test_plain_aggregate_ignores_snapshots() {
    let f = fixture(EventumConfig::default().with_snapshot_frequency(1));
    let id = StreamId::new("user-1");

    let mut stream = f.repository.load_stream::<PlainUser>(id.clone()).await.unwrap();
    stream
        .apply_new(UserRegistered {
            name: "Ada".into(),
            age: 30,
        })
        .unwrap();

    assert!(f.repository.save_stream(&stream, Version::INITIAL).await.unwrap());
    assert!(!f.repository.save_snapshot(&stream).await.unwrap());
    assert!(f.snapshots.is_empty());
}

#[tokio::test]
async fn test_snapshot_is_taken_when_frequency_is_crossed() {
    let f = fixture(EventumConfig::default().with_snapshot_frequency(3));
    let id = StreamId::new("user-1");

    let mut stream = f.repository.load_stream::<User>(id.clone()).await.unwrap();
    stream
        .apply_new(UserRegistered {
            name: "Ada".into(),
            age: 30,
        })
        .unwrap();
    stream.apply_new(UserRenamed { name: "Grace".into() }).unwrap();
    f.repository.save_stream(&stream, Version::INITIAL).await.unwrap();
    stream.clear_uncommitted_changes();
    assert!(f.snapshots.is_empty());

    stream.apply_new(UserRenamed { name: "Hedy".into() }).unwrap();
    stream.apply_new(UserRenamed { name: "Joan".into() }).unwrap();
    f.repository
        .save_stream(&stream, stream.committed_version())
        .await
        .unwrap();

    let (version, memento) = f.snapshots.get(&id).unwrap();
    assert_eq!(version, Version::new(4));
    assert_eq!(memento.get::<String>("name").unwrap(), "Joan");
    assert_eq!(memento.get::<Version>(VERSION_FIELD), Some(Version::new(4)));
    assert_eq!(memento.get::<StreamId>(STREAM_ID_FIELD), Some(id));
    assert_eq!(f.telemetry.metric_count(telemetry::SNAPSHOTS_SAVED), 1);
    assert!(f.telemetry.items().iter().any(|item| matches!(
        item,
        TelemetryItem::Event { name, properties }
            if *name == telemetry::SNAPSHOT_TAKEN
                && properties.contains(&("version", "4".to_string()))
    )));
}

#[tokio::test]
async fn test_without_snapshot_store_nothing_is_snapshotted() {
    init_test_tracing();
    let repository = EventStreamRepository::new(Arc::new(InMemoryEventStore::new()))
        .with_config(EventumConfig::default().with_snapshot_frequency(1));

    let mut stream = repository.load_stream::<User>("user-1").await.unwrap();
    stream
        .apply_new(UserRegistered {
            name: "Ada".into(),
            age: 30,
        })
        .unwrap();

    assert!(repository.save_stream(&stream, Version::INITIAL).await.unwrap());
    assert!(!repository.save_snapshot(&stream).await.unwrap());
}

#[tokio::test]
async fn test_no_automatic_snapshot_when_saving_past_other_writers() {
    let f = fixture(EventumConfig::default().with_snapshot_frequency(2));
    let id = StreamId::new("user-1");
    f.events
        .append_events(
            id.clone(),
            Version::INITIAL,
            vec![
                registered("user-1", "Zoe", 99),
                EventRecord::new("user-1", UserRenamed { name: "Zoe".into() }),
            ],
        )
        .await
        .unwrap();

    // Built without loading, so its state knows nothing of versions 1 and 2
    let mut stream = EventStream::<User>::new(id.clone());
    stream
        .apply_new(UserRegistered {
            name: "Grace".into(),
            age: 30,
        })
        .unwrap();
    stream.apply_new(UserRenamed { name: "Grace".into() }).unwrap();

    assert!(f.repository.save_stream(&stream, Version::new(2)).await.unwrap());

    assert_eq!(f.events.version(&id), Version::new(4));
    assert!(f.snapshots.is_empty());
    assert_eq!(f.telemetry.metric_count(telemetry::SNAPSHOTS_SAVED), 0);
}

#[tokio::test]
async fn test_load_failure_is_reported_to_telemetry() {
    let f = fixture(EventumConfig::default());
    let id = StreamId::new("user-1");
    f.events
        .append_events(
            id.clone(),
            Version::INITIAL,
            vec![EventRecord::new("user-1", UserDeleted)],
        )
        .await
        .unwrap();

    assert!(f.repository.load_stream::<User>(id).await.is_err());

    let reported = exception_properties(&f.telemetry);
    assert_eq!(reported.len(), 1);
    assert!(reported[0].contains(&("operation", "load_stream".to_string())));
    assert!(reported[0].contains(&("stream_id", "user-1".to_string())));
}

#[tokio::test]
async fn test_conflict_is_not_reported_as_failure() {
    let f = fixture(EventumConfig::default());
    let mut stream = f.repository.load_stream::<User>("user-1").await.unwrap();
    stream
        .apply_new(UserRegistered {
            name: "Ada".into(),
            age: 30,
        })
        .unwrap();

    assert!(!f.repository.save_stream(&stream, Version::new(5)).await.unwrap());
    assert!(f.telemetry.exceptions().is_empty());
}

/// Event store whose backend is always down.
struct UnavailableEvents;

impl EventStore for UnavailableEvents {
    fn load_events(
        &self,
        _stream_id: StreamId,
        _after: Version,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<EventRecord>, EventStoreError>> + Send + '_>> {
        Box::pin(async { Err(EventStoreError::Storage("connection refused".into())) })
    }

    fn append_events(
        &self,
        _stream_id: StreamId,
        _expected_version: Version,
        _events: Vec<EventRecord>,
    ) -> Pin<Box<dyn Future<Output = Result<bool, EventStoreError>> + Send + '_>> {
        Box::pin(async { Err(EventStoreError::Storage("connection refused".into())) })
    }
}

#[tokio::test]
async fn test_storage_failures_are_reported_to_telemetry() {
    init_test_tracing();
    let recorder = Arc::new(RecordingTelemetry::new());
    let repository =
        EventStreamRepository::new(Arc::new(UnavailableEvents)).with_telemetry(recorder.clone());

    assert!(matches!(
        repository.load_stream::<User>("user-1").await,
        Err(EventStoreError::Storage(_))
    ));

    let mut stream = EventStream::<User>::new("user-1");
    stream
        .apply_new(UserRegistered {
            name: "Ada".into(),
            age: 30,
        })
        .unwrap();
    assert!(matches!(
        repository.save_stream(&stream, Version::INITIAL).await,
        Err(EventStoreError::Storage(_))
    ));

    let reported = exception_properties(&recorder);
    assert_eq!(reported.len(), 2);
    assert!(reported[0].contains(&("operation", "load_stream".to_string())));
    assert!(reported[1].contains(&("operation", "save_stream".to_string())));
    assert!(recorder.exceptions().iter().all(|m| m.contains("connection refused")));
}

/// Snapshot store whose backend is always down.
struct UnavailableSnapshots;

impl SnapshotStore for UnavailableSnapshots {
    fn save_snapshot(
        &self,
        _stream_id: StreamId,
        _version: Version,
        _memento: SnapshotMemento,
    ) -> Pin<Box<dyn Future<Output = Result<(), SnapshotError>> + Send + '_>> {
        Box::pin(async { Err(SnapshotError::Storage("connection refused".into())) })
    }

    fn load_snapshot(
        &self,
        _stream_id: StreamId,
    ) -> Pin<Box<dyn Future<Output = Result<Option<StoredSnapshot>, SnapshotError>> + Send + '_>>
    {
        Box::pin(async { Ok(None) })
    }
}

#[tokio::test]
async fn test_automatic_snapshot_failure_does_not_fail_save() {
    init_test_tracing();
    let events = Arc::new(InMemoryEventStore::new());
    let recorder = Arc::new(RecordingTelemetry::new());
    let repository = EventStreamRepository::new(events.clone())
        .with_snapshots(Arc::new(UnavailableSnapshots))
        .with_telemetry(recorder.clone())
        .with_config(EventumConfig::default().with_snapshot_frequency(1));

    let mut stream = repository.load_stream::<User>("user-1").await.unwrap();
    stream
        .apply_new(UserRegistered {
            name: "Ada".into(),
            age: 30,
        })
        .unwrap();

    assert!(repository.save_stream(&stream, Version::INITIAL).await.unwrap());
    assert_eq!(events.len(), 1);
    assert_eq!(recorder.exceptions().len(), 1);
    assert!(recorder.exceptions()[0].contains("connection refused"));

    // An explicit snapshot reports the failure
    assert!(matches!(
        repository.save_snapshot(&stream).await,
        Err(EventStoreError::Snapshot(SnapshotError::Storage(_)))
    ));
}

/// A memento shaped like a stored snapshot of `id` at `version`.
fn snapshot_at(id: &StreamId, version: u64) -> SnapshotMemento {
    let mut memento = SnapshotMemento::new();
    memento.insert(STREAM_ID_FIELD, id).unwrap();
    memento.insert(VERSION_FIELD, &Version::new(version)).unwrap();
    memento
}

fn assert_total(recorder: &RecordingTelemetry, metric: &str, expected: f64) {
    let total = recorder.metric_total(metric);
    assert!((total - expected).abs() < f64::EPSILON, "{metric}: {total} != {expected}");
}

fn exception_properties(recorder: &RecordingTelemetry) -> Vec<Vec<(&'static str, String)>> {
    recorder
        .items()
        .into_iter()
        .filter_map(|item| match item {
            TelemetryItem::Exception { properties, .. } => Some(properties),
            _ => None,
        })
        .collect()
}
