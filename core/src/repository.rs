//! Loading and saving event streams.
//!
//! [`EventStreamRepository`] sits between aggregates and storage: it hydrates
//! an [`EventStream`] from its latest snapshot plus the events after it, and
//! appends a stream's uncommitted changes with optimistic concurrency.
//!
//! # Example
//!
//! ```no_run
//! use eventum_core::aggregate::{Aggregate, EventStream};
//! use eventum_core::event_store::{EventStore, EventStoreError};
//! use eventum_core::repository::EventStreamRepository;
//! use std::sync::Arc;
//!
//! async fn rename<A: Aggregate>(store: Arc<dyn EventStore>) -> Result<(), EventStoreError> {
//!     let repository = EventStreamRepository::new(store);
//!     let mut stream = repository.load_stream::<A>("user-42").await?;
//!     // ... stream.apply_new(...)?
//!     if repository.save_stream(&stream, stream.committed_version()).await? {
//!         stream.clear_uncommitted_changes();
//!     }
//!     Ok(())
//! }
//! ```

use crate::aggregate::{Aggregate, EventStream};
use crate::config::EventumConfig;
use crate::event_store::{EventStore, EventStoreError};
use crate::snapshot::SnapshotStore;
use crate::stream::{StreamId, Version};
use crate::telemetry::{self, Telemetry, TracingTelemetry};
use std::sync::Arc;
use std::time::Instant;

/// Loads and saves [`EventStream`]s.
#[derive(Clone)]
pub struct EventStreamRepository {
    events: Arc<dyn EventStore>,
    snapshots: Option<Arc<dyn SnapshotStore>>,
    telemetry: Arc<dyn Telemetry>,
    config: EventumConfig,
}

impl EventStreamRepository {
    /// A repository over `events`, with default configuration, no snapshot
    /// store and [`TracingTelemetry`].
    #[must_use]
    pub fn new(events: Arc<dyn EventStore>) -> Self {
        let config = EventumConfig::default();
        Self {
            events,
            snapshots: None,
            telemetry: Arc::new(TracingTelemetry::new(config.telemetry_verbosity)),
            config,
        }
    }

    /// Use `snapshots` to shortcut hydration of snapshotable aggregates.
    #[must_use]
    pub fn with_snapshots(mut self, snapshots: Arc<dyn SnapshotStore>) -> Self {
        self.snapshots = Some(snapshots);
        self
    }

    /// Report through `telemetry`.
    #[must_use]
    pub fn with_telemetry(mut self, telemetry: Arc<dyn Telemetry>) -> Self {
        self.telemetry = telemetry;
        self
    }

    /// Use `config`.
    #[must_use]
    pub const fn with_config(mut self, config: EventumConfig) -> Self {
        self.config = config;
        self
    }

    /// The active configuration.
    #[must_use]
    pub const fn config(&self) -> &EventumConfig {
        &self.config
    }

    /// Hydrate the stream `stream_id`.
    ///
    /// For a snapshotable aggregate with a stored snapshot, the snapshot is
    /// restored and only the events after it are replayed. Otherwise the
    /// whole stream is replayed. An unknown stream yields an empty stream at
    /// [`Version::INITIAL`].
    ///
    /// # Errors
    ///
    /// Returns [`EventStoreError`] for an empty stream id, a storage or
    /// snapshot failure, an unknown event type, or an event the aggregate has
    /// no handler for. Failures are also reported through
    /// [`Telemetry::track_exception`].
    pub async fn load_stream<A: Aggregate>(
        &self,
        stream_id: impl Into<StreamId>,
    ) -> Result<EventStream<A>, EventStoreError> {
        let stream_id = stream_id.into();
        self.hydrate::<A>(&stream_id)
            .await
            .inspect_err(|error| self.report_failure("load_stream", &stream_id, error))
    }

    async fn hydrate<A: Aggregate>(
        &self,
        stream_id: &StreamId,
    ) -> Result<EventStream<A>, EventStoreError> {
        stream_id.validate()?;
        let started = Instant::now();

        let mut stream = EventStream::<A>::new(stream_id.clone());
        if let Some(snapshots) = self.snapshots.as_ref().filter(|_| A::SNAPSHOTABLE) {
            if let Some((version, memento)) = snapshots.load_snapshot(stream_id.clone()).await? {
                stream.load_from_snapshot(&memento)?;
                tracing::debug!(
                    stream_id = %stream_id,
                    version = %version,
                    "Restored stream from snapshot"
                );
            }
        }

        let history = self
            .events
            .load_events(stream_id.clone(), stream.version())
            .await?;
        let loaded = history.len();
        stream.load_from_history(history)?;

        let props = [("stream_id", stream_id.to_string())];
        #[allow(clippy::cast_precision_loss)]
        self.telemetry
            .track_metric(telemetry::EVENTS_LOADED, loaded as f64, &props);
        self.telemetry.track_metric(
            telemetry::LOAD_DURATION,
            started.elapsed().as_secs_f64(),
            &props,
        );
        tracing::debug!(
            stream_id = %stream_id,
            version = %stream.version(),
            replayed = loaded,
            "Loaded stream"
        );
        Ok(stream)
    }

    /// Append the uncommitted changes of `stream` if the stored stream is at
    /// `expected_version`.
    ///
    /// Returns `Ok(false)`, with nothing appended, if another writer got
    /// there first. The caller clears the stream's uncommitted changes after
    /// a successful save.
    ///
    /// When a snapshot frequency is configured and the save moves a
    /// snapshotable stream across a multiple of it, a snapshot is written.
    /// The snapshot is only taken when `expected_version` is the stream's
    /// committed version, so its state matches the stored log.
    /// A snapshot failure is logged and reported to telemetry, never returned.
    ///
    /// # Errors
    ///
    /// Returns [`EventStoreError`] for an empty stream id or a storage failure.
    /// Failures are also reported through [`Telemetry::track_exception`].
    pub async fn save_stream<A: Aggregate>(
        &self,
        stream: &EventStream<A>,
        expected_version: Version,
    ) -> Result<bool, EventStoreError> {
        self.append(stream, expected_version)
            .await
            .inspect_err(|error| self.report_failure("save_stream", stream.stream_id(), error))
    }

    async fn append<A: Aggregate>(
        &self,
        stream: &EventStream<A>,
        expected_version: Version,
    ) -> Result<bool, EventStoreError> {
        let stream_id = stream.stream_id();
        stream_id.validate()?;
        let started = Instant::now();

        let changes = stream.uncommitted_changes().to_vec();
        let count = changes.len() as u64;
        let appended = self
            .events
            .append_events(stream_id.clone(), expected_version, changes)
            .await?;

        let props = [("stream_id", stream_id.to_string())];
        self.telemetry.track_metric(
            telemetry::SAVE_DURATION,
            started.elapsed().as_secs_f64(),
            &props,
        );

        if !appended {
            tracing::warn!(
                stream_id = %stream_id,
                expected_version = %expected_version,
                "Stream was modified concurrently, append rejected"
            );
            self.telemetry
                .track_metric(telemetry::APPEND_CONFLICTS, 1.0, &props);
            return Ok(false);
        }

        #[allow(clippy::cast_precision_loss)]
        self.telemetry
            .track_metric(telemetry::EVENTS_APPENDED, count as f64, &props);
        tracing::debug!(
            stream_id = %stream_id,
            from_version = %expected_version,
            appended = count,
            "Saved stream"
        );

        if !self.snapshot_due::<A>(expected_version, count) {
            return Ok(true);
        }
        if expected_version != stream.committed_version() {
            tracing::debug!(
                stream_id = %stream_id,
                expected_version = %expected_version,
                committed_version = %stream.committed_version(),
                "Skipping automatic snapshot, stream state does not match stored log"
            );
            return Ok(true);
        }
        if let Err(error) = self.save_snapshot(stream).await {
            tracing::warn!(
                stream_id = %stream_id,
                error = %error,
                "Automatic snapshot failed"
            );
            self.telemetry.track_exception(&error, &props);
        }
        Ok(true)
    }

    /// Write a snapshot of `stream` at its current version.
    ///
    /// Returns `Ok(false)` without doing anything if the aggregate is not
    /// snapshotable or no snapshot store is configured.
    ///
    /// # Errors
    ///
    /// Returns [`EventStoreError::Snapshot`] if the state cannot be captured
    /// or stored.
    pub async fn save_snapshot<A: Aggregate>(
        &self,
        stream: &EventStream<A>,
    ) -> Result<bool, EventStoreError> {
        let Some(snapshots) = self.snapshots.as_ref().filter(|_| stream.is_snapshotable()) else {
            return Ok(false);
        };
        stream.stream_id().validate()?;

        let memento = stream.save_to_snapshot()?;
        snapshots
            .save_snapshot(stream.stream_id().clone(), stream.version(), memento)
            .await?;

        let props = [
            ("stream_id", stream.stream_id().to_string()),
            ("version", stream.version().to_string()),
        ];
        self.telemetry
            .track_metric(telemetry::SNAPSHOTS_SAVED, 1.0, &props[..1]);
        self.telemetry.track_event(telemetry::SNAPSHOT_TAKEN, &props);
        tracing::debug!(
            stream_id = %stream.stream_id(),
            version = %stream.version(),
            "Saved snapshot"
        );
        Ok(true)
    }

    fn report_failure(
        &self,
        operation: &'static str,
        stream_id: &StreamId,
        error: &EventStoreError,
    ) {
        tracing::error!(
            operation,
            stream_id = %stream_id,
            error = %error,
            "Stream operation failed"
        );
        self.telemetry.track_exception(
            error,
            &[
                ("operation", operation.to_string()),
                ("stream_id", stream_id.to_string()),
            ],
        );
    }

    fn snapshot_due<A: Aggregate>(&self, expected_version: Version, appended: u64) -> bool {
        match self.config.snapshot_frequency {
            Some(frequency) if A::SNAPSHOTABLE && frequency > 0 && appended > 0 => {
                let before = expected_version.value() / frequency;
                let after = (expected_version.value() + appended) / frequency;
                after > before
            }
            _ => false,
        }
    }
}

impl std::fmt::Debug for EventStreamRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventStreamRepository")
            .field("snapshots", &self.snapshots.is_some())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
