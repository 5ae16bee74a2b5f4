//! Event-sourced aggregates.
//!
//! An aggregate's domain fields live in a type implementing [`Aggregate`]; the
//! [`EventStream`] wrapping it owns the stream id, the version and the list of
//! uncommitted changes. State only ever changes by applying events through
//! [`EventStream::apply_change`], which routes each event to the handler the
//! aggregate registered for its type.
//!
//! # Example
//!
//! ```
//! use eventum_core::aggregate::{Aggregate, EventStream};
//! use eventum_core::event::Event;
//! use eventum_core::handler::Handlers;
//! use serde::{Deserialize, Serialize};
//! use std::sync::OnceLock;
//!
//! #[derive(Debug, Serialize, Deserialize)]
//! struct UserRegistered { name: String, age: u32 }
//! impl Event for UserRegistered { const EVENT_TYPE: &'static str = "UserRegistered.v1"; }
//!
//! #[derive(Default)]
//! struct User { name: String, age: u32 }
//!
//! impl Aggregate for User {
//!     fn handlers() -> &'static Handlers<Self> {
//!         static HANDLERS: OnceLock<Handlers<User>> = OnceLock::new();
//!         HANDLERS.get_or_init(|| {
//!             Handlers::new().on(|user: &mut User, e: &UserRegistered| {
//!                 user.name.clone_from(&e.name);
//!                 user.age = e.age;
//!             })
//!         })
//!     }
//! }
//!
//! let mut stream = EventStream::<User>::new("S");
//! stream.apply_new(UserRegistered { name: "Ada".into(), age: 30 }).unwrap();
//!
//! assert_eq!(stream.version().value(), 1);
//! assert_eq!(stream.uncommitted_changes().len(), 1);
//! assert_eq!(stream.state().name, "Ada");
//! ```

use crate::event::{Event, EventRecord};
use crate::handler::{DispatchFailure, Handlers};
use crate::snapshot::{SnapshotError, SnapshotMemento};
use crate::stream::{StreamId, Version};
use thiserror::Error;

/// Memento key holding the stream id.
pub const STREAM_ID_FIELD: &str = "streamId";
/// Memento key holding the stream version.
pub const VERSION_FIELD: &str = "version";

/// An event could not be applied to a stream.
///
/// Raised both when no handler exists for the event type and when the handler
/// fails; [`EventStreamHandlerError::cause`] tells the two apart.
#[derive(Error, Debug)]
#[error("Event stream '{stream_id}' cannot handle event '{event_type}' (version {version}): {cause}")]
pub struct EventStreamHandlerError {
    /// Type tag of the offending event.
    pub event_type: String,
    /// Stream the event was applied to.
    pub stream_id: StreamId,
    /// Version carried by the event.
    pub version: Version,
    /// Root cause of the dispatch failure.
    #[source]
    pub cause: DispatchFailure,
}

/// Domain state of an event-sourced aggregate.
pub trait Aggregate: Default + Send + Sync + 'static {
    /// Whether streams of this aggregate support snapshots.
    const SNAPSHOTABLE: bool = false;

    /// The aggregate's handler table, built once.
    fn handlers() -> &'static Handlers<Self>;

    /// Write the aggregate's fields into `memento`.
    ///
    /// # Errors
    ///
    /// Returns [`SnapshotError`] if a field cannot be encoded.
    fn capture(&self, memento: &mut SnapshotMemento) -> Result<(), SnapshotError> {
        let _ = memento;
        Ok(())
    }

    /// Restore the aggregate's fields from `memento`.
    ///
    /// Fields missing from the memento must be left as they are.
    fn restore(&mut self, memento: &SnapshotMemento) {
        let _ = memento;
    }
}

/// An aggregate together with its stream bookkeeping.
#[derive(Debug, Clone, Default)]
pub struct EventStream<A: Aggregate> {
    stream_id: StreamId,
    version: Version,
    uncommitted_changes: Vec<EventRecord>,
    state: A,
}

impl<A: Aggregate> EventStream<A> {
    /// An empty stream at [`Version::INITIAL`].
    #[must_use]
    pub fn new(stream_id: impl Into<StreamId>) -> Self {
        Self {
            stream_id: stream_id.into(),
            version: Version::INITIAL,
            uncommitted_changes: Vec::new(),
            state: A::default(),
        }
    }

    /// The stream id.
    #[must_use]
    pub const fn stream_id(&self) -> &StreamId {
        &self.stream_id
    }

    /// Version of the last applied event.
    #[must_use]
    pub const fn version(&self) -> Version {
        self.version
    }

    /// Version the stream had before its uncommitted changes.
    ///
    /// This is the expected version to append the uncommitted changes with.
    #[must_use]
    pub fn committed_version(&self) -> Version {
        self.version.rewind(self.uncommitted_changes.len() as u64)
    }

    /// The aggregate's domain state.
    #[must_use]
    pub const fn state(&self) -> &A {
        &self.state
    }

    /// Events applied as new since the stream was hydrated.
    #[must_use]
    pub fn uncommitted_changes(&self) -> &[EventRecord] {
        &self.uncommitted_changes
    }

    /// `true` if there are changes waiting to be appended.
    #[must_use]
    pub fn has_uncommitted_changes(&self) -> bool {
        !self.uncommitted_changes.is_empty()
    }

    /// Forget the uncommitted changes after a successful append.
    pub fn clear_uncommitted_changes(&mut self) {
        self.uncommitted_changes.clear();
    }

    /// Apply `record` to the aggregate.
    ///
    /// A new event is stamped with the next version and queued as an
    /// uncommitted change; a replayed event moves the stream to its version.
    ///
    /// # Errors
    ///
    /// Returns [`EventStreamHandlerError`] if no handler exists for the event
    /// type or the handler fails. The stream is left unchanged in that case,
    /// apart from whatever the failing handler already wrote.
    pub fn apply_change(
        &mut self,
        record: EventRecord,
        is_new: bool,
    ) -> Result<(), EventStreamHandlerError> {
        if let Err(cause) = A::handlers().dispatch(&mut self.state, &record) {
            tracing::error!(
                stream_id = %self.stream_id,
                event_type = record.event_type(),
                version = %record.version(),
                cause = cause.label(),
                error = %cause,
                "Failed to apply event to stream"
            );
            return Err(EventStreamHandlerError {
                event_type: record.event_type().to_string(),
                stream_id: self.stream_id.clone(),
                version: record.version(),
                cause,
            });
        }

        if self.stream_id.is_empty() {
            self.stream_id = record.stream_id().clone();
        }

        if is_new {
            let version = self.version.next();
            self.version = version;
            self.uncommitted_changes.push(record.with_version(version));
        } else {
            self.version = record.version();
        }
        Ok(())
    }

    /// Wrap `event` in a record for this stream and apply it as new.
    ///
    /// # Errors
    ///
    /// Returns [`EventStreamHandlerError`] as [`EventStream::apply_change`] does.
    pub fn apply_new<E: Event>(&mut self, event: E) -> Result<(), EventStreamHandlerError> {
        let record = EventRecord::new(self.stream_id.clone(), event);
        self.apply_change(record, true)
    }

    /// Replay committed events in the order given.
    ///
    /// The caller supplies events in ascending version order; they are not
    /// sorted or checked for gaps.
    ///
    /// # Errors
    ///
    /// Stops at and returns the first [`EventStreamHandlerError`].
    pub fn load_from_history<I>(&mut self, history: I) -> Result<(), EventStreamHandlerError>
    where
        I: IntoIterator<Item = EventRecord>,
    {
        for record in history {
            self.apply_change(record, false)?;
        }
        Ok(())
    }

    /// Whether this stream's aggregate supports snapshots.
    #[must_use]
    pub const fn is_snapshotable(&self) -> bool {
        A::SNAPSHOTABLE
    }

    /// Capture the stream id, version and aggregate fields.
    ///
    /// Uncommitted changes are never captured.
    ///
    /// # Errors
    ///
    /// Returns [`SnapshotError`] if a field cannot be encoded.
    pub fn save_to_snapshot(&self) -> Result<SnapshotMemento, SnapshotError> {
        let mut memento = SnapshotMemento::new();
        memento.insert(STREAM_ID_FIELD, &self.stream_id)?;
        memento.insert(VERSION_FIELD, &self.version)?;
        self.state.capture(&mut memento)?;
        Ok(memento)
    }

    /// Restore the stream from `memento`.
    ///
    /// # Errors
    ///
    /// Returns [`SnapshotError::MissingField`] if the stream id or version is
    /// absent. Aggregate fields missing from the memento are not an error.
    pub fn load_from_snapshot(&mut self, memento: &SnapshotMemento) -> Result<(), SnapshotError> {
        self.stream_id = memento
            .get(STREAM_ID_FIELD)
            .ok_or(SnapshotError::MissingField(STREAM_ID_FIELD))?;
        self.version = memento
            .get(VERSION_FIELD)
            .ok_or(SnapshotError::MissingField(VERSION_FIELD))?;
        self.state.restore(memento);
        Ok(())
    }
}
