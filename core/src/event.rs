//! Domain events and the envelope they travel in.
//!
//! A domain event is a plain struct implementing [`Event`]. Its
//! [`Event::EVENT_TYPE`] tag is the stable identifier used to route the event
//! to handlers and to rehydrate it from storage, so it should carry a version
//! suffix that changes when the payload schema changes incompatibly:
//!
//! ```
//! use eventum_core::event::Event;
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Clone, Debug, Serialize, Deserialize)]
//! struct UserRegistered {
//!     name: String,
//!     age: u32,
//! }
//!
//! impl Event for UserRegistered {
//!     const EVENT_TYPE: &'static str = "UserRegistered.v1";
//! }
//! ```
//!
//! Inside the core every event is carried as an [`EventRecord`]: an immutable
//! envelope holding the stream id, version, timestamp and the concrete payload.
//! Stores persist records as [`StoredEvent`]s, with the payload encoded as JSON
//! by the [`TypeRegistry`](crate::type_registry::TypeRegistry).

use crate::stream::{StreamId, Version};
use crate::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// A domain event: an immutable fact that happened to one stream.
pub trait Event: Serialize + DeserializeOwned + fmt::Debug + Send + Sync + 'static {
    /// Stable type tag, e.g. `"UserRegistered.v1"`.
    const EVENT_TYPE: &'static str;
}

/// Type-erased event payload shared between clones of a record.
pub type Payload = Arc<dyn Any + Send + Sync>;

/// Envelope for one domain event.
///
/// Records are immutable. The version is assigned when the event is applied
/// to a stream as a new change or appended to a store, through the consuming
/// [`EventRecord::with_version`].
#[derive(Clone)]
pub struct EventRecord {
    id: Uuid,
    stream_id: StreamId,
    event_type: String,
    event_time: DateTime<Utc>,
    version: Version,
    payload: Payload,
}

impl EventRecord {
    /// Wrap a concrete event for `stream_id`.
    ///
    /// The record gets a fresh id, the current time and [`Version::INITIAL`];
    /// the real version is stamped when the event is applied or appended.
    #[must_use]
    pub fn new<E: Event>(stream_id: impl Into<StreamId>, event: E) -> Self {
        Self {
            id: Uuid::new_v4(),
            stream_id: stream_id.into(),
            event_type: E::EVENT_TYPE.to_string(),
            event_time: Utc::now(),
            version: Version::INITIAL,
            payload: Arc::new(event),
        }
    }

    /// Rebuild a record from its stored parts.
    ///
    /// Used by the type registry when rehydrating a [`StoredEvent`].
    #[must_use]
    pub const fn from_parts(
        id: Uuid,
        stream_id: StreamId,
        event_type: String,
        event_time: DateTime<Utc>,
        version: Version,
        payload: Payload,
    ) -> Self {
        Self {
            id,
            stream_id,
            event_type,
            event_time,
            version,
            payload,
        }
    }

    /// The same event, stamped with `version`.
    #[must_use]
    pub fn with_version(mut self, version: Version) -> Self {
        self.version = version;
        self
    }

    /// The same event, with `event_time` as its timestamp.
    #[must_use]
    pub fn at(mut self, event_time: DateTime<Utc>) -> Self {
        self.event_time = event_time;
        self
    }

    /// Unique id of this event.
    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    /// Stream the event belongs to.
    #[must_use]
    pub const fn stream_id(&self) -> &StreamId {
        &self.stream_id
    }

    /// Type tag of the payload.
    #[must_use]
    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    /// When the event happened.
    #[must_use]
    pub const fn event_time(&self) -> DateTime<Utc> {
        self.event_time
    }

    /// Position of the event in its stream.
    #[must_use]
    pub const fn version(&self) -> Version {
        self.version
    }

    /// The concrete payload, if it is an `E`.
    #[must_use]
    pub fn payload<E: Event>(&self) -> Option<&E> {
        self.payload.downcast_ref::<E>()
    }

    /// The type-erased payload.
    #[must_use]
    pub fn raw_payload(&self) -> &(dyn Any + Send + Sync) {
        self.payload.as_ref()
    }
}

impl fmt::Debug for EventRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventRecord")
            .field("id", &self.id)
            .field("stream_id", &self.stream_id)
            .field("event_type", &self.event_type)
            .field("event_time", &self.event_time)
            .field("version", &self.version)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for EventRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} #{} on stream '{}'",
            self.event_type, self.version, self.stream_id
        )
    }
}

/// Persisted shape of an event record.
///
/// `data` is the JSON encoding of the payload; `event_type` tells the
/// [`TypeRegistry`](crate::type_registry::TypeRegistry) how to decode it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredEvent {
    /// Stream the event belongs to.
    pub stream_id: StreamId,
    /// Unique event id.
    pub id: Uuid,
    /// Payload type tag.
    pub event_type: String,
    /// When the event happened.
    pub event_time: DateTime<Utc>,
    /// Position in the stream.
    pub version: Version,
    /// JSON-encoded payload.
    pub data: serde_json::Value,
}
