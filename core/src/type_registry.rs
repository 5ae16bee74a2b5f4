//! Event type registry.
//!
//! Stores persist events as JSON tagged with the event type. Turning a stored
//! event back into a concrete payload needs a decoder per tag, and the
//! [`TypeRegistry`] is where those decoders are registered, explicitly and
//! once at startup:
//!
//! ```
//! use eventum_core::event::{Event, EventRecord};
//! use eventum_core::type_registry::{TypeRegistry, TypeResolver};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Debug, PartialEq, Serialize, Deserialize)]
//! struct Deposited { amount: u64 }
//! impl Event for Deposited { const EVENT_TYPE: &'static str = "Deposited.v1"; }
//!
//! let registry = TypeRegistry::new().register::<Deposited>();
//!
//! let stored = registry.encode(&EventRecord::new("acc-1", Deposited { amount: 5 })).unwrap();
//! let record = registry.decode(stored).unwrap();
//! assert_eq!(record.payload::<Deposited>(), Some(&Deposited { amount: 5 }));
//! ```

use crate::event::{Event, EventRecord, Payload, StoredEvent};
use serde_json::Value;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// An event type tag could not be resolved or its payload converted.
#[derive(Error, Debug)]
pub enum TypeResolutionError {
    /// The stored event carries no type tag.
    #[error("Event type tag is empty")]
    EmptyTag,

    /// No event type is registered under the tag.
    #[error("Unknown event type '{0}'")]
    Unknown(String),

    /// The payload does not match the registered type.
    #[error("Event '{event_type}' payload could not be converted: {reason}")]
    Codec {
        /// Type tag.
        event_type: String,
        /// Underlying error.
        reason: String,
    },
}

type DecodeFn = fn(Value) -> Result<Payload, serde_json::Error>;
type EncodeFn = fn(&(dyn Any + Send + Sync)) -> Option<Result<Value, serde_json::Error>>;

/// Converts the payload of one event type to and from JSON.
#[derive(Clone, Copy)]
pub struct EventCodec {
    event_type: &'static str,
    rust_type: &'static str,
    decode: DecodeFn,
    encode: EncodeFn,
}

impl EventCodec {
    /// Codec for `E`.
    #[must_use]
    pub fn of<E: Event>() -> Self {
        Self {
            event_type: E::EVENT_TYPE,
            rust_type: std::any::type_name::<E>(),
            decode: |data| Ok(Arc::new(serde_json::from_value::<E>(data)?) as Payload),
            encode: |payload| payload.downcast_ref::<E>().map(serde_json::to_value),
        }
    }

    /// The type tag this codec handles.
    #[must_use]
    pub const fn event_type(&self) -> &'static str {
        self.event_type
    }

    /// Decode a JSON payload.
    ///
    /// # Errors
    ///
    /// Returns [`TypeResolutionError::Codec`] if `data` does not decode.
    pub fn decode(&self, data: Value) -> Result<Payload, TypeResolutionError> {
        (self.decode)(data).map_err(|e| self.codec_error(e.to_string()))
    }

    /// Encode a type-erased payload.
    ///
    /// # Errors
    ///
    /// Returns [`TypeResolutionError::Codec`] if the payload is of another
    /// type or cannot be encoded.
    pub fn encode(&self, payload: &(dyn Any + Send + Sync)) -> Result<Value, TypeResolutionError> {
        match (self.encode)(payload) {
            Some(result) => result.map_err(|e| self.codec_error(e.to_string())),
            None => Err(self.codec_error(format!("payload is not a {}", self.rust_type))),
        }
    }

    fn codec_error(&self, reason: String) -> TypeResolutionError {
        TypeResolutionError::Codec {
            event_type: self.event_type.to_string(),
            reason,
        }
    }
}

impl fmt::Debug for EventCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventCodec")
            .field("event_type", &self.event_type)
            .field("rust_type", &self.rust_type)
            .finish_non_exhaustive()
    }
}

/// Resolves event type tags to codecs.
pub trait TypeResolver: Send + Sync {
    /// The codec registered for `event_type`.
    ///
    /// # Errors
    ///
    /// Returns [`TypeResolutionError::EmptyTag`] or
    /// [`TypeResolutionError::Unknown`].
    fn resolve(&self, event_type: &str) -> Result<EventCodec, TypeResolutionError>;

    /// Convert a record to its stored shape.
    ///
    /// # Errors
    ///
    /// Returns [`TypeResolutionError`] if the type is unregistered or the
    /// payload cannot be encoded.
    fn encode(&self, record: &EventRecord) -> Result<StoredEvent, TypeResolutionError> {
        let codec = self.resolve(record.event_type())?;
        Ok(StoredEvent {
            stream_id: record.stream_id().clone(),
            id: record.id(),
            event_type: record.event_type().to_string(),
            event_time: record.event_time(),
            version: record.version(),
            data: codec.encode(record.raw_payload())?,
        })
    }

    /// Rebuild a record from its stored shape.
    ///
    /// # Errors
    ///
    /// Returns [`TypeResolutionError`] if the type is unregistered or the
    /// payload does not decode.
    fn decode(&self, stored: StoredEvent) -> Result<EventRecord, TypeResolutionError> {
        let codec = self.resolve(&stored.event_type)?;
        let payload = codec.decode(stored.data)?;
        Ok(EventRecord::from_parts(
            stored.id,
            stored.stream_id,
            stored.event_type,
            stored.event_time,
            stored.version,
            payload,
        ))
    }
}

/// Explicitly populated [`TypeResolver`].
#[derive(Clone, Default)]
pub struct TypeRegistry {
    codecs: HashMap<&'static str, EventCodec>,
}

impl TypeRegistry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `E` under its [`Event::EVENT_TYPE`].
    ///
    /// Registering a second type under the same tag replaces the first and
    /// logs a warning.
    #[must_use]
    pub fn register<E: Event>(mut self) -> Self {
        if let Some(previous) = self.codecs.insert(E::EVENT_TYPE, EventCodec::of::<E>()) {
            tracing::warn!(
                event_type = E::EVENT_TYPE,
                previous = previous.rust_type,
                replacement = std::any::type_name::<E>(),
                "Event type registered twice"
            );
        }
        self
    }

    /// `true` if `event_type` is registered.
    #[must_use]
    pub fn contains(&self, event_type: &str) -> bool {
        self.codecs.contains_key(event_type)
    }

    /// Registered tags, in no particular order.
    pub fn event_types(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.codecs.keys().copied()
    }

    /// Number of registered types.
    #[must_use]
    pub fn len(&self) -> usize {
        self.codecs.len()
    }

    /// `true` if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.codecs.is_empty()
    }
}

impl TypeResolver for TypeRegistry {
    fn resolve(&self, event_type: &str) -> Result<EventCodec, TypeResolutionError> {
        if event_type.is_empty() {
            return Err(TypeResolutionError::EmptyTag);
        }
        self.codecs
            .get(event_type)
            .copied()
            .ok_or_else(|| TypeResolutionError::Unknown(event_type.to_string()))
    }
}

impl fmt::Debug for TypeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut tags: Vec<_> = self.codecs.keys().collect();
        tags.sort_unstable();
        f.debug_struct("TypeRegistry").field("event_types", &tags).finish()
    }
}
