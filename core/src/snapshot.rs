//! Snapshot mementos and the snapshot store contract.
//!
//! A [`SnapshotMemento`] is a named-value capture of an aggregate's fields.
//! Each aggregate decides which fields go in (see
//! [`Aggregate::capture`](crate::aggregate::Aggregate::capture)), so the
//! snapshot shape is visible in code rather than discovered at runtime.
//! Restoring is tolerant: a field missing from an older snapshot simply keeps
//! its default value.

use crate::stream::{StreamId, ValidationError, Version};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors raised while capturing, restoring or storing snapshots.
#[derive(Error, Debug)]
pub enum SnapshotError {
    /// An argument was invalid (e.g. an empty stream id).
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// A field the base stream needs (`streamId`, `version`) is absent or malformed.
    #[error("Snapshot is missing required field '{0}'")]
    MissingField(&'static str),

    /// A field value could not be converted to or from JSON.
    #[error("Snapshot field '{field}' could not be serialised: {reason}")]
    Serialisation {
        /// Field name.
        field: String,
        /// Underlying serde error.
        reason: String,
    },

    /// Snapshot storage failed.
    #[error("Snapshot storage error: {0}")]
    Storage(String),
}

/// Named-value capture of an aggregate's state.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SnapshotMemento {
    state: BTreeMap<String, serde_json::Value>,
}

impl SnapshotMemento {
    /// An empty memento.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Capture `value` under `name`, replacing any previous value.
    ///
    /// # Errors
    ///
    /// Returns [`SnapshotError::Serialisation`] if `value` cannot be encoded.
    pub fn insert<T: Serialize + ?Sized>(
        &mut self,
        name: &str,
        value: &T,
    ) -> Result<(), SnapshotError> {
        let encoded = serde_json::to_value(value).map_err(|e| SnapshotError::Serialisation {
            field: name.to_string(),
            reason: e.to_string(),
        })?;
        self.state.insert(name.to_string(), encoded);
        Ok(())
    }

    /// The value stored under `name`, if present and decodable as `T`.
    ///
    /// A value that exists but does not decode is logged and treated as absent.
    #[must_use]
    pub fn get<T: DeserializeOwned>(&self, name: &str) -> Option<T> {
        let value = self.state.get(name)?;
        match serde_json::from_value(value.clone()) {
            Ok(decoded) => Some(decoded),
            Err(error) => {
                tracing::warn!(field = name, %error, "Ignoring undecodable snapshot field");
                None
            }
        }
    }

    /// Overwrite `field` with the value stored under `name`, if there is one.
    ///
    /// Returns `true` if the field was restored.
    pub fn restore<T: DeserializeOwned>(&self, name: &str, field: &mut T) -> bool {
        if let Some(value) = self.get(name) {
            *field = value;
            true
        } else {
            false
        }
    }

    /// `true` if a value is stored under `name`.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.state.contains_key(name)
    }

    /// Captured field names, sorted.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.state.keys().map(String::as_str)
    }

    /// Number of captured fields.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.len()
    }

    /// `true` if nothing was captured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.is_empty()
    }
}

/// Latest snapshot of a stream and the version it was taken at.
pub type StoredSnapshot = (Version, SnapshotMemento);

/// Storage for stream snapshots.
///
/// Only the latest snapshot per stream matters; saving replaces the previous one.
///
/// # Dyn Compatibility
///
/// Methods return boxed futures so the store can be shared as
/// `Arc<dyn SnapshotStore>`.
pub trait SnapshotStore: Send + Sync {
    /// Save `memento` as the snapshot of `stream_id` at `version`.
    ///
    /// # Errors
    ///
    /// Returns [`SnapshotError::Storage`] if the backend fails.
    fn save_snapshot(
        &self,
        stream_id: StreamId,
        version: Version,
        memento: SnapshotMemento,
    ) -> Pin<Box<dyn Future<Output = Result<(), SnapshotError>> + Send + '_>>;

    /// Load the latest snapshot of `stream_id`, if any.
    ///
    /// # Errors
    ///
    /// Returns [`SnapshotError`] if the backend fails or the stored snapshot
    /// cannot be decoded.
    fn load_snapshot(
        &self,
        stream_id: StreamId,
    ) -> Pin<Box<dyn Future<Output = Result<Option<StoredSnapshot>, SnapshotError>> + Send + '_>>;
}
