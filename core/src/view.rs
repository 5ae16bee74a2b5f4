//! Materialised views and the view repository contract.
//!
//! A [`MaterialisedView`] pairs a projection's typed state with the
//! bookkeeping the core maintains for it: the etag used for optimistic
//! concurrency, the serialised `view` payload and the bounded changeset hash
//! chain. Repositories persist views as [`ViewRecord`]s.

use crate::serialiser::{SerialisationError, Serialiser};
use crate::stream::ValidationError;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors raised by view repositories.
#[derive(Error, Debug)]
pub enum ViewRepositoryError {
    /// The view name was empty.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// The stored view payload could not be decoded into the view type, or
    /// the view state could not be encoded.
    #[error("View '{name}' could not be (de)serialised: {reason}")]
    Serialisation {
        /// View name.
        name: String,
        /// Underlying error.
        reason: String,
    },

    /// Backend failure.
    #[error("View storage error: {0}")]
    Storage(String),
}

/// Persisted shape of a view.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewRecord {
    /// View name.
    pub name: String,
    /// Changeset markers, oldest first.
    pub changeset: Vec<String>,
    /// Serialised view state.
    pub view: String,
    /// Concurrency token of the stored version, `None` if never stored.
    pub etag: Option<String>,
}

/// A view's typed state together with its bookkeeping.
///
/// A fresh view (see [`Default`]) has no etag, an empty changeset and an
/// empty payload.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MaterialisedView<V> {
    pub(crate) etag: Option<String>,
    pub(crate) changeset: Vec<String>,
    pub(crate) view: String,
    pub(crate) state: V,
}

impl<V> MaterialisedView<V> {
    /// A fresh view wrapping `state`.
    #[must_use]
    pub fn new(state: V) -> Self {
        Self {
            etag: None,
            changeset: Vec::new(),
            view: String::new(),
            state,
        }
    }

    /// Concurrency token this view was loaded with.
    #[must_use]
    pub fn etag(&self) -> Option<&str> {
        self.etag.as_deref()
    }

    /// Changeset markers, oldest first.
    #[must_use]
    pub fn changeset(&self) -> &[String] {
        &self.changeset
    }

    /// The most recent changeset marker.
    #[must_use]
    pub fn last_marker(&self) -> Option<&str> {
        self.changeset.last().map(String::as_str)
    }

    /// Serialised payload of the state as of the last applied event.
    #[must_use]
    pub fn view(&self) -> &str {
        &self.view
    }

    /// Typed view state.
    #[must_use]
    pub const fn state(&self) -> &V {
        &self.state
    }

    /// Unwrap into the typed state.
    #[must_use]
    pub fn into_state(self) -> V {
        self.state
    }

    /// Append `marker` unless the changeset already holds it, then evict the
    /// oldest markers until at most `max` remain.
    pub(crate) fn push_marker(&mut self, marker: String, max: usize) {
        if !self.changeset.contains(&marker) {
            self.changeset.push(marker);
        }
        if self.changeset.len() > max {
            let excess = self.changeset.len() - max;
            self.changeset.drain(..excess);
        }
    }
}

impl<V: DeserializeOwned + Default> MaterialisedView<V> {
    /// Rebuild a view from its stored record.
    ///
    /// An empty payload yields the default state.
    ///
    /// # Errors
    ///
    /// Returns [`ViewRepositoryError::Serialisation`] if the payload cannot be
    /// decoded into `V`.
    pub fn from_record(
        record: ViewRecord,
        serialiser: &dyn Serialiser,
    ) -> Result<Self, ViewRepositoryError> {
        let state = if record.view.is_empty() {
            V::default()
        } else {
            serialiser
                .deserialise(&record.view)
                .and_then(|value| serde_json::from_value(value).map_err(SerialisationError))
                .map_err(|e| ViewRepositoryError::Serialisation {
                    name: record.name.clone(),
                    reason: e.to_string(),
                })?
        };
        Ok(Self {
            etag: record.etag,
            changeset: record.changeset,
            view: record.view,
            state,
        })
    }
}

impl<V> MaterialisedView<V> {
    /// The record to persist for this view under `name`.
    #[must_use]
    pub fn to_record(&self, name: &str) -> ViewRecord {
        ViewRecord {
            name: name.to_string(),
            changeset: self.changeset.clone(),
            view: self.view.clone(),
            etag: self.etag.clone(),
        }
    }
}

/// Storage for materialised views.
///
/// # Concurrency
///
/// [`ViewRepository::save_record`] is a compare-and-swap on the etag: it
/// stores the record only if the stored etag still equals `record.etag`
/// (`None` meaning "no view stored yet") and assigns a fresh etag on success.
///
/// # Dyn Compatibility
///
/// Methods return boxed futures so the repository can be shared as
/// `Arc<dyn ViewRepository>`.
pub trait ViewRepository: Send + Sync {
    /// Load the view stored under `name`, if any.
    ///
    /// # Errors
    ///
    /// Returns [`ViewRepositoryError`] for an empty name or a backend failure.
    fn load_record(
        &self,
        name: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<ViewRecord>, ViewRepositoryError>> + Send + '_>>;

    /// Store `record` under `name` if its etag matches the stored one.
    ///
    /// Returns `Ok(false)` on an etag mismatch, leaving storage unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`ViewRepositoryError`] for an empty name or a backend failure.
    fn save_record(
        &self,
        name: &str,
        record: ViewRecord,
    ) -> Pin<Box<dyn Future<Output = Result<bool, ViewRepositoryError>> + Send + '_>>;
}

/// Load the view stored under `name`, or a fresh default view if none is.
///
/// # Errors
///
/// Returns [`ViewRepositoryError`] for an empty name, a backend failure or a
/// payload that does not decode into `V`. A missing view is never an error.
pub async fn load_view<V>(
    repository: &dyn ViewRepository,
    serialiser: &dyn Serialiser,
    name: &str,
) -> Result<MaterialisedView<V>, ViewRepositoryError>
where
    V: DeserializeOwned + Default,
{
    ValidationError::require("view name", name)?;
    match repository.load_record(name).await? {
        Some(record) => MaterialisedView::from_record(record, serialiser),
        None => Ok(MaterialisedView::default()),
    }
}

/// Save `view` under `name`, guarded by the etag it was loaded with.
///
/// Returns `Ok(false)` if the stored etag no longer matches.
///
/// # Errors
///
/// Returns [`ViewRepositoryError`] for an empty name or a backend failure.
pub async fn save_view<V>(
    repository: &dyn ViewRepository,
    name: &str,
    view: &MaterialisedView<V>,
) -> Result<bool, ViewRepositoryError> {
    ValidationError::require("view name", name)?;
    repository.save_record(name, view.to_record(name)).await
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::serialiser::JsonSerialiser;

    #[derive(Debug, Default, PartialEq, Deserialize)]
    struct Profile {
        name: String,
        age: u32,
    }

    #[test]
    fn default_view_is_fresh() {
        let view = MaterialisedView::<Profile>::default();
        assert!(view.etag().is_none());
        assert!(view.changeset().is_empty());
        assert!(view.view().is_empty());
    }

    #[test]
    fn push_marker_skips_duplicates_and_evicts_oldest() {
        let mut view = MaterialisedView::new(());
        view.push_marker("1,a".into(), 2);
        view.push_marker("1,a".into(), 2);
        assert_eq!(view.changeset(), ["1,a"]);

        view.push_marker("2,b".into(), 2);
        view.push_marker("3,c".into(), 2);
        assert_eq!(view.changeset(), ["2,b", "3,c"]);
        assert_eq!(view.last_marker(), Some("3,c"));
    }

    #[test]
    fn push_marker_skips_marker_found_further_back() {
        let mut view = MaterialisedView::new(());
        view.push_marker("1,a".into(), 10);
        view.push_marker("2,b".into(), 10);
        view.push_marker("1,a".into(), 10);
        assert_eq!(view.changeset(), ["1,a", "2,b"]);
    }

    #[test]
    fn push_marker_shrinks_oversized_changeset() {
        let mut view = MaterialisedView::new(());
        for i in 0..5 {
            view.push_marker(format!("{i},x"), 10);
        }
        view.push_marker("5,x".into(), 3);
        assert_eq!(view.changeset(), ["3,x", "4,x", "5,x"]);
    }

    #[test]
    fn from_record_decodes_state() {
        let record = ViewRecord {
            name: "Profile".into(),
            changeset: vec!["1,h".into()],
            view: r#"{"name":"Ada","age":30}"#.into(),
            etag: Some("e1".into()),
        };
        let view = MaterialisedView::<Profile>::from_record(record, &JsonSerialiser::new()).unwrap();

        assert_eq!(view.etag(), Some("e1"));
        assert_eq!(
            view.state(),
            &Profile {
                name: "Ada".into(),
                age: 30
            }
        );
        assert_eq!(view.to_record("Profile").etag.as_deref(), Some("e1"));
    }

    #[test]
    fn from_record_rejects_mismatched_payload() {
        let record = ViewRecord {
            name: "Profile".into(),
            view: r#"{"name":7}"#.into(),
            ..ViewRecord::default()
        };
        let err =
            MaterialisedView::<Profile>::from_record(record, &JsonSerialiser::new()).unwrap_err();
        assert!(matches!(err, ViewRepositoryError::Serialisation { .. }));
    }
}
