//! Projections: folding events into materialised views.
//!
//! A projection type implements [`Projection`]: it names its view type,
//! registers one handler per event type it reacts to, and decides which view
//! instance an event lands in. An [`EventProjection`] binds a loaded
//! [`MaterialisedView`] and applies events to it one at a time.
//!
//! # Changeset
//!
//! Every applied event appends a marker `"{version},{hash}"` to the view's
//! changeset, where `hash` is the base64 SHA-256 of the serialised view state
//! after the event. The chain records which events touched the view and what
//! the view looked like after each of them. It holds at most
//! `max_changeset_size` markers, oldest evicted first, and a marker equal to
//! the current last one is not appended again.
//!
//! # Example
//!
//! ```
//! use eventum_core::event::{Event, EventRecord};
//! use eventum_core::handler::Handlers;
//! use eventum_core::projection::{EventProjection, Projection};
//! use eventum_core::serialiser::JsonSerialiser;
//! use eventum_core::view::MaterialisedView;
//! use serde::{Deserialize, Serialize};
//! use std::sync::{Arc, OnceLock};
//!
//! #[derive(Debug, Serialize, Deserialize)]
//! struct UserRegistered { name: String, age: u32 }
//! impl Event for UserRegistered { const EVENT_TYPE: &'static str = "UserRegistered.v1"; }
//!
//! #[derive(Debug, Default, Serialize, Deserialize)]
//! struct UserProfile { name: String, age: u32 }
//!
//! struct UserProfileProjection;
//!
//! impl Projection for UserProfileProjection {
//!     const NAME: &'static str = "user-profile";
//!     type View = UserProfile;
//!
//!     fn handlers() -> &'static Handlers<UserProfile> {
//!         static HANDLERS: OnceLock<Handlers<UserProfile>> = OnceLock::new();
//!         HANDLERS.get_or_init(|| {
//!             Handlers::new().on(|view: &mut UserProfile, e: &UserRegistered| {
//!                 view.name.clone_from(&e.name);
//!                 view.age = e.age;
//!             })
//!         })
//!     }
//! }
//!
//! let mut projection = EventProjection::<UserProfileProjection>::new(
//!     MaterialisedView::default(),
//!     Arc::new(JsonSerialiser::new()),
//!     10,
//! );
//! projection
//!     .apply_change(&EventRecord::new("S", UserRegistered { name: "Ada".into(), age: 30 }))
//!     .unwrap();
//!
//! assert_eq!(projection.view().changeset().len(), 1);
//! assert!(projection.view().view().contains(r#""name":"Ada""#));
//! ```

use crate::event::EventRecord;
use crate::handler::{DispatchFailure, Handlers};
use crate::serialiser::{SerialisationError, Serialiser};
use crate::stream::{StreamId, ValidationError, Version};
use crate::view::{MaterialisedView, ViewRepositoryError};
use base64::Engine as _;
use serde::Serialize;
use serde::de::DeserializeOwned;
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Default bound on the changeset length.
pub const DEFAULT_MAX_CHANGESET_SIZE: usize = 10;

/// What went wrong while projecting an event.
#[derive(Error, Debug)]
pub enum ProjectionFailure {
    /// No usable handler for the event, or the handler failed.
    #[error("handler dispatch failed: {0}")]
    Dispatch(#[source] DispatchFailure),

    /// The view state could not be serialised.
    #[error("view state could not be serialised: {0}")]
    Serialisation(#[source] SerialisationError),

    /// The view could not be loaded.
    #[error("view could not be loaded: {0}")]
    Load(#[source] ViewRepositoryError),

    /// The view could not be saved.
    #[error("view could not be saved: {0}")]
    Save(#[source] ViewRepositoryError),

    /// The view changed since it was loaded.
    #[error("view '{view}' was modified concurrently")]
    Conflict {
        /// View name.
        view: String,
    },

    /// The projection computed an empty view name.
    #[error("invalid view name: {0}")]
    InvalidViewName(#[source] ValidationError),
}

impl ProjectionFailure {
    /// Short label for logs and telemetry.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Dispatch(_) => "dispatch",
            Self::Serialisation(_) => "serialisation",
            Self::Load(_) => "load",
            Self::Save(_) => "save",
            Self::Conflict { .. } => "conflict",
            Self::InvalidViewName(_) => "invalid_view_name",
        }
    }
}

/// A projection failed to handle an event.
///
/// Names the projection, the view type and the event; the cause is in
/// [`EventProjectionError::kind`].
#[derive(Error, Debug)]
#[error(
    "Projection '{projection}' ({view_type}) failed on event '{event_type}' #{version} of stream '{stream_id}': {kind}"
)]
pub struct EventProjectionError {
    /// Projection name.
    pub projection: &'static str,
    /// Short name of the view type.
    pub view_type: &'static str,
    /// Type tag of the event.
    pub event_type: String,
    /// Stream the event belongs to.
    pub stream_id: StreamId,
    /// Version of the event.
    pub version: Version,
    /// Cause.
    #[source]
    pub kind: ProjectionFailure,
}

impl EventProjectionError {
    /// An error for projection `P` handling `record`.
    #[must_use]
    pub fn new<P: Projection>(record: &EventRecord, kind: ProjectionFailure) -> Self {
        Self {
            projection: P::NAME,
            view_type: short_type_name::<P::View>(),
            event_type: record.event_type().to_string(),
            stream_id: record.stream_id().clone(),
            version: record.version(),
            kind,
        }
    }

    /// `true` if the failure was an etag conflict.
    #[must_use]
    pub const fn is_conflict(&self) -> bool {
        matches!(self.kind, ProjectionFailure::Conflict { .. })
    }
}

/// A read model built from events.
pub trait Projection: Send + Sync + 'static {
    /// Unique projection name, used in logs, errors and routing reports.
    const NAME: &'static str;

    /// Typed state of the views this projection maintains.
    type View: Serialize + DeserializeOwned + Default + fmt::Debug + Send + Sync + 'static;

    /// The projection's handler table, built once.
    fn handlers() -> &'static Handlers<Self::View>;

    /// Name of the view instance `record` should be applied to.
    ///
    /// Defaults to the short name of the view type, so every event lands in
    /// one shared view. Override it to keep one view per stream.
    fn view_name(record: &EventRecord) -> String {
        let _ = record;
        short_type_name::<Self::View>().to_string()
    }
}

/// Last path segment of `T`'s type name, without generic arguments.
#[must_use]
pub fn short_type_name<T: ?Sized>() -> &'static str {
    let full = std::any::type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

/// Changeset marker for a view serialised as `payload` after the event at `version`.
#[must_use]
pub fn changeset_marker(version: Version, payload: &str) -> String {
    let digest = Sha256::digest(payload.as_bytes());
    format!(
        "{version},{}",
        base64::engine::general_purpose::STANDARD.encode(digest)
    )
}

/// A loaded view bound to projection `P`.
pub struct EventProjection<P: Projection> {
    view: MaterialisedView<P::View>,
    serialiser: Arc<dyn Serialiser>,
    max_changeset_size: usize,
}

impl<P: Projection> EventProjection<P> {
    /// Bind `view` to the projection.
    ///
    /// A `max_changeset_size` of 0 is treated as 1.
    #[must_use]
    pub fn new(
        view: MaterialisedView<P::View>,
        serialiser: Arc<dyn Serialiser>,
        max_changeset_size: usize,
    ) -> Self {
        Self {
            view,
            serialiser,
            max_changeset_size: max_changeset_size.max(1),
        }
    }

    /// The bound view.
    #[must_use]
    pub const fn view(&self) -> &MaterialisedView<P::View> {
        &self.view
    }

    /// Release the bound view.
    #[must_use]
    pub fn into_view(self) -> MaterialisedView<P::View> {
        self.view
    }

    /// Bound on the changeset length.
    #[must_use]
    pub const fn max_changeset_size(&self) -> usize {
        self.max_changeset_size
    }

    /// Apply `record` to the view and extend the changeset.
    ///
    /// # Errors
    ///
    /// Returns [`EventProjectionError`] with kind
    /// [`ProjectionFailure::Dispatch`] if no handler exists or the handler
    /// fails, or [`ProjectionFailure::Serialisation`] if the state cannot be
    /// serialised. The payload and changeset are unchanged on error.
    pub fn apply_change(&mut self, record: &EventRecord) -> Result<(), EventProjectionError> {
        P::handlers()
            .dispatch(&mut self.view.state, record)
            .map_err(|cause| {
                tracing::error!(
                    projection = P::NAME,
                    event_type = record.event_type(),
                    stream_id = %record.stream_id(),
                    cause = cause.label(),
                    error = %cause,
                    "Projection handler failed"
                );
                EventProjectionError::new::<P>(record, ProjectionFailure::Dispatch(cause))
            })?;

        let payload = serde_json::to_value(&self.view.state)
            .map_err(SerialisationError::from)
            .and_then(|value| self.serialiser.serialise(&value))
            .map_err(|e| EventProjectionError::new::<P>(record, ProjectionFailure::Serialisation(e)))?;

        let marker = changeset_marker(record.version(), &payload);
        tracing::trace!(
            projection = P::NAME,
            event_type = record.event_type(),
            version = %record.version(),
            marker = %marker,
            "Applied event to view"
        );
        self.view.view = payload;
        self.view.push_marker(marker, self.max_changeset_size);
        Ok(())
    }
}

impl<P: Projection> fmt::Debug for EventProjection<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventProjection")
            .field("projection", &P::NAME)
            .field("view", &self.view)
            .field("max_changeset_size", &self.max_changeset_size)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::event::Event;
    use crate::serialiser::JsonSerialiser;
    use proptest::prelude::*;
    use serde::Deserialize;
    use std::sync::OnceLock;

    #[derive(Debug, Serialize, Deserialize)]
    struct NameSet(String);
    impl Event for NameSet {
        const EVENT_TYPE: &'static str = "NameSet.v1";
    }

    #[derive(Debug, Serialize, Deserialize)]
    struct Touched;
    impl Event for Touched {
        const EVENT_TYPE: &'static str = "Touched.v1";
    }

    #[derive(Debug, Serialize, Deserialize)]
    struct Unrelated;
    impl Event for Unrelated {
        const EVENT_TYPE: &'static str = "Unrelated.v1";
    }

    #[derive(Debug, Default, Serialize, Deserialize)]
    struct Card {
        name: String,
    }

    struct CardProjection;

    impl Projection for CardProjection {
        const NAME: &'static str = "card";
        type View = Card;

        fn handlers() -> &'static Handlers<Card> {
            static HANDLERS: OnceLock<Handlers<Card>> = OnceLock::new();
            HANDLERS.get_or_init(|| {
                Handlers::new()
                    .on(|card: &mut Card, e: &NameSet| card.name.clone_from(&e.0))
                    .on(|_: &mut Card, _: &Touched| {})
            })
        }
    }

    fn projection(max: usize) -> EventProjection<CardProjection> {
        EventProjection::new(MaterialisedView::default(), Arc::new(JsonSerialiser::new()), max)
    }

    fn name_set(name: &str, version: u64) -> EventRecord {
        EventRecord::new("c-1", NameSet(name.into())).with_version(Version::new(version))
    }

    #[test]
    fn marker_is_version_and_base64_sha256() {
        // SHA-256("abc")
        assert_eq!(
            changeset_marker(Version::new(3), "abc"),
            "3,ungWv48Bz+pBQUDeXa4iI7ADYaOWF3qctBD/YfIAFa0="
        );
    }

    #[test]
    fn short_type_name_strips_path_and_generics() {
        assert_eq!(short_type_name::<Card>(), "Card");
        assert_eq!(short_type_name::<Vec<Card>>(), "Vec");
    }

    #[test]
    fn default_view_name_is_view_type_name() {
        assert_eq!(CardProjection::view_name(&name_set("a", 1)), "Card");
    }

    #[test]
    fn apply_serialises_state_and_appends_marker() {
        let mut projection = projection(10);
        projection.apply_change(&name_set("Ada", 1)).unwrap();

        let view = projection.view();
        assert_eq!(view.view(), r#"{"name":"Ada"}"#);
        assert_eq!(
            view.changeset(),
            [changeset_marker(Version::new(1), r#"{"name":"Ada"}"#)]
        );
        assert!(view.etag().is_none());
    }

    #[test]
    fn unhandled_event_is_projection_error() {
        let mut projection = projection(10);
        let record = EventRecord::new("c-1", Unrelated).with_version(Version::new(1));
        let err = projection.apply_change(&record).unwrap_err();

        assert_eq!(err.projection, "card");
        assert_eq!(err.view_type, "Card");
        assert_eq!(err.event_type, "Unrelated.v1");
        assert!(matches!(
            err.kind,
            ProjectionFailure::Dispatch(DispatchFailure::MissingHandler)
        ));
        assert!(projection.view().changeset().is_empty());
    }

    #[test]
    fn marker_already_in_changeset_is_not_repeated() {
        let mut projection = projection(10);
        projection.apply_change(&name_set("a", 1)).unwrap();
        projection.apply_change(&name_set("b", 2)).unwrap();
        projection.apply_change(&name_set("a", 1)).unwrap();

        let changeset = projection.view().changeset();
        assert_eq!(changeset.len(), 2);
        assert!(changeset[0].starts_with("1,"));
        assert!(changeset[1].starts_with("2,"));
        assert_eq!(projection.view().view(), r#"{"name":"a"}"#);
    }

    #[test]
    fn identical_state_at_same_version_is_not_repeated() {
        let mut projection = projection(10);
        projection.apply_change(&name_set("Ada", 1)).unwrap();
        let touched = EventRecord::new("c-1", Touched).with_version(Version::new(1));
        projection.apply_change(&touched).unwrap();

        assert_eq!(projection.view().changeset().len(), 1);
    }

    #[test]
    fn oldest_marker_is_evicted() {
        let mut projection = projection(2);
        for (version, name) in [(1, "a"), (2, "b"), (3, "c")] {
            projection.apply_change(&name_set(name, version)).unwrap();
        }

        let changeset = projection.view().changeset();
        assert_eq!(changeset.len(), 2);
        assert!(changeset[0].starts_with("2,"));
        assert!(changeset[1].starts_with("3,"));
    }

    #[test]
    fn order_of_events_changes_final_marker() {
        let mut forward = projection(10);
        forward.apply_change(&name_set("a", 1)).unwrap();
        forward.apply_change(&name_set("b", 2)).unwrap();

        let mut backward = projection(10);
        backward.apply_change(&name_set("b", 1)).unwrap();
        backward.apply_change(&name_set("a", 2)).unwrap();

        assert_ne!(
            forward.view().last_marker(),
            backward.view().last_marker()
        );
    }

    proptest! {
        #[test]
        fn changeset_never_exceeds_bound(
            max in 1_usize..8,
            names in proptest::collection::vec("[a-z]{1,4}", 0..40),
        ) {
            let mut projection = projection(max);
            for (i, name) in names.iter().enumerate() {
                projection.apply_change(&name_set(name, i as u64 + 1)).unwrap();
                prop_assert!(projection.view().changeset().len() <= max);
            }
        }

        #[test]
        fn changeset_markers_stay_unique(
            steps in proptest::collection::vec(("[a-c]", 1_u64..4), 0..30),
        ) {
            let mut projection = projection(10);
            for (name, version) in &steps {
                projection.apply_change(&name_set(name, *version)).unwrap();
            }
            let changeset = projection.view().changeset();
            let distinct: std::collections::HashSet<_> = changeset.iter().collect();
            prop_assert_eq!(distinct.len(), changeset.len());
        }
    }
}
