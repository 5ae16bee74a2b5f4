//! In-memory projection testing utilities
//!
//! Provides fast, deterministic testing infrastructure for projections:
//! - [`InMemoryViewRepository`]: `HashMap`-based view storage with etag checks
//! - [`ProjectionTestHarness`]: Fluent API for projection tests

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)] // Test utilities document panics where critical

use eventum_core::config::EventumConfig;
use eventum_core::engine::{ProjectionEngine, ProjectionReport};
use eventum_core::event::EventRecord;
use eventum_core::projection::{EventProjectionError, Projection};
use eventum_core::serialiser::{JsonSerialiser, Serialiser};
use eventum_core::stream::ValidationError;
use eventum_core::view::{
    MaterialisedView, ViewRecord, ViewRepository, ViewRepositoryError, load_view,
};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

/// In-memory view repository for fast, deterministic testing.
///
/// Saves are compare-and-swap on the etag, exactly like the production
/// repository: a record whose etag differs from the stored one is rejected,
/// and every successful save assigns a new etag.
///
/// # Example
///
/// ```
/// use eventum_testing::InMemoryViewRepository;
/// use eventum_core::view::{ViewRecord, ViewRepository};
///
/// # tokio_test::block_on(async {
/// let views = InMemoryViewRepository::new();
///
/// // A record without an etag can only create the view
/// assert!(views.save_record("Profile", ViewRecord::default()).await.unwrap());
/// assert!(!views.save_record("Profile", ViewRecord::default()).await.unwrap());
///
/// let stored = views.load_record("Profile").await.unwrap().unwrap();
/// assert!(stored.etag.is_some());
/// # });
/// ```
#[derive(Clone, Debug, Default)]
pub struct InMemoryViewRepository {
    views: Arc<RwLock<HashMap<String, ViewRecord>>>,
    etags: Arc<AtomicU64>,
}

impl InMemoryViewRepository {
    /// Create a new empty in-memory view repository
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The stored record named `name`, if any.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<ViewRecord> {
        self.views.read().unwrap().get(name).cloned()
    }

    /// Change the stored etag of `name` as if another writer had saved it.
    ///
    /// Returns `false` if no view is stored under `name`.
    pub fn simulate_concurrent_write(&self, name: &str) -> bool {
        let etag = self.next_etag();
        if let Some(record) = self.views.write().unwrap().get_mut(name) {
            record.etag = Some(etag);
            true
        } else {
            false
        }
    }

    /// Clear all views (for test isolation)
    pub fn clear(&self) {
        self.views.write().unwrap().clear();
    }

    /// Get the number of stored views
    #[must_use]
    pub fn len(&self) -> usize {
        self.views.read().unwrap().len()
    }

    /// Check if the repository is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.views.read().unwrap().is_empty()
    }

    /// Names of all stored views, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.views.read().unwrap().keys().cloned().collect();
        names.sort();
        names
    }

    fn next_etag(&self) -> String {
        format!("etag-{}", self.etags.fetch_add(1, Ordering::Relaxed) + 1)
    }
}

impl ViewRepository for InMemoryViewRepository {
    fn load_record(
        &self,
        name: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<ViewRecord>, ViewRepositoryError>> + Send + '_>>
    {
        let name = name.to_string();
        Box::pin(async move {
            ValidationError::require("view name", &name)?;
            Ok(self.views.read().unwrap().get(&name).cloned())
        })
    }

    fn save_record(
        &self,
        name: &str,
        record: ViewRecord,
    ) -> Pin<Box<dyn Future<Output = Result<bool, ViewRepositoryError>> + Send + '_>> {
        let name = name.to_string();
        Box::pin(async move {
            ValidationError::require("view name", &name)?;
            let mut views = self.views.write().unwrap();

            let stored_etag = views.get(&name).and_then(|stored| stored.etag.clone());
            if stored_etag != record.etag {
                return Ok(false);
            }

            let etag = self.next_etag();
            views.insert(
                name.clone(),
                ViewRecord {
                    name,
                    etag: Some(etag),
                    ..record
                },
            );
            Ok(true)
        })
    }
}

/// Test harness for projections providing a fluent testing API.
///
/// Runs a [`ProjectionEngine`] with only `P` registered over an
/// [`InMemoryViewRepository`], so tests exercise the full load → apply → save
/// cycle.
///
/// # Example
///
/// ```ignore
/// let mut harness = ProjectionTestHarness::<UserProfileProjection>::new();
///
/// harness
///     .given_events(vec![registered, renamed])
///     .await?
///     .then_view("UserProfile", |profile| assert_eq!(profile.name, "Grace"))
///     .await;
/// ```
pub struct ProjectionTestHarness<P: Projection> {
    engine: ProjectionEngine,
    views: Arc<InMemoryViewRepository>,
    serialiser: Arc<dyn Serialiser>,
    reports: Vec<ProjectionReport>,
    _projection: std::marker::PhantomData<fn() -> P>,
}

impl<P: Projection> ProjectionTestHarness<P> {
    /// A harness with the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(EventumConfig::default())
    }

    /// A harness using `config` (e.g. a small changeset bound).
    #[must_use]
    pub fn with_config(config: EventumConfig) -> Self {
        let views = Arc::new(InMemoryViewRepository::new());
        let serialiser: Arc<dyn Serialiser> = Arc::new(JsonSerialiser::new());
        let engine = ProjectionEngine::builder(views.clone(), Arc::clone(&serialiser))
            .config(config)
            .register::<P>()
            .build();
        Self {
            engine,
            views,
            serialiser,
            reports: Vec::new(),
            _projection: std::marker::PhantomData,
        }
    }

    /// Project a series of events, in order.
    ///
    /// # Errors
    ///
    /// Returns the first [`EventProjectionError`].
    pub async fn given_events(
        &mut self,
        events: Vec<EventRecord>,
    ) -> Result<&mut Self, EventProjectionError> {
        for event in events {
            self.given_event(event).await?;
        }
        Ok(self)
    }

    /// Project a single event.
    ///
    /// # Errors
    ///
    /// Returns the [`EventProjectionError`] raised by the engine.
    pub async fn given_event(&mut self, event: EventRecord) -> Result<&mut Self, EventProjectionError> {
        let report = self.engine.project(&event).await?;
        self.reports.push(report);
        Ok(self)
    }

    /// Load the view named `name` (a default view if none is stored).
    pub async fn view(&self, name: &str) -> MaterialisedView<P::View> {
        load_view(self.views.as_ref(), self.serialiser.as_ref(), name)
            .await
            .unwrap()
    }

    /// Assert on the state of the view named `name`.
    ///
    /// # Panics
    ///
    /// Panics if the view does not exist or `check` panics.
    #[allow(clippy::panic)] // Intentional panic for test assertions
    pub async fn then_view<F>(&self, name: &str, check: F) -> &Self
    where
        F: FnOnce(&P::View),
    {
        assert!(
            self.views.get(name).is_some(),
            "Expected view '{name}' to exist, but it was not found"
        );
        let view = self.view(name).await;
        check(view.state());
        self
    }

    /// Assert that no view named `name` is stored.
    ///
    /// # Panics
    ///
    /// Panics if the view exists (this is a test assertion).
    #[allow(clippy::panic)] // Intentional panic for test assertions
    pub fn then_no_view(&self, name: &str) -> &Self {
        assert!(
            self.views.get(name).is_none(),
            "Expected no view '{name}', but it was found"
        );
        self
    }

    /// Reports of every projected event, in order.
    #[must_use]
    pub fn reports(&self) -> &[ProjectionReport] {
        &self.reports
    }

    /// The engine under test.
    #[must_use]
    pub const fn engine(&self) -> &ProjectionEngine {
        &self.engine
    }

    /// Get a reference to the underlying view repository.
    #[must_use]
    pub const fn views(&self) -> &Arc<InMemoryViewRepository> {
        &self.views
    }
}

impl<P: Projection> Default for ProjectionTestHarness<P> {
    fn default() -> Self {
        Self::new()
    }
}
