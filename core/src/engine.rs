//! Projection engine.
//!
//! The engine routes each incoming event to every registered projection that
//! has a handler for its type, and runs load → apply → save for each of them
//! in registration order. Saves are guarded by the view's etag; a rejected
//! save is an [`EventProjectionError`] of kind
//! [`ProjectionFailure::Conflict`]. The engine never retries: the caller
//! decides whether to reload and project again.
//!
//! # Example
//!
//! ```no_run
//! # use eventum_core::engine::ProjectionEngine;
//! # use eventum_core::event::EventRecord;
//! # use eventum_core::projection::{EventProjectionError, Projection};
//! # use eventum_core::serialiser::JsonSerialiser;
//! # use eventum_core::view::ViewRepository;
//! # use std::sync::Arc;
//! # async fn example<P: Projection>(
//! #     views: Arc<dyn ViewRepository>,
//! #     record: EventRecord,
//! # ) -> Result<(), EventProjectionError> {
//! let engine = ProjectionEngine::builder(views, Arc::new(JsonSerialiser::new()))
//!     .register::<P>()
//!     .build();
//!
//! let report = engine.project(&record).await?;
//! println!("updated {} views", report.len());
//! # Ok(())
//! # }
//! ```

use crate::config::EventumConfig;
use crate::event::EventRecord;
use crate::projection::{EventProjection, EventProjectionError, Projection, ProjectionFailure};
use crate::serialiser::Serialiser;
use crate::stream::ValidationError;
use crate::telemetry::{self, Telemetry, TracingTelemetry};
use crate::view::{ViewRepository, load_view, save_view};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;

type ProjectFuture<'a> = Pin<Box<dyn Future<Output = Result<String, EventProjectionError>> + Send + 'a>>;
type ProjectFn = for<'a> fn(&'a ProjectionEngine, &'a EventRecord) -> ProjectFuture<'a>;

struct RegisteredProjection {
    name: &'static str,
    event_types: Vec<&'static str>,
    run: ProjectFn,
}

/// A view updated by one projection during [`ProjectionEngine::project`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommittedView {
    /// Projection that updated the view.
    pub projection: &'static str,
    /// Name of the saved view.
    pub view: String,
}

/// Outcome of projecting one event.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ProjectionReport {
    committed: Vec<CommittedView>,
}

impl ProjectionReport {
    /// Views saved, in the order the projections ran.
    #[must_use]
    pub fn committed(&self) -> &[CommittedView] {
        &self.committed
    }

    /// Number of views saved.
    #[must_use]
    pub fn len(&self) -> usize {
        self.committed.len()
    }

    /// `true` if no projection handled the event.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.committed.is_empty()
    }
}

/// Builder for [`ProjectionEngine`].
pub struct ProjectionEngineBuilder {
    repository: Arc<dyn ViewRepository>,
    serialiser: Arc<dyn Serialiser>,
    telemetry: Option<Arc<dyn Telemetry>>,
    config: EventumConfig,
    projections: Vec<RegisteredProjection>,
}

impl ProjectionEngineBuilder {
    /// Register projection `P`.
    ///
    /// Projections run in registration order. Registering the same
    /// projection twice is ignored.
    #[must_use]
    pub fn register<P: Projection>(mut self) -> Self {
        if self.projections.iter().any(|p| p.name == P::NAME) {
            tracing::warn!(projection = P::NAME, "Projection registered twice, ignoring");
            return self;
        }
        let mut event_types: Vec<_> = P::handlers().event_types().collect();
        event_types.sort_unstable();
        self.projections.push(RegisteredProjection {
            name: P::NAME,
            event_types,
            run: project_one::<P>,
        });
        self
    }

    /// Report through `telemetry` instead of [`TracingTelemetry`].
    #[must_use]
    pub fn telemetry(mut self, telemetry: Arc<dyn Telemetry>) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    /// Use `config` (changeset bound, telemetry verbosity).
    #[must_use]
    pub const fn config(mut self, config: EventumConfig) -> Self {
        self.config = config;
        self
    }

    /// Build the engine and its routing table.
    #[must_use]
    pub fn build(self) -> ProjectionEngine {
        let mut routes: HashMap<&'static str, Vec<usize>> = HashMap::new();
        for (index, projection) in self.projections.iter().enumerate() {
            for event_type in &projection.event_types {
                routes.entry(*event_type).or_default().push(index);
            }
        }
        tracing::debug!(
            projections = self.projections.len(),
            event_types = routes.len(),
            "Built projection engine"
        );
        let telemetry = self.telemetry.unwrap_or_else(|| {
            Arc::new(TracingTelemetry::new(self.config.telemetry_verbosity))
        });
        ProjectionEngine {
            repository: self.repository,
            serialiser: self.serialiser,
            telemetry,
            max_changeset_size: self.config.max_changeset_size,
            projections: self.projections,
            routes,
        }
    }
}

/// Routes events to projections and persists the views they update.
pub struct ProjectionEngine {
    repository: Arc<dyn ViewRepository>,
    serialiser: Arc<dyn Serialiser>,
    telemetry: Arc<dyn Telemetry>,
    max_changeset_size: usize,
    projections: Vec<RegisteredProjection>,
    routes: HashMap<&'static str, Vec<usize>>,
}

impl ProjectionEngine {
    /// Start building an engine over `repository`, serialising views with
    /// `serialiser`.
    #[must_use]
    pub fn builder(
        repository: Arc<dyn ViewRepository>,
        serialiser: Arc<dyn Serialiser>,
    ) -> ProjectionEngineBuilder {
        ProjectionEngineBuilder {
            repository,
            serialiser,
            telemetry: None,
            config: EventumConfig::default(),
            projections: Vec::new(),
        }
    }

    /// Names of the projections an event of type `event_type` is routed to,
    /// in the order they run.
    #[must_use]
    pub fn projections_for(&self, event_type: &str) -> Vec<&'static str> {
        self.routes
            .get(event_type)
            .map(|indices| indices.iter().map(|&i| self.projections[i].name).collect())
            .unwrap_or_default()
    }

    /// Names of all registered projections, in registration order.
    pub fn projections(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.projections.iter().map(|p| p.name)
    }

    /// Project `record` through every projection that handles its type.
    ///
    /// For each projection: compute the view name, load the view (a fresh
    /// one if none is stored), apply the event and save the view with its
    /// etag. Processing stops at the first failure. Views saved before the
    /// failure stay saved.
    ///
    /// An event no projection handles yields an empty report.
    ///
    /// # Errors
    ///
    /// Returns the first [`EventProjectionError`]. A view modified since it
    /// was loaded gives [`ProjectionFailure::Conflict`].
    pub async fn project(
        &self,
        record: &EventRecord,
    ) -> Result<ProjectionReport, EventProjectionError> {
        let mut report = ProjectionReport::default();
        let Some(indices) = self.routes.get(record.event_type()) else {
            tracing::debug!(
                event_type = record.event_type(),
                stream_id = %record.stream_id(),
                "No projection handles event"
            );
            return Ok(report);
        };

        for &index in indices {
            let projection = &self.projections[index];
            let started = Instant::now();
            let props = [
                ("projection", projection.name.to_string()),
                ("event_type", record.event_type().to_string()),
            ];

            match (projection.run)(self, record).await {
                Ok(view) => {
                    self.telemetry
                        .track_metric(telemetry::PROJECTIONS_APPLIED, 1.0, &props);
                    self.telemetry.track_metric(
                        telemetry::PROJECTION_DURATION,
                        started.elapsed().as_secs_f64(),
                        &props,
                    );
                    tracing::debug!(
                        projection = projection.name,
                        view = %view,
                        event_type = record.event_type(),
                        version = %record.version(),
                        "Projected event"
                    );
                    report.committed.push(CommittedView {
                        projection: projection.name,
                        view,
                    });
                }
                Err(error) => {
                    if error.is_conflict() {
                        tracing::warn!(
                            projection = projection.name,
                            event_type = record.event_type(),
                            error = %error,
                            "View was modified concurrently"
                        );
                        self.telemetry
                            .track_metric(telemetry::VIEW_CONFLICTS, 1.0, &props);
                    } else {
                        tracing::error!(
                            projection = projection.name,
                            event_type = record.event_type(),
                            failure = error.kind.label(),
                            error = %error,
                            "Projection failed"
                        );
                    }
                    self.telemetry
                        .track_metric(telemetry::PROJECTION_FAILURES, 1.0, &props);
                    self.telemetry.track_exception(&error, &props);
                    return Err(error);
                }
            }
        }
        Ok(report)
    }
}

impl fmt::Debug for ProjectionEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProjectionEngine")
            .field("projections", &self.projections().collect::<Vec<_>>())
            .field("max_changeset_size", &self.max_changeset_size)
            .finish_non_exhaustive()
    }
}

impl fmt::Debug for ProjectionEngineBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProjectionEngineBuilder")
            .field(
                "projections",
                &self.projections.iter().map(|p| p.name).collect::<Vec<_>>(),
            )
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

fn project_one<'a, P: Projection>(
    engine: &'a ProjectionEngine,
    record: &'a EventRecord,
) -> ProjectFuture<'a> {
    Box::pin(async move {
        let fail = |kind| EventProjectionError::new::<P>(record, kind);

        let name = P::view_name(record);
        ValidationError::require("view name", &name)
            .map_err(|e| fail(ProjectionFailure::InvalidViewName(e)))?;

        let view = load_view::<P::View>(engine.repository.as_ref(), engine.serialiser.as_ref(), &name)
            .await
            .map_err(|e| fail(ProjectionFailure::Load(e)))?;

        let mut projection =
            EventProjection::<P>::new(view, Arc::clone(&engine.serialiser), engine.max_changeset_size);
        projection.apply_change(record)?;

        let saved = save_view(engine.repository.as_ref(), &name, projection.view())
            .await
            .map_err(|e| fail(ProjectionFailure::Save(e)))?;
        if !saved {
            return Err(fail(ProjectionFailure::Conflict { view: name }));
        }
        Ok(name)
    })
}
