//! Telemetry sink.
//!
//! The repository and the projection engine report metrics, notable events
//! and exceptions through the [`Telemetry`] trait. Every method returns `()`:
//! a telemetry backend that fails must swallow its own errors, so reporting
//! can never change the outcome of a load, save or projection cycle.
//!
//! [`TracingTelemetry`] forwards everything to `tracing` and the `metrics`
//! facade; install any `metrics` recorder (e.g. a Prometheus exporter) in the
//! application to collect the numbers.

use metrics::{Label, describe_counter, describe_histogram};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Events appended to streams.
pub const EVENTS_APPENDED: &str = "eventum_events_appended_total";
/// Events loaded while hydrating streams.
pub const EVENTS_LOADED: &str = "eventum_events_loaded_total";
/// Appends rejected because the stream moved on.
pub const APPEND_CONFLICTS: &str = "eventum_append_conflicts_total";
/// Snapshots written.
pub const SNAPSHOTS_SAVED: &str = "eventum_snapshots_saved_total";
/// Events applied and saved by projections.
pub const PROJECTIONS_APPLIED: &str = "eventum_projections_applied_total";
/// Projection cycles that failed.
pub const PROJECTION_FAILURES: &str = "eventum_projection_failures_total";
/// View saves rejected because the etag changed.
pub const VIEW_CONFLICTS: &str = "eventum_view_conflicts_total";
/// Exceptions reported through [`Telemetry::track_exception`].
pub const EXCEPTIONS: &str = "eventum_exceptions_total";
/// Time to hydrate a stream.
pub const LOAD_DURATION: &str = "eventum_stream_load_duration_seconds";
/// Time to append a stream's changes.
pub const SAVE_DURATION: &str = "eventum_stream_save_duration_seconds";
/// Time to run one projection over one event.
pub const PROJECTION_DURATION: &str = "eventum_projection_duration_seconds";

/// Event tracked when a stream snapshot is written.
pub const SNAPSHOT_TAKEN: &str = "snapshot_taken";

/// Key/value pairs attached to a telemetry item.
pub type Properties<'a> = &'a [(&'static str, String)];

/// Sink for metrics, events and exceptions.
pub trait Telemetry: Send + Sync {
    /// Record a numeric measurement.
    fn track_metric(&self, name: &'static str, value: f64, properties: Properties<'_>);

    /// Record that something notable happened.
    fn track_event(&self, name: &'static str, properties: Properties<'_>);

    /// Record an error that was handled or is about to be returned.
    fn track_exception(
        &self,
        error: &(dyn std::error::Error + 'static),
        properties: Properties<'_>,
    );
}

/// How much [`TracingTelemetry`] reports.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TelemetryVerbosity {
    /// Nothing.
    Off,
    /// Exceptions only.
    Error,
    /// Exceptions, events and metrics.
    #[default]
    Info,
    /// Everything, with each metric also logged at debug level.
    Debug,
}

impl fmt::Display for TelemetryVerbosity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Off => "off",
            Self::Error => "error",
            Self::Info => "info",
            Self::Debug => "debug",
        })
    }
}

impl FromStr for TelemetryVerbosity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "off" | "none" => Ok(Self::Off),
            "error" => Ok(Self::Error),
            "info" => Ok(Self::Info),
            "debug" => Ok(Self::Debug),
            other => Err(format!("unknown telemetry verbosity '{other}'")),
        }
    }
}

/// [`Telemetry`] backed by `tracing` and the `metrics` facade.
///
/// Metrics whose name ends in `_total` are counters; all others are
/// histograms. Properties become metric labels.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingTelemetry {
    verbosity: TelemetryVerbosity,
}

impl TracingTelemetry {
    /// Telemetry reporting at `verbosity`.
    #[must_use]
    pub const fn new(verbosity: TelemetryVerbosity) -> Self {
        Self { verbosity }
    }

    /// The configured verbosity.
    #[must_use]
    pub const fn verbosity(&self) -> TelemetryVerbosity {
        self.verbosity
    }
}

fn labels(properties: Properties<'_>) -> Vec<Label> {
    properties
        .iter()
        .map(|(key, value)| Label::new(*key, value.clone()))
        .collect()
}

impl Telemetry for TracingTelemetry {
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn track_metric(&self, name: &'static str, value: f64, properties: Properties<'_>) {
        if self.verbosity < TelemetryVerbosity::Info {
            return;
        }
        if self.verbosity >= TelemetryVerbosity::Debug {
            tracing::debug!(metric = name, value, ?properties, "Telemetry metric");
        }
        if name.ends_with("_total") {
            metrics::counter!(name, labels(properties)).increment(value.max(0.0) as u64);
        } else {
            metrics::histogram!(name, labels(properties)).record(value);
        }
    }

    fn track_event(&self, name: &'static str, properties: Properties<'_>) {
        if self.verbosity < TelemetryVerbosity::Info {
            return;
        }
        tracing::info!(event = name, ?properties, "Telemetry event");
    }

    fn track_exception(
        &self,
        error: &(dyn std::error::Error + 'static),
        properties: Properties<'_>,
    ) {
        if self.verbosity < TelemetryVerbosity::Error {
            return;
        }
        tracing::error!(error = %error, ?properties, "Telemetry exception");
        metrics::counter!(EXCEPTIONS, labels(properties)).increment(1);
    }
}

/// [`Telemetry`] that drops everything.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopTelemetry;

impl Telemetry for NoopTelemetry {
    fn track_metric(&self, _name: &'static str, _value: f64, _properties: Properties<'_>) {}

    fn track_event(&self, _name: &'static str, _properties: Properties<'_>) {}

    fn track_exception(
        &self,
        _error: &(dyn std::error::Error + 'static),
        _properties: Properties<'_>,
    ) {
    }
}

/// Register descriptions for every metric this crate emits.
///
/// Call once after installing a `metrics` recorder.
pub fn describe_metrics() {
    describe_counter!(EVENTS_APPENDED, "Total number of events appended to streams");
    describe_counter!(EVENTS_LOADED, "Total number of events loaded to hydrate streams");
    describe_counter!(
        APPEND_CONFLICTS,
        "Total number of appends rejected by optimistic concurrency"
    );
    describe_counter!(SNAPSHOTS_SAVED, "Total number of snapshots saved");
    describe_counter!(
        PROJECTIONS_APPLIED,
        "Total number of events applied and saved by projections"
    );
    describe_counter!(PROJECTION_FAILURES, "Total number of failed projection cycles");
    describe_counter!(
        VIEW_CONFLICTS,
        "Total number of view saves rejected by optimistic concurrency"
    );
    describe_counter!(EXCEPTIONS, "Total number of reported exceptions");
    describe_histogram!(LOAD_DURATION, "Time taken to hydrate a stream");
    describe_histogram!(SAVE_DURATION, "Time taken to append a stream's changes");
    describe_histogram!(
        PROJECTION_DURATION,
        "Time taken to load, apply and save one view"
    );
}
