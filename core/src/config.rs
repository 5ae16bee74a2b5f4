//! Runtime configuration.
//!
//! Values should be provided by the application. [`EventumConfig::from_env`]
//! reads them from `EVENTUM_*` environment variables, falling back to the
//! defaults for anything unset.

use crate::projection::DEFAULT_MAX_CHANGESET_SIZE;
use crate::telemetry::TelemetryVerbosity;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Environment variable for [`EventumConfig::max_changeset_size`].
pub const ENV_MAX_CHANGESET_SIZE: &str = "EVENTUM_MAX_CHANGESET_SIZE";
/// Environment variable for [`EventumConfig::snapshot_frequency`].
pub const ENV_SNAPSHOT_FREQUENCY: &str = "EVENTUM_SNAPSHOT_FREQUENCY";
/// Environment variable for [`EventumConfig::telemetry_verbosity`].
pub const ENV_TELEMETRY_VERBOSITY: &str = "EVENTUM_TELEMETRY_VERBOSITY";

/// Configuration errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A value could not be parsed.
    #[error("Failed to parse {key}='{value}': {reason}")]
    Parse {
        /// Setting name.
        key: &'static str,
        /// Raw value.
        value: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A value parsed but is out of range.
    #[error("Configuration validation failed: {0}")]
    Validation(String),
}

/// Settings shared by the repository and the projection engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventumConfig {
    /// Maximum number of changeset markers kept per view.
    ///
    /// Default: 10
    pub max_changeset_size: usize,

    /// Take a snapshot whenever a save moves a snapshotable stream across a
    /// multiple of this many versions. `None` disables automatic snapshots.
    ///
    /// Default: `None`
    pub snapshot_frequency: Option<u64>,

    /// How much the default telemetry reports.
    ///
    /// Default: [`TelemetryVerbosity::Info`]
    pub telemetry_verbosity: TelemetryVerbosity,
}

impl Default for EventumConfig {
    fn default() -> Self {
        Self {
            max_changeset_size: DEFAULT_MAX_CHANGESET_SIZE,
            snapshot_frequency: None,
            telemetry_verbosity: TelemetryVerbosity::Info,
        }
    }
}

impl EventumConfig {
    /// Set the changeset bound.
    #[must_use]
    pub const fn with_max_changeset_size(mut self, size: usize) -> Self {
        self.max_changeset_size = size;
        self
    }

    /// Enable automatic snapshots every `frequency` versions.
    #[must_use]
    pub const fn with_snapshot_frequency(mut self, frequency: u64) -> Self {
        self.snapshot_frequency = Some(frequency);
        self
    }

    /// Set the telemetry verbosity.
    #[must_use]
    pub const fn with_telemetry_verbosity(mut self, verbosity: TelemetryVerbosity) -> Self {
        self.telemetry_verbosity = verbosity;
        self
    }

    /// Read the configuration from `EVENTUM_*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if a variable is set but unparsable or the
    /// result fails [`EventumConfig::validate`].
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from a key lookup, as [`EventumConfig::from_env`] does.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if a value is unparsable or invalid.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(raw) = lookup(ENV_MAX_CHANGESET_SIZE) {
            config.max_changeset_size = parse(ENV_MAX_CHANGESET_SIZE, &raw)?;
        }
        if let Some(raw) = lookup(ENV_SNAPSHOT_FREQUENCY) {
            config.snapshot_frequency = if raw.trim().is_empty() {
                None
            } else {
                Some(parse(ENV_SNAPSHOT_FREQUENCY, &raw)?)
            };
        }
        if let Some(raw) = lookup(ENV_TELEMETRY_VERBOSITY) {
            config.telemetry_verbosity = parse(ENV_TELEMETRY_VERBOSITY, &raw)?;
        }
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] if `max_changeset_size` is 0 or
    /// `snapshot_frequency` is `Some(0)`.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_changeset_size == 0 {
            return Err(ConfigError::Validation(
                "max_changeset_size must be > 0".to_string(),
            ));
        }
        if self.snapshot_frequency == Some(0) {
            return Err(ConfigError::Validation(
                "snapshot_frequency must be > 0 when set".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse<T>(key: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim().parse().map_err(|e: T::Err| ConfigError::Parse {
        key,
        value: raw.to_string(),
        reason: e.to_string(),
    })
}
