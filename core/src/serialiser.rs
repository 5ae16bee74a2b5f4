//! Serialisation of view state.
//!
//! Projections hash the serialised form of their view state, so the
//! serialiser must be deterministic for a given value. [`JsonSerialiser`] is:
//! object keys in a `serde_json::Value` are kept sorted.

use serde_json::Value;
use thiserror::Error;

/// A value could not be converted to or from its text form.
#[derive(Error, Debug)]
#[error("Serialisation failed: {0}")]
pub struct SerialisationError(#[from] pub serde_json::Error);

/// Converts values to and from text.
pub trait Serialiser: Send + Sync {
    /// Encode `value`.
    ///
    /// # Errors
    ///
    /// Returns [`SerialisationError`] if the value cannot be encoded.
    fn serialise(&self, value: &Value) -> Result<String, SerialisationError>;

    /// Decode `text`.
    ///
    /// # Errors
    ///
    /// Returns [`SerialisationError`] if `text` is not valid.
    fn deserialise(&self, text: &str) -> Result<Value, SerialisationError>;
}

/// JSON serialiser, compact unless built with [`JsonSerialiser::pretty`].
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonSerialiser {
    pretty: bool,
}

impl JsonSerialiser {
    /// Compact output.
    #[must_use]
    pub const fn new() -> Self {
        Self { pretty: false }
    }

    /// Indented output.
    #[must_use]
    pub const fn pretty() -> Self {
        Self { pretty: true }
    }
}

impl Serialiser for JsonSerialiser {
    fn serialise(&self, value: &Value) -> Result<String, SerialisationError> {
        let text = if self.pretty {
            serde_json::to_string_pretty(value)?
        } else {
            serde_json::to_string(value)?
        };
        Ok(text)
    }

    fn deserialise(&self, text: &str) -> Result<Value, SerialisationError> {
        Ok(serde_json::from_str(text)?)
    }
}
