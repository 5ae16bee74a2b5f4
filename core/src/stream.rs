//! Stream identity and versioning.
//!
//! Every aggregate lives in exactly one event stream, addressed by a [`StreamId`].
//! Events inside a stream carry a [`Version`] that starts at 1 for the first
//! event and increases by one per event, without gaps.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// A required identifier or name was empty.
///
/// Raised before any I/O happens, by stores and repositories that are handed
/// an empty stream id or view name.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{field} cannot be empty")]
pub struct ValidationError {
    /// Name of the offending argument (`"stream_id"`, `"view name"`, ...).
    pub field: &'static str,
}

impl ValidationError {
    /// Create a validation error for the named argument.
    #[must_use]
    pub const fn empty(field: &'static str) -> Self {
        Self { field }
    }

    /// Fail with a validation error when `value` is empty.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError`] if `value` is the empty string.
    pub fn require(field: &'static str, value: &str) -> Result<(), Self> {
        if value.is_empty() {
            Err(Self::empty(field))
        } else {
            Ok(())
        }
    }
}

/// Identifier of an event stream (one aggregate instance).
///
/// `new()` and the `From` conversions accept any string; use `FromStr` for
/// untrusted input, which rejects the empty string.
///
/// # Examples
///
/// ```
/// use eventum_core::stream::StreamId;
///
/// let id = StreamId::new("user-42");
/// assert_eq!(id.as_str(), "user-42");
///
/// assert!("".parse::<StreamId>().is_err());
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StreamId(String);

impl StreamId {
    /// Create a stream id without validation.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// `true` for the empty id a default-constructed stream starts with.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Fail with a [`ValidationError`] if this id is empty.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError`] for the empty id.
    pub fn validate(&self) -> Result<(), ValidationError> {
        ValidationError::require("stream_id", &self.0)
    }

    /// Unwrap into the inner `String`.
    #[must_use]
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for StreamId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ValidationError::require("stream_id", s)?;
        Ok(Self(s.to_string()))
    }
}

impl From<String> for StreamId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for StreamId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl AsRef<str> for StreamId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Position of an event within its stream.
///
/// [`Version::INITIAL`] (0) is the version of a stream with no events; the
/// first event appended gets version 1. Stores compare an expected version
/// against the stored one to detect concurrent appends.
///
/// # Examples
///
/// ```
/// use eventum_core::stream::Version;
///
/// let v = Version::INITIAL.next();
/// assert_eq!(v, Version::new(1));
/// assert_eq!(v.value(), 1);
/// ```
#[derive(
    Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Version(u64);

impl Version {
    /// Version of an empty stream.
    pub const INITIAL: Self = Self(0);

    /// Wrap a raw version number.
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// The raw version number.
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }

    /// The version the next appended event receives.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }

    /// `true` for [`Version::INITIAL`].
    #[must_use]
    pub const fn is_initial(self) -> bool {
        self.0 == 0
    }

    /// Step back `count` versions, stopping at [`Version::INITIAL`].
    #[must_use]
    pub const fn rewind(self, count: u64) -> Self {
        Self(self.0.saturating_sub(count))
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for Version {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<Version> for u64 {
    fn from(version: Version) -> Self {
        version.0
    }
}

impl std::ops::Add<u64> for Version {
    type Output = Self;

    fn add(self, rhs: u64) -> Self::Output {
        Self(self.0 + rhs)
    }
}
