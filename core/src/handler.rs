//! Typed handler tables.
//!
//! Aggregates and projections react to events through a [`Handlers`] table: a
//! map from event type tag to a handler function taking the concrete event.
//! A table is built once per type (usually inside a `OnceLock`) and every
//! dispatch is a single lookup followed by a downcast of the payload.
//!
//! ```
//! use eventum_core::event::{Event, EventRecord};
//! use eventum_core::handler::Handlers;
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Debug, Serialize, Deserialize)]
//! struct Deposited { amount: u64 }
//! impl Event for Deposited { const EVENT_TYPE: &'static str = "Deposited.v1"; }
//!
//! #[derive(Default)]
//! struct Balance { total: u64 }
//!
//! let handlers = Handlers::<Balance>::new()
//!     .on(|balance: &mut Balance, event: &Deposited| balance.total += event.amount);
//!
//! let mut balance = Balance::default();
//! handlers
//!     .dispatch(&mut balance, &EventRecord::new("acc-1", Deposited { amount: 5 }))
//!     .unwrap();
//! assert_eq!(balance.total, 5);
//! ```

use crate::event::{Event, EventRecord};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

/// Error type returned by fallible handlers.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

type Handler<T> = Box<dyn Fn(&mut T, &EventRecord) -> Result<(), DispatchFailure> + Send + Sync>;

/// Why a dispatch failed.
///
/// Callers see one error type per component regardless of the cause; the
/// cause is kept here so logs can tell a routing gap from a broken handler.
#[derive(Error, Debug)]
pub enum DispatchFailure {
    /// No handler is registered for the event type.
    #[error("no handler registered")]
    MissingHandler,

    /// A handler is registered for the tag, but the payload is a different type.
    #[error("payload is not a {expected}")]
    PayloadMismatch {
        /// Rust type name the handler expected.
        expected: &'static str,
    },

    /// The handler ran and returned an error.
    #[error("handler failed: {0}")]
    HandlerFailed(#[source] BoxError),
}

impl DispatchFailure {
    /// Short label for logs and telemetry.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::MissingHandler => "missing_handler",
            Self::PayloadMismatch { .. } => "payload_mismatch",
            Self::HandlerFailed(_) => "handler_failed",
        }
    }
}

/// Event type tag → handler lookup table for targets of type `T`.
pub struct Handlers<T> {
    handlers: HashMap<&'static str, Handler<T>>,
}

impl<T: 'static> Handlers<T> {
    /// An empty table.
    #[must_use]
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Register an infallible handler for `E`.
    ///
    /// Registering the same event type twice replaces the earlier handler.
    #[must_use]
    pub fn on<E, F>(self, handler: F) -> Self
    where
        E: Event,
        F: Fn(&mut T, &E) + Send + Sync + 'static,
    {
        self.try_on(move |target: &mut T, event: &E| {
            handler(target, event);
            Ok(())
        })
    }

    /// Register a handler for `E` that may fail.
    #[must_use]
    pub fn try_on<E, F>(mut self, handler: F) -> Self
    where
        E: Event,
        F: Fn(&mut T, &E) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        let erased: Handler<T> = Box::new(move |target: &mut T, record: &EventRecord| {
            let event = record
                .payload::<E>()
                .ok_or(DispatchFailure::PayloadMismatch {
                    expected: std::any::type_name::<E>(),
                })?;
            handler(target, event).map_err(DispatchFailure::HandlerFailed)
        });
        self.handlers.insert(E::EVENT_TYPE, erased);
        self
    }

    /// `true` if a handler exists for `event_type`.
    #[must_use]
    pub fn handles(&self, event_type: &str) -> bool {
        self.handlers.contains_key(event_type)
    }

    /// Tags of every event type with a handler, in no particular order.
    pub fn event_types(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.handlers.keys().copied()
    }

    /// Number of registered handlers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// `true` if no handler is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Run the handler registered for `record`'s event type against `target`.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchFailure`] when no handler exists, the payload does not
    /// match the registered type, or the handler itself fails.
    pub fn dispatch(&self, target: &mut T, record: &EventRecord) -> Result<(), DispatchFailure> {
        let handler = self
            .handlers
            .get(record.event_type())
            .ok_or(DispatchFailure::MissingHandler)?;
        handler(target, record)
    }
}

impl<T: 'static> Default for Handlers<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for Handlers<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut tags: Vec<_> = self.handlers.keys().collect();
        tags.sort_unstable();
        f.debug_struct("Handlers").field("event_types", &tags).finish()
    }
}
