//! # Eventum Core
//!
//! Event sourcing and materialised view projections.
//!
//! This crate rebuilds aggregate state from an ordered log of domain events
//! and folds that log into read views protected by optimistic concurrency.
//!
//! ## Core Concepts
//!
//! - **Event**: An immutable fact about one stream, tagged with a stable type
//!   name ([`event::Event`], carried as an [`event::EventRecord`])
//! - **Event stream**: An aggregate plus its version and pending changes
//!   ([`aggregate::EventStream`])
//! - **Snapshot**: A named-field capture of a stream that shortcuts replay
//!   ([`snapshot::SnapshotMemento`])
//! - **Projection**: Typed handlers folding events into a view
//!   ([`projection::Projection`])
//! - **Materialised view**: View state plus an etag and a bounded SHA-256
//!   changeset chain ([`view::MaterialisedView`])
//! - **Projection engine**: Routes events to projections and runs
//!   load → apply → save ([`engine::ProjectionEngine`])
//!
//! ## Architecture Principles
//!
//! - Explicit handler tables, built once per type
//! - Explicit registration of projections and event types
//! - Storage behind narrow, dyn-compatible traits
//! - Concurrency conflicts are values (`Ok(false)`), never retried silently
//!
//! ## Example
//!
//! ```
//! use eventum_core::aggregate::{Aggregate, EventStream};
//! use eventum_core::event::{Event, EventRecord};
//! use eventum_core::handler::Handlers;
//! use eventum_core::stream::Version;
//! use serde::{Deserialize, Serialize};
//! use std::sync::OnceLock;
//!
//! #[derive(Debug, Serialize, Deserialize)]
//! struct UserRegistered { name: String, age: u32 }
//! impl Event for UserRegistered { const EVENT_TYPE: &'static str = "UserRegistered.v1"; }
//!
//! #[derive(Default)]
//! struct User { name: String, age: u32 }
//!
//! impl Aggregate for User {
//!     fn handlers() -> &'static Handlers<Self> {
//!         static HANDLERS: OnceLock<Handlers<User>> = OnceLock::new();
//!         HANDLERS.get_or_init(|| {
//!             Handlers::new().on(|user: &mut User, e: &UserRegistered| {
//!                 user.name.clone_from(&e.name);
//!                 user.age = e.age;
//!             })
//!         })
//!     }
//! }
//!
//! let registered = EventRecord::new("S", UserRegistered { name: "Ada".into(), age: 30 })
//!     .with_version(Version::new(1));
//!
//! let mut stream = EventStream::<User>::new("S");
//! stream.load_from_history([registered]).unwrap();
//!
//! assert_eq!(stream.version(), Version::new(1));
//! assert!(stream.uncommitted_changes().is_empty());
//! ```

// Re-export commonly used types
pub use chrono::{DateTime, Utc};
pub use serde::{Deserialize, Serialize};

pub mod aggregate;
pub mod config;
pub mod engine;
pub mod event;
pub mod event_store;
pub mod handler;
pub mod projection;
pub mod repository;
pub mod serialiser;
pub mod snapshot;
pub mod stream;
pub mod telemetry;
pub mod type_registry;
pub mod view;

/// Convenience re-exports of the types most applications need.
pub mod prelude {
    pub use crate::aggregate::{Aggregate, EventStream, EventStreamHandlerError};
    pub use crate::config::EventumConfig;
    pub use crate::engine::{ProjectionEngine, ProjectionReport};
    pub use crate::event::{Event, EventRecord, StoredEvent};
    pub use crate::event_store::{EventStore, EventStoreError};
    pub use crate::handler::Handlers;
    pub use crate::projection::{
        EventProjection, EventProjectionError, Projection, ProjectionFailure,
    };
    pub use crate::repository::EventStreamRepository;
    pub use crate::serialiser::{JsonSerialiser, Serialiser};
    pub use crate::snapshot::{SnapshotMemento, SnapshotStore};
    pub use crate::stream::{StreamId, Version};
    pub use crate::telemetry::{Telemetry, TracingTelemetry};
    pub use crate::type_registry::{TypeRegistry, TypeResolver};
    pub use crate::view::{MaterialisedView, ViewRecord, ViewRepository};
}
