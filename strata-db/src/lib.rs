//! Strata DB - Engine Facade
//!
//! The orchestration layer of the Strata document database engine:
//! - [`Database`]: collections, attributes, indexes, relationships, and
//!   the document pipeline (validate → encode → authorize → persist →
//!   invalidate → emit)
//! - [`Authorization`]: request-scoped role evaluation with a
//!   process-wide default
//! - value filters: named bidirectional encoders applied per attribute
//! - validators: identifiers, scalars, permissions, indexes, documents,
//!   and query lists
//!
//! Storage and caching are injected as `strata_storage` trait objects;
//! events surface on a `strata_events::Emitter` per engine instance.

mod authorization;
mod database;
mod events;
mod filters;

pub mod validators;

pub use authorization::{AuthState, Authorization};
pub use database::{Database, DatabaseMeta, DatabaseOptions, PopulateContext};
pub use events::DatabaseEvent;
pub use filters::{add_filter, ValueFilter};

// Re-export the silence combinator next to the engine that emits.
pub use strata_events::silent;
