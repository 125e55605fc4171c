//! Strata Storage - Adapter and Cache Contracts
//!
//! Storage-facing traits for the Strata engine plus the in-memory
//! implementations used by the test-suite and single-node deployments:
//! - [`Adapter`]: dialect-specific schema DDL and row-level CRUD
//! - [`CacheBackend`]: tag-keyed key/value store
//! - [`MemoryAdapter`] / [`MemoryCache`]: reference implementations

mod adapter;
mod memory;

pub mod cache;

pub use adapter::{Adapter, AdapterScope, FindQuery};
pub use cache::{selection_hash, CacheBackend, CacheKey, MemoryCache};
pub use memory::MemoryAdapter;
