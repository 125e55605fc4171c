//! Cache layer with tag-keyed invalidation.
//!
//! The engine memoizes collection metadata and document reads in a
//! key/value store that supports flushing by tag. Every cached entry is
//! tagged with the keys of the resources it depends on; any write to a
//! resource flushes its tag. Cache failures are tolerated everywhere: a
//! failed read is a miss, a failed write is a no-op.

mod key;
mod memory;

pub use key::{fnv1a_128_hex, selection_hash, CacheKey};
pub use memory::MemoryCache;

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use std::time::Duration;
use strata_core::StrataResult;

/// Tag-keyed key/value store.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Look up a key. `None` is a miss; expired entries are misses.
    async fn get(&self, key: &str) -> StrataResult<Option<JsonValue>>;

    /// Store a value under a key with a time-to-live and invalidation tags.
    async fn set(
        &self,
        key: &str,
        value: &JsonValue,
        ttl: Duration,
        tags: &[String],
    ) -> StrataResult<()>;

    /// Drop every entry carrying any of the given tags. Returns the number
    /// of entries flushed.
    async fn flush_by_tags(&self, tags: &[String]) -> StrataResult<u64>;

    /// Drop everything.
    async fn flush_all(&self) -> StrataResult<u64>;
}
