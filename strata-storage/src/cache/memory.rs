//! In-memory cache backend
//!
//! Reference implementation of [`CacheBackend`] over concurrent maps with
//! per-entry TTL and a tag index for bulk invalidation.

use super::CacheBackend;
use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value as JsonValue;
use std::collections::HashSet;
use std::time::{Duration, Instant};
use strata_core::StrataResult;

struct CacheEntry {
    value: JsonValue,
    expires_at: Option<Instant>,
    tags: Vec<String>,
}

impl CacheEntry {
    fn is_expired(&self) -> bool {
        self.expires_at
            .map(|deadline| Instant::now() >= deadline)
            .unwrap_or(false)
    }
}

/// Concurrent in-process cache with tag-based flushing.
#[derive(Default)]
pub struct MemoryCache {
    entries: DashMap<String, CacheEntry>,
    tag_index: DashMap<String, HashSet<String>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn detach_tags(&self, key: &str, tags: &[String]) {
        for tag in tags {
            if let Some(mut keys) = self.tag_index.get_mut(tag) {
                keys.remove(key);
            }
        }
    }
}

#[async_trait]
impl CacheBackend for MemoryCache {
    async fn get(&self, key: &str) -> StrataResult<Option<JsonValue>> {
        if let Some(entry) = self.entries.get(key) {
            if !entry.is_expired() {
                return Ok(Some(entry.value.clone()));
            }
        }
        // Expired entries are lazily dropped on access.
        if let Some((_, entry)) = self.entries.remove_if(key, |_, entry| entry.is_expired()) {
            self.detach_tags(key, &entry.tags);
        }
        Ok(None)
    }

    async fn set(
        &self,
        key: &str,
        value: &JsonValue,
        ttl: Duration,
        tags: &[String],
    ) -> StrataResult<()> {
        let expires_at = (!ttl.is_zero()).then(|| Instant::now() + ttl);
        if let Some(previous) = self.entries.insert(
            key.to_string(),
            CacheEntry {
                value: value.clone(),
                expires_at,
                tags: tags.to_vec(),
            },
        ) {
            self.detach_tags(key, &previous.tags);
        }
        for tag in tags {
            self.tag_index
                .entry(tag.clone())
                .or_default()
                .insert(key.to_string());
        }
        Ok(())
    }

    async fn flush_by_tags(&self, tags: &[String]) -> StrataResult<u64> {
        let mut flushed = 0;
        for tag in tags {
            let Some((_, keys)) = self.tag_index.remove(tag) else {
                continue;
            };
            for key in keys {
                if let Some((_, entry)) = self.entries.remove(&key) {
                    self.detach_tags(&key, &entry.tags);
                    flushed += 1;
                }
            }
        }
        Ok(flushed)
    }

    async fn flush_all(&self) -> StrataResult<u64> {
        let count = self.entries.len() as u64;
        self.entries.clear();
        self.tag_index.clear();
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const NO_TTL: Duration = Duration::ZERO;

    #[tokio::test]
    async fn test_set_get() {
        let cache = MemoryCache::new();
        cache
            .set("k1", &json!({"a": 1}), NO_TTL, &["t1".to_string()])
            .await
            .unwrap();
        assert_eq!(cache.get("k1").await.unwrap(), Some(json!({"a": 1})));
        assert_eq!(cache.get("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_flush_by_tags() {
        let cache = MemoryCache::new();
        let tag = |s: &str| vec![s.to_string()];
        cache.set("a", &json!(1), NO_TTL, &tag("users")).await.unwrap();
        cache.set("b", &json!(2), NO_TTL, &tag("users")).await.unwrap();
        cache.set("c", &json!(3), NO_TTL, &tag("posts")).await.unwrap();

        let flushed = cache.flush_by_tags(&tag("users")).await.unwrap();
        assert_eq!(flushed, 2);
        assert_eq!(cache.get("a").await.unwrap(), None);
        assert_eq!(cache.get("b").await.unwrap(), None);
        assert_eq!(cache.get("c").await.unwrap(), Some(json!(3)));

        // Flushing an unknown tag is a no-op.
        assert_eq!(cache.flush_by_tags(&tag("nope")).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_entry_carries_multiple_tags() {
        let cache = MemoryCache::new();
        cache
            .set(
                "doc",
                &json!("v"),
                NO_TTL,
                &["col".to_string(), "doc".to_string()],
            )
            .await
            .unwrap();
        cache.flush_by_tags(&["doc".to_string()]).await.unwrap();
        assert_eq!(cache.get("doc").await.unwrap(), None);
        // The other tag no longer references the key.
        assert_eq!(cache.flush_by_tags(&["col".to_string()]).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_ttl_expiry() {
        let cache = MemoryCache::new();
        cache
            .set("k", &json!(1), Duration::from_millis(10), &[])
            .await
            .unwrap();
        assert!(cache.get("k").await.unwrap().is_some());
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(cache.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_overwrite_replaces_tags() {
        let cache = MemoryCache::new();
        cache.set("k", &json!(1), NO_TTL, &["old".to_string()]).await.unwrap();
        cache.set("k", &json!(2), NO_TTL, &["new".to_string()]).await.unwrap();

        assert_eq!(cache.flush_by_tags(&["old".to_string()]).await.unwrap(), 0);
        assert_eq!(cache.get("k").await.unwrap(), Some(json!(2)));
        assert_eq!(cache.flush_by_tags(&["new".to_string()]).await.unwrap(), 1);
    }
}
