//! Engine facade
//!
//! [`Database`] orchestrates the schema lifecycle and the document
//! pipeline over an [`Adapter`] and a [`CacheBackend`]: validation,
//! filter encode/decode, authorization, persistence, cache coordination,
//! and event emission. Operations are split per concern into the sibling
//! modules; this module owns the shared state and the pipeline helpers.

mod attributes;
mod collections;
mod documents;
mod indexes;
mod populate;
mod relationships;

pub use populate::PopulateContext;

use crate::authorization::Authorization;
use crate::events::DatabaseEvent;
use crate::filters::{resolve_filter, ValueFilter};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use strata_core::{Collection, Doc, PermissionKind, StrataError, StrataResult, Value};
use strata_events::Emitter;
use strata_storage::{Adapter, CacheBackend, CacheKey};
use tracing::warn;
use uuid::Uuid;

/// Construction-time options.
#[derive(Clone)]
pub struct DatabaseOptions {
    /// Per-instance value filters, consulted before the process registry.
    pub filters: HashMap<String, ValueFilter>,
    /// Maximum number of values per query node.
    pub max_query_values: usize,
    /// Page size used when a find carries no limit.
    pub default_limit: i64,
    /// Hard cap applied to any requested limit.
    pub max_limit: i64,
    /// Tenant applied when `set_meta` does not name one.
    pub tenant: Option<i64>,
    /// Logical cache name used when `set_meta` does not name a database.
    pub cache_name: String,
    /// Time-to-live for cached entries.
    pub cache_ttl: Duration,
}

impl Default for DatabaseOptions {
    fn default() -> Self {
        DatabaseOptions {
            filters: HashMap::new(),
            max_query_values: 100,
            default_limit: 25,
            max_limit: 1000,
            tenant: None,
            cache_name: "default".to_string(),
            cache_ttl: Duration::from_secs(60 * 60 * 24),
        }
    }
}

/// Key-space binding. Must be applied via [`Database::set_meta`] before
/// any operation.
#[derive(Debug, Clone, Default)]
pub struct DatabaseMeta {
    /// Logical database name, used for cache keys.
    pub database: String,
    /// Physical schema container.
    pub schema: String,
    /// Physical table-name prefix.
    pub namespace: String,
    pub shared_tables: bool,
    pub tenant_id: Option<i64>,
    pub tenant_per_document: bool,
}

/// The engine facade.
pub struct Database {
    adapter: Arc<dyn Adapter>,
    cache: Arc<dyn CacheBackend>,
    emitter: Emitter,
    options: DatabaseOptions,
    meta: RwLock<DatabaseMeta>,
    instance_filters: RwLock<HashMap<String, ValueFilter>>,
    preserve_dates: AtomicBool,
}

impl Database {
    pub fn new(
        adapter: Arc<dyn Adapter>,
        cache: Arc<dyn CacheBackend>,
        options: DatabaseOptions,
    ) -> Self {
        let instance_filters = options.filters.clone();
        Database {
            adapter,
            cache,
            emitter: Emitter::new(),
            options,
            meta: RwLock::new(DatabaseMeta::default()),
            instance_filters: RwLock::new(instance_filters),
            preserve_dates: AtomicBool::new(false),
        }
    }

    /// Bind the engine (and its adapter) to a key space.
    pub fn set_meta(&self, mut meta: DatabaseMeta) {
        if meta.database.is_empty() {
            meta.database = self.options.cache_name.clone();
        }
        if meta.tenant_id.is_none() {
            meta.tenant_id = self.options.tenant;
        }
        self.adapter.set_scope(strata_storage::AdapterScope {
            database: meta.database.clone(),
            schema: meta.schema.clone(),
            namespace: meta.namespace.clone(),
            shared_tables: meta.shared_tables,
            tenant_id: meta.tenant_id,
            tenant_per_document: meta.tenant_per_document,
        });
        *self.meta.write().expect("meta lock") = meta;
    }

    pub fn meta(&self) -> DatabaseMeta {
        self.meta.read().expect("meta lock").clone()
    }

    pub(crate) fn require_meta(&self) -> StrataResult<DatabaseMeta> {
        let meta = self.meta();
        if meta.schema.is_empty() {
            return Err(StrataError::internal(
                "set_meta must be called before using the engine",
            ));
        }
        Ok(meta)
    }

    pub fn adapter(&self) -> &Arc<dyn Adapter> {
        &self.adapter
    }

    pub fn emitter(&self) -> &Emitter {
        &self.emitter
    }

    pub fn options(&self) -> &DatabaseOptions {
        &self.options
    }

    /// Register an instance-level value filter. Duplicate names fail.
    pub fn add_filter(&self, name: impl Into<String>, filter: ValueFilter) -> StrataResult<()> {
        let name = name.into();
        let mut filters = self.instance_filters.write().expect("filters lock");
        if filters.contains_key(&name) {
            return Err(StrataError::conflict("filter", &name, "already registered"));
        }
        filters.insert(name, filter);
        Ok(())
    }

    /// Suppress automatic `$createdAt`/`$updatedAt` stamping. Used by
    /// restoration paths that carry their own timestamps.
    pub fn set_preserve_dates(&self, preserve: bool) {
        self.preserve_dates.store(preserve, Ordering::Relaxed);
    }

    pub(crate) fn preserve_dates(&self) -> bool {
        self.preserve_dates.load(Ordering::Relaxed)
    }

    /// Generate a unique document id.
    pub fn unique_id() -> String {
        Uuid::now_v7().simple().to_string()
    }

    // ========================================================================
    // EVENTS
    // ========================================================================

    pub(crate) fn trigger(&self, event: DatabaseEvent, payload: JsonValue) {
        self.emitter.trigger(event.as_str(), &payload);
    }

    // ========================================================================
    // CACHE COORDINATION
    // ========================================================================

    pub(crate) fn cache_key(&self) -> CacheKey {
        let meta = self.meta();
        CacheKey::new(
            meta.database,
            (!meta.namespace.is_empty()).then_some(meta.namespace),
            meta.schema,
            meta.tenant_id,
        )
    }

    /// Cache read. Failures are logged and treated as a miss.
    pub(crate) async fn cache_get(&self, key: &str) -> Option<JsonValue> {
        match self.cache.get(key).await {
            Ok(value) => value,
            Err(err) => {
                warn!(key, error = %err, "Cache read failed");
                None
            }
        }
    }

    /// Cache write. Failures are logged and ignored.
    pub(crate) async fn cache_set(&self, key: &str, value: &JsonValue, tags: &[String]) {
        if let Err(err) = self
            .cache
            .set(key, value, self.options.cache_ttl, tags)
            .await
        {
            warn!(key, error = %err, "Cache write failed");
        }
    }

    /// Flush cache entries by tag. Failures are logged and ignored.
    pub(crate) async fn cache_flush(&self, tags: &[String]) {
        if let Err(err) = self.cache.flush_by_tags(tags).await {
            warn!(?tags, error = %err, "Cache flush failed");
        }
    }

    /// Revive a cached result list. Anything malformed reads as a miss.
    pub(crate) fn docs_from_cache(json: JsonValue) -> Option<Vec<Doc>> {
        let JsonValue::Array(items) = json else {
            return None;
        };
        items
            .into_iter()
            .map(|item| Doc::from_json(item).ok())
            .collect()
    }

    /// Serialize a result list for caching.
    pub(crate) fn docs_to_cache(docs: &[Doc]) -> JsonValue {
        JsonValue::Array(docs.iter().map(Doc::to_json).collect())
    }

    // ========================================================================
    // TRANSACTIONS
    // ========================================================================

    /// Run `body` inside an adapter transaction scope with deadlock retry
    /// at the outermost scope: linear `50ms * attempt` backoff, up to
    /// three attempts. Nested calls become savepoints and propagate their
    /// failures.
    pub(crate) async fn with_transaction<T, F, Fut>(&self, body: F) -> StrataResult<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = StrataResult<T>>,
    {
        const MAX_ATTEMPTS: u32 = 3;
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            let depth = self.adapter.begin().await?;
            let result: StrataResult<T> = match body().await {
                Ok(value) => match self.adapter.commit().await {
                    Ok(()) => return Ok(value),
                    Err(err) => Err(err),
                },
                Err(err) => {
                    if let Err(rollback_err) = self.adapter.rollback().await {
                        warn!(error = %rollback_err, "Rollback failed");
                    }
                    Err(err)
                }
            };

            let Err(err) = result else {
                unreachable!("Ok case returned above")
            };
            if depth == 1 && err.is_deadlock() && attempt < MAX_ATTEMPTS {
                tokio::time::sleep(Duration::from_millis(50 * attempt as u64)).await;
                continue;
            }
            return Err(err);
        }
    }

    /// Run `body` under a deadline, mapping expiry to a `Timeout` error.
    pub async fn with_timeout<T, F>(duration: Duration, body: F) -> StrataResult<T>
    where
        F: Future<Output = StrataResult<T>>,
    {
        match tokio::time::timeout(duration, body).await {
            Ok(result) => result,
            Err(_) => Err(StrataError::timeout(format!(
                "Operation exceeded {}ms",
                duration.as_millis()
            ))),
        }
    }

    // ========================================================================
    // VALUE FILTERS
    // ========================================================================

    fn filter_chain(&self, names: &[String]) -> StrataResult<Vec<(String, ValueFilter)>> {
        let instance = self.instance_filters.read().expect("filters lock");
        names
            .iter()
            .map(|name| {
                resolve_filter(name, &instance)
                    .map(|filter| (name.clone(), filter))
                    .ok_or_else(|| {
                        StrataError::database(format!("Unknown filter '{}'", name), None)
                    })
            })
            .collect()
    }

    /// Apply declared filters in order on the write path.
    pub(crate) fn encode_doc(&self, collection: &Collection, mut doc: Doc) -> StrataResult<Doc> {
        for attribute in &collection.attributes {
            if attribute.filters.is_empty() || !doc.has(&attribute.key) {
                continue;
            }
            let mut value = doc.get(&attribute.key).cloned().unwrap_or(Value::Null);
            for (name, filter) in self.filter_chain(&attribute.filters)? {
                value = filter.encode(value).map_err(|err| {
                    StrataError::database(
                        format!("Filter '{}' failed encoding '{}': {}", name, attribute.key, err),
                        None,
                    )
                })?;
            }
            doc.set(attribute.key.clone(), value);
        }
        Ok(doc)
    }

    /// Apply declared filters in reverse order on the read path.
    pub(crate) fn decode_doc(&self, collection: &Collection, mut doc: Doc) -> StrataResult<Doc> {
        for attribute in &collection.attributes {
            if attribute.filters.is_empty() || !doc.has(&attribute.key) {
                continue;
            }
            let mut value = doc.get(&attribute.key).cloned().unwrap_or(Value::Null);
            for (name, filter) in self.filter_chain(&attribute.filters)?.into_iter().rev() {
                value = filter.decode(value).map_err(|err| {
                    StrataError::database(
                        format!("Filter '{}' failed decoding '{}': {}", name, attribute.key, err),
                        None,
                    )
                })?;
            }
            doc.set(attribute.key.clone(), value);
        }
        Ok(doc)
    }

    // ========================================================================
    // AUTHORIZATION
    // ========================================================================

    /// Collection-level grant for an action kind.
    pub(crate) fn collection_grants(collection: &Collection, kind: PermissionKind) -> bool {
        let permissions: Vec<String> = collection
            .permissions
            .iter()
            .map(|p| p.to_string())
            .collect();
        Authorization::is_authorized(kind, &permissions)
    }

    /// Document-level grant for an action kind.
    pub(crate) fn document_grants(doc: &Doc, kind: PermissionKind) -> bool {
        Authorization::is_authorized(kind, &doc.permissions())
    }

    /// Enforce a write-kind check: collection permissions, widened by the
    /// document's own permissions when document security is enabled.
    pub(crate) fn authorize_write(
        collection: &Collection,
        doc: Option<&Doc>,
        kind: PermissionKind,
    ) -> StrataResult<()> {
        if !Authorization::status() {
            return Ok(());
        }
        let granted = Self::collection_grants(collection, kind)
            || (collection.document_security
                && doc
                    .map(|doc| Self::document_grants(doc, kind))
                    .unwrap_or(false));
        if granted {
            Ok(())
        } else {
            Err(StrataError::authorization(format!(
                "Missing '{}' permission for collection '{}'",
                kind.as_str(),
                collection.id
            )))
        }
    }
}
