//! Document pipeline
//!
//! Every mutation runs validation → filter encode → authorization →
//! adapter → cache invalidation → event. Every read consults the cache,
//! falls back to the adapter, decodes, post-filters by document
//! permissions under document security, caches, and emits a read event.

use super::{Database, DatabaseEvent, PopulateContext};
use crate::authorization::Authorization;
use crate::validators::{Key, Permissions, QueriesValidator, Structure};
use chrono::Utc;
use serde_json::json;
use strata_core::query::{group_by_type, GroupedQueries, Query};
use strata_core::{
    aggregate, AttributeType, Collection, Doc, Permission, PermissionKind, StrataError,
    StrataResult, Value,
};
use strata_storage::{selection_hash, Adapter, FindQuery};

impl Database {
    /// Disabled collections behave as absent while enforcement is on.
    fn ensure_enabled(collection: &Collection) -> StrataResult<()> {
        if !collection.enabled && Authorization::status() {
            return Err(StrataError::not_found("collection", &collection.id));
        }
        Ok(())
    }

    /// Whether the active context may read from the collection at all.
    /// Under document security an unauthorized collection read degrades
    /// to per-document filtering instead of failing outright.
    fn check_read_access(collection: &Collection) -> StrataResult<bool> {
        if !Authorization::status() {
            return Ok(true);
        }
        let granted = Self::collection_grants(collection, PermissionKind::Read);
        if !granted && !collection.document_security {
            return Err(StrataError::authorization(format!(
                "Missing 'read' permission for collection '{}'",
                collection.id
            )));
        }
        Ok(granted)
    }

    fn readable(collection_granted: bool, doc: &Doc) -> bool {
        collection_granted || Self::document_grants(doc, PermissionKind::Read)
    }

    /// Normalize `$permissions`: validate and expand aggregate kinds so
    /// storage only ever sees terminal kinds.
    fn normalize_permissions(doc: &mut Doc) -> StrataResult<()> {
        let strings = doc.permissions();
        Permissions::default().validate_strings(&strings)?;
        let parsed: Vec<Permission> = strings
            .iter()
            .map(|p| Permission::parse(p))
            .collect::<StrataResult<_>>()?;
        let expanded: Vec<Value> = aggregate(&parsed)
            .iter()
            .map(|p| Value::String(p.to_string()))
            .collect();
        doc.set(Doc::PERMISSIONS, Value::Array(expanded));
        Ok(())
    }

    /// Validate, stamp, and encode one document for insertion. Returns
    /// the native document, its encoded form, and pending link ops.
    fn prepare_create(
        &self,
        collection: &Collection,
        mut doc: Doc,
    ) -> StrataResult<(Doc, Doc, Vec<super::relationships::LinkOps>)> {
        let meta = self.meta();
        let id = if doc.id().is_empty() {
            Self::unique_id()
        } else {
            let id = doc.id().to_string();
            Key::new(false).validate(&id)?;
            id
        };
        doc.set(Doc::ID, Value::String(id));

        let now = Utc::now();
        if !self.preserve_dates() {
            doc.set(Doc::CREATED_AT, Value::Timestamp(now));
            doc.set(Doc::UPDATED_AT, Value::Timestamp(now));
        } else {
            if !doc.has(Doc::CREATED_AT) {
                doc.set(Doc::CREATED_AT, Value::Timestamp(now));
            }
            if !doc.has(Doc::UPDATED_AT) {
                doc.set(Doc::UPDATED_AT, Value::Timestamp(now));
            }
        }
        if meta.shared_tables {
            let tenant = if meta.tenant_per_document {
                doc.tenant().or(meta.tenant_id)
            } else {
                meta.tenant_id
            };
            doc.set(Doc::TENANT, Value::from(tenant));
        }
        if !doc.has(Doc::PERMISSIONS) {
            doc.set(Doc::PERMISSIONS, Value::Array(Vec::new()));
        }
        Self::normalize_permissions(&mut doc)?;
        Structure::new(collection).validate(&doc, true)?;

        let link_ops = Self::extract_link_ops(collection, &mut doc, true)?;
        let encoded = self.encode_doc(collection, doc.clone())?;
        Ok((doc, encoded, link_ops))
    }

    // ========================================================================
    // CREATE
    // ========================================================================

    pub async fn create_document(&self, collection_id: &str, doc: Doc) -> StrataResult<Doc> {
        let collection = self.get_collection(collection_id).await?;
        Self::ensure_enabled(&collection)?;
        Self::authorize_write(&collection, None, PermissionKind::Create)?;

        let (mut doc, encoded, link_ops) = self.prepare_create(&collection, doc)?;
        let stored = self
            .with_transaction(|| async {
                let stored = self
                    .adapter()
                    .create_document(&collection, encoded.clone())
                    .await?;
                self.apply_link_ops(&collection, stored.id(), &link_ops)
                    .await?;
                Ok(stored)
            })
            .await?;
        doc.set(Doc::SEQUENCE, Value::Integer(stored.sequence()));

        let key = self.cache_key();
        self.cache_flush(&[key.collection(&collection.id)]).await;
        self.trigger(DatabaseEvent::DocumentCreate, doc.to_json());
        Ok(doc)
    }

    /// Bulk create: one transaction, every document prepared up front.
    pub async fn create_documents(
        &self,
        collection_id: &str,
        docs: Vec<Doc>,
    ) -> StrataResult<Vec<Doc>> {
        let collection = self.get_collection(collection_id).await?;
        Self::ensure_enabled(&collection)?;
        Self::authorize_write(&collection, None, PermissionKind::Create)?;

        let prepared = docs
            .into_iter()
            .map(|doc| self.prepare_create(&collection, doc))
            .collect::<StrataResult<Vec<_>>>()?;

        let sequences = self
            .with_transaction(|| async {
                let mut sequences = Vec::with_capacity(prepared.len());
                for (_, encoded, link_ops) in &prepared {
                    let stored = self
                        .adapter()
                        .create_document(&collection, encoded.clone())
                        .await?;
                    self.apply_link_ops(&collection, stored.id(), link_ops)
                        .await?;
                    sequences.push(stored.sequence());
                }
                Ok(sequences)
            })
            .await?;

        let docs: Vec<Doc> = prepared
            .into_iter()
            .zip(sequences)
            .map(|((mut doc, _, _), sequence)| {
                doc.set(Doc::SEQUENCE, Value::Integer(sequence));
                doc
            })
            .collect();

        let key = self.cache_key();
        self.cache_flush(&[key.collection(&collection.id)]).await;
        self.trigger(
            DatabaseEvent::DocumentsCreate,
            json!({ "collection": collection_id, "count": docs.len() }),
        );
        Ok(docs)
    }

    // ========================================================================
    // READ
    // ========================================================================

    /// Fetch one document. Under document security an unauthorized match
    /// returns an empty document; a missing document is `NotFound`.
    pub async fn get_document(
        &self,
        collection_id: &str,
        id: &str,
        queries: &[Query],
    ) -> StrataResult<Doc> {
        let collection = self.get_collection(collection_id).await?;
        Self::ensure_enabled(&collection)?;
        QueriesValidator::new(&collection, self.options().max_query_values, false)
            .validate(queries)?;
        let grouped = group_by_type(queries);
        let collection_granted = Self::check_read_access(&collection)?;

        let key = self.cache_key();
        let cache_entry = key.document_selection(&collection.id, id, &grouped.selections);
        let mut doc = match self.cache_get(&cache_entry).await {
            Some(json) => Doc::from_json(json)?,
            None => {
                let raw = self
                    .adapter()
                    .get_document(&collection, id, &grouped.selections)
                    .await?
                    .ok_or_else(|| StrataError::not_found("document", id))?;
                let doc = self.decode_doc(&collection, raw)?;
                self.cache_set(
                    &cache_entry,
                    &doc.to_json(),
                    &[
                        key.collection(&collection.id),
                        key.document(&collection.id, id),
                    ],
                )
                .await;
                doc
            }
        };

        if Authorization::status() && !Self::readable(collection_granted, &doc) {
            return Ok(Doc::new());
        }
        if !grouped.populate.is_empty() {
            let mut ctx = PopulateContext::new(&collection.id);
            self.populate_doc(&collection, &mut doc, &grouped.populate, &mut ctx)
                .await?;
        }
        self.trigger(DatabaseEvent::DocumentRead, doc.to_json());
        Ok(doc)
    }

    /// Resolve a cursor value into the boundary document.
    async fn resolve_cursor(
        &self,
        collection: &Collection,
        grouped: &GroupedQueries,
    ) -> StrataResult<Option<Doc>> {
        match &grouped.cursor {
            None => Ok(None),
            Some(Value::Doc(doc)) => Ok(Some(doc.clone())),
            Some(Value::String(id)) => {
                let raw = self
                    .adapter()
                    .get_document(collection, id, &[])
                    .await?
                    .ok_or_else(|| StrataError::not_found("cursor document", id))?;
                Ok(Some(self.decode_doc(collection, raw)?))
            }
            Some(other) => Err(StrataError::validation(format!(
                "Invalid cursor value {}",
                other.to_json()
            ))),
        }
    }

    pub async fn find(&self, collection_id: &str, queries: &[Query]) -> StrataResult<Vec<Doc>> {
        let collection = self.get_collection(collection_id).await?;
        Self::ensure_enabled(&collection)?;
        QueriesValidator::new(&collection, self.options().max_query_values, true)
            .validate(queries)?;
        let collection_granted = Self::check_read_access(&collection)?;

        let grouped = group_by_type(queries);
        let cursor = self.resolve_cursor(&collection, &grouped).await?;
        let limit = grouped
            .limit
            .unwrap_or(self.options().default_limit)
            .min(self.options().max_limit);

        // Result sets are cached before permission filtering, keyed by the
        // hash of the query shape, so cache hits stay role-independent.
        let key = self.cache_key();
        let cache_entry = key.collection_query(
            &collection.id,
            &selection_hash(
                &grouped.selections,
                &grouped.filters,
                Some(limit),
                grouped.offset,
                cursor.as_ref().map(Doc::id),
                grouped.cursor_direction,
            ),
        );

        let decoded = match self
            .cache_get(&cache_entry)
            .await
            .and_then(Self::docs_from_cache)
        {
            Some(docs) => docs,
            None => {
                let find_query = FindQuery {
                    filters: grouped.filters.clone(),
                    selections: grouped.selections.clone(),
                    orders: grouped
                        .orders
                        .iter()
                        .map(|(attr, order)| (attr.clone(), *order))
                        .collect(),
                    limit: Some(limit),
                    offset: grouped.offset,
                    cursor,
                    cursor_direction: grouped.cursor_direction,
                };
                let raw = self.adapter().find(&collection, &find_query).await?;
                let docs = raw
                    .into_iter()
                    .map(|doc| self.decode_doc(&collection, doc))
                    .collect::<StrataResult<Vec<_>>>()?;
                let mut tags = vec![key.collection(&collection.id)];
                tags.extend(
                    docs.iter()
                        .map(|doc| key.document(&collection.id, doc.id())),
                );
                self.cache_set(&cache_entry, &Self::docs_to_cache(&docs), &tags)
                    .await;
                docs
            }
        };

        let mut docs: Vec<Doc> = decoded
            .into_iter()
            .filter(|doc| !Authorization::status() || Self::readable(collection_granted, doc))
            .collect();

        if !grouped.populate.is_empty() {
            for doc in docs.iter_mut() {
                let mut ctx = PopulateContext::new(&collection.id);
                self.populate_doc(&collection, doc, &grouped.populate, &mut ctx)
                    .await?;
            }
        }
        self.trigger(
            DatabaseEvent::DocumentFind,
            json!({ "collection": collection_id, "count": docs.len() }),
        );
        Ok(docs)
    }

    /// First match, or an empty document when nothing matches or the only
    /// match is filtered out by document security.
    pub async fn find_one(
        &self,
        collection_id: &str,
        queries: &[Query],
    ) -> StrataResult<Doc> {
        let mut queries = queries.to_vec();
        queries.push(Query::limit(1));
        let mut docs = self.find(collection_id, &queries).await?;
        Ok(docs.pop().unwrap_or_default())
    }

    pub async fn count(
        &self,
        collection_id: &str,
        queries: &[Query],
        max: Option<i64>,
    ) -> StrataResult<i64> {
        let collection = self.get_collection(collection_id).await?;
        Self::ensure_enabled(&collection)?;
        QueriesValidator::new(&collection, self.options().max_query_values, true)
            .validate(queries)?;
        let collection_granted = Self::check_read_access(&collection)?;
        let grouped = group_by_type(queries);

        let count = if collection_granted || !Authorization::status() {
            self.adapter()
                .count(&collection, &grouped.filters, max)
                .await?
        } else {
            // Document security: count the readable subset.
            let raw = self
                .adapter()
                .find(
                    &collection,
                    &FindQuery {
                        filters: grouped.filters.clone(),
                        limit: max,
                        ..Default::default()
                    },
                )
                .await?;
            raw.iter()
                .filter(|doc| Self::document_grants(doc, PermissionKind::Read))
                .count() as i64
        };
        self.trigger(
            DatabaseEvent::DocumentCount,
            json!({ "collection": collection_id, "count": count }),
        );
        Ok(count)
    }

    pub async fn sum(
        &self,
        collection_id: &str,
        attribute: &str,
        queries: &[Query],
        max: Option<i64>,
    ) -> StrataResult<f64> {
        let collection = self.get_collection(collection_id).await?;
        Self::ensure_enabled(&collection)?;
        QueriesValidator::new(&collection, self.options().max_query_values, true)
            .validate(queries)?;
        let collection_granted = Self::check_read_access(&collection)?;
        let grouped = group_by_type(queries);

        let sum = if collection_granted || !Authorization::status() {
            self.adapter()
                .sum(&collection, attribute, &grouped.filters, max)
                .await?
        } else {
            let raw = self
                .adapter()
                .find(
                    &collection,
                    &FindQuery {
                        filters: grouped.filters.clone(),
                        limit: max,
                        ..Default::default()
                    },
                )
                .await?;
            raw.iter()
                .filter(|doc| Self::document_grants(doc, PermissionKind::Read))
                .filter_map(|doc| doc.get(attribute).and_then(Value::as_float))
                .sum()
        };
        self.trigger(
            DatabaseEvent::DocumentSum,
            json!({ "collection": collection_id, "attribute": attribute, "sum": sum }),
        );
        Ok(sum)
    }

    // ========================================================================
    // UPDATE
    // ========================================================================

    async fn load_for_write(
        &self,
        collection: &Collection,
        id: &str,
        kind: PermissionKind,
    ) -> StrataResult<Doc> {
        let raw = self
            .adapter()
            .get_document(collection, id, &[])
            .await?
            .ok_or_else(|| StrataError::not_found("document", id))?;
        let doc = self.decode_doc(collection, raw)?;
        Self::authorize_write(collection, Some(&doc), kind)?;
        Ok(doc)
    }

    pub async fn update_document(
        &self,
        collection_id: &str,
        id: &str,
        updates: Doc,
    ) -> StrataResult<Doc> {
        let collection = self.get_collection(collection_id).await?;
        Self::ensure_enabled(&collection)?;
        let old = self
            .load_for_write(&collection, id, PermissionKind::Update)
            .await?;

        let mut doc = old.clone();
        for (field, value) in updates.iter() {
            match field {
                Doc::ID | Doc::SEQUENCE | Doc::COLLECTION | Doc::TENANT => continue,
                Doc::CREATED_AT if !self.preserve_dates() => continue,
                _ => {
                    doc.set(field, value.clone());
                }
            }
        }
        if updates.has(Doc::PERMISSIONS) {
            Self::normalize_permissions(&mut doc)?;
        }
        if !(self.preserve_dates() && updates.has(Doc::UPDATED_AT)) {
            doc.set(Doc::UPDATED_AT, Value::Timestamp(Utc::now()));
        }
        Structure::new(&collection).validate(&doc, false)?;

        let link_ops = Self::extract_link_ops(&collection, &mut doc, false)?;
        let encoded = self.encode_doc(&collection, doc.clone())?;
        self.with_transaction(|| async {
            self.adapter()
                .update_document(&collection, id, encoded.clone())
                .await?;
            self.apply_link_ops(&collection, id, &link_ops).await?;
            Ok(())
        })
        .await?;

        let key = self.cache_key();
        self.cache_flush(&[
            key.collection(&collection.id),
            key.document(&collection.id, id),
        ])
        .await;
        self.trigger(DatabaseEvent::DocumentUpdate, doc.to_json());
        Ok(doc)
    }

    /// Apply one partial update to every document matching the queries.
    pub async fn update_documents(
        &self,
        collection_id: &str,
        updates: Doc,
        queries: &[Query],
    ) -> StrataResult<u64> {
        let collection = self.get_collection(collection_id).await?;
        Self::ensure_enabled(&collection)?;
        QueriesValidator::new(&collection, self.options().max_query_values, true)
            .validate(queries)?;
        Structure::new(&collection).validate_partial(&updates)?;

        let grouped = group_by_type(queries);
        let candidates = self
            .adapter()
            .find(
                &collection,
                &FindQuery {
                    filters: grouped.filters.clone(),
                    ..Default::default()
                },
            )
            .await?;
        let mut ids: Vec<String> = Vec::new();
        for doc in &candidates {
            if Authorization::status()
                && Self::authorize_write(&collection, Some(doc), PermissionKind::Update).is_err()
            {
                continue;
            }
            ids.push(doc.id().to_string());
        }
        if ids.is_empty() {
            return Ok(0);
        }

        let mut updates = updates;
        updates.set(Doc::UPDATED_AT, Value::Timestamp(Utc::now()));
        let encoded = self.encode_doc(&collection, updates)?;
        let touched = self
            .with_transaction(|| async {
                self.adapter()
                    .update_documents(&collection, &encoded, &ids)
                    .await
            })
            .await?;

        let key = self.cache_key();
        let mut tags = vec![key.collection(&collection.id)];
        tags.extend(ids.iter().map(|id| key.document(&collection.id, id)));
        self.cache_flush(&tags).await;
        self.trigger(
            DatabaseEvent::DocumentsUpdate,
            json!({ "collection": collection_id, "count": touched }),
        );
        Ok(touched)
    }

    // ========================================================================
    // NUMERIC SEMANTICS
    // ========================================================================

    fn numeric_attribute(collection: &Collection, attribute: &str) -> StrataResult<()> {
        let attr = collection
            .attribute(attribute)
            .ok_or_else(|| StrataError::not_found("attribute", attribute))?;
        if attr.array
            || !matches!(attr.type_, AttributeType::Integer | AttributeType::Float)
        {
            return Err(StrataError::validation(format!(
                "Attribute '{}' is not a numeric scalar",
                attribute
            )));
        }
        Ok(())
    }

    /// Atomically add `by`, guarded by an optional maximum.
    pub async fn increase(
        &self,
        collection_id: &str,
        id: &str,
        attribute: &str,
        by: f64,
        max: Option<f64>,
    ) -> StrataResult<()> {
        self.change_numeric(collection_id, id, attribute, by, None, max, true)
            .await
    }

    /// Atomically subtract `by`, guarded by an optional minimum.
    pub async fn decrease(
        &self,
        collection_id: &str,
        id: &str,
        attribute: &str,
        by: f64,
        min: Option<f64>,
    ) -> StrataResult<()> {
        self.change_numeric(collection_id, id, attribute, -by, min, None, false)
            .await
    }

    #[allow(clippy::too_many_arguments)]
    async fn change_numeric(
        &self,
        collection_id: &str,
        id: &str,
        attribute: &str,
        by: f64,
        min: Option<f64>,
        max: Option<f64>,
        increasing: bool,
    ) -> StrataResult<()> {
        let collection = self.get_collection(collection_id).await?;
        Self::ensure_enabled(&collection)?;
        Self::numeric_attribute(&collection, attribute)?;
        self.load_for_write(&collection, id, PermissionKind::Update)
            .await?;

        let applied = self
            .adapter()
            .increase_document_attribute(&collection, id, attribute, by, min, max, Utc::now())
            .await?;
        if !applied {
            return Err(StrataError::validation(format!(
                "Change to '{}' would leave the allowed range",
                attribute
            )));
        }

        let key = self.cache_key();
        self.cache_flush(&[
            key.collection(&collection.id),
            key.document(&collection.id, id),
        ])
        .await;
        let event = if increasing {
            DatabaseEvent::DocumentIncrease
        } else {
            DatabaseEvent::DocumentDecrease
        };
        self.trigger(
            event,
            json!({ "collection": collection_id, "$id": id, "attribute": attribute }),
        );
        Ok(())
    }

    // ========================================================================
    // DELETE
    // ========================================================================

    pub async fn delete_document(&self, collection_id: &str, id: &str) -> StrataResult<Doc> {
        let collection = self.get_collection(collection_id).await?;
        Self::ensure_enabled(&collection)?;
        let old = self
            .load_for_write(&collection, id, PermissionKind::Delete)
            .await?;

        self.with_transaction(|| async {
            self.handle_on_delete(&collection, &old).await?;
            self.adapter().delete_document(&collection, id).await?;
            Ok(())
        })
        .await?;

        let key = self.cache_key();
        self.cache_flush(&[
            key.collection(&collection.id),
            key.document(&collection.id, id),
        ])
        .await;
        self.trigger(DatabaseEvent::DocumentDelete, old.to_json());
        Ok(old)
    }

    /// Delete without permission checks, used by cascade deletion.
    pub(crate) async fn delete_document_unchecked(
        &self,
        collection: &Collection,
        doc: Doc,
    ) -> StrataResult<()> {
        self.handle_on_delete(collection, &doc).await?;
        self.adapter().delete_document(collection, doc.id()).await?;
        let key = self.cache_key();
        self.cache_flush(&[
            key.collection(&collection.id),
            key.document(&collection.id, doc.id()),
        ])
        .await;
        Ok(())
    }

    /// Delete every document matching the queries. Returns the number of
    /// documents removed.
    pub async fn delete_documents(
        &self,
        collection_id: &str,
        queries: &[Query],
    ) -> StrataResult<u64> {
        let collection = self.get_collection(collection_id).await?;
        Self::ensure_enabled(&collection)?;
        QueriesValidator::new(&collection, self.options().max_query_values, true)
            .validate(queries)?;

        let grouped = group_by_type(queries);
        let candidates = self
            .adapter()
            .find(
                &collection,
                &FindQuery {
                    filters: grouped.filters.clone(),
                    ..Default::default()
                },
            )
            .await?;
        let mut doomed: Vec<Doc> = Vec::new();
        for doc in candidates {
            if Authorization::status()
                && Self::authorize_write(&collection, Some(&doc), PermissionKind::Delete).is_err()
            {
                continue;
            }
            doomed.push(doc);
        }
        if doomed.is_empty() {
            return Ok(0);
        }

        let count = self
            .with_transaction(|| async {
                let mut count = 0;
                for doc in &doomed {
                    self.handle_on_delete(&collection, doc).await?;
                    if self.adapter().delete_document(&collection, doc.id()).await? {
                        count += 1;
                    }
                }
                Ok(count)
            })
            .await?;

        let key = self.cache_key();
        let mut tags = vec![key.collection(&collection.id)];
        tags.extend(
            doomed
                .iter()
                .map(|doc| key.document(&collection.id, doc.id())),
        );
        self.cache_flush(&tags).await;
        self.trigger(
            DatabaseEvent::DocumentsDelete,
            json!({ "collection": collection_id, "count": count }),
        );
        Ok(count)
    }

    /// Drop a document's cache entries without touching storage.
    pub async fn purge_cached_document(&self, collection_id: &str, id: &str) {
        let key = self.cache_key();
        self.cache_flush(&[key.document(collection_id, id)]).await;
        self.trigger(
            DatabaseEvent::DocumentPurge,
            json!({ "collection": collection_id, "$id": id }),
        );
    }
}
