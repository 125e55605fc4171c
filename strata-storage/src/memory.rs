//! In-memory adapter
//!
//! A complete [`Adapter`] over in-process tables, used by the engine
//! test-suite and available for ephemeral single-process deployments.
//! Transaction scopes are implemented as state snapshots so nested
//! rollback behaves like savepoints. Filtering, ordering, and cursor
//! semantics mirror the PostgreSQL adapter.

use crate::{Adapter, AdapterScope, FindQuery};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::cmp::Ordering as CmpOrdering;
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, RwLock};
use strata_core::query::{CursorDirection, Query, QueryMethod};
use strata_core::{
    Attribute, Collection, Doc, Index, IndexType, Order, StrataError, StrataResult, Value,
};

#[derive(Debug, Clone, Default)]
struct MemoryTable {
    attributes: Vec<Attribute>,
    indexes: Vec<Index>,
    rows: Vec<Doc>,
    next_sequence: i64,
}

#[derive(Debug, Clone, Default)]
struct MemoryState {
    schemas: HashSet<String>,
    tables: HashMap<String, MemoryTable>,
}

#[derive(Debug, Default)]
struct Inner {
    state: MemoryState,
    /// One snapshot per open transaction scope, innermost last.
    snapshots: Vec<MemoryState>,
}

/// In-memory [`Adapter`] implementation.
#[derive(Default)]
pub struct MemoryAdapter {
    scope: RwLock<AdapterScope>,
    inner: Mutex<Inner>,
}

impl MemoryAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_table<T>(
        &self,
        collection: &str,
        f: impl FnOnce(&mut MemoryTable) -> StrataResult<T>,
    ) -> StrataResult<T> {
        let mut inner = self.inner.lock().expect("memory adapter lock");
        let table = inner
            .state
            .tables
            .get_mut(collection)
            .ok_or_else(|| StrataError::not_found("collection", collection))?;
        f(table)
    }

    fn tenant_matches(&self, doc: &Doc) -> bool {
        let scope = self.scope();
        if !scope.shared_tables {
            return true;
        }
        doc.tenant() == scope.tenant_id
    }

    fn check_unique_indexes(
        &self,
        table: &MemoryTable,
        doc: &Doc,
        skip_id: Option<&str>,
    ) -> StrataResult<()> {
        for index in &table.indexes {
            if index.type_ != IndexType::Unique {
                continue;
            }
            let values: Vec<&Value> = index
                .attributes
                .iter()
                .map(|attr| doc.get(attr).unwrap_or(&Value::Null))
                .collect();
            if values.iter().all(|v| v.is_null()) {
                continue;
            }
            let clash = table.rows.iter().any(|row| {
                if Some(row.id()) == skip_id {
                    return false;
                }
                index
                    .attributes
                    .iter()
                    .zip(&values)
                    .all(|(attr, value)| {
                        row.get(attr).unwrap_or(&Value::Null).compare(value)
                            == CmpOrdering::Equal
                    })
            });
            if clash {
                return Err(StrataError::conflict(
                    "document",
                    doc.id(),
                    format!("unique index '{}' violated", index.key),
                ));
            }
        }
        Ok(())
    }
}

// ============================================================================
// QUERY EVALUATION
// ============================================================================

fn matches_filter(doc: &Doc, query: &Query) -> bool {
    let field = || doc.get(query.attribute()).unwrap_or(&Value::Null);
    match query.method {
        QueryMethod::Equal => query
            .scalar_values()
            .iter()
            .any(|v| field().compare(v) == CmpOrdering::Equal),
        QueryMethod::NotEqual => query
            .scalar_values()
            .iter()
            .all(|v| field().compare(v) != CmpOrdering::Equal),
        QueryMethod::LessThan => query
            .first_scalar()
            .map(|v| !field().is_null() && field().compare(v) == CmpOrdering::Less)
            .unwrap_or(false),
        QueryMethod::LessThanEqual => query
            .first_scalar()
            .map(|v| !field().is_null() && field().compare(v) != CmpOrdering::Greater)
            .unwrap_or(false),
        QueryMethod::GreaterThan => query
            .first_scalar()
            .map(|v| field().compare(v) == CmpOrdering::Greater)
            .unwrap_or(false),
        QueryMethod::GreaterThanEqual => query
            .first_scalar()
            .map(|v| field().compare(v) != CmpOrdering::Less)
            .unwrap_or(false),
        QueryMethod::Between => {
            let values = query.scalar_values();
            match (values.first(), values.get(1)) {
                (Some(low), Some(high)) => {
                    let value = field();
                    !value.is_null()
                        && value.compare(low) != CmpOrdering::Less
                        && value.compare(high) != CmpOrdering::Greater
                }
                _ => false,
            }
        }
        QueryMethod::Contains => match field() {
            Value::Array(items) => query.scalar_values().iter().all(|needle| {
                items
                    .iter()
                    .any(|item| item.compare(needle) == CmpOrdering::Equal)
            }),
            Value::String(text) => query
                .scalar_values()
                .iter()
                .all(|needle| needle.as_str().map(|n| text.contains(n)).unwrap_or(false)),
            _ => false,
        },
        QueryMethod::Search => match (field().as_str(), query.first_scalar()) {
            (Some(text), Some(term)) => term
                .as_str()
                .map(|term| text.to_lowercase().contains(&term.to_lowercase()))
                .unwrap_or(false),
            _ => false,
        },
        QueryMethod::StartsWith => match (field().as_str(), query.first_scalar()) {
            (Some(text), Some(prefix)) => prefix
                .as_str()
                .map(|prefix| text.starts_with(prefix))
                .unwrap_or(false),
            _ => false,
        },
        QueryMethod::EndsWith => match (field().as_str(), query.first_scalar()) {
            (Some(text), Some(suffix)) => suffix
                .as_str()
                .map(|suffix| text.ends_with(suffix))
                .unwrap_or(false),
            _ => false,
        },
        QueryMethod::IsNull => field().is_null(),
        QueryMethod::IsNotNull => !field().is_null(),
        QueryMethod::Or => query.subqueries().iter().any(|q| matches_filter(doc, q)),
        QueryMethod::And => query.subqueries().iter().all(|q| matches_filter(doc, q)),
        _ => true,
    }
}

/// Effective orders of a find: the requested orders plus a `$sequence`
/// tie-break.
fn effective_orders(orders: &[(String, Order)]) -> Vec<(String, Order)> {
    let mut effective = orders.to_vec();
    if !effective.iter().any(|(attr, _)| attr == Doc::SEQUENCE) {
        effective.push((Doc::SEQUENCE.to_string(), Order::Asc));
    }
    effective
}

fn compare_docs(a: &Doc, b: &Doc, orders: &[(String, Order)]) -> CmpOrdering {
    for (attr, order) in orders {
        let left = a.get(attr).unwrap_or(&Value::Null);
        let right = b.get(attr).unwrap_or(&Value::Null);
        let mut cmp = left.compare(right);
        if *order == Order::Desc {
            cmp = cmp.reverse();
        }
        if cmp != CmpOrdering::Equal {
            return cmp;
        }
    }
    CmpOrdering::Equal
}

fn project(doc: &Doc, selections: &[String]) -> Doc {
    if selections.is_empty() {
        return doc.clone();
    }
    doc.iter()
        .filter(|(key, _)| {
            key.starts_with('$') || selections.iter().any(|s| s == key)
        })
        .map(|(key, value)| (key.to_string(), value.clone()))
        .collect()
}

#[async_trait]
impl Adapter for MemoryAdapter {
    fn set_scope(&self, scope: AdapterScope) {
        *self.scope.write().expect("scope lock") = scope;
    }

    fn scope(&self) -> AdapterScope {
        self.scope.read().expect("scope lock").clone()
    }

    fn supports_fulltext_index(&self) -> bool {
        true
    }

    fn supports_array_index(&self) -> bool {
        true
    }

    fn supports_batch_create_attributes(&self) -> bool {
        true
    }

    fn supports_schema_attributes(&self) -> bool {
        true
    }

    async fn ping(&self) -> StrataResult<()> {
        Ok(())
    }

    // ========================================================================
    // TRANSACTION SCOPES (snapshot-based savepoints)
    // ========================================================================

    async fn begin(&self) -> StrataResult<u32> {
        let mut inner = self.inner.lock().expect("memory adapter lock");
        let snapshot = inner.state.clone();
        inner.snapshots.push(snapshot);
        Ok(inner.snapshots.len() as u32)
    }

    async fn commit(&self) -> StrataResult<()> {
        let mut inner = self.inner.lock().expect("memory adapter lock");
        inner
            .snapshots
            .pop()
            .ok_or_else(|| StrataError::transaction("No active transaction to commit"))?;
        Ok(())
    }

    async fn rollback(&self) -> StrataResult<()> {
        let mut inner = self.inner.lock().expect("memory adapter lock");
        let snapshot = inner
            .snapshots
            .pop()
            .ok_or_else(|| StrataError::transaction("No active transaction to roll back"))?;
        inner.state = snapshot;
        Ok(())
    }

    // ========================================================================
    // SCHEMA CONTAINER
    // ========================================================================

    async fn create_schema(&self, name: &str) -> StrataResult<()> {
        let mut inner = self.inner.lock().expect("memory adapter lock");
        inner.state.schemas.insert(name.to_string());
        Ok(())
    }

    async fn schema_exists(&self, name: &str) -> StrataResult<bool> {
        let inner = self.inner.lock().expect("memory adapter lock");
        Ok(inner.state.schemas.contains(name))
    }

    async fn delete_schema(&self, name: &str) -> StrataResult<()> {
        let mut inner = self.inner.lock().expect("memory adapter lock");
        if !inner.state.schemas.remove(name) {
            return Err(StrataError::not_found("schema", name));
        }
        inner.state.tables.clear();
        Ok(())
    }

    // ========================================================================
    // COLLECTIONS
    // ========================================================================

    async fn create_collection(
        &self,
        id: &str,
        attributes: &[Attribute],
        indexes: &[Index],
    ) -> StrataResult<()> {
        let mut inner = self.inner.lock().expect("memory adapter lock");
        if inner.state.tables.contains_key(id) {
            return Err(StrataError::conflict("collection", id, "already exists"));
        }
        inner.state.tables.insert(
            id.to_string(),
            MemoryTable {
                attributes: attributes.to_vec(),
                indexes: indexes.to_vec(),
                rows: Vec::new(),
                next_sequence: 1,
            },
        );
        Ok(())
    }

    async fn delete_collection(&self, id: &str) -> StrataResult<()> {
        let mut inner = self.inner.lock().expect("memory adapter lock");
        inner
            .state
            .tables
            .remove(id)
            .ok_or_else(|| StrataError::not_found("collection", id))?;
        Ok(())
    }

    async fn collection_exists(&self, id: &str) -> StrataResult<bool> {
        let inner = self.inner.lock().expect("memory adapter lock");
        Ok(inner.state.tables.contains_key(id))
    }

    async fn analyze_collection(&self, _id: &str) -> StrataResult<bool> {
        Ok(false)
    }

    async fn get_size_of_collection(&self, id: &str) -> StrataResult<i64> {
        self.with_table(id, |table| {
            Ok(table
                .rows
                .iter()
                .map(|doc| doc.to_json().to_string().len() as i64)
                .sum())
        })
    }

    // ========================================================================
    // ATTRIBUTES
    // ========================================================================

    async fn create_attribute(
        &self,
        collection: &str,
        attribute: &Attribute,
    ) -> StrataResult<()> {
        self.with_table(collection, |table| {
            if table.attributes.iter().any(|a| a.key == attribute.key) {
                return Err(StrataError::conflict(
                    "attribute",
                    &attribute.key,
                    "already exists",
                ));
            }
            table.attributes.push(attribute.clone());
            Ok(())
        })
    }

    async fn create_attributes(
        &self,
        collection: &str,
        attributes: &[Attribute],
    ) -> StrataResult<()> {
        for attribute in attributes {
            self.create_attribute(collection, attribute).await?;
        }
        Ok(())
    }

    async fn update_attribute(
        &self,
        collection: &str,
        attribute: &Attribute,
    ) -> StrataResult<()> {
        self.with_table(collection, |table| {
            let slot = table
                .attributes
                .iter_mut()
                .find(|a| a.key == attribute.key)
                .ok_or_else(|| StrataError::not_found("attribute", &attribute.key))?;
            *slot = attribute.clone();
            Ok(())
        })
    }

    async fn rename_attribute(
        &self,
        collection: &str,
        old: &str,
        new: &str,
    ) -> StrataResult<()> {
        self.with_table(collection, |table| {
            let slot = table
                .attributes
                .iter_mut()
                .find(|a| a.key == old)
                .ok_or_else(|| StrataError::not_found("attribute", old))?;
            slot.key = new.to_string();
            slot.id = new.to_string();
            for row in table.rows.iter_mut() {
                // Preserve field order while renaming.
                let renamed: Doc = row
                    .iter()
                    .map(|(key, value)| {
                        let key = if key == old { new } else { key };
                        (key.to_string(), value.clone())
                    })
                    .collect();
                *row = renamed;
            }
            Ok(())
        })
    }

    async fn delete_attribute(&self, collection: &str, key: &str) -> StrataResult<()> {
        self.with_table(collection, |table| {
            let before = table.attributes.len();
            table.attributes.retain(|a| a.key != key);
            if table.attributes.len() == before {
                return Err(StrataError::not_found("attribute", key));
            }
            for row in table.rows.iter_mut() {
                row.remove(key);
            }
            Ok(())
        })
    }

    async fn get_schema_attributes(&self, collection: &str) -> StrataResult<Vec<Doc>> {
        self.with_table(collection, |table| {
            table
                .attributes
                .iter()
                .map(|attr| {
                    Doc::from_json(serde_json::json!({
                        "columnName": attr.key,
                        "dataType": attr.type_.as_str(),
                        "size": attr.size,
                    }))
                })
                .collect()
        })
    }

    // ========================================================================
    // INDEXES
    // ========================================================================

    async fn create_index(&self, collection: &Collection, index: &Index) -> StrataResult<()> {
        self.with_table(&collection.id, |table| {
            if table.indexes.iter().any(|i| i.key == index.key) {
                return Err(StrataError::conflict("index", &index.key, "already exists"));
            }
            table.indexes.push(index.clone());
            Ok(())
        })
    }

    async fn rename_index(&self, collection: &str, old: &str, new: &str) -> StrataResult<()> {
        self.with_table(collection, |table| {
            let slot = table
                .indexes
                .iter_mut()
                .find(|i| i.key == old)
                .ok_or_else(|| StrataError::not_found("index", old))?;
            slot.key = new.to_string();
            slot.id = new.to_string();
            Ok(())
        })
    }

    async fn delete_index(&self, collection: &str, key: &str) -> StrataResult<()> {
        self.with_table(collection, |table| {
            let before = table.indexes.len();
            table.indexes.retain(|i| i.key != key);
            if table.indexes.len() == before {
                return Err(StrataError::not_found("index", key));
            }
            Ok(())
        })
    }

    // ========================================================================
    // DOCUMENTS
    // ========================================================================

    async fn create_document(&self, collection: &Collection, mut doc: Doc) -> StrataResult<Doc> {
        self.with_table(&collection.id, |table| {
            if table.rows.iter().any(|row| row.id() == doc.id()) {
                return Err(StrataError::conflict("document", doc.id(), "already exists"));
            }
            doc.set(Doc::SEQUENCE, Value::Integer(table.next_sequence));
            table.next_sequence += 1;
            Ok(())
        })?;
        // Unique checks need the doc with its sequence assigned.
        self.with_table(&collection.id, |table| {
            self.check_unique_indexes(table, &doc, None)?;
            table.rows.push(doc.clone());
            Ok(doc)
        })
    }

    async fn create_documents(
        &self,
        collection: &Collection,
        docs: Vec<Doc>,
    ) -> StrataResult<Vec<Doc>> {
        let mut created = Vec::with_capacity(docs.len());
        for doc in docs {
            created.push(self.create_document(collection, doc).await?);
        }
        Ok(created)
    }

    async fn get_document(
        &self,
        collection: &Collection,
        id: &str,
        selections: &[String],
    ) -> StrataResult<Option<Doc>> {
        self.with_table(&collection.id, |table| {
            Ok(table
                .rows
                .iter()
                .find(|row| row.id() == id && self.tenant_matches(row))
                .map(|row| project(row, selections)))
        })
    }

    async fn update_document(
        &self,
        collection: &Collection,
        id: &str,
        doc: Doc,
    ) -> StrataResult<Doc> {
        self.with_table(&collection.id, |table| {
            self.check_unique_indexes(table, &doc, Some(id))?;
            let row = table
                .rows
                .iter_mut()
                .find(|row| row.id() == id)
                .ok_or_else(|| StrataError::not_found("document", id))?;
            let sequence = row.sequence();
            let mut updated = doc;
            updated.set(Doc::SEQUENCE, Value::Integer(sequence));
            *row = updated.clone();
            Ok(updated)
        })
    }

    async fn update_documents(
        &self,
        collection: &Collection,
        updates: &Doc,
        ids: &[String],
    ) -> StrataResult<u64> {
        self.with_table(&collection.id, |table| {
            let mut touched = 0;
            for row in table.rows.iter_mut() {
                if ids.iter().any(|id| id == row.id()) {
                    for (key, value) in updates.iter() {
                        row.set(key, value.clone());
                    }
                    touched += 1;
                }
            }
            Ok(touched)
        })
    }

    async fn delete_document(&self, collection: &Collection, id: &str) -> StrataResult<bool> {
        self.with_table(&collection.id, |table| {
            let before = table.rows.len();
            table.rows.retain(|row| row.id() != id);
            Ok(table.rows.len() < before)
        })
    }

    async fn delete_documents(
        &self,
        collection: &Collection,
        ids: &[String],
    ) -> StrataResult<u64> {
        self.with_table(&collection.id, |table| {
            let before = table.rows.len();
            table.rows.retain(|row| !ids.iter().any(|id| id == row.id()));
            Ok((before - table.rows.len()) as u64)
        })
    }

    async fn find(&self, collection: &Collection, query: &FindQuery) -> StrataResult<Vec<Doc>> {
        self.with_table(&collection.id, |table| {
            let mut orders = effective_orders(&query.orders);
            let before = query.cursor_direction == Some(CursorDirection::Before);
            if before {
                // Traverse backwards so the page adjacent to the cursor
                // comes first, then restore the requested order at the end.
                for (_, order) in orders.iter_mut() {
                    *order = order.reverse();
                }
            }

            let mut rows: Vec<&Doc> = table
                .rows
                .iter()
                .filter(|row| self.tenant_matches(row))
                .filter(|row| query.filters.iter().all(|f| matches_filter(row, f)))
                .filter(|row| match &query.cursor {
                    Some(cursor) => compare_docs(row, cursor, &orders) == CmpOrdering::Greater,
                    None => true,
                })
                .collect();

            rows.sort_by(|a, b| compare_docs(a, b, &orders));

            let offset = query.offset.unwrap_or(0).max(0) as usize;
            let mut page: Vec<Doc> = rows
                .into_iter()
                .skip(offset)
                .take(query.limit.map(|l| l.max(0) as usize).unwrap_or(usize::MAX))
                .map(|row| project(row, &query.selections))
                .collect();
            if before {
                page.reverse();
            }
            Ok(page)
        })
    }

    async fn count(
        &self,
        collection: &Collection,
        filters: &[Query],
        max: Option<i64>,
    ) -> StrataResult<i64> {
        self.with_table(&collection.id, |table| {
            let count = table
                .rows
                .iter()
                .filter(|row| self.tenant_matches(row))
                .filter(|row| filters.iter().all(|f| matches_filter(row, f)))
                .count() as i64;
            Ok(match max {
                Some(max) => count.min(max),
                None => count,
            })
        })
    }

    async fn sum(
        &self,
        collection: &Collection,
        attribute: &str,
        filters: &[Query],
        max: Option<i64>,
    ) -> StrataResult<f64> {
        self.with_table(&collection.id, |table| {
            Ok(table
                .rows
                .iter()
                .filter(|row| self.tenant_matches(row))
                .filter(|row| filters.iter().all(|f| matches_filter(row, f)))
                .take(max.map(|m| m.max(0) as usize).unwrap_or(usize::MAX))
                .filter_map(|row| row.get(attribute).and_then(Value::as_float))
                .sum())
        })
    }

    async fn increase_document_attribute(
        &self,
        collection: &Collection,
        id: &str,
        attribute: &str,
        by: f64,
        min: Option<f64>,
        max: Option<f64>,
        updated_at: DateTime<Utc>,
    ) -> StrataResult<bool> {
        self.with_table(&collection.id, |table| {
            let Some(row) = table.rows.iter_mut().find(|row| row.id() == id) else {
                return Ok(false);
            };
            let current = row.get(attribute).and_then(Value::as_float).unwrap_or(0.0);
            let next = current + by;
            if max.map(|max| next > max).unwrap_or(false)
                || min.map(|min| next < min).unwrap_or(false)
            {
                return Ok(false);
            }
            let was_integer = matches!(
                row.get(attribute),
                Some(Value::Integer(_)) | None
            );
            if was_integer && next.fract() == 0.0 {
                row.set(attribute, Value::Integer(next as i64));
            } else {
                row.set(attribute, Value::Float(next));
            }
            row.set(Doc::UPDATED_AT, Value::Timestamp(updated_at));
            Ok(true)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn users() -> Collection {
        let mut collection = Collection::new("users");
        collection.attributes = vec![
            Attribute::string("name", 128).required(),
            Attribute::integer("age"),
        ];
        collection
    }

    async fn seeded() -> (MemoryAdapter, Collection) {
        let adapter = MemoryAdapter::new();
        let collection = users();
        adapter
            .create_collection(&collection.id, &collection.attributes, &collection.indexes)
            .await
            .unwrap();
        for (id, name, age) in [("a", "Ada", 30), ("b", "Bob", 20), ("c", "Cyd", 40)] {
            adapter
                .create_document(
                    &collection,
                    Doc::from_json(json!({"$id": id, "name": name, "age": age})).unwrap(),
                )
                .await
                .unwrap();
        }
        (adapter, collection)
    }

    #[tokio::test]
    async fn test_sequence_assignment() {
        let (adapter, collection) = seeded().await;
        let doc = adapter
            .get_document(&collection, "c", &[])
            .await
            .unwrap()
            .unwrap();
        assert_eq!(doc.sequence(), 3);
    }

    #[tokio::test]
    async fn test_duplicate_id_conflicts() {
        let (adapter, collection) = seeded().await;
        let dup = Doc::from_json(json!({"$id": "a", "name": "Ada"})).unwrap();
        let err = adapter.create_document(&collection, dup).await.unwrap_err();
        assert!(matches!(err, StrataError::Conflict { .. }));
    }

    #[tokio::test]
    async fn test_find_with_filters_and_order() {
        let (adapter, collection) = seeded().await;
        let found = adapter
            .find(
                &collection,
                &FindQuery {
                    filters: vec![Query::greater_than("age", 19)],
                    orders: vec![("age".to_string(), Order::Desc)],
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let names: Vec<&str> = found.iter().map(|d| d.get_str("name").unwrap()).collect();
        assert_eq!(names, vec!["Cyd", "Ada", "Bob"]);
    }

    #[tokio::test]
    async fn test_cursor_pagination() {
        let (adapter, collection) = seeded().await;
        let cursor = adapter
            .get_document(&collection, "a", &[])
            .await
            .unwrap()
            .unwrap();

        // After "a" in $sequence order: b, c.
        let after = adapter
            .find(
                &collection,
                &FindQuery {
                    cursor: Some(cursor.clone()),
                    cursor_direction: Some(CursorDirection::After),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let ids: Vec<&str> = after.iter().map(Doc::id).collect();
        assert_eq!(ids, vec!["b", "c"]);

        // Before "a": nothing.
        let before = adapter
            .find(
                &collection,
                &FindQuery {
                    cursor: Some(cursor),
                    cursor_direction: Some(CursorDirection::Before),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(before.is_empty());
    }

    #[tokio::test]
    async fn test_nested_rollback_preserves_outer_work() {
        let (adapter, collection) = seeded().await;

        adapter.begin().await.unwrap();
        adapter
            .create_document(
                &collection,
                Doc::from_json(json!({"$id": "outer", "name": "O"})).unwrap(),
            )
            .await
            .unwrap();

        let depth = adapter.begin().await.unwrap();
        assert_eq!(depth, 2);
        adapter
            .create_document(
                &collection,
                Doc::from_json(json!({"$id": "inner", "name": "I"})).unwrap(),
            )
            .await
            .unwrap();
        adapter.rollback().await.unwrap();

        adapter.commit().await.unwrap();

        assert!(adapter
            .get_document(&collection, "outer", &[])
            .await
            .unwrap()
            .is_some());
        assert!(adapter
            .get_document(&collection, "inner", &[])
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_commit_without_begin_fails() {
        let adapter = MemoryAdapter::new();
        assert!(matches!(
            adapter.commit().await.unwrap_err(),
            StrataError::Transaction { .. }
        ));
        assert!(matches!(
            adapter.rollback().await.unwrap_err(),
            StrataError::Transaction { .. }
        ));
    }

    #[tokio::test]
    async fn test_increase_with_bounds() {
        let (adapter, collection) = seeded().await;
        let now = Utc::now();

        assert!(adapter
            .increase_document_attribute(&collection, "b", "age", 5.0, None, Some(30.0), now)
            .await
            .unwrap());
        // 25 + 10 would exceed 30.
        assert!(!adapter
            .increase_document_attribute(&collection, "b", "age", 10.0, None, Some(30.0), now)
            .await
            .unwrap());
        let doc = adapter
            .get_document(&collection, "b", &[])
            .await
            .unwrap()
            .unwrap();
        assert_eq!(doc.get_integer("age"), Some(25));
        assert!(doc.updated_at().is_some());
    }

    #[tokio::test]
    async fn test_sum_and_count() {
        let (adapter, collection) = seeded().await;
        let count = adapter.count(&collection, &[], None).await.unwrap();
        assert_eq!(count, 3);
        let capped = adapter.count(&collection, &[], Some(2)).await.unwrap();
        assert_eq!(capped, 2);
        let sum = adapter.sum(&collection, "age", &[], None).await.unwrap();
        assert_eq!(sum, 90.0);
    }

    #[tokio::test]
    async fn test_unique_index_enforcement() {
        let (adapter, collection) = seeded().await;
        adapter
            .create_index(
                &collection,
                &Index::new("uniq_name", IndexType::Unique, vec!["name".to_string()]),
            )
            .await
            .unwrap();
        let dup = Doc::from_json(json!({"$id": "z", "name": "Ada"})).unwrap();
        assert!(matches!(
            adapter.create_document(&collection, dup).await.unwrap_err(),
            StrataError::Conflict { .. }
        ));
    }

    #[tokio::test]
    async fn test_shared_tables_tenant_isolation() {
        let adapter = MemoryAdapter::new();
        let collection = users();
        adapter
            .create_collection(&collection.id, &collection.attributes, &[])
            .await
            .unwrap();
        adapter.set_scope(AdapterScope {
            shared_tables: true,
            tenant_id: Some(1),
            ..Default::default()
        });
        adapter
            .create_document(
                &collection,
                Doc::from_json(json!({"$id": "t1", "name": "A", "$tenant": 1})).unwrap(),
            )
            .await
            .unwrap();
        adapter
            .create_document(
                &collection,
                Doc::from_json(json!({"$id": "t2", "name": "B", "$tenant": 2})).unwrap(),
            )
            .await
            .unwrap();

        let visible = adapter.find(&collection, &FindQuery::default()).await.unwrap();
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].id(), "t1");
        assert!(adapter
            .get_document(&collection, "t2", &[])
            .await
            .unwrap()
            .is_none());
    }
}
