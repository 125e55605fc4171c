//! PostgreSQL adapter
//!
//! Implements `strata_storage::Adapter` over [`PgClient`]. Physical tables
//! are named `<namespace>_<collectionId>` inside the configured schema and
//! carry the internal columns `_id` (sequence), `_uid` (string id),
//! `_createdAt`, `_updatedAt`, `_permissions` and, under shared tables,
//! `_tenant`.

mod documents;
mod filters;
mod schema;

use crate::client::PgClient;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::RwLock;
use strata_core::query::Query;
use strata_core::{Attribute, AttributeType, Collection, Doc, Index, StrataError, StrataResult};
use strata_storage::{Adapter, AdapterScope, FindQuery};

pub(crate) const COL_SEQUENCE: &str = "_id";
pub(crate) const COL_UID: &str = "_uid";
pub(crate) const COL_CREATED_AT: &str = "_createdAt";
pub(crate) const COL_UPDATED_AT: &str = "_updatedAt";
pub(crate) const COL_PERMISSIONS: &str = "_permissions";
pub(crate) const COL_TENANT: &str = "_tenant";

/// PostgreSQL implementation of the storage adapter.
pub struct PostgresAdapter {
    client: PgClient,
    scope: RwLock<AdapterScope>,
}

impl PostgresAdapter {
    pub fn new(client: PgClient) -> Self {
        Self {
            client,
            scope: RwLock::new(AdapterScope::default()),
        }
    }

    pub fn client(&self) -> &PgClient {
        &self.client
    }

    /// Quote an identifier, doubling embedded quotes.
    pub(crate) fn quote_ident(ident: &str) -> String {
        format!("\"{}\"", ident.replace('"', "\"\""))
    }

    /// Unqualified physical table name of a collection.
    pub(crate) fn physical_name(&self, collection: &str) -> String {
        let scope = self.scope();
        if scope.namespace.is_empty() {
            collection.to_string()
        } else {
            format!("{}_{}", scope.namespace, collection)
        }
    }

    /// Fully qualified, quoted table reference.
    pub(crate) fn table_ref(&self, collection: &str) -> String {
        let scope = self.scope();
        format!(
            "{}.{}",
            Self::quote_ident(&scope.schema),
            Self::quote_ident(&self.physical_name(collection))
        )
    }

    /// Map a document field name to its physical column name.
    pub(crate) fn column_name(field: &str) -> &str {
        match field {
            Doc::ID => COL_UID,
            Doc::SEQUENCE => COL_SEQUENCE,
            Doc::CREATED_AT => COL_CREATED_AT,
            Doc::UPDATED_AT => COL_UPDATED_AT,
            Doc::PERMISSIONS => COL_PERMISSIONS,
            Doc::TENANT => COL_TENANT,
            other => other,
        }
    }

    /// Map a physical column name back to its document field name.
    pub(crate) fn field_name(column: &str) -> &str {
        match column {
            COL_UID => Doc::ID,
            COL_SEQUENCE => Doc::SEQUENCE,
            COL_CREATED_AT => Doc::CREATED_AT,
            COL_UPDATED_AT => Doc::UPDATED_AT,
            COL_PERMISSIONS => Doc::PERMISSIONS,
            COL_TENANT => Doc::TENANT,
            other => other,
        }
    }

    /// SQL column type for an attribute.
    pub(crate) fn column_type(&self, attribute: &Attribute) -> StrataResult<String> {
        let base = match attribute.type_ {
            AttributeType::String => {
                if attribute.size > 0 && attribute.size <= self.max_varchar_length() {
                    format!("VARCHAR({})", attribute.size)
                } else {
                    "TEXT".to_string()
                }
            }
            AttributeType::Integer => {
                if attribute.size >= 8 {
                    "BIGINT".to_string()
                } else {
                    "INTEGER".to_string()
                }
            }
            AttributeType::Float => "DOUBLE PRECISION".to_string(),
            AttributeType::Boolean => "BOOLEAN".to_string(),
            AttributeType::Timestamptz => "TIMESTAMPTZ(3)".to_string(),
            AttributeType::Json => "JSONB".to_string(),
            AttributeType::Uuid => "UUID".to_string(),
            AttributeType::Relationship => "VARCHAR(255)".to_string(),
            AttributeType::Virtual => {
                return Err(StrataError::internal(
                    "Virtual attributes have no physical column",
                ))
            }
        };
        if attribute.array {
            Ok(format!("{}[]", base))
        } else {
            Ok(base)
        }
    }
}

#[async_trait]
impl Adapter for PostgresAdapter {
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

    fn max_varchar_length(&self) -> i64 {
        10_485_760
    }

    /// PostgreSQL imposes no combined key-length cap the engine needs to
    /// enforce ahead of time.
    fn max_index_length(&self) -> i64 {
        0
    }

    async fn ping(&self) -> StrataResult<()> {
        self.client.ping().await
    }

    async fn begin(&self) -> StrataResult<u32> {
        self.client.begin().await
    }

    async fn commit(&self) -> StrataResult<()> {
        self.client.commit().await
    }

    async fn rollback(&self) -> StrataResult<()> {
        self.client.rollback().await
    }

    async fn create_schema(&self, name: &str) -> StrataResult<()> {
        self.schema_create(name).await
    }

    async fn schema_exists(&self, name: &str) -> StrataResult<bool> {
        self.schema_exists_impl(name).await
    }

    async fn delete_schema(&self, name: &str) -> StrataResult<()> {
        self.schema_delete(name).await
    }

    async fn create_collection(
        &self,
        id: &str,
        attributes: &[Attribute],
        indexes: &[Index],
    ) -> StrataResult<()> {
        self.collection_create(id, attributes, indexes).await
    }

    async fn delete_collection(&self, id: &str) -> StrataResult<()> {
        self.collection_delete(id).await
    }

    async fn collection_exists(&self, id: &str) -> StrataResult<bool> {
        self.collection_exists_impl(id).await
    }

    async fn analyze_collection(&self, id: &str) -> StrataResult<bool> {
        self.collection_analyze(id).await
    }

    async fn get_size_of_collection(&self, id: &str) -> StrataResult<i64> {
        self.collection_size(id).await
    }

    async fn create_attribute(
        &self,
        collection: &str,
        attribute: &Attribute,
    ) -> StrataResult<()> {
        self.attribute_create(collection, attribute).await
    }

    async fn create_attributes(
        &self,
        collection: &str,
        attributes: &[Attribute],
    ) -> StrataResult<()> {
        self.attributes_create(collection, attributes).await
    }

    async fn update_attribute(
        &self,
        collection: &str,
        attribute: &Attribute,
    ) -> StrataResult<()> {
        self.attribute_update(collection, attribute).await
    }

    async fn rename_attribute(
        &self,
        collection: &str,
        old: &str,
        new: &str,
    ) -> StrataResult<()> {
        self.attribute_rename(collection, old, new).await
    }

    async fn delete_attribute(&self, collection: &str, key: &str) -> StrataResult<()> {
        self.attribute_delete(collection, key).await
    }

    async fn get_schema_attributes(&self, collection: &str) -> StrataResult<Vec<Doc>> {
        self.schema_attributes(collection).await
    }

    async fn create_index(&self, collection: &Collection, index: &Index) -> StrataResult<()> {
        self.index_create(collection, index).await
    }

    async fn rename_index(&self, collection: &str, old: &str, new: &str) -> StrataResult<()> {
        self.index_rename(collection, old, new).await
    }

    async fn delete_index(&self, collection: &str, key: &str) -> StrataResult<()> {
        self.index_delete(collection, key).await
    }

    async fn create_document(&self, collection: &Collection, doc: Doc) -> StrataResult<Doc> {
        self.document_create(collection, doc).await
    }

    async fn create_documents(
        &self,
        collection: &Collection,
        docs: Vec<Doc>,
    ) -> StrataResult<Vec<Doc>> {
        self.documents_create(collection, docs).await
    }

    async fn get_document(
        &self,
        collection: &Collection,
        id: &str,
        selections: &[String],
    ) -> StrataResult<Option<Doc>> {
        self.document_get(collection, id, selections).await
    }

    async fn update_document(
        &self,
        collection: &Collection,
        id: &str,
        doc: Doc,
    ) -> StrataResult<Doc> {
        self.document_update(collection, id, doc).await
    }

    async fn update_documents(
        &self,
        collection: &Collection,
        updates: &Doc,
        ids: &[String],
    ) -> StrataResult<u64> {
        self.documents_update(collection, updates, ids).await
    }

    async fn delete_document(&self, collection: &Collection, id: &str) -> StrataResult<bool> {
        self.document_delete(collection, id).await
    }

    async fn delete_documents(
        &self,
        collection: &Collection,
        ids: &[String],
    ) -> StrataResult<u64> {
        self.documents_delete(collection, ids).await
    }

    async fn find(&self, collection: &Collection, query: &FindQuery) -> StrataResult<Vec<Doc>> {
        self.documents_find(collection, query).await
    }

    async fn count(
        &self,
        collection: &Collection,
        filters: &[Query],
        max: Option<i64>,
    ) -> StrataResult<i64> {
        self.documents_count(collection, filters, max).await
    }

    async fn sum(
        &self,
        collection: &Collection,
        attribute: &str,
        filters: &[Query],
        max: Option<i64>,
    ) -> StrataResult<f64> {
        self.documents_sum(collection, attribute, filters, max).await
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
        self.document_increase(collection, id, attribute, by, min, max, updated_at)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identifier_quoting() {
        assert_eq!(PostgresAdapter::quote_ident("users"), "\"users\"");
        assert_eq!(PostgresAdapter::quote_ident("we\"ird"), "\"we\"\"ird\"");
    }

    #[test]
    fn test_column_field_mapping_is_symmetric() {
        for field in Doc::SYSTEM_FIELDS {
            if field == Doc::COLLECTION {
                continue;
            }
            let column = PostgresAdapter::column_name(field);
            assert_ne!(column, field);
            assert_eq!(PostgresAdapter::field_name(column), field);
        }
        assert_eq!(PostgresAdapter::column_name("age"), "age");
        assert_eq!(PostgresAdapter::field_name("age"), "age");
    }
}
