//! Adapter trait
//!
//! The adapter turns engine-level operations into dialect-specific SQL (or
//! whatever the backing store speaks). It owns physical naming, column
//! mapping, and capability flags. Flags an adapter does not override read
//! as unsupported.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use strata_core::query::{CursorDirection, Query};
use strata_core::{Attribute, Collection, Doc, Index, Order, StrataResult};

/// Identity of the key space an adapter operates in.
///
/// `namespace + schema + tenant` form the physical key space. When
/// `shared_tables` is set the adapter adds a `_tenant` column to physical
/// tables and an implicit tenant predicate to every row-level statement.
#[derive(Debug, Clone, Default)]
pub struct AdapterScope {
    /// Logical database name, used for cache keys.
    pub database: String,
    /// Physical schema container.
    pub schema: String,
    /// Table-name prefix.
    pub namespace: String,
    pub shared_tables: bool,
    pub tenant_id: Option<i64>,
    pub tenant_per_document: bool,
}

/// A planned find operation handed to the adapter: validated filters,
/// selections, ordering, paging, and a resolved cursor document.
#[derive(Debug, Clone, Default)]
pub struct FindQuery {
    pub filters: Vec<Query>,
    pub selections: Vec<String>,
    pub orders: Vec<(String, Order)>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
    pub cursor: Option<Doc>,
    pub cursor_direction: Option<CursorDirection>,
}

/// Dialect-specific schema DDL and row-level CRUD.
#[async_trait]
pub trait Adapter: Send + Sync {
    /// Bind the adapter to a key space. Must be called before use.
    fn set_scope(&self, scope: AdapterScope);

    /// The currently bound key space.
    fn scope(&self) -> AdapterScope;

    // ========================================================================
    // CAPABILITY FLAGS
    // ========================================================================

    fn supports_fulltext_index(&self) -> bool {
        false
    }

    fn supports_array_index(&self) -> bool {
        false
    }

    /// Arrays are stored as jsonb and cast on read when the dialect lacks
    /// native arrays.
    fn supports_cast_index_array(&self) -> bool {
        false
    }

    /// Whether several attributes can be added in one DDL statement.
    fn supports_batch_create_attributes(&self) -> bool {
        false
    }

    /// Whether physical column introspection is available.
    fn supports_schema_attributes(&self) -> bool {
        false
    }

    fn max_varchar_length(&self) -> i64 {
        16_383
    }

    /// Combined index length cap for non-fulltext indexes. Zero means the
    /// dialect imposes no combined cap.
    fn max_index_length(&self) -> i64 {
        768
    }

    fn document_size_limit(&self) -> i64 {
        16 * 1024 * 1024
    }

    async fn ping(&self) -> StrataResult<()>;

    // ========================================================================
    // TRANSACTION SCOPES
    // ========================================================================

    /// Open a transaction scope. Returns the new depth: 1 for an outermost
    /// `BEGIN`, greater for savepoints.
    async fn begin(&self) -> StrataResult<u32>;

    /// Commit the innermost scope.
    async fn commit(&self) -> StrataResult<()>;

    /// Roll back the innermost scope.
    async fn rollback(&self) -> StrataResult<()>;

    // ========================================================================
    // SCHEMA CONTAINER
    // ========================================================================

    async fn create_schema(&self, name: &str) -> StrataResult<()>;
    async fn schema_exists(&self, name: &str) -> StrataResult<bool>;
    async fn delete_schema(&self, name: &str) -> StrataResult<()>;

    // ========================================================================
    // COLLECTIONS
    // ========================================================================

    async fn create_collection(
        &self,
        id: &str,
        attributes: &[Attribute],
        indexes: &[Index],
    ) -> StrataResult<()>;

    async fn delete_collection(&self, id: &str) -> StrataResult<()>;
    async fn collection_exists(&self, id: &str) -> StrataResult<bool>;

    /// Refresh storage statistics for the collection. Returns whether the
    /// dialect supports it.
    async fn analyze_collection(&self, id: &str) -> StrataResult<bool>;

    /// Approximate on-disk size of the collection in bytes.
    async fn get_size_of_collection(&self, id: &str) -> StrataResult<i64>;

    // ========================================================================
    // ATTRIBUTES
    // ========================================================================

    async fn create_attribute(&self, collection: &str, attribute: &Attribute)
        -> StrataResult<()>;

    async fn create_attributes(
        &self,
        collection: &str,
        attributes: &[Attribute],
    ) -> StrataResult<()>;

    /// Apply a type/size change to an existing column.
    async fn update_attribute(&self, collection: &str, attribute: &Attribute)
        -> StrataResult<()>;

    async fn rename_attribute(&self, collection: &str, old: &str, new: &str)
        -> StrataResult<()>;

    async fn delete_attribute(&self, collection: &str, key: &str) -> StrataResult<()>;

    /// Introspect physical columns. Only meaningful when
    /// `supports_schema_attributes` is set.
    async fn get_schema_attributes(&self, collection: &str) -> StrataResult<Vec<Doc>>;

    // ========================================================================
    // INDEXES
    // ========================================================================

    async fn create_index(&self, collection: &Collection, index: &Index) -> StrataResult<()>;
    async fn rename_index(&self, collection: &str, old: &str, new: &str) -> StrataResult<()>;
    async fn delete_index(&self, collection: &str, key: &str) -> StrataResult<()>;

    // ========================================================================
    // DOCUMENTS
    // ========================================================================

    /// Insert a document and return it with its assigned `$sequence`.
    async fn create_document(&self, collection: &Collection, doc: Doc) -> StrataResult<Doc>;

    async fn create_documents(
        &self,
        collection: &Collection,
        docs: Vec<Doc>,
    ) -> StrataResult<Vec<Doc>>;

    async fn get_document(
        &self,
        collection: &Collection,
        id: &str,
        selections: &[String],
    ) -> StrataResult<Option<Doc>>;

    async fn update_document(
        &self,
        collection: &Collection,
        id: &str,
        doc: Doc,
    ) -> StrataResult<Doc>;

    /// Apply the same partial update to many documents. Returns the number
    /// of rows touched.
    async fn update_documents(
        &self,
        collection: &Collection,
        updates: &Doc,
        ids: &[String],
    ) -> StrataResult<u64>;

    async fn delete_document(&self, collection: &Collection, id: &str) -> StrataResult<bool>;

    async fn delete_documents(&self, collection: &Collection, ids: &[String])
        -> StrataResult<u64>;

    async fn find(&self, collection: &Collection, query: &FindQuery) -> StrataResult<Vec<Doc>>;

    async fn count(
        &self,
        collection: &Collection,
        filters: &[Query],
        max: Option<i64>,
    ) -> StrataResult<i64>;

    async fn sum(
        &self,
        collection: &Collection,
        attribute: &str,
        filters: &[Query],
        max: Option<i64>,
    ) -> StrataResult<f64>;

    /// Atomic guarded add: `attr = attr + by` constrained to `[min, max]`.
    /// Returns whether a row was touched.
    #[allow(clippy::too_many_arguments)]
    async fn increase_document_attribute(
        &self,
        collection: &Collection,
        id: &str,
        attribute: &str,
        by: f64,
        min: Option<f64>,
        max: Option<f64>,
        updated_at: DateTime<Utc>,
    ) -> StrataResult<bool>;
}
