//! Cache key construction
//!
//! Keys follow `db:<name>:<namespace|->:<schema>:<tenant|->`, extended
//! with the collection id and document id for narrower entries. Find
//! results use a filter sub-key: an FNV-1a 128 hex digest over a
//! deterministic serialization of the query shape.

use serde_json::json;
use strata_core::query::{CursorDirection, Query};

/// Builder for the hierarchical cache keys of one engine key space.
#[derive(Debug, Clone)]
pub struct CacheKey {
    database: String,
    namespace: Option<String>,
    schema: String,
    tenant: Option<i64>,
}

impl CacheKey {
    pub fn new(
        database: impl Into<String>,
        namespace: Option<String>,
        schema: impl Into<String>,
        tenant: Option<i64>,
    ) -> Self {
        CacheKey {
            database: database.into(),
            namespace: namespace.filter(|ns| !ns.is_empty()),
            schema: schema.into(),
            tenant,
        }
    }

    /// Base key of the key space.
    pub fn base(&self) -> String {
        format!(
            "db:{}:{}:{}:{}",
            self.database,
            self.namespace.as_deref().unwrap_or("-"),
            self.schema,
            self.tenant
                .map(|t| t.to_string())
                .unwrap_or_else(|| "-".to_string()),
        )
    }

    /// Key of one collection's metadata and the tag its entries carry.
    pub fn collection(&self, collection_id: &str) -> String {
        format!("{}:{}", self.base(), collection_id)
    }

    /// Key of one document and the tag its entries carry.
    pub fn document(&self, collection_id: &str, document_id: &str) -> String {
        format!("{}:{}", self.collection(collection_id), document_id)
    }

    /// Key of one find result set, narrowed by the hash of its query
    /// shape (see [`selection_hash`]).
    pub fn collection_query(&self, collection_id: &str, hash: &str) -> String {
        format!("{}:query:{}", self.collection(collection_id), hash)
    }

    /// Key of one document read narrowed by selections.
    pub fn document_selection(
        &self,
        collection_id: &str,
        document_id: &str,
        selections: &[String],
    ) -> String {
        if selections.is_empty() {
            return self.document(collection_id, document_id);
        }
        let hash = selection_hash(selections, &[], None, None, None, None);
        format!("{}:{}", self.document(collection_id, document_id), hash)
    }
}

/// FNV-1a 128-bit hex digest.
pub fn fnv1a_128_hex(bytes: &[u8]) -> String {
    const OFFSET_BASIS: u128 = 0x6c62272e07bb014262b821756295c58d;
    const PRIME: u128 = 0x0000000001000000000000000000013b;

    let mut hash = OFFSET_BASIS;
    for byte in bytes {
        hash ^= *byte as u128;
        hash = hash.wrapping_mul(PRIME);
    }
    format!("{:032x}", hash)
}

/// Hash the shape of a find/read operation: sorted selections plus the
/// filters, paging, and cursor that determine the result set.
pub fn selection_hash(
    selections: &[String],
    filters: &[Query],
    limit: Option<i64>,
    offset: Option<i64>,
    cursor_id: Option<&str>,
    cursor_direction: Option<CursorDirection>,
) -> String {
    let mut sorted_selections: Vec<&String> = selections.iter().collect();
    sorted_selections.sort();

    let shape = json!({
        "selections": sorted_selections,
        "filters": filters.iter().map(Query::to_json).collect::<Vec<_>>(),
        "limit": limit,
        "offset": offset,
        "cursor": cursor_id,
        "cursorDirection": cursor_direction.map(|d| match d {
            CursorDirection::After => "after",
            CursorDirection::Before => "before",
        }),
    });
    fnv1a_128_hex(shape.to_string().as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> CacheKey {
        CacheKey::new("main", Some("app1".to_string()), "public", Some(7))
    }

    #[test]
    fn test_key_hierarchy() {
        let key = key();
        assert_eq!(key.base(), "db:main:app1:public:7");
        assert_eq!(key.collection("users"), "db:main:app1:public:7:users");
        assert_eq!(
            key.document("users", "d1"),
            "db:main:app1:public:7:users:d1"
        );
        let hash = selection_hash(&[], &[], Some(10), None, None, None);
        assert_eq!(
            key.collection_query("users", &hash),
            format!("db:main:app1:public:7:users:query:{}", hash)
        );
    }

    #[test]
    fn test_missing_parts_render_as_dash() {
        let key = CacheKey::new("main", None, "public", None);
        assert_eq!(key.base(), "db:main:-:public:-");
    }

    #[test]
    fn test_fnv_known_vectors() {
        // Standard FNV-1a 128 test vectors.
        assert_eq!(
            fnv1a_128_hex(b""),
            "6c62272e07bb014262b821756295c58d"
        );
        assert_eq!(
            fnv1a_128_hex(b"a"),
            "d228cb696f1a8caf78912b704e4a8964"
        );
    }

    #[test]
    fn test_selection_hash_is_order_insensitive() {
        let a = selection_hash(
            &["name".to_string(), "age".to_string()],
            &[],
            Some(10),
            None,
            None,
            None,
        );
        let b = selection_hash(
            &["age".to_string(), "name".to_string()],
            &[],
            Some(10),
            None,
            None,
            None,
        );
        assert_eq!(a, b);
    }

    #[test]
    fn test_selection_hash_varies_with_shape() {
        let base = selection_hash(&[], &[], None, None, None, None);
        let with_filter = selection_hash(
            &[],
            &[Query::equal("name", vec!["Ada".into()])],
            None,
            None,
            None,
            None,
        );
        let with_cursor = selection_hash(
            &[],
            &[],
            None,
            None,
            Some("d1"),
            Some(CursorDirection::After),
        );
        assert_ne!(base, with_filter);
        assert_ne!(base, with_cursor);
        assert_ne!(with_filter, with_cursor);
    }
}
