//! Collection schema types
//!
//! Collections, attributes, indexes, and relationship options. These are
//! the shapes persisted as documents in the `_metadata` collection, so all
//! of them round-trip through JSON with camelCase field names.

use crate::{Doc, Permission, StrataError, StrataResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Fixed id of the collection that stores other collections' schemas.
pub const METADATA: &str = "_metadata";

// ============================================================================
// ATTRIBUTES
// ============================================================================

/// Declared type of a collection attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttributeType {
    String,
    Integer,
    Float,
    Boolean,
    Timestamptz,
    Json,
    Relationship,
    Virtual,
    Uuid,
}

impl AttributeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttributeType::String => "string",
            AttributeType::Integer => "integer",
            AttributeType::Float => "float",
            AttributeType::Boolean => "boolean",
            AttributeType::Timestamptz => "timestamptz",
            AttributeType::Json => "json",
            AttributeType::Relationship => "relationship",
            AttributeType::Virtual => "virtual",
            AttributeType::Uuid => "uuid",
        }
    }
}

impl fmt::Display for AttributeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A typed field declared on a collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attribute {
    #[serde(rename = "$id")]
    pub id: String,
    pub key: String,
    #[serde(rename = "type")]
    pub type_: AttributeType,
    #[serde(default)]
    pub size: i64,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub array: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub filters: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub format_options: serde_json::Value,
    #[serde(rename = "default", default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<RelationOptions>,
}

impl Attribute {
    pub fn new(key: impl Into<String>, type_: AttributeType) -> Self {
        let key = key.into();
        Attribute {
            id: key.clone(),
            key,
            type_,
            size: 0,
            required: false,
            array: false,
            filters: Vec::new(),
            format: None,
            format_options: serde_json::Value::Null,
            default_value: None,
            options: None,
        }
    }

    pub fn string(key: impl Into<String>, size: i64) -> Self {
        let mut attr = Self::new(key, AttributeType::String);
        attr.size = size;
        attr
    }

    pub fn integer(key: impl Into<String>) -> Self {
        let mut attr = Self::new(key, AttributeType::Integer);
        attr.size = 8;
        attr
    }

    pub fn float(key: impl Into<String>) -> Self {
        Self::new(key, AttributeType::Float)
    }

    pub fn boolean(key: impl Into<String>) -> Self {
        Self::new(key, AttributeType::Boolean)
    }

    pub fn timestamptz(key: impl Into<String>) -> Self {
        let mut attr = Self::new(key, AttributeType::Timestamptz);
        attr.filters = vec!["datetime".to_string()];
        attr
    }

    pub fn json(key: impl Into<String>) -> Self {
        let mut attr = Self::new(key, AttributeType::Json);
        attr.filters = vec!["json".to_string()];
        attr
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn as_array(mut self) -> Self {
        self.array = true;
        self
    }

    pub fn is_relationship(&self) -> bool {
        self.type_ == AttributeType::Relationship
    }

    /// Whether this attribute occupies a physical column. Virtual
    /// attributes never do; relationship attributes only on the side the
    /// relation table stores the key on.
    pub fn has_column(&self) -> bool {
        match self.type_ {
            AttributeType::Virtual => false,
            AttributeType::Relationship => self
                .options
                .as_ref()
                .map(|options| options.stores_key())
                .unwrap_or(false),
            _ => true,
        }
    }
}

// ============================================================================
// INDEXES
// ============================================================================

/// Physical index type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexType {
    Key,
    Unique,
    Fulltext,
    Spatial,
}

impl IndexType {
    pub fn as_str(&self) -> &'static str {
        match self {
            IndexType::Key => "key",
            IndexType::Unique => "unique",
            IndexType::Fulltext => "fulltext",
            IndexType::Spatial => "spatial",
        }
    }
}

/// Sort direction for index columns and query ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Order {
    Asc,
    Desc,
}

impl Order {
    pub fn as_sql(&self) -> &'static str {
        match self {
            Order::Asc => "ASC",
            Order::Desc => "DESC",
        }
    }

    pub fn reverse(&self) -> Order {
        match self {
            Order::Asc => Order::Desc,
            Order::Desc => Order::Asc,
        }
    }
}

/// A lookup structure over one or more attributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Index {
    #[serde(rename = "$id")]
    pub id: String,
    pub key: String,
    #[serde(rename = "type")]
    pub type_: IndexType,
    pub attributes: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub orders: Vec<Option<Order>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub lengths: Vec<Option<i64>>,
}

impl Index {
    pub fn new(key: impl Into<String>, type_: IndexType, attributes: Vec<String>) -> Self {
        let key = key.into();
        Index {
            id: key.clone(),
            key,
            type_,
            attributes,
            orders: Vec::new(),
            lengths: Vec::new(),
        }
    }
}

// ============================================================================
// RELATIONSHIPS
// ============================================================================

/// Cardinality of a relationship.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RelationType {
    OneToOne,
    OneToMany,
    ManyToOne,
    ManyToMany,
}

impl RelationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelationType::OneToOne => "oneToOne",
            RelationType::OneToMany => "oneToMany",
            RelationType::ManyToOne => "manyToOne",
            RelationType::ManyToMany => "manyToMany",
        }
    }
}

/// Which end of the relationship an attribute sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RelationSide {
    Parent,
    Child,
}

impl RelationSide {
    pub fn opposite(&self) -> RelationSide {
        match self {
            RelationSide::Parent => RelationSide::Child,
            RelationSide::Child => RelationSide::Parent,
        }
    }
}

/// Referential action when the related document is deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OnDelete {
    Cascade,
    Restrict,
    SetNull,
}

/// Options attached to a relationship attribute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelationOptions {
    pub relation_type: RelationType,
    pub side: RelationSide,
    pub related_collection: String,
    #[serde(default)]
    pub two_way: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub two_way_key: Option<String>,
    pub on_delete: OnDelete,
}

impl RelationOptions {
    /// Whether the owning attribute stores a key column in its own table.
    ///
    /// oneToOne stores on the parent side; manyToOne stores on the child of
    /// the many side (the declaring side); oneToMany stores on the child;
    /// manyToMany stores on neither (junction table).
    pub fn stores_key(&self) -> bool {
        match (self.relation_type, self.side) {
            (RelationType::OneToOne, RelationSide::Parent) => true,
            (RelationType::OneToOne, RelationSide::Child) => false,
            (RelationType::OneToMany, RelationSide::Parent) => false,
            (RelationType::OneToMany, RelationSide::Child) => true,
            (RelationType::ManyToOne, RelationSide::Parent) => true,
            (RelationType::ManyToOne, RelationSide::Child) => false,
            (RelationType::ManyToMany, _) => false,
        }
    }

    /// Whether document values for this side take the multi-link object
    /// shape `{set, connect, disconnect}` rather than a single id.
    pub fn is_multi(&self) -> bool {
        matches!(
            (self.relation_type, self.side),
            (RelationType::OneToMany, RelationSide::Parent)
                | (RelationType::ManyToOne, RelationSide::Child)
                | (RelationType::ManyToMany, _)
        )
    }
}

// ============================================================================
// COLLECTIONS
// ============================================================================

/// A named set of documents sharing a schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Collection {
    #[serde(rename = "$id")]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub attributes: Vec<Attribute>,
    #[serde(default)]
    pub indexes: Vec<Index>,
    #[serde(rename = "$permissions", default)]
    pub permissions: Vec<Permission>,
    #[serde(default)]
    pub document_security: bool,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl Collection {
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        Collection {
            name: id.clone(),
            id,
            attributes: Vec::new(),
            indexes: Vec::new(),
            permissions: Vec::new(),
            document_security: false,
            enabled: true,
        }
    }

    pub fn attribute(&self, key: &str) -> Option<&Attribute> {
        self.attributes.iter().find(|attr| attr.key == key)
    }

    pub fn index(&self, key: &str) -> Option<&Index> {
        self.indexes.iter().find(|index| index.key == key)
    }

    /// Convert to the document shape stored in `_metadata`.
    pub fn to_doc(&self) -> StrataResult<Doc> {
        let json = serde_json::to_value(self)
            .map_err(|e| StrataError::internal(format!("Collection serialization: {}", e)))?;
        Doc::from_json(json)
    }

    /// Rebuild from a `_metadata` document.
    pub fn from_doc(doc: &Doc) -> StrataResult<Collection> {
        serde_json::from_value(doc.to_json())
            .map_err(|e| StrataError::validation(format!("Invalid collection schema: {}", e)))
    }
}

/// Schema of the `_metadata` collection itself.
pub fn metadata_collection() -> Collection {
    let mut collection = Collection::new(METADATA);
    collection.name = METADATA.to_string();
    collection.attributes = vec![
        Attribute::string("name", 256).required(),
        Attribute::json("attributes"),
        Attribute::json("indexes"),
        Attribute::boolean("documentSecurity"),
        Attribute::boolean("enabled"),
    ];
    collection
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attribute_json_round_trip() {
        let attr = Attribute::string("name", 128).required();
        let json = serde_json::to_value(&attr).unwrap();
        assert_eq!(json["$id"], "name");
        assert_eq!(json["type"], "string");
        let back: Attribute = serde_json::from_value(json).unwrap();
        assert_eq!(attr, back);
    }

    #[test]
    fn test_collection_doc_round_trip() {
        let mut collection = Collection::new("users");
        collection.attributes = vec![
            Attribute::string("name", 128).required(),
            Attribute::integer("age"),
        ];
        collection.indexes = vec![Index::new(
            "idx_name",
            IndexType::Key,
            vec!["name".to_string()],
        )];
        collection.permissions = vec![Permission::parse(r#"read("any")"#).unwrap()];
        collection.document_security = true;

        let doc = collection.to_doc().unwrap();
        assert_eq!(doc.id(), "users");
        let back = Collection::from_doc(&doc).unwrap();
        assert_eq!(collection, back);
    }

    #[test]
    fn test_relation_storage_sides() {
        let mut options = RelationOptions {
            relation_type: RelationType::OneToMany,
            side: RelationSide::Parent,
            related_collection: "posts".to_string(),
            two_way: true,
            two_way_key: Some("author".to_string()),
            on_delete: OnDelete::Cascade,
        };
        assert!(!options.stores_key());
        assert!(options.is_multi());

        options.side = RelationSide::Child;
        assert!(options.stores_key());
        assert!(!options.is_multi());

        options.relation_type = RelationType::ManyToMany;
        assert!(!options.stores_key());
        assert!(options.is_multi());
    }

    #[test]
    fn test_metadata_schema() {
        let metadata = metadata_collection();
        assert_eq!(metadata.id, METADATA);
        assert!(metadata.attribute("attributes").is_some());
        assert_eq!(
            metadata.attribute("attributes").unwrap().filters,
            vec!["json".to_string()]
        );
    }
}
