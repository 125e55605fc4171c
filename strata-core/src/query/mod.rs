//! Structured query model
//!
//! Queries are typed nodes: a method, an optional target attribute, and a
//! list of values. Logical methods (`or`, `and`) and `populate` nest whole
//! queries as values. The engine validates nodes against a collection
//! schema, groups them by type, and hands the filter/order/cursor portions
//! to the adapter.

mod builder;
mod grouping;

pub use builder::QueryBuilder;
pub use grouping::{group_by_type, CursorDirection, GroupedQueries};

use crate::{Doc, StrataError, StrataResult, Value};
use std::fmt;

/// Query node method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryMethod {
    Equal,
    NotEqual,
    LessThan,
    LessThanEqual,
    GreaterThan,
    GreaterThanEqual,
    Between,
    Contains,
    Search,
    StartsWith,
    EndsWith,
    IsNull,
    IsNotNull,
    Or,
    And,
    Select,
    OrderAsc,
    OrderDesc,
    Limit,
    Offset,
    CursorAfter,
    CursorBefore,
    Populate,
}

impl QueryMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryMethod::Equal => "equal",
            QueryMethod::NotEqual => "notEqual",
            QueryMethod::LessThan => "lessThan",
            QueryMethod::LessThanEqual => "lessThanEqual",
            QueryMethod::GreaterThan => "greaterThan",
            QueryMethod::GreaterThanEqual => "greaterThanEqual",
            QueryMethod::Between => "between",
            QueryMethod::Contains => "contains",
            QueryMethod::Search => "search",
            QueryMethod::StartsWith => "startsWith",
            QueryMethod::EndsWith => "endsWith",
            QueryMethod::IsNull => "isNull",
            QueryMethod::IsNotNull => "isNotNull",
            QueryMethod::Or => "or",
            QueryMethod::And => "and",
            QueryMethod::Select => "select",
            QueryMethod::OrderAsc => "orderAsc",
            QueryMethod::OrderDesc => "orderDesc",
            QueryMethod::Limit => "limit",
            QueryMethod::Offset => "offset",
            QueryMethod::CursorAfter => "cursorAfter",
            QueryMethod::CursorBefore => "cursorBefore",
            QueryMethod::Populate => "populate",
        }
    }

    /// Whether the method contributes to the WHERE clause.
    pub fn is_filter(&self) -> bool {
        matches!(
            self,
            QueryMethod::Equal
                | QueryMethod::NotEqual
                | QueryMethod::LessThan
                | QueryMethod::LessThanEqual
                | QueryMethod::GreaterThan
                | QueryMethod::GreaterThanEqual
                | QueryMethod::Between
                | QueryMethod::Contains
                | QueryMethod::Search
                | QueryMethod::StartsWith
                | QueryMethod::EndsWith
                | QueryMethod::IsNull
                | QueryMethod::IsNotNull
                | QueryMethod::Or
                | QueryMethod::And
        )
    }

    pub fn is_order(&self) -> bool {
        matches!(self, QueryMethod::OrderAsc | QueryMethod::OrderDesc)
    }

    pub fn is_cursor(&self) -> bool {
        matches!(self, QueryMethod::CursorAfter | QueryMethod::CursorBefore)
    }
}

impl fmt::Display for QueryMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A query node value: either a scalar or a nested query.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryValue {
    Scalar(Value),
    Subquery(Query),
}

impl QueryValue {
    pub fn as_scalar(&self) -> Option<&Value> {
        match self {
            QueryValue::Scalar(value) => Some(value),
            QueryValue::Subquery(_) => None,
        }
    }

    pub fn as_subquery(&self) -> Option<&Query> {
        match self {
            QueryValue::Subquery(query) => Some(query),
            QueryValue::Scalar(_) => None,
        }
    }

    fn to_json(&self) -> serde_json::Value {
        match self {
            QueryValue::Scalar(value) => value.to_json(),
            QueryValue::Subquery(query) => query.to_json(),
        }
    }
}

impl<T: Into<Value>> From<T> for QueryValue {
    fn from(value: T) -> Self {
        QueryValue::Scalar(value.into())
    }
}

/// A single typed query node.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub method: QueryMethod,
    pub attribute: Option<String>,
    pub values: Vec<QueryValue>,
}

impl Query {
    pub fn new(
        method: QueryMethod,
        attribute: Option<String>,
        values: Vec<QueryValue>,
    ) -> Self {
        Query {
            method,
            attribute,
            values,
        }
    }

    fn comparison(method: QueryMethod, attribute: impl Into<String>, value: Value) -> Self {
        Query::new(method, Some(attribute.into()), vec![QueryValue::Scalar(value)])
    }

    // ========================================================================
    // FILTER CONSTRUCTORS
    // ========================================================================

    pub fn equal(attribute: impl Into<String>, values: Vec<Value>) -> Self {
        Query::new(
            QueryMethod::Equal,
            Some(attribute.into()),
            values.into_iter().map(QueryValue::Scalar).collect(),
        )
    }

    pub fn not_equal(attribute: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::comparison(QueryMethod::NotEqual, attribute, value.into())
    }

    pub fn less_than(attribute: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::comparison(QueryMethod::LessThan, attribute, value.into())
    }

    pub fn less_than_equal(attribute: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::comparison(QueryMethod::LessThanEqual, attribute, value.into())
    }

    pub fn greater_than(attribute: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::comparison(QueryMethod::GreaterThan, attribute, value.into())
    }

    pub fn greater_than_equal(attribute: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::comparison(QueryMethod::GreaterThanEqual, attribute, value.into())
    }

    pub fn between(
        attribute: impl Into<String>,
        low: impl Into<Value>,
        high: impl Into<Value>,
    ) -> Self {
        Query::new(
            QueryMethod::Between,
            Some(attribute.into()),
            vec![low.into().into(), high.into().into()],
        )
    }

    pub fn contains(attribute: impl Into<String>, values: Vec<Value>) -> Self {
        Query::new(
            QueryMethod::Contains,
            Some(attribute.into()),
            values.into_iter().map(QueryValue::Scalar).collect(),
        )
    }

    pub fn search(attribute: impl Into<String>, term: impl Into<Value>) -> Self {
        Self::comparison(QueryMethod::Search, attribute, term.into())
    }

    pub fn starts_with(attribute: impl Into<String>, prefix: impl Into<Value>) -> Self {
        Self::comparison(QueryMethod::StartsWith, attribute, prefix.into())
    }

    pub fn ends_with(attribute: impl Into<String>, suffix: impl Into<Value>) -> Self {
        Self::comparison(QueryMethod::EndsWith, attribute, suffix.into())
    }

    pub fn is_null(attribute: impl Into<String>) -> Self {
        Query::new(QueryMethod::IsNull, Some(attribute.into()), Vec::new())
    }

    pub fn is_not_null(attribute: impl Into<String>) -> Self {
        Query::new(QueryMethod::IsNotNull, Some(attribute.into()), Vec::new())
    }

    pub fn or(queries: Vec<Query>) -> Self {
        Query::new(
            QueryMethod::Or,
            None,
            queries.into_iter().map(QueryValue::Subquery).collect(),
        )
    }

    pub fn and(queries: Vec<Query>) -> Self {
        Query::new(
            QueryMethod::And,
            None,
            queries.into_iter().map(QueryValue::Subquery).collect(),
        )
    }

    // ========================================================================
    // SHAPE CONSTRUCTORS
    // ========================================================================

    pub fn select(attributes: Vec<String>) -> Self {
        Query::new(
            QueryMethod::Select,
            None,
            attributes
                .into_iter()
                .map(|attr| QueryValue::Scalar(Value::String(attr)))
                .collect(),
        )
    }

    pub fn order_asc(attribute: impl Into<String>) -> Self {
        Query::new(QueryMethod::OrderAsc, Some(attribute.into()), Vec::new())
    }

    pub fn order_desc(attribute: impl Into<String>) -> Self {
        Query::new(QueryMethod::OrderDesc, Some(attribute.into()), Vec::new())
    }

    pub fn limit(limit: i64) -> Self {
        Query::new(QueryMethod::Limit, None, vec![Value::Integer(limit).into()])
    }

    pub fn offset(offset: i64) -> Self {
        Query::new(
            QueryMethod::Offset,
            None,
            vec![Value::Integer(offset).into()],
        )
    }

    pub fn cursor_after(cursor: impl Into<Cursor>) -> Self {
        Query::new(
            QueryMethod::CursorAfter,
            None,
            vec![QueryValue::Scalar(cursor.into().into_value())],
        )
    }

    pub fn cursor_before(cursor: impl Into<Cursor>) -> Self {
        Query::new(
            QueryMethod::CursorBefore,
            None,
            vec![QueryValue::Scalar(cursor.into().into_value())],
        )
    }

    pub fn populate(attribute: impl Into<String>, queries: Vec<Query>) -> Self {
        Query::new(
            QueryMethod::Populate,
            Some(attribute.into()),
            queries.into_iter().map(QueryValue::Subquery).collect(),
        )
    }

    // ========================================================================
    // ACCESSORS
    // ========================================================================

    pub fn attribute(&self) -> &str {
        self.attribute.as_deref().unwrap_or("")
    }

    /// Scalar values of this node, skipping subqueries.
    pub fn scalar_values(&self) -> Vec<&Value> {
        self.values.iter().filter_map(QueryValue::as_scalar).collect()
    }

    /// Nested queries of this node, skipping scalars.
    pub fn subqueries(&self) -> Vec<&Query> {
        self.values.iter().filter_map(QueryValue::as_subquery).collect()
    }

    pub fn first_scalar(&self) -> Option<&Value> {
        self.values.iter().find_map(QueryValue::as_scalar)
    }

    /// Integer view of the first value, for `limit`/`offset`.
    pub fn first_integer(&self) -> StrataResult<i64> {
        self.first_scalar()
            .and_then(Value::as_integer)
            .ok_or_else(|| {
                StrataError::validation(format!(
                    "Query method '{}' requires an integer value",
                    self.method
                ))
            })
    }

    /// Deterministic JSON form, used for cache hashing and debugging.
    pub fn to_json(&self) -> serde_json::Value {
        let mut object = serde_json::Map::new();
        object.insert(
            "method".to_string(),
            serde_json::Value::String(self.method.as_str().to_string()),
        );
        if let Some(attribute) = &self.attribute {
            object.insert(
                "attribute".to_string(),
                serde_json::Value::String(attribute.clone()),
            );
        }
        object.insert(
            "values".to_string(),
            serde_json::Value::Array(self.values.iter().map(QueryValue::to_json).collect()),
        );
        serde_json::Value::Object(object)
    }
}

/// Cursor argument: a document or a bare id.
#[derive(Debug, Clone)]
pub enum Cursor {
    Id(String),
    Doc(Doc),
}

impl Cursor {
    fn into_value(self) -> Value {
        match self {
            Cursor::Id(id) => Value::String(id),
            Cursor::Doc(doc) => Value::Doc(doc),
        }
    }
}

impl From<&str> for Cursor {
    fn from(id: &str) -> Self {
        Cursor::Id(id.to_string())
    }
}

impl From<String> for Cursor {
    fn from(id: String) -> Self {
        Cursor::Id(id)
    }
}

impl From<Doc> for Cursor {
    fn from(doc: Doc) -> Self {
        Cursor::Doc(doc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constructors() {
        let q = Query::equal("name", vec!["Ada".into()]);
        assert_eq!(q.method, QueryMethod::Equal);
        assert_eq!(q.attribute(), "name");
        assert_eq!(q.scalar_values().len(), 1);

        let q = Query::between("age", 18, 65);
        assert_eq!(q.scalar_values().len(), 2);

        let q = Query::or(vec![
            Query::equal("a", vec![1.into()]),
            Query::equal("b", vec![2.into()]),
        ]);
        assert_eq!(q.subqueries().len(), 2);
        assert!(q.method.is_filter());

        let q = Query::limit(25);
        assert_eq!(q.first_integer().unwrap(), 25);

        let q = Query::cursor_after("doc1");
        assert_eq!(q.first_scalar().unwrap().as_str(), Some("doc1"));
    }

    #[test]
    fn test_method_classification() {
        assert!(QueryMethod::Search.is_filter());
        assert!(!QueryMethod::Select.is_filter());
        assert!(QueryMethod::OrderDesc.is_order());
        assert!(QueryMethod::CursorBefore.is_cursor());
        assert!(!QueryMethod::Populate.is_filter());
    }

    #[test]
    fn test_to_json_deterministic() {
        let q = Query::and(vec![
            Query::equal("name", vec!["Ada".into()]),
            Query::greater_than("age", 21),
        ]);
        let a = q.to_json().to_string();
        let b = q.clone().to_json().to_string();
        assert_eq!(a, b);
        assert!(a.contains("\"method\":\"and\""));
    }
}
