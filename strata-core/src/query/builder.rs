//! Fluent query list builder

use super::{Cursor, Query};
use crate::Value;

/// Accumulates query nodes into a list. `from` deep-clones its input, so
/// `QueryBuilder::from(queries).build()` always equals a deep copy of
/// `queries`.
#[derive(Debug, Clone, Default)]
pub struct QueryBuilder {
    queries: Vec<Query>,
}

impl QueryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from(queries: &[Query]) -> Self {
        QueryBuilder {
            queries: queries.to_vec(),
        }
    }

    pub fn push(mut self, query: Query) -> Self {
        self.queries.push(query);
        self
    }

    pub fn equal(self, attribute: &str, values: Vec<Value>) -> Self {
        self.push(Query::equal(attribute, values))
    }

    pub fn not_equal(self, attribute: &str, value: impl Into<Value>) -> Self {
        self.push(Query::not_equal(attribute, value))
    }

    pub fn less_than(self, attribute: &str, value: impl Into<Value>) -> Self {
        self.push(Query::less_than(attribute, value))
    }

    pub fn greater_than(self, attribute: &str, value: impl Into<Value>) -> Self {
        self.push(Query::greater_than(attribute, value))
    }

    pub fn between(
        self,
        attribute: &str,
        low: impl Into<Value>,
        high: impl Into<Value>,
    ) -> Self {
        self.push(Query::between(attribute, low, high))
    }

    pub fn search(self, attribute: &str, term: impl Into<Value>) -> Self {
        self.push(Query::search(attribute, term))
    }

    pub fn select(self, attributes: Vec<String>) -> Self {
        self.push(Query::select(attributes))
    }

    pub fn order_asc(self, attribute: &str) -> Self {
        self.push(Query::order_asc(attribute))
    }

    pub fn order_desc(self, attribute: &str) -> Self {
        self.push(Query::order_desc(attribute))
    }

    pub fn limit(self, limit: i64) -> Self {
        self.push(Query::limit(limit))
    }

    pub fn offset(self, offset: i64) -> Self {
        self.push(Query::offset(offset))
    }

    pub fn cursor_after(self, cursor: impl Into<Cursor>) -> Self {
        self.push(Query::cursor_after(cursor))
    }

    pub fn cursor_before(self, cursor: impl Into<Cursor>) -> Self {
        self.push(Query::cursor_before(cursor))
    }

    pub fn populate(self, attribute: &str, queries: Vec<Query>) -> Self {
        self.push(Query::populate(attribute, queries))
    }

    pub fn build(self) -> Vec<Query> {
        self.queries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_equals_deep_clone() {
        let queries = vec![
            Query::equal("name", vec!["Ada".into()]),
            Query::or(vec![
                Query::greater_than("age", 21),
                Query::is_null("age"),
            ]),
            Query::populate("posts", vec![Query::limit(2)]),
            Query::cursor_after("d1"),
        ];
        let rebuilt = QueryBuilder::from(&queries).build();
        assert_eq!(rebuilt, queries.clone());
    }

    #[test]
    fn test_fluent_chain() {
        let queries = QueryBuilder::new()
            .equal("name", vec!["Ada".into()])
            .order_desc("age")
            .limit(5)
            .build();
        assert_eq!(queries.len(), 3);
    }
}
