//! Query grouping
//!
//! Partitions a flat query list into the shapes the engine consumes:
//! filters, selections, orders, paging, cursor, and populate subqueries.

use super::{Query, QueryMethod};
use crate::{Order, Value};
use indexmap::IndexMap;

/// Direction of cursor pagination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorDirection {
    After,
    Before,
}

/// The result of [`group_by_type`].
#[derive(Debug, Clone, Default)]
pub struct GroupedQueries {
    pub filters: Vec<Query>,
    pub selections: Vec<String>,
    /// Attribute to direction, preserving insertion order.
    pub orders: IndexMap<String, Order>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
    /// Cursor value: a document or a bare id, resolved by the engine.
    pub cursor: Option<Value>,
    pub cursor_direction: Option<CursorDirection>,
    /// Populate subqueries keyed by relationship attribute.
    pub populate: IndexMap<String, Vec<Query>>,
}

/// Partition a query list by node type. Later `limit`/`offset`/cursor
/// nodes override earlier ones; orders and selections accumulate in
/// insertion order.
pub fn group_by_type(queries: &[Query]) -> GroupedQueries {
    let mut grouped = GroupedQueries::default();

    for query in queries {
        match query.method {
            method if method.is_filter() => grouped.filters.push(query.clone()),
            QueryMethod::Select => {
                grouped.selections.extend(
                    query
                        .scalar_values()
                        .into_iter()
                        .filter_map(Value::as_str)
                        .map(str::to_string),
                );
            }
            QueryMethod::OrderAsc => {
                grouped
                    .orders
                    .insert(query.attribute().to_string(), Order::Asc);
            }
            QueryMethod::OrderDesc => {
                grouped
                    .orders
                    .insert(query.attribute().to_string(), Order::Desc);
            }
            QueryMethod::Limit => {
                grouped.limit = query.first_scalar().and_then(Value::as_integer);
            }
            QueryMethod::Offset => {
                grouped.offset = query.first_scalar().and_then(Value::as_integer);
            }
            QueryMethod::CursorAfter => {
                grouped.cursor = query.first_scalar().cloned();
                grouped.cursor_direction = Some(CursorDirection::After);
            }
            QueryMethod::CursorBefore => {
                grouped.cursor = query.first_scalar().cloned();
                grouped.cursor_direction = Some(CursorDirection::Before);
            }
            QueryMethod::Populate => {
                grouped
                    .populate
                    .entry(query.attribute().to_string())
                    .or_default()
                    .extend(query.subqueries().into_iter().cloned());
            }
            _ => {}
        }
    }

    grouped
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partitioning() {
        let queries = vec![
            Query::equal("name", vec!["Ada".into()]),
            Query::select(vec!["name".to_string(), "age".to_string()]),
            Query::order_desc("age"),
            Query::order_asc("name"),
            Query::limit(10),
            Query::offset(5),
            Query::cursor_after("doc9"),
            Query::populate("posts", vec![Query::limit(3)]),
            Query::or(vec![
                Query::equal("a", vec![1.into()]),
                Query::equal("b", vec![2.into()]),
            ]),
        ];

        let grouped = group_by_type(&queries);
        assert_eq!(grouped.filters.len(), 2);
        assert_eq!(grouped.selections, vec!["name", "age"]);
        assert_eq!(
            grouped.orders.keys().collect::<Vec<_>>(),
            vec!["age", "name"]
        );
        assert_eq!(grouped.orders["age"], Order::Desc);
        assert_eq!(grouped.limit, Some(10));
        assert_eq!(grouped.offset, Some(5));
        assert_eq!(grouped.cursor_direction, Some(CursorDirection::After));
        assert_eq!(grouped.populate["posts"].len(), 1);
    }

    #[test]
    fn test_later_paging_wins() {
        let grouped = group_by_type(&[Query::limit(10), Query::limit(20)]);
        assert_eq!(grouped.limit, Some(20));
    }

    #[test]
    fn test_duplicate_order_attribute_keeps_position() {
        let grouped = group_by_type(&[
            Query::order_asc("a"),
            Query::order_asc("b"),
            Query::order_desc("a"),
        ]);
        assert_eq!(grouped.orders.keys().collect::<Vec<_>>(), vec!["a", "b"]);
        assert_eq!(grouped.orders["a"], Order::Desc);
    }
}
