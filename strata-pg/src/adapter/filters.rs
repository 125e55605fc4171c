//! Condition SQL generation
//!
//! Builds WHERE fragments with `?` placeholders from validated query
//! filters. Attribute names are mapped to physical columns; string
//! pattern methods escape LIKE metacharacters; logical nodes recurse.
//! `contains` consults the collection schema: array attributes use
//! containment, string attributes use substring matching.

use super::PostgresAdapter;
use strata_core::query::{Query, QueryMethod};
use strata_core::{Collection, StrataError, StrataResult, Value};

/// Quoted physical column for a query attribute.
pub(crate) fn column_ident(attribute: &str) -> String {
    PostgresAdapter::quote_ident(PostgresAdapter::column_name(attribute))
}

/// Escape LIKE metacharacters in a user-supplied pattern fragment.
pub(crate) fn like_escape(fragment: &str) -> String {
    fragment
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

fn like_condition(
    attribute: &str,
    value: Option<&Value>,
    params: &mut Vec<Value>,
    shape: impl Fn(&str) -> String,
) -> StrataResult<String> {
    let text = value.and_then(Value::as_str).ok_or_else(|| {
        StrataError::validation(format!(
            "Pattern query on '{}' requires a string value",
            attribute
        ))
    })?;
    params.push(Value::String(shape(&like_escape(text))));
    Ok(format!("{} LIKE ?", column_ident(attribute)))
}

fn array_contains(
    attribute: &str,
    values: &[&Value],
    params: &mut Vec<Value>,
) -> StrataResult<String> {
    let placeholders: Vec<&str> = values.iter().map(|_| "?").collect();
    params.extend(values.iter().map(|v| (*v).clone()));
    Ok(format!(
        "{} @> ARRAY[{}]",
        column_ident(attribute),
        placeholders.join(", ")
    ))
}

/// Render one filter node as a SQL condition, pushing its parameters.
pub(crate) fn filter_condition(
    collection: &Collection,
    query: &Query,
    params: &mut Vec<Value>,
) -> StrataResult<String> {
    let attribute = query.attribute();
    let column = || column_ident(attribute);

    match query.method {
        QueryMethod::Equal => {
            let values = query.scalar_values();
            let placeholders: Vec<&str> = values.iter().map(|_| "?").collect();
            params.extend(values.into_iter().cloned());
            Ok(format!("{} IN ({})", column(), placeholders.join(", ")))
        }
        QueryMethod::NotEqual => {
            params.push(query.first_scalar().cloned().unwrap_or(Value::Null));
            Ok(format!("{} != ?", column()))
        }
        QueryMethod::LessThan => {
            params.push(query.first_scalar().cloned().unwrap_or(Value::Null));
            Ok(format!("{} < ?", column()))
        }
        QueryMethod::LessThanEqual => {
            params.push(query.first_scalar().cloned().unwrap_or(Value::Null));
            Ok(format!("{} <= ?", column()))
        }
        QueryMethod::GreaterThan => {
            params.push(query.first_scalar().cloned().unwrap_or(Value::Null));
            Ok(format!("{} > ?", column()))
        }
        QueryMethod::GreaterThanEqual => {
            params.push(query.first_scalar().cloned().unwrap_or(Value::Null));
            Ok(format!("{} >= ?", column()))
        }
        QueryMethod::Between => {
            let values = query.scalar_values();
            params.push((*values.first().ok_or_else(|| bad_cardinality(query))?).clone());
            params.push((*values.get(1).ok_or_else(|| bad_cardinality(query))?).clone());
            Ok(format!("{} BETWEEN ? AND ?", column()))
        }
        QueryMethod::Contains => {
            let values = query.scalar_values();
            let is_array = collection
                .attribute(attribute)
                .map(|attr| attr.array)
                .unwrap_or(false);
            if is_array {
                array_contains(attribute, &values, params)
            } else {
                like_condition(attribute, values.first().copied(), params, |s| {
                    format!("%{}%", s)
                })
            }
        }
        QueryMethod::Search => {
            params.push(query.first_scalar().cloned().unwrap_or(Value::Null));
            Ok(format!(
                "to_tsvector('simple', {}) @@ plainto_tsquery('simple', ?)",
                column()
            ))
        }
        QueryMethod::StartsWith => {
            like_condition(attribute, query.first_scalar(), params, |s| format!("{}%", s))
        }
        QueryMethod::EndsWith => {
            like_condition(attribute, query.first_scalar(), params, |s| format!("%{}", s))
        }
        QueryMethod::IsNull => Ok(format!("{} IS NULL", column())),
        QueryMethod::IsNotNull => Ok(format!("{} IS NOT NULL", column())),
        QueryMethod::Or => logical_condition(collection, query, "OR", params),
        QueryMethod::And => logical_condition(collection, query, "AND", params),
        other => Err(StrataError::internal(format!(
            "Query method '{}' is not a filter",
            other
        ))),
    }
}

fn logical_condition(
    collection: &Collection,
    query: &Query,
    joiner: &str,
    params: &mut Vec<Value>,
) -> StrataResult<String> {
    let children = query
        .subqueries()
        .into_iter()
        .map(|child| filter_condition(collection, child, params))
        .collect::<StrataResult<Vec<_>>>()?;
    Ok(format!("({})", children.join(&format!(" {} ", joiner))))
}

fn bad_cardinality(query: &Query) -> StrataError {
    StrataError::validation(format!(
        "Query method '{}' received the wrong number of values",
        query.method
    ))
}

/// Join filter nodes into a single conjunction, or `None` when empty.
pub(crate) fn filters_clause(
    collection: &Collection,
    filters: &[Query],
    params: &mut Vec<Value>,
) -> StrataResult<Option<String>> {
    if filters.is_empty() {
        return Ok(None);
    }
    let conditions = filters
        .iter()
        .map(|filter| filter_condition(collection, filter, params))
        .collect::<StrataResult<Vec<_>>>()?;
    Ok(Some(conditions.join(" AND ")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_core::Attribute;

    fn users() -> Collection {
        let mut collection = Collection::new("users");
        collection.attributes = vec![
            Attribute::string("name", 128),
            Attribute::string("tags", 64).as_array(),
            Attribute::integer("age"),
        ];
        collection
    }

    #[test]
    fn test_equal_renders_in_list() {
        let mut params = Vec::new();
        let sql = filter_condition(
            &users(),
            &Query::equal("name", vec!["a".into(), "b".into()]),
            &mut params,
        )
        .unwrap();
        assert_eq!(sql, "\"name\" IN (?, ?)");
        assert_eq!(params.len(), 2);
    }

    #[test]
    fn test_system_attribute_maps_to_internal_column() {
        let mut params = Vec::new();
        let sql = filter_condition(&users(), &Query::greater_than("$sequence", 5), &mut params)
            .unwrap();
        assert_eq!(sql, "\"_id\" > ?");
    }

    #[test]
    fn test_like_escaping() {
        let mut params = Vec::new();
        let sql =
            filter_condition(&users(), &Query::starts_with("name", "50%_a"), &mut params)
                .unwrap();
        assert_eq!(sql, "\"name\" LIKE ?");
        assert_eq!(params[0].as_str(), Some("50\\%\\_a%"));
    }

    #[test]
    fn test_contains_consults_schema() {
        // Array attribute: containment.
        let mut params = Vec::new();
        let sql = filter_condition(
            &users(),
            &Query::contains("tags", vec!["rust".into()]),
            &mut params,
        )
        .unwrap();
        assert_eq!(sql, "\"tags\" @> ARRAY[?]");

        // String attribute: substring.
        let mut params = Vec::new();
        let sql = filter_condition(
            &users(),
            &Query::contains("name", vec!["da".into()]),
            &mut params,
        )
        .unwrap();
        assert_eq!(sql, "\"name\" LIKE ?");
        assert_eq!(params[0].as_str(), Some("%da%"));
    }

    #[test]
    fn test_logical_nesting() {
        let mut params = Vec::new();
        let sql = filter_condition(
            &users(),
            &Query::or(vec![
                Query::equal("a", vec![1.into()]),
                Query::and(vec![Query::is_null("b"), Query::less_than("c", 3)]),
            ]),
            &mut params,
        )
        .unwrap();
        assert_eq!(sql, "(\"a\" IN (?) OR (\"b\" IS NULL AND \"c\" < ?))");
        assert_eq!(params.len(), 2);
    }

    #[test]
    fn test_between_cardinality() {
        let mut params = Vec::new();
        let sql =
            filter_condition(&users(), &Query::between("age", 18, 30), &mut params).unwrap();
        assert_eq!(sql, "\"age\" BETWEEN ? AND ?");

        let bad = Query::new(
            QueryMethod::Between,
            Some("age".to_string()),
            vec![Value::Integer(1).into()],
        );
        assert!(filter_condition(&users(), &bad, &mut params).is_err());
    }

    #[test]
    fn test_search_uses_fulltext() {
        let mut params = Vec::new();
        let sql =
            filter_condition(&users(), &Query::search("bio", "rust"), &mut params).unwrap();
        assert!(sql.contains("to_tsvector('simple', \"bio\")"));
        assert!(sql.contains("plainto_tsquery('simple', ?)"));
    }

    #[test]
    fn test_filters_clause_joins_with_and() {
        let mut params = Vec::new();
        let clause = filters_clause(
            &users(),
            &[Query::equal("a", vec![1.into()]), Query::is_not_null("b")],
            &mut params,
        )
        .unwrap()
        .unwrap();
        assert_eq!(clause, "\"a\" IN (?) AND \"b\" IS NOT NULL");
        assert!(filters_clause(&users(), &[], &mut params).unwrap().is_none());
    }
}
