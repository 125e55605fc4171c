//! Query list validator
//!
//! Per-method rules over a query list against a collection schema:
//! attribute existence, value cardinality, array-attribute restrictions,
//! virtual relation rejection, logical nesting, cursor shape, and - when
//! indexed validation is enabled - a fulltext index requirement for
//! `search`.

use strata_core::query::{Query, QueryMethod};
use strata_core::{Attribute, AttributeType, Collection, Doc, IndexType, StrataError, StrataResult, Value};

pub struct QueriesValidator {
    collection: Collection,
    max_values: usize,
    indexed_validation: bool,
}

impl QueriesValidator {
    pub fn new(collection: &Collection, max_values: usize, indexed_validation: bool) -> Self {
        QueriesValidator {
            collection: collection.clone(),
            max_values,
            indexed_validation,
        }
    }

    pub fn validate(&self, queries: &[Query]) -> StrataResult<()> {
        for query in queries {
            self.validate_query(query)?;
        }
        Ok(())
    }

    fn attribute(&self, key: &str) -> Option<&Attribute> {
        self.collection.attribute(key)
    }

    fn require_attribute(&self, query: &Query) -> StrataResult<Option<&Attribute>> {
        let key = query.attribute();
        if key.is_empty() {
            return Err(StrataError::validation(format!(
                "Query method '{}' requires a target attribute",
                query.method
            )));
        }
        if Doc::SYSTEM_FIELDS.contains(&key) {
            return Ok(None);
        }
        let attribute = self.attribute(key).ok_or_else(|| {
            StrataError::validation(format!("Unknown query attribute '{}'", key))
        })?;
        if attribute.type_ == AttributeType::Virtual {
            return Err(StrataError::validation(format!(
                "Cannot query virtual attribute '{}'",
                key
            )));
        }
        if attribute.is_relationship() {
            let stores_key = attribute
                .options
                .as_ref()
                .map(|options| options.stores_key())
                .unwrap_or(false);
            if !stores_key {
                return Err(StrataError::validation(format!(
                    "Cannot query virtual relationship attribute '{}'; query the side that stores the key",
                    key
                )));
            }
        }
        Ok(Some(attribute))
    }

    fn validate_query(&self, query: &Query) -> StrataResult<()> {
        match query.method {
            method if method.is_filter() => self.validate_filter(query),
            QueryMethod::Select => {
                for value in query.scalar_values() {
                    let key = value.as_str().ok_or_else(|| {
                        StrataError::validation("select takes attribute names")
                    })?;
                    if key != "*" && !Doc::SYSTEM_FIELDS.contains(&key)
                        && self.attribute(key).is_none()
                    {
                        return Err(StrataError::validation(format!(
                            "Unknown selection attribute '{}'",
                            key
                        )));
                    }
                }
                Ok(())
            }
            QueryMethod::OrderAsc | QueryMethod::OrderDesc => {
                self.require_attribute(query).map(|_| ())
            }
            QueryMethod::Limit => {
                let limit = query.first_integer()?;
                if limit < 1 {
                    return Err(StrataError::validation("limit must be at least 1"));
                }
                Ok(())
            }
            QueryMethod::Offset => {
                let offset = query.first_integer()?;
                if offset < 0 {
                    return Err(StrataError::validation("offset cannot be negative"));
                }
                Ok(())
            }
            QueryMethod::CursorAfter | QueryMethod::CursorBefore => {
                match query.first_scalar() {
                    Some(Value::String(id)) if !id.is_empty() => Ok(()),
                    Some(Value::Doc(doc)) if !doc.id().is_empty() => Ok(()),
                    _ => Err(StrataError::validation(
                        "Cursor requires a document or a document id",
                    )),
                }
            }
            QueryMethod::Populate => {
                let key = query.attribute();
                let attribute = self.attribute(key).ok_or_else(|| {
                    StrataError::validation(format!("Unknown populate attribute '{}'", key))
                })?;
                if !attribute.is_relationship() {
                    return Err(StrataError::validation(format!(
                        "Cannot populate non-relationship attribute '{}'",
                        key
                    )));
                }
                Ok(())
            }
            other => Err(StrataError::validation(format!(
                "Unsupported query method '{}'",
                other
            ))),
        }
    }

    fn validate_filter(&self, query: &Query) -> StrataResult<()> {
        if matches!(query.method, QueryMethod::Or | QueryMethod::And) {
            let children = query.subqueries();
            if children.len() < 2 || children.len() != query.values.len() {
                return Err(StrataError::validation(format!(
                    "'{}' requires at least two nested filter queries",
                    query.method
                )));
            }
            for child in children {
                if !child.method.is_filter() {
                    return Err(StrataError::validation(format!(
                        "'{}' may only nest filter queries, got '{}'",
                        query.method, child.method
                    )));
                }
                self.validate_filter(child)?;
            }
            return Ok(());
        }

        let attribute = self.require_attribute(query)?;
        let values = query.scalar_values();
        if values.len() != query.values.len() {
            return Err(StrataError::validation(format!(
                "'{}' takes scalar values only",
                query.method
            )));
        }
        if values.len() > self.max_values {
            return Err(StrataError::validation(format!(
                "Query on '{}' exceeds the maximum of {} values",
                query.attribute(),
                self.max_values
            )));
        }

        // Arrays only support containment and null checks.
        if attribute.map(|attr| attr.array).unwrap_or(false)
            && !matches!(
                query.method,
                QueryMethod::Contains | QueryMethod::IsNull | QueryMethod::IsNotNull
            )
        {
            return Err(StrataError::validation(format!(
                "Array attribute '{}' only supports contains, isNull, and isNotNull",
                query.attribute()
            )));
        }

        match query.method {
            QueryMethod::Equal => {
                if values.is_empty() {
                    return Err(StrataError::validation(
                        "'equal' requires at least one value",
                    ));
                }
            }
            QueryMethod::Contains => {
                if values.is_empty() {
                    return Err(StrataError::validation(
                        "'contains' requires at least one value",
                    ));
                }
                // Containment is only defined over arrays and strings.
                if let Some(attr) = attribute {
                    if !attr.array && attr.type_ != AttributeType::String {
                        return Err(StrataError::validation(format!(
                            "'contains' requires an array or string attribute, '{}' is {}",
                            query.attribute(),
                            attr.type_
                        )));
                    }
                }
            }
            QueryMethod::NotEqual
            | QueryMethod::LessThan
            | QueryMethod::LessThanEqual
            | QueryMethod::GreaterThan
            | QueryMethod::GreaterThanEqual
            | QueryMethod::StartsWith
            | QueryMethod::EndsWith => {
                if values.len() != 1 {
                    return Err(StrataError::validation(format!(
                        "'{}' requires exactly one value",
                        query.method
                    )));
                }
            }
            QueryMethod::Between => {
                if values.len() != 2 {
                    return Err(StrataError::validation(
                        "'between' requires exactly two values",
                    ));
                }
            }
            QueryMethod::IsNull | QueryMethod::IsNotNull => {
                if !values.is_empty() {
                    return Err(StrataError::validation(format!(
                        "'{}' takes no values",
                        query.method
                    )));
                }
            }
            QueryMethod::Search => {
                if values.len() != 1 || values[0].as_str().is_none() {
                    return Err(StrataError::validation(
                        "'search' requires exactly one string value",
                    ));
                }
                if self.indexed_validation {
                    let covered = self.collection.indexes.iter().any(|index| {
                        index.type_ == IndexType::Fulltext
                            && index
                                .attributes
                                .iter()
                                .any(|a| a == query.attribute())
                    });
                    if !covered {
                        return Err(StrataError::validation(format!(
                            "Searching '{}' requires a fulltext index",
                            query.attribute()
                        )));
                    }
                }
            }
            _ => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_core::Index;

    fn users(with_fulltext: bool) -> Collection {
        let mut collection = Collection::new("users");
        collection.attributes = vec![
            Attribute::string("name", 128),
            Attribute::integer("age"),
            Attribute::string("tags", 32).as_array(),
        ];
        if with_fulltext {
            collection.indexes = vec![Index::new(
                "ft_name",
                IndexType::Fulltext,
                vec!["name".to_string()],
            )];
        }
        collection
    }

    fn validator(with_fulltext: bool) -> QueriesValidator {
        QueriesValidator::new(&users(with_fulltext), 100, true)
    }

    #[test]
    fn test_attribute_existence() {
        let v = validator(false);
        assert!(v.validate(&[Query::equal("name", vec!["a".into()])]).is_ok());
        assert!(v.validate(&[Query::equal("ghost", vec!["a".into()])]).is_err());
        assert!(v.validate(&[Query::greater_than("$sequence", 1)]).is_ok());
    }

    #[test]
    fn test_cardinality() {
        let v = validator(false);
        assert!(v.validate(&[Query::equal("name", vec![])]).is_err());
        assert!(v.validate(&[Query::between("age", 1, 2)]).is_ok());
        assert!(v
            .validate(&[Query::new(
                QueryMethod::Between,
                Some("age".to_string()),
                vec![Value::Integer(1).into()],
            )])
            .is_err());
        assert!(v.validate(&[Query::is_null("age")]).is_ok());
        assert!(v
            .validate(&[Query::new(
                QueryMethod::IsNull,
                Some("age".to_string()),
                vec![Value::Integer(1).into()],
            )])
            .is_err());
    }

    #[test]
    fn test_array_attribute_restrictions() {
        let v = validator(false);
        assert!(v.validate(&[Query::contains("tags", vec!["x".into()])]).is_ok());
        assert!(v.validate(&[Query::is_null("tags")]).is_ok());
        assert!(v.validate(&[Query::equal("tags", vec!["x".into()])]).is_err());
        assert!(v.validate(&[Query::greater_than("tags", 1)]).is_err());
    }

    #[test]
    fn test_contains_requires_array_or_string() {
        let v = validator(false);
        // Strings take substring containment, arrays take element
        // containment.
        assert!(v.validate(&[Query::contains("name", vec!["da".into()])]).is_ok());
        assert!(v.validate(&[Query::contains("tags", vec!["x".into()])]).is_ok());
        // Scalar non-string attributes reject upfront.
        assert!(v.validate(&[Query::contains("age", vec![1.into()])]).is_err());
    }

    #[test]
    fn test_search_requires_fulltext_index() {
        assert!(validator(false)
            .validate(&[Query::search("name", "ada")])
            .is_err());
        assert!(validator(true)
            .validate(&[Query::search("name", "ada")])
            .is_ok());

        // Disabled indexed validation skips the requirement.
        let relaxed = QueriesValidator::new(&users(false), 100, false);
        assert!(relaxed.validate(&[Query::search("name", "ada")]).is_ok());
    }

    #[test]
    fn test_logical_nesting() {
        let v = validator(false);
        assert!(v
            .validate(&[Query::or(vec![
                Query::equal("name", vec!["a".into()]),
                Query::greater_than("age", 3),
            ])])
            .is_ok());
        assert!(v
            .validate(&[Query::or(vec![Query::equal("name", vec!["a".into()])])])
            .is_err());
        assert!(v
            .validate(&[Query::and(vec![
                Query::equal("name", vec!["a".into()]),
                Query::limit(3),
            ])])
            .is_err());
    }

    #[test]
    fn test_paging_and_cursor() {
        let v = validator(false);
        assert!(v.validate(&[Query::limit(10), Query::offset(0)]).is_ok());
        assert!(v.validate(&[Query::limit(0)]).is_err());
        assert!(v.validate(&[Query::offset(-1)]).is_err());
        assert!(v.validate(&[Query::cursor_after("d1")]).is_ok());
        assert!(v.validate(&[Query::cursor_after("")]).is_err());
    }

    #[test]
    fn test_max_values() {
        let tight = QueriesValidator::new(&users(false), 2, false);
        let many: Vec<Value> = (0..3).map(|i| Value::Integer(i)).collect();
        assert!(tight.validate(&[Query::equal("age", many)]).is_err());
    }
}
