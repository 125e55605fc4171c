//! Index definition validator
//!
//! Composite rules over an index declaration given the collection's
//! attributes and the adapter's capabilities: non-empty and unique
//! attribute lists, fulltext only over strings, at most one array
//! attribute (type `key`, with an explicit length), and a combined length
//! cap for non-fulltext indexes when the dialect imposes one.

use strata_core::{Attribute, AttributeType, Doc, Index, IndexType, StrataError, StrataResult};

#[derive(Debug, Clone)]
pub struct IndexValidator {
    attributes: Vec<Attribute>,
    max_index_length: i64,
    supports_array_index: bool,
}

impl IndexValidator {
    pub fn new(
        attributes: &[Attribute],
        max_index_length: i64,
        supports_array_index: bool,
    ) -> Self {
        IndexValidator {
            attributes: attributes.to_vec(),
            max_index_length,
            supports_array_index,
        }
    }

    fn attribute(&self, key: &str) -> Option<&Attribute> {
        self.attributes.iter().find(|attr| attr.key == key)
    }

    fn is_system(key: &str) -> bool {
        Doc::SYSTEM_FIELDS.contains(&key)
    }

    pub fn validate(&self, index: &Index) -> StrataResult<()> {
        if index.attributes.is_empty() {
            return Err(StrataError::validation(
                "Index must cover at least one attribute",
            ));
        }

        let mut seen: Vec<&str> = Vec::new();
        for key in &index.attributes {
            let lowered = key.as_str();
            if seen.iter().any(|s| s.eq_ignore_ascii_case(lowered)) {
                return Err(StrataError::validation(format!(
                    "Duplicate attribute '{}' in index",
                    key
                )));
            }
            seen.push(lowered);

            if !Self::is_system(key) && self.attribute(key).is_none() {
                return Err(StrataError::validation(format!(
                    "Unknown attribute '{}' in index",
                    key
                )));
            }
        }

        if index.type_ == IndexType::Fulltext {
            for key in &index.attributes {
                let is_string = Self::is_system(key)
                    || self
                        .attribute(key)
                        .map(|attr| attr.type_ == AttributeType::String)
                        .unwrap_or(false);
                if !is_string {
                    return Err(StrataError::validation(format!(
                        "Fulltext index requires string attributes, '{}' is not",
                        key
                    )));
                }
            }
        }

        self.validate_array_attributes(index)?;
        self.validate_total_length(index)
    }

    fn validate_array_attributes(&self, index: &Index) -> StrataResult<()> {
        let array_positions: Vec<usize> = index
            .attributes
            .iter()
            .enumerate()
            .filter(|(_, key)| {
                self.attribute(key)
                    .map(|attr| attr.array)
                    .unwrap_or(false)
            })
            .map(|(position, _)| position)
            .collect();

        if array_positions.is_empty() {
            return Ok(());
        }
        if !self.supports_array_index {
            return Err(StrataError::validation(
                "Indexing array attributes is not supported by this adapter",
            ));
        }
        if array_positions.len() > 1 {
            return Err(StrataError::validation(
                "An index may cover at most one array attribute",
            ));
        }
        if index.type_ != IndexType::Key {
            return Err(StrataError::validation(
                "An index over an array attribute must have type 'key'",
            ));
        }
        let position = array_positions[0];
        let has_length = index
            .lengths
            .get(position)
            .copied()
            .flatten()
            .map(|length| length > 0)
            .unwrap_or(false);
        if !has_length {
            return Err(StrataError::validation(
                "An index over an array attribute requires an explicit length",
            ));
        }
        Ok(())
    }

    fn validate_total_length(&self, index: &Index) -> StrataResult<()> {
        if self.max_index_length <= 0 || index.type_ == IndexType::Fulltext {
            return Ok(());
        }
        let mut total: i64 = 0;
        for (position, key) in index.attributes.iter().enumerate() {
            let declared = index.lengths.get(position).copied().flatten();
            let attribute_size = self
                .attribute(key)
                .map(|attr| attr.size)
                .unwrap_or(255);
            total += declared.unwrap_or(attribute_size).max(1);
        }
        if total > self.max_index_length {
            return Err(StrataError::validation(format!(
                "Combined index length {} exceeds the maximum of {}",
                total, self.max_index_length
            )));
        }
        Ok(())
    }
}

/// Blocks deleting or renaming an attribute that an index still
/// references. For array attributes any referencing index blocks, since
/// the index carries an explicit length tied to the attribute.
#[derive(Debug, Clone)]
pub struct IndexDependency {
    indexes: Vec<Index>,
    array: bool,
}

impl IndexDependency {
    pub fn new(indexes: &[Index], array: bool) -> Self {
        IndexDependency {
            indexes: indexes.to_vec(),
            array,
        }
    }

    pub fn validate(&self, attribute: &str) -> StrataResult<()> {
        let referenced = self
            .indexes
            .iter()
            .find(|index| index.attributes.iter().any(|a| a == attribute));
        match referenced {
            Some(index) => Err(StrataError::dependency(format!(
                "Attribute '{}' is referenced by index '{}'{}",
                attribute,
                index.key,
                if self.array { " (array attribute)" } else { "" }
            ))),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_dependency() {
        let indexes = vec![Index::new(
            "idx_tags",
            IndexType::Key,
            vec!["tags".to_string()],
        )];
        let dependency = IndexDependency::new(&indexes, true);
        assert!(matches!(
            dependency.validate("tags").unwrap_err(),
            StrataError::Dependency { .. }
        ));
        assert!(dependency.validate("name").is_ok());
    }

    fn attributes() -> Vec<Attribute> {
        vec![
            Attribute::string("name", 128),
            Attribute::string("bio", 1024),
            Attribute::integer("age"),
            Attribute::string("tags", 64).as_array(),
        ]
    }

    fn validator() -> IndexValidator {
        IndexValidator::new(&attributes(), 768, true)
    }

    fn index(type_: IndexType, attrs: &[&str]) -> Index {
        Index::new(
            "idx",
            type_,
            attrs.iter().map(|s| s.to_string()).collect(),
        )
    }

    #[test]
    fn test_basic_rules() {
        let v = validator();
        assert!(v.validate(&index(IndexType::Key, &["name"])).is_ok());
        assert!(v.validate(&index(IndexType::Key, &[])).is_err());
        assert!(v.validate(&index(IndexType::Key, &["name", "name"])).is_err());
        assert!(v.validate(&index(IndexType::Key, &["ghost"])).is_err());
        // System fields are indexable.
        assert!(v.validate(&index(IndexType::Key, &["$createdAt"])).is_ok());
    }

    #[test]
    fn test_fulltext_requires_strings() {
        let v = validator();
        assert!(v.validate(&index(IndexType::Fulltext, &["name", "bio"])).is_ok());
        assert!(v.validate(&index(IndexType::Fulltext, &["age"])).is_err());
    }

    #[test]
    fn test_array_rules() {
        let v = validator();

        // Array attribute needs type key and a length.
        assert!(v.validate(&index(IndexType::Key, &["tags"])).is_err());

        let mut with_length = index(IndexType::Key, &["tags"]);
        with_length.lengths = vec![Some(32)];
        assert!(v.validate(&with_length).is_ok());

        let mut unique_array = index(IndexType::Unique, &["tags"]);
        unique_array.lengths = vec![Some(32)];
        assert!(v.validate(&unique_array).is_err());

        let mut two_arrays = index(IndexType::Key, &["tags", "tags"]);
        two_arrays.lengths = vec![Some(32), Some(32)];
        assert!(v.validate(&two_arrays).is_err());

        // Adapter without array index support rejects outright.
        let no_arrays = IndexValidator::new(&attributes(), 768, false);
        assert!(no_arrays.validate(&with_length).is_err());
    }

    #[test]
    fn test_combined_length_cap() {
        let v = validator();
        // 128 + 1024 > 768
        assert!(v.validate(&index(IndexType::Key, &["name", "bio"])).is_err());

        // Declared lengths can bring it under the cap.
        let mut trimmed = index(IndexType::Key, &["name", "bio"]);
        trimmed.lengths = vec![None, Some(256)];
        assert!(v.validate(&trimmed).is_ok());

        // Fulltext is exempt from the combined cap.
        assert!(v.validate(&index(IndexType::Fulltext, &["name", "bio"])).is_ok());

        // A dialect without a cap never enforces it.
        let uncapped = IndexValidator::new(&attributes(), 0, true);
        assert!(uncapped.validate(&index(IndexType::Key, &["name", "bio"])).is_ok());
    }
}
