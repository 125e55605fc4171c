//! Attribute lifecycle

use super::{Database, DatabaseEvent};
use crate::validators::{IndexDependency, Key};
use serde_json::json;
use strata_core::{Attribute, AttributeType, StrataError, StrataResult, METADATA};
use strata_storage::Adapter;
use tracing::warn;

impl Database {
    fn guard_metadata(collection: &str) -> StrataResult<()> {
        if collection == METADATA {
            return Err(StrataError::validation(
                "The metadata collection schema cannot be altered",
            ));
        }
        Ok(())
    }

    fn validate_attribute_declaration(attribute: &Attribute) -> StrataResult<()> {
        Key::new(false).validate(&attribute.key)?;
        if attribute.type_ == AttributeType::Relationship {
            return Err(StrataError::validation(
                "Relationship attributes are created through create_relationship",
            ));
        }
        if attribute.type_ == AttributeType::String && attribute.size <= 0 {
            return Err(StrataError::validation(format!(
                "String attribute '{}' requires a size",
                attribute.key
            )));
        }
        Ok(())
    }

    /// Add one attribute: physical column plus metadata update.
    pub async fn create_attribute(
        &self,
        collection_id: &str,
        mut attribute: Attribute,
    ) -> StrataResult<Attribute> {
        Self::guard_metadata(collection_id)?;
        let mut collection = self.get_collection(collection_id).await?;
        Self::validate_attribute_declaration(&attribute)?;
        if collection.attribute(&attribute.key).is_some() {
            return Err(StrataError::conflict(
                "attribute",
                &attribute.key,
                "already exists",
            ));
        }
        Self::normalize_attribute_filters(&mut attribute);

        collection.attributes.push(attribute.clone());
        self.with_transaction(|| async {
            self.adapter()
                .create_attribute(collection_id, &attribute)
                .await?;
            self.write_metadata(&collection, false).await?;
            Ok(())
        })
        .await?;

        self.flush_collection_cache(collection_id).await;
        self.trigger(
            DatabaseEvent::AttributeCreate,
            json!({ "collection": collection_id, "key": attribute.key }),
        );
        Ok(attribute)
    }

    /// Add several attributes. Uses one DDL statement when the adapter
    /// supports batching; otherwise applies sequentially and rolls back
    /// the columns already added on failure.
    pub async fn create_attributes(
        &self,
        collection_id: &str,
        attributes: Vec<Attribute>,
    ) -> StrataResult<()> {
        Self::guard_metadata(collection_id)?;
        let mut collection = self.get_collection(collection_id).await?;
        let mut attributes = attributes;
        for attribute in attributes.iter_mut() {
            Self::validate_attribute_declaration(attribute)?;
            if collection.attribute(&attribute.key).is_some() {
                return Err(StrataError::conflict(
                    "attribute",
                    &attribute.key,
                    "already exists",
                ));
            }
            Self::normalize_attribute_filters(attribute);
        }

        if self.adapter().supports_batch_create_attributes() {
            collection.attributes.extend(attributes.iter().cloned());
            self.with_transaction(|| async {
                self.adapter()
                    .create_attributes(collection_id, &attributes)
                    .await?;
                self.write_metadata(&collection, false).await?;
                Ok(())
            })
            .await?;
        } else {
            let mut added: Vec<&Attribute> = Vec::new();
            for attribute in &attributes {
                match self.adapter().create_attribute(collection_id, attribute).await {
                    Ok(()) => added.push(attribute),
                    Err(err) => {
                        for rollback in added {
                            if let Err(rollback_err) = self
                                .adapter()
                                .delete_attribute(collection_id, &rollback.key)
                                .await
                            {
                                warn!(
                                    attribute = %rollback.key,
                                    error = %rollback_err,
                                    "Failed to roll back attribute"
                                );
                            }
                        }
                        return Err(err);
                    }
                }
            }
            collection.attributes.extend(attributes.iter().cloned());
            self.write_metadata(&collection, false).await?;
        }

        self.flush_collection_cache(collection_id).await;
        for attribute in &attributes {
            self.trigger(
                DatabaseEvent::AttributeCreate,
                json!({ "collection": collection_id, "key": attribute.key }),
            );
        }
        Ok(())
    }

    /// Replace an attribute's declaration, applying resize/type DDL.
    pub async fn update_attribute(
        &self,
        collection_id: &str,
        mut attribute: Attribute,
    ) -> StrataResult<Attribute> {
        Self::guard_metadata(collection_id)?;
        let mut collection = self.get_collection(collection_id).await?;
        Self::validate_attribute_declaration(&attribute)?;
        let existing = collection
            .attribute(&attribute.key)
            .cloned()
            .ok_or_else(|| StrataError::not_found("attribute", &attribute.key))?;
        Self::normalize_attribute_filters(&mut attribute);

        let physical_change =
            existing.type_ != attribute.type_ || existing.size != attribute.size;
        for slot in collection.attributes.iter_mut() {
            if slot.key == attribute.key {
                *slot = attribute.clone();
            }
        }

        self.with_transaction(|| async {
            if physical_change {
                self.adapter()
                    .update_attribute(collection_id, &attribute)
                    .await?;
            }
            self.write_metadata(&collection, false).await?;
            Ok(())
        })
        .await?;

        self.flush_collection_cache(collection_id).await;
        self.trigger(
            DatabaseEvent::AttributeUpdate,
            json!({ "collection": collection_id, "key": attribute.key }),
        );
        Ok(attribute)
    }

    /// Rename an attribute and patch every index that references it.
    pub async fn rename_attribute(
        &self,
        collection_id: &str,
        old: &str,
        new: &str,
    ) -> StrataResult<()> {
        Self::guard_metadata(collection_id)?;
        let mut collection = self.get_collection(collection_id).await?;
        Key::new(false).validate(new)?;
        let existing = collection
            .attribute(old)
            .cloned()
            .ok_or_else(|| StrataError::not_found("attribute", old))?;
        if collection.attribute(new).is_some() {
            return Err(StrataError::conflict("attribute", new, "already exists"));
        }
        if existing.array {
            IndexDependency::new(&collection.indexes, true).validate(old)?;
        }

        for attribute in collection.attributes.iter_mut() {
            if attribute.key == old {
                attribute.key = new.to_string();
                attribute.id = new.to_string();
            }
        }
        for index in collection.indexes.iter_mut() {
            for attr in index.attributes.iter_mut() {
                if attr == old {
                    *attr = new.to_string();
                }
            }
        }

        self.with_transaction(|| async {
            self.adapter()
                .rename_attribute(collection_id, old, new)
                .await?;
            self.write_metadata(&collection, false).await?;
            Ok(())
        })
        .await?;

        self.flush_collection_cache(collection_id).await;
        self.trigger(
            DatabaseEvent::AttributeUpdate,
            json!({ "collection": collection_id, "key": new, "previous": old }),
        );
        Ok(())
    }

    /// Drop an attribute. Blocked while any index references it.
    pub async fn delete_attribute(&self, collection_id: &str, key: &str) -> StrataResult<()> {
        Self::guard_metadata(collection_id)?;
        let mut collection = self.get_collection(collection_id).await?;
        let existing = collection
            .attribute(key)
            .cloned()
            .ok_or_else(|| StrataError::not_found("attribute", key))?;
        IndexDependency::new(&collection.indexes, existing.array).validate(key)?;

        collection.attributes.retain(|attr| attr.key != key);
        self.with_transaction(|| async {
            if existing.has_column() {
                self.adapter().delete_attribute(collection_id, key).await?;
            }
            self.write_metadata(&collection, false).await?;
            Ok(())
        })
        .await?;

        self.flush_collection_cache(collection_id).await;
        self.trigger(
            DatabaseEvent::AttributeDelete,
            json!({ "collection": collection_id, "key": key }),
        );
        Ok(())
    }

    pub(crate) async fn flush_collection_cache(&self, collection_id: &str) {
        let key = self.cache_key();
        self.cache_flush(&[key.collection(METADATA), key.collection(collection_id)])
            .await;
    }
}
