//! Index lifecycle

use super::{Database, DatabaseEvent};
use crate::validators::{IndexValidator, Key};
use serde_json::json;
use strata_core::{Index, StrataError, StrataResult, METADATA};
use strata_storage::Adapter;

impl Database {
    /// Create an index after running the composite index rules.
    pub async fn create_index(&self, collection_id: &str, index: Index) -> StrataResult<Index> {
        if collection_id == METADATA {
            return Err(StrataError::validation(
                "The metadata collection schema cannot be altered",
            ));
        }
        let mut collection = self.get_collection(collection_id).await?;
        Key::new(false).validate(&index.key)?;
        if collection.index(&index.key).is_some() {
            return Err(StrataError::conflict("index", &index.key, "already exists"));
        }
        IndexValidator::new(
            &collection.attributes,
            self.adapter().max_index_length(),
            self.adapter().supports_array_index(),
        )
        .validate(&index)?;
        if index.type_ == strata_core::IndexType::Fulltext
            && !self.adapter().supports_fulltext_index()
        {
            return Err(StrataError::validation(
                "Fulltext indexes are not supported by this adapter",
            ));
        }

        collection.indexes.push(index.clone());
        self.with_transaction(|| async {
            self.adapter().create_index(&collection, &index).await?;
            self.write_metadata(&collection, false).await?;
            Ok(())
        })
        .await?;

        self.flush_collection_cache(collection_id).await;
        self.trigger(
            DatabaseEvent::IndexCreate,
            json!({ "collection": collection_id, "key": index.key }),
        );
        Ok(index)
    }

    /// Rename an index in place.
    pub async fn rename_index(
        &self,
        collection_id: &str,
        old: &str,
        new: &str,
    ) -> StrataResult<()> {
        let mut collection = self.get_collection(collection_id).await?;
        Key::new(false).validate(new)?;
        if collection.index(old).is_none() {
            return Err(StrataError::not_found("index", old));
        }
        if collection.index(new).is_some() {
            return Err(StrataError::conflict("index", new, "already exists"));
        }

        for index in collection.indexes.iter_mut() {
            if index.key == old {
                index.key = new.to_string();
                index.id = new.to_string();
            }
        }
        self.with_transaction(|| async {
            self.adapter().rename_index(collection_id, old, new).await?;
            self.write_metadata(&collection, false).await?;
            Ok(())
        })
        .await?;

        self.flush_collection_cache(collection_id).await;
        self.trigger(
            DatabaseEvent::IndexRename,
            json!({ "collection": collection_id, "key": new, "previous": old }),
        );
        Ok(())
    }

    /// Drop an index.
    pub async fn delete_index(&self, collection_id: &str, key: &str) -> StrataResult<()> {
        let mut collection = self.get_collection(collection_id).await?;
        if collection.index(key).is_none() {
            return Err(StrataError::not_found("index", key));
        }

        collection.indexes.retain(|index| index.key != key);
        self.with_transaction(|| async {
            self.adapter().delete_index(collection_id, key).await?;
            self.write_metadata(&collection, false).await?;
            Ok(())
        })
        .await?;

        self.flush_collection_cache(collection_id).await;
        self.trigger(
            DatabaseEvent::IndexDelete,
            json!({ "collection": collection_id, "key": key }),
        );
        Ok(())
    }
}
