//! Schema container and collection lifecycle

use super::{Database, DatabaseEvent};
use crate::validators::{IndexValidator, Key, Permissions};
use chrono::Utc;
use serde_json::json;
use strata_core::{
    metadata_collection, AttributeType, Collection, Doc, StrataError, StrataResult, Value,
    METADATA,
};
use strata_storage::{selection_hash, Adapter, FindQuery};
use tracing::warn;

impl Database {
    // ========================================================================
    // SCHEMA CONTAINER
    // ========================================================================

    /// Create the physical schema container if absent and the `_metadata`
    /// collection inside it.
    pub async fn create(&self, schema: Option<&str>) -> StrataResult<()> {
        let meta = self.require_meta()?;
        let schema = schema.unwrap_or(&meta.schema);
        self.adapter().create_schema(schema).await?;

        let metadata = metadata_collection();
        if !self.adapter().collection_exists(METADATA).await? {
            self.adapter()
                .create_collection(METADATA, &metadata.attributes, &metadata.indexes)
                .await?;
        }
        self.trigger(DatabaseEvent::DatabaseCreate, json!({ "schema": schema }));
        Ok(())
    }

    /// Whether the schema container (or a collection inside it) exists.
    pub async fn exists(
        &self,
        schema: Option<&str>,
        collection: Option<&str>,
    ) -> StrataResult<bool> {
        let meta = self.require_meta()?;
        let schema = schema.unwrap_or(&meta.schema);
        match collection {
            Some(collection) => self.adapter().collection_exists(collection).await,
            None => self.adapter().schema_exists(schema).await,
        }
    }

    /// Drop the schema container and everything in it.
    pub async fn delete(&self, schema: Option<&str>) -> StrataResult<()> {
        let meta = self.require_meta()?;
        let schema = schema.unwrap_or(&meta.schema);
        self.adapter().delete_schema(schema).await?;
        if let Err(err) = self.cache.flush_all().await {
            warn!(error = %err, "Cache flush failed after schema delete");
        }
        self.trigger(DatabaseEvent::DatabaseDelete, json!({ "schema": schema }));
        Ok(())
    }

    // ========================================================================
    // COLLECTION LIFECYCLE
    // ========================================================================

    /// Create a collection: validates the declaration, writes the
    /// `_metadata` row, and issues the DDL in one transaction.
    pub async fn create_collection(&self, collection: Collection) -> StrataResult<Doc> {
        self.require_meta()?;
        Key::new(false).validate(&collection.id)?;
        Permissions::default().validate_strings(
            &collection
                .permissions
                .iter()
                .map(|p| p.to_string())
                .collect::<Vec<_>>(),
        )?;

        let mut collection = collection;
        let key_validator = Key::new(false);
        let mut seen: Vec<String> = Vec::new();
        for attribute in collection.attributes.iter_mut() {
            key_validator.validate(&attribute.key)?;
            let lowered = attribute.key.to_lowercase();
            if seen.contains(&lowered) {
                return Err(StrataError::conflict(
                    "attribute",
                    &attribute.key,
                    "declared twice",
                ));
            }
            seen.push(lowered);
            Self::normalize_attribute_filters(attribute);

            if attribute.is_relationship() {
                let related = attribute
                    .options
                    .as_ref()
                    .map(|options| options.related_collection.clone())
                    .unwrap_or_default();
                if self.find_collection(&related).await?.is_none() {
                    return Err(StrataError::not_found("collection", related));
                }
            }
        }

        let index_validator = IndexValidator::new(
            &collection.attributes,
            self.adapter().max_index_length(),
            self.adapter().supports_array_index(),
        );
        for index in &collection.indexes {
            index_validator.validate(index)?;
        }

        if self.find_collection(&collection.id).await?.is_some() {
            return Err(StrataError::conflict(
                "collection",
                &collection.id,
                "already exists",
            ));
        }

        let doc = self
            .with_transaction(|| async {
                self.adapter()
                    .create_collection(&collection.id, &collection.attributes, &collection.indexes)
                    .await?;
                self.write_metadata(&collection, true).await
            })
            .await?;

        let key = self.cache_key();
        self.cache_flush(&[key.collection(METADATA), key.collection(&collection.id)])
            .await;
        self.trigger(DatabaseEvent::CollectionCreate, doc.to_json());
        Ok(doc)
    }

    /// Update a collection's permissions, document security, or enabled
    /// flag.
    pub async fn update_collection(
        &self,
        id: &str,
        permissions: Vec<strata_core::Permission>,
        document_security: bool,
        enabled: bool,
    ) -> StrataResult<Doc> {
        let mut collection = self.get_collection(id).await?;
        Permissions::default().validate_strings(
            &permissions.iter().map(|p| p.to_string()).collect::<Vec<_>>(),
        )?;
        collection.permissions = permissions;
        collection.document_security = document_security;
        collection.enabled = enabled;

        let doc = self.write_metadata(&collection, false).await?;
        let key = self.cache_key();
        self.cache_flush(&[key.collection(METADATA), key.collection(id)])
            .await;
        self.trigger(DatabaseEvent::CollectionUpdate, doc.to_json());
        Ok(doc)
    }

    /// Drop a collection, its junction tables, and its metadata row.
    pub async fn delete_collection(&self, id: &str) -> StrataResult<()> {
        let collection = self.get_collection(id).await?;
        if id == METADATA {
            return Err(StrataError::validation(
                "The metadata collection cannot be deleted",
            ));
        }

        self.with_transaction(|| async {
            for attribute in &collection.attributes {
                let Some(options) = attribute.options.as_ref() else {
                    continue;
                };
                if options.relation_type == strata_core::RelationType::ManyToMany {
                    let junction =
                        Self::junction_collection_id(&collection.id, &options.related_collection);
                    self.adapter().delete_collection(&junction).await.ok();
                }
            }
            self.adapter().delete_collection(id).await?;
            self.adapter()
                .delete_document(&metadata_collection(), id)
                .await?;
            Ok(())
        })
        .await?;

        let key = self.cache_key();
        self.cache_flush(&[key.collection(METADATA), key.collection(id)])
            .await;
        self.trigger(DatabaseEvent::CollectionDelete, json!({ "$id": id }));
        Ok(())
    }

    /// Fetch a collection schema, reading through the cache.
    pub async fn get_collection(&self, id: &str) -> StrataResult<Collection> {
        self.find_collection(id)
            .await?
            .ok_or_else(|| StrataError::not_found("collection", id))
    }

    /// Like [`Self::get_collection`] but `None` for missing collections.
    pub async fn find_collection(&self, id: &str) -> StrataResult<Option<Collection>> {
        if id == METADATA {
            return Ok(Some(metadata_collection()));
        }
        self.require_meta()?;

        let key = self.cache_key();
        let cache_entry = key.collection(id);
        if let Some(json) = self.cache_get(&cache_entry).await {
            if let Ok(doc) = Doc::from_json(json) {
                return Collection::from_doc(&doc).map(Some);
            }
        }

        let metadata = metadata_collection();
        let Some(raw) = self.adapter().get_document(&metadata, id, &[]).await? else {
            return Ok(None);
        };
        let doc = self.decode_doc(&metadata, raw)?;
        self.cache_set(
            &cache_entry,
            &doc.to_json(),
            &[key.collection(METADATA), key.collection(id)],
        )
        .await;
        let collection = Collection::from_doc(&doc)?;
        self.trigger(DatabaseEvent::CollectionRead, doc.to_json());
        Ok(Some(collection))
    }

    /// List collection schema documents, reading through the cache. Any
    /// schema mutation flushes the `_metadata` tag these entries carry.
    pub async fn list_collections(&self, limit: Option<i64>) -> StrataResult<Vec<Doc>> {
        self.require_meta()?;
        let metadata = metadata_collection();
        let limit = limit.unwrap_or(self.options().max_limit);

        let key = self.cache_key();
        let cache_entry = key.collection_query(
            METADATA,
            &selection_hash(&[], &[], Some(limit), None, None, None),
        );
        if let Some(docs) = self
            .cache_get(&cache_entry)
            .await
            .and_then(Self::docs_from_cache)
        {
            self.trigger(
                DatabaseEvent::CollectionList,
                json!({ "count": docs.len() }),
            );
            return Ok(docs);
        }

        let raw = self
            .adapter()
            .find(
                &metadata,
                &FindQuery {
                    limit: Some(limit),
                    ..Default::default()
                },
            )
            .await?;
        let docs = raw
            .into_iter()
            .map(|doc| self.decode_doc(&metadata, doc))
            .collect::<StrataResult<Vec<_>>>()?;
        self.cache_set(
            &cache_entry,
            &Self::docs_to_cache(&docs),
            &[key.collection(METADATA)],
        )
        .await;
        self.trigger(
            DatabaseEvent::CollectionList,
            json!({ "count": docs.len() }),
        );
        Ok(docs)
    }

    /// Approximate on-disk size of a collection in bytes.
    pub async fn get_size_of_collection(&self, id: &str) -> StrataResult<i64> {
        self.get_collection(id).await?;
        self.adapter().get_size_of_collection(id).await
    }

    /// Refresh storage statistics for a collection. Returns whether the
    /// adapter supports it.
    pub async fn analyze_collection(&self, id: &str) -> StrataResult<bool> {
        self.get_collection(id).await?;
        self.adapter().analyze_collection(id).await
    }

    // ========================================================================
    // METADATA PERSISTENCE
    // ========================================================================

    /// Default value filters per attribute type.
    pub(crate) fn normalize_attribute_filters(attribute: &mut strata_core::Attribute) {
        if !attribute.filters.is_empty() {
            return;
        }
        match attribute.type_ {
            AttributeType::Json => attribute.filters = vec!["json".to_string()],
            AttributeType::Timestamptz => attribute.filters = vec!["datetime".to_string()],
            _ => {}
        }
    }

    /// Write a collection's schema document to `_metadata`.
    pub(crate) async fn write_metadata(
        &self,
        collection: &Collection,
        is_create: bool,
    ) -> StrataResult<Doc> {
        let metadata = metadata_collection();
        let now = Utc::now();

        let mut doc = collection.to_doc()?;
        doc.set(Doc::UPDATED_AT, Value::Timestamp(now));
        if is_create {
            doc.set(Doc::CREATED_AT, Value::Timestamp(now));
        }
        let encoded = self.encode_doc(&metadata, doc.clone())?;
        if is_create {
            self.adapter().create_document(&metadata, encoded).await?;
        } else {
            self.adapter()
                .update_document(&metadata, &collection.id, encoded)
                .await?;
        }
        Ok(doc)
    }
}
