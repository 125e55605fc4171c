//! Relationship lifecycle and link maintenance
//!
//! A relationship materializes as one companion attribute on each side.
//! The side the relation table stores the key on owns a physical column;
//! manyToMany relationships own a junction collection instead. Multi-link
//! sides accept `{set, connect, disconnect}` objects on writes, resolved
//! here into foreign-key updates or junction rows.

use super::{Database, DatabaseEvent};
use crate::validators::Key;
use serde_json::json;
use strata_core::query::Query;
use strata_core::{
    Attribute, AttributeType, Collection, Doc, OnDelete, RelationOptions, RelationSide,
    RelationType, StrataError, StrataResult, Value, METADATA,
};
use strata_storage::{Adapter, FindQuery};

/// Column names inside a junction collection, relative to the declaring
/// side.
const JUNCTION_SOURCE: &str = "sourceId";
const JUNCTION_TARGET: &str = "targetId";

/// Link operations extracted from a multi-side relationship value.
#[derive(Debug, Clone)]
pub(crate) struct LinkOps {
    pub attribute: Attribute,
    pub set: Option<Vec<String>>,
    pub connect: Vec<String>,
    pub disconnect: Vec<String>,
}

impl Database {
    /// Deterministic id of the junction collection backing a manyToMany
    /// relationship declared from `source` towards `related`.
    pub(crate) fn junction_collection_id(source: &str, related: &str) -> String {
        format!("_{}_{}", source, related)
    }

    fn junction_collection(source: &str, related: &str) -> Collection {
        let mut collection = Collection::new(Self::junction_collection_id(source, related));
        collection.attributes = vec![
            Attribute::string(JUNCTION_SOURCE, 255).required(),
            Attribute::string(JUNCTION_TARGET, 255).required(),
        ];
        collection
    }

    /// The junction collection for a multi-link attribute, oriented from
    /// the declaring (parent) side.
    pub(crate) fn junction_for(collection_id: &str, options: &RelationOptions) -> Collection {
        match options.side {
            RelationSide::Parent => {
                Self::junction_collection(collection_id, &options.related_collection)
            }
            RelationSide::Child => {
                Self::junction_collection(&options.related_collection, collection_id)
            }
        }
    }

    /// Which junction column carries this side's document id.
    pub(crate) fn junction_own_column(options: &RelationOptions) -> &'static str {
        match options.side {
            RelationSide::Parent => JUNCTION_SOURCE,
            RelationSide::Child => JUNCTION_TARGET,
        }
    }

    pub(crate) fn junction_other_column(options: &RelationOptions) -> &'static str {
        match options.side {
            RelationSide::Parent => JUNCTION_TARGET,
            RelationSide::Child => JUNCTION_SOURCE,
        }
    }

    // ========================================================================
    // RELATIONSHIP LIFECYCLE
    // ========================================================================

    /// Create a relationship between two collections, materializing the
    /// companion attributes on both sides as the relation table dictates.
    #[allow(clippy::too_many_arguments)]
    pub async fn create_relationship(
        &self,
        collection_id: &str,
        related_id: &str,
        relation_type: RelationType,
        two_way: bool,
        key: Option<String>,
        two_way_key: Option<String>,
        on_delete: OnDelete,
    ) -> StrataResult<()> {
        if collection_id == METADATA || related_id == METADATA {
            return Err(StrataError::validation(
                "The metadata collection cannot participate in relationships",
            ));
        }
        let mut collection = self.get_collection(collection_id).await?;
        let mut related = self.get_collection(related_id).await?;

        let key = key.unwrap_or_else(|| related_id.to_string());
        let two_way_key = two_way_key.unwrap_or_else(|| collection_id.to_string());
        Key::new(false).validate(&key)?;
        Key::new(false).validate(&two_way_key)?;
        if collection.attribute(&key).is_some() {
            return Err(StrataError::conflict("attribute", &key, "already exists"));
        }
        if related.attribute(&two_way_key).is_some() {
            return Err(StrataError::conflict(
                "attribute",
                &two_way_key,
                "already exists",
            ));
        }

        let mut source_attr = Attribute::new(&key, AttributeType::Relationship);
        source_attr.options = Some(RelationOptions {
            relation_type,
            side: RelationSide::Parent,
            related_collection: related_id.to_string(),
            two_way,
            two_way_key: Some(two_way_key.clone()),
            on_delete,
        });
        let mut target_attr = Attribute::new(&two_way_key, AttributeType::Relationship);
        target_attr.options = Some(RelationOptions {
            relation_type,
            side: RelationSide::Child,
            related_collection: collection_id.to_string(),
            two_way,
            two_way_key: Some(key.clone()),
            on_delete,
        });

        collection.attributes.push(source_attr.clone());
        related.attributes.push(target_attr.clone());

        self.with_transaction(|| async {
            if source_attr.has_column() {
                self.adapter()
                    .create_attribute(collection_id, &source_attr)
                    .await?;
            }
            if target_attr.has_column() {
                self.adapter()
                    .create_attribute(related_id, &target_attr)
                    .await?;
            }
            if relation_type == RelationType::ManyToMany {
                let junction = Self::junction_collection(collection_id, related_id);
                self.adapter()
                    .create_collection(&junction.id, &junction.attributes, &junction.indexes)
                    .await?;
            }
            self.write_metadata(&collection, false).await?;
            self.write_metadata(&related, false).await?;
            Ok(())
        })
        .await?;

        self.flush_collection_cache(collection_id).await;
        self.flush_collection_cache(related_id).await;
        self.trigger(
            DatabaseEvent::AttributeCreate,
            json!({ "collection": collection_id, "key": key, "type": "relationship" }),
        );
        self.trigger(
            DatabaseEvent::AttributeCreate,
            json!({ "collection": related_id, "key": two_way_key, "type": "relationship" }),
        );
        Ok(())
    }

    /// Drop a relationship and its companion attribute on the other side.
    pub async fn delete_relationship(
        &self,
        collection_id: &str,
        key: &str,
    ) -> StrataResult<()> {
        let mut collection = self.get_collection(collection_id).await?;
        let attribute = collection
            .attribute(key)
            .cloned()
            .ok_or_else(|| StrataError::not_found("attribute", key))?;
        let options = attribute
            .options
            .clone()
            .ok_or_else(|| StrataError::validation(format!("'{}' is not a relationship", key)))?;
        let related_id = options.related_collection.clone();
        let mut related = self.get_collection(&related_id).await?;
        let partner_key = options.two_way_key.clone().unwrap_or_default();
        let partner = related.attribute(&partner_key).cloned();

        collection.attributes.retain(|attr| attr.key != key);
        related.attributes.retain(|attr| attr.key != partner_key);

        self.with_transaction(|| async {
            if attribute.has_column() {
                self.adapter().delete_attribute(collection_id, key).await?;
            }
            if let Some(partner) = &partner {
                if partner.has_column() {
                    self.adapter()
                        .delete_attribute(&related_id, &partner.key)
                        .await?;
                }
            }
            if options.relation_type == RelationType::ManyToMany {
                let junction = Self::junction_for(collection_id, &options);
                self.adapter().delete_collection(&junction.id).await?;
            }
            self.write_metadata(&collection, false).await?;
            self.write_metadata(&related, false).await?;
            Ok(())
        })
        .await?;

        self.flush_collection_cache(collection_id).await;
        self.flush_collection_cache(&related_id).await;
        self.trigger(
            DatabaseEvent::AttributeDelete,
            json!({ "collection": collection_id, "key": key }),
        );
        Ok(())
    }

    // ========================================================================
    // LINK MAINTENANCE
    // ========================================================================

    /// Strip multi-link relationship values off a document before
    /// persistence, returning the operations to apply afterwards.
    pub(crate) fn extract_link_ops(
        collection: &Collection,
        doc: &mut Doc,
        is_create: bool,
    ) -> StrataResult<Vec<LinkOps>> {
        let mut operations = Vec::new();
        for attribute in &collection.attributes {
            let Some(options) = attribute.options.as_ref() else {
                continue;
            };
            if !options.is_multi() || !doc.has(&attribute.key) {
                continue;
            }
            let value = doc.remove(&attribute.key).unwrap_or(Value::Null);
            if value.is_null() {
                if is_create {
                    continue;
                }
                // Explicit null clears every link.
                operations.push(LinkOps {
                    attribute: attribute.clone(),
                    set: Some(Vec::new()),
                    connect: Vec::new(),
                    disconnect: Vec::new(),
                });
                continue;
            }
            let map = value.as_object().ok_or_else(|| {
                StrataError::validation(format!(
                    "Relationship '{}' expects a set/connect/disconnect object",
                    attribute.key
                ))
            })?;
            let ids = |key: &str| -> Vec<String> {
                map.get(key)
                    .and_then(Value::as_array)
                    .map(|items| {
                        items
                            .iter()
                            .filter_map(Value::as_str)
                            .map(str::to_string)
                            .collect()
                    })
                    .unwrap_or_default()
            };
            operations.push(LinkOps {
                attribute: attribute.clone(),
                set: map.contains_key("set").then(|| ids("set")),
                connect: ids("connect"),
                disconnect: ids("disconnect"),
            });
        }
        Ok(operations)
    }

    /// Apply extracted link operations for a document.
    pub(crate) async fn apply_link_ops(
        &self,
        collection: &Collection,
        doc_id: &str,
        operations: &[LinkOps],
    ) -> StrataResult<()> {
        for op in operations {
            let options = op
                .attribute
                .options
                .as_ref()
                .ok_or_else(|| StrataError::internal("Link op without relation options"))?;
            if options.relation_type == RelationType::ManyToMany {
                self.apply_junction_ops(collection, doc_id, op, options).await?;
            } else {
                self.apply_foreign_key_ops(collection, doc_id, op, options)
                    .await?;
            }
        }
        Ok(())
    }

    /// Multi-link side backed by a foreign key on the related collection.
    async fn apply_foreign_key_ops(
        &self,
        _collection: &Collection,
        doc_id: &str,
        op: &LinkOps,
        options: &RelationOptions,
    ) -> StrataResult<()> {
        let related = self.get_collection(&options.related_collection).await?;
        let fk = options.two_way_key.clone().unwrap_or_default();

        if let Some(set) = &op.set {
            // Clear current links, then attach the new list.
            let current = self
                .adapter()
                .find(
                    &related,
                    &FindQuery {
                        filters: vec![Query::equal(&fk, vec![Value::from(doc_id)])],
                        ..Default::default()
                    },
                )
                .await?;
            let current_ids: Vec<String> =
                current.iter().map(|doc| doc.id().to_string()).collect();
            if !current_ids.is_empty() {
                let mut clear = Doc::new();
                clear.set(fk.clone(), Value::Null);
                self.adapter()
                    .update_documents(&related, &clear, &current_ids)
                    .await?;
            }
            if !set.is_empty() {
                let mut attach = Doc::new();
                attach.set(fk.clone(), Value::from(doc_id));
                self.adapter()
                    .update_documents(&related, &attach, set)
                    .await?;
            }
        }
        if !op.connect.is_empty() {
            let mut attach = Doc::new();
            attach.set(fk.clone(), Value::from(doc_id));
            self.adapter()
                .update_documents(&related, &attach, &op.connect)
                .await?;
        }
        if !op.disconnect.is_empty() {
            let mut clear = Doc::new();
            clear.set(fk.clone(), Value::Null);
            self.adapter()
                .update_documents(&related, &clear, &op.disconnect)
                .await?;
        }
        // Rows on the related side changed underneath its cache entries.
        self.cache_flush(&[self.cache_key().collection(&related.id)])
            .await;
        Ok(())
    }

    /// ManyToMany side backed by junction rows.
    async fn apply_junction_ops(
        &self,
        collection: &Collection,
        doc_id: &str,
        op: &LinkOps,
        options: &RelationOptions,
    ) -> StrataResult<()> {
        let junction = Self::junction_for(&collection.id, options);
        let own = Self::junction_own_column(options);
        let other = Self::junction_other_column(options);

        let link_row = |other_id: &str| -> StrataResult<Doc> {
            let mut row = Doc::new();
            row.set(Doc::ID, Value::String(Self::unique_id()));
            row.set(own, Value::from(doc_id));
            row.set(other, Value::from(other_id));
            Ok(row)
        };

        if let Some(set) = &op.set {
            let existing = self.junction_rows(&junction, own, doc_id).await?;
            let existing_ids: Vec<String> =
                existing.iter().map(|row| row.id().to_string()).collect();
            if !existing_ids.is_empty() {
                self.adapter()
                    .delete_documents(&junction, &existing_ids)
                    .await?;
            }
            for other_id in set {
                self.adapter()
                    .create_document(&junction, link_row(other_id)?)
                    .await?;
            }
        }
        for other_id in &op.connect {
            self.adapter()
                .create_document(&junction, link_row(other_id)?)
                .await?;
        }
        if !op.disconnect.is_empty() {
            let existing = self.junction_rows(&junction, own, doc_id).await?;
            let doomed: Vec<String> = existing
                .iter()
                .filter(|row| {
                    row.get_str(other)
                        .map(|target| op.disconnect.iter().any(|id| id == target))
                        .unwrap_or(false)
                })
                .map(|row| row.id().to_string())
                .collect();
            if !doomed.is_empty() {
                self.adapter().delete_documents(&junction, &doomed).await?;
            }
        }
        Ok(())
    }

    pub(crate) async fn junction_rows(
        &self,
        junction: &Collection,
        column: &str,
        doc_id: &str,
    ) -> StrataResult<Vec<Doc>> {
        self.adapter()
            .find(
                junction,
                &FindQuery {
                    filters: vec![Query::equal(column, vec![Value::from(doc_id)])],
                    ..Default::default()
                },
            )
            .await
    }

    // ========================================================================
    // DELETE SEMANTICS
    // ========================================================================

    /// Apply `onDelete` semantics before removing a document.
    pub(crate) async fn handle_on_delete(
        &self,
        collection: &Collection,
        doc: &Doc,
    ) -> StrataResult<()> {
        for attribute in &collection.attributes {
            let Some(options) = attribute.options.as_ref() else {
                continue;
            };

            if options.relation_type == RelationType::ManyToMany {
                let junction = Self::junction_for(&collection.id, options);
                let own = Self::junction_own_column(options);
                let rows = self.junction_rows(&junction, own, doc.id()).await?;
                if rows.is_empty() {
                    continue;
                }
                if options.on_delete == OnDelete::Restrict {
                    return Err(StrataError::dependency(format!(
                        "Document '{}' is still linked through '{}'",
                        doc.id(),
                        attribute.key
                    )));
                }
                let ids: Vec<String> = rows.iter().map(|row| row.id().to_string()).collect();
                self.adapter().delete_documents(&junction, &ids).await?;
                continue;
            }

            // Only the side the foreign key points at has dependents.
            if options.stores_key() {
                continue;
            }
            let related = self.get_collection(&options.related_collection).await?;
            let fk = options.two_way_key.clone().unwrap_or_default();
            let dependents = self
                .adapter()
                .find(
                    &related,
                    &FindQuery {
                        filters: vec![Query::equal(&fk, vec![Value::from(doc.id())])],
                        ..Default::default()
                    },
                )
                .await?;
            if dependents.is_empty() {
                continue;
            }
            match options.on_delete {
                OnDelete::Restrict => {
                    return Err(StrataError::dependency(format!(
                        "Document '{}' is still referenced by {} document(s) in '{}'",
                        doc.id(),
                        dependents.len(),
                        related.id
                    )));
                }
                OnDelete::SetNull => {
                    let ids: Vec<String> =
                        dependents.iter().map(|d| d.id().to_string()).collect();
                    let mut clear = Doc::new();
                    clear.set(fk.clone(), Value::Null);
                    self.adapter()
                        .update_documents(&related, &clear, &ids)
                        .await?;
                    self.cache_flush(&[self.cache_key().collection(&related.id)])
                        .await;
                }
                OnDelete::Cascade => {
                    for dependent in dependents {
                        Box::pin(self.delete_document_unchecked(&related, dependent)).await?;
                    }
                }
            }
        }
        Ok(())
    }
}
