//! Relationship population
//!
//! Resolves relationship attributes by substituting related documents
//! into the response. The context carries the set of visited collections
//! so relationship graphs with cycles terminate: a collection already on
//! the path is skipped rather than descended into.

use super::Database;
use crate::authorization::Authorization;
use indexmap::IndexMap;
use std::collections::HashSet;
use strata_core::query::{group_by_type, GroupedQueries, Query};
use strata_core::{
    Collection, Doc, PermissionKind, RelationOptions, RelationType, StrataResult, StrataError,
    Value,
};
use strata_storage::{Adapter, FindQuery};

/// Cycle protection for a populate traversal.
#[derive(Debug, Clone)]
pub struct PopulateContext {
    visited: HashSet<String>,
}

impl PopulateContext {
    pub fn new(root: &str) -> Self {
        let mut visited = HashSet::new();
        visited.insert(root.to_string());
        PopulateContext { visited }
    }

    /// Mark a collection as visited; returns false when it already was.
    fn enter(&mut self, collection: &str) -> bool {
        self.visited.insert(collection.to_string())
    }
}

impl Database {
    /// Resolve relationship attributes on a document using populate
    /// queries, recursively.
    pub async fn populate(
        &self,
        collection_id: &str,
        doc: &mut Doc,
        queries: &[Query],
    ) -> StrataResult<()> {
        let collection = self.get_collection(collection_id).await?;
        let grouped = group_by_type(queries);
        let mut ctx = PopulateContext::new(collection_id);
        self.populate_doc(&collection, doc, &grouped.populate, &mut ctx)
            .await
    }

    pub(crate) async fn populate_doc(
        &self,
        collection: &Collection,
        doc: &mut Doc,
        populate: &IndexMap<String, Vec<Query>>,
        ctx: &mut PopulateContext,
    ) -> StrataResult<()> {
        for (attribute_key, nested) in populate {
            let attribute = collection.attribute(attribute_key).ok_or_else(|| {
                StrataError::validation(format!(
                    "Unknown populate attribute '{}'",
                    attribute_key
                ))
            })?;
            let options = attribute.options.as_ref().ok_or_else(|| {
                StrataError::validation(format!(
                    "Cannot populate non-relationship attribute '{}'",
                    attribute_key
                ))
            })?;
            let related = self.get_collection(&options.related_collection).await?;
            if !ctx.enter(&related.id) {
                // Cycle: leave the raw value in place.
                continue;
            }
            if Authorization::status()
                && !Self::collection_grants(&related, PermissionKind::Read)
                && !related.document_security
            {
                // The related collection is not readable at all.
                doc.set(attribute_key.clone(), Value::Null);
                continue;
            }

            let grouped = group_by_type(nested);
            let value = self
                .resolve_relation(collection, doc, attribute_key, &related, options, &grouped, ctx)
                .await?;
            doc.set(attribute_key.clone(), value);
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn resolve_relation(
        &self,
        collection: &Collection,
        doc: &Doc,
        attribute_key: &str,
        related: &Collection,
        options: &RelationOptions,
        grouped: &GroupedQueries,
        ctx: &mut PopulateContext,
    ) -> StrataResult<Value> {
        let collection_granted =
            !Authorization::status() || Self::collection_grants(related, PermissionKind::Read);

        if options.stores_key() {
            // Our row holds the related id in the attribute's own column.
            let Some(related_id) = doc.get_str(attribute_key).map(str::to_string) else {
                return Ok(Value::Null);
            };
            let Some(raw) = self
                .adapter()
                .get_document(related, &related_id, &grouped.selections)
                .await?
            else {
                return Ok(Value::Null);
            };
            let mut related_doc = self.decode_doc(related, raw)?;
            if !Self::readable_related(collection_granted, related, &related_doc) {
                return Ok(Value::Null);
            }
            self.populate_nested(related, &mut related_doc, grouped, ctx)
                .await?;
            return Ok(Value::Doc(related_doc));
        }

        if options.relation_type == RelationType::ManyToMany {
            let junction = Self::junction_for(&collection.id, options);
            let own = Self::junction_own_column(options);
            let other = Self::junction_other_column(options);
            let rows = self.junction_rows(&junction, own, doc.id()).await?;
            let ids: Vec<Value> = rows
                .iter()
                .filter_map(|row| row.get_str(other))
                .map(Value::from)
                .collect();
            if ids.is_empty() {
                return Ok(Value::Array(Vec::new()));
            }
            let mut filters = grouped.filters.clone();
            filters.push(Query::equal(Doc::ID, ids));
            return self
                .fetch_related_list(related, filters, grouped, collection_granted, ctx)
                .await;
        }

        // The related collection stores the foreign key.
        let fk = options.two_way_key.clone().unwrap_or_default();
        let mut filters = grouped.filters.clone();
        filters.push(Query::equal(&fk, vec![Value::from(doc.id())]));

        if options.is_multi() {
            self.fetch_related_list(related, filters, grouped, collection_granted, ctx)
                .await
        } else {
            // oneToOne seen from the child side: a single back-reference.
            let docs = self
                .fetch_related_docs(related, filters, grouped, collection_granted, ctx)
                .await?;
            Ok(docs
                .into_iter()
                .next()
                .map(Value::Doc)
                .unwrap_or(Value::Null))
        }
    }

    fn readable_related(collection_granted: bool, related: &Collection, doc: &Doc) -> bool {
        if !Authorization::status() || collection_granted {
            return true;
        }
        related.document_security && Self::document_grants(doc, PermissionKind::Read)
    }

    async fn fetch_related_list(
        &self,
        related: &Collection,
        filters: Vec<Query>,
        grouped: &GroupedQueries,
        collection_granted: bool,
        ctx: &mut PopulateContext,
    ) -> StrataResult<Value> {
        let docs = self
            .fetch_related_docs(related, filters, grouped, collection_granted, ctx)
            .await?;
        Ok(Value::Array(docs.into_iter().map(Value::Doc).collect()))
    }

    async fn fetch_related_docs(
        &self,
        related: &Collection,
        filters: Vec<Query>,
        grouped: &GroupedQueries,
        collection_granted: bool,
        ctx: &mut PopulateContext,
    ) -> StrataResult<Vec<Doc>> {
        let raw = self
            .adapter()
            .find(
                related,
                &FindQuery {
                    filters,
                    selections: grouped.selections.clone(),
                    orders: grouped
                        .orders
                        .iter()
                        .map(|(attr, order)| (attr.clone(), *order))
                        .collect(),
                    limit: grouped.limit,
                    offset: grouped.offset,
                    ..Default::default()
                },
            )
            .await?;
        let mut docs = Vec::with_capacity(raw.len());
        for doc in raw {
            let mut doc = self.decode_doc(related, doc)?;
            if !Self::readable_related(collection_granted, related, &doc) {
                continue;
            }
            self.populate_nested(related, &mut doc, grouped, ctx).await?;
            docs.push(doc);
        }
        Ok(docs)
    }

    async fn populate_nested(
        &self,
        related: &Collection,
        doc: &mut Doc,
        grouped: &GroupedQueries,
        ctx: &mut PopulateContext,
    ) -> StrataResult<()> {
        if grouped.populate.is_empty() {
            return Ok(());
        }
        Box::pin(self.populate_doc(related, doc, &grouped.populate, ctx)).await
    }
}
