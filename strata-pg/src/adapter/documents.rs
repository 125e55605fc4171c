//! Row-level CRUD
//!
//! Document reads and writes over the physical tables. Every statement
//! carries the implicit tenant predicate under shared tables. Find
//! queries compile validated filters, ordering, paging, and cursor
//! boundaries into one SELECT.

use super::filters::{column_ident, filters_clause};
use super::{PostgresAdapter, COL_SEQUENCE, COL_UID, COL_UPDATED_AT};
use crate::row::column_value;
use chrono::{DateTime, Utc};
use strata_core::query::{CursorDirection, Query};
use strata_core::{Collection, Doc, Order, StrataError, StrataResult, Value};
use strata_storage::{Adapter, FindQuery};

impl PostgresAdapter {
    /// (physical column, document field) pairs for a collection, the
    /// sequence column excluded.
    fn doc_columns(&self, collection: &Collection) -> Vec<(String, String)> {
        let scope = self.scope();
        let mut columns: Vec<(String, String)> = vec![
            (COL_UID.to_string(), Doc::ID.to_string()),
            (
                super::COL_CREATED_AT.to_string(),
                Doc::CREATED_AT.to_string(),
            ),
            (
                super::COL_UPDATED_AT.to_string(),
                Doc::UPDATED_AT.to_string(),
            ),
            (
                super::COL_PERMISSIONS.to_string(),
                Doc::PERMISSIONS.to_string(),
            ),
        ];
        if scope.shared_tables {
            columns.push((super::COL_TENANT.to_string(), Doc::TENANT.to_string()));
        }
        for attribute in collection.attributes.iter().filter(|attr| attr.has_column()) {
            columns.push((attribute.key.clone(), attribute.key.clone()));
        }
        columns
    }

    fn select_list(&self, selections: &[String]) -> String {
        if selections.is_empty() {
            return "*".to_string();
        }
        let mut columns: Vec<String> = vec![
            Self::quote_ident(COL_SEQUENCE),
            Self::quote_ident(COL_UID),
            Self::quote_ident(super::COL_CREATED_AT),
            Self::quote_ident(super::COL_UPDATED_AT),
            Self::quote_ident(super::COL_PERMISSIONS),
        ];
        for selection in selections {
            let column = Self::quote_ident(Self::column_name(selection));
            if !columns.contains(&column) {
                columns.push(column);
            }
        }
        columns.join(", ")
    }

    /// Implicit tenant predicate under shared tables.
    fn tenant_clause(&self, params: &mut Vec<Value>) -> Option<String> {
        let scope = self.scope();
        if !scope.shared_tables {
            return None;
        }
        match scope.tenant_id {
            Some(tenant) => {
                params.push(Value::Integer(tenant));
                Some(format!("{} = ?", Self::quote_ident(super::COL_TENANT)))
            }
            None => Some(format!("{} IS NULL", Self::quote_ident(super::COL_TENANT))),
        }
    }

    fn row_to_doc(&self, row: &tokio_postgres::Row) -> StrataResult<Doc> {
        let mut doc = Doc::new();
        for (idx, column) in row.columns().iter().enumerate() {
            let field = Self::field_name(column.name());
            doc.set(field, column_value(row, idx)?);
        }
        Ok(doc)
    }

    fn map_write_error(err: StrataError, resource: &'static str, id: &str) -> StrataError {
        match &err {
            StrataError::Database {
                code: Some(code), ..
            } if code == "23505" => StrataError::conflict(resource, id, "already exists"),
            _ => err,
        }
    }

    // ========================================================================
    // CREATE
    // ========================================================================

    pub(crate) async fn document_create(
        &self,
        collection: &Collection,
        mut doc: Doc,
    ) -> StrataResult<Doc> {
        let columns = self.doc_columns(collection);
        let mut params: Vec<Value> = Vec::with_capacity(columns.len());
        let mut names: Vec<String> = Vec::with_capacity(columns.len());
        for (column, field) in &columns {
            names.push(Self::quote_ident(column));
            params.push(doc.get(field).cloned().unwrap_or(Value::Null));
        }
        let placeholders: Vec<&str> = names.iter().map(|_| "?").collect();
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({}) RETURNING {}",
            self.table_ref(&collection.id),
            names.join(", "),
            placeholders.join(", "),
            Self::quote_ident(COL_SEQUENCE)
        );
        let rows = self
            .client()
            .query(&sql, &params)
            .await
            .map_err(|err| Self::map_write_error(err, "document", doc.id()))?;
        let row = rows
            .first()
            .ok_or_else(|| StrataError::internal("INSERT returned no sequence"))?;
        let sequence = column_value(row, 0)?
            .as_integer()
            .ok_or_else(|| StrataError::internal("Non-integer sequence"))?;
        doc.set(Doc::SEQUENCE, Value::Integer(sequence));
        Ok(doc)
    }

    pub(crate) async fn documents_create(
        &self,
        collection: &Collection,
        docs: Vec<Doc>,
    ) -> StrataResult<Vec<Doc>> {
        let mut created = Vec::with_capacity(docs.len());
        for doc in docs {
            created.push(self.document_create(collection, doc).await?);
        }
        Ok(created)
    }

    // ========================================================================
    // READ
    // ========================================================================

    pub(crate) async fn document_get(
        &self,
        collection: &Collection,
        id: &str,
        selections: &[String],
    ) -> StrataResult<Option<Doc>> {
        let mut params: Vec<Value> = vec![Value::String(id.to_string())];
        let mut conditions = vec![format!("{} = ?", Self::quote_ident(COL_UID))];
        if let Some(clause) = self.tenant_clause(&mut params) {
            conditions.push(clause);
        }
        let sql = format!(
            "SELECT {} FROM {} WHERE {} LIMIT 1",
            self.select_list(selections),
            self.table_ref(&collection.id),
            conditions.join(" AND ")
        );
        let rows = self.client().query(&sql, &params).await?;
        rows.first().map(|row| self.row_to_doc(row)).transpose()
    }

    pub(crate) async fn documents_find(
        &self,
        collection: &Collection,
        query: &FindQuery,
    ) -> StrataResult<Vec<Doc>> {
        let mut params: Vec<Value> = Vec::new();
        let mut conditions: Vec<String> = Vec::new();

        if let Some(clause) = self.tenant_clause(&mut params) {
            conditions.push(clause);
        }
        if let Some(clause) = filters_clause(collection, &query.filters, &mut params)? {
            conditions.push(clause);
        }

        // Effective traversal order: requested orders plus the sequence
        // tie-break, all reversed for backwards cursor pagination.
        let backwards = query.cursor_direction == Some(CursorDirection::Before);
        let mut orders: Vec<(String, Order)> = query.orders.clone();
        if !orders.iter().any(|(attr, _)| attr == Doc::SEQUENCE) {
            orders.push((Doc::SEQUENCE.to_string(), Order::Asc));
        }
        if backwards {
            for (_, order) in orders.iter_mut() {
                *order = order.reverse();
            }
        }

        if let Some(cursor) = &query.cursor {
            if let Some(clause) = cursor_condition(&orders, cursor, &mut params) {
                conditions.push(clause);
            }
        }

        let order_clauses: Vec<String> = orders
            .iter()
            .map(|(attr, order)| format!("{} {}", column_ident(attr), order.as_sql()))
            .collect();

        let mut sql = format!(
            "SELECT {} FROM {}",
            self.select_list(&query.selections),
            self.table_ref(&collection.id)
        );
        if !conditions.is_empty() {
            sql.push_str(&format!(" WHERE {}", conditions.join(" AND ")));
        }
        sql.push_str(&format!(" ORDER BY {}", order_clauses.join(", ")));
        if let Some(limit) = query.limit {
            sql.push_str(&format!(" LIMIT {}", limit.max(0)));
        }
        if let Some(offset) = query.offset {
            sql.push_str(&format!(" OFFSET {}", offset.max(0)));
        }

        let rows = self.client().query(&sql, &params).await?;
        let mut docs = rows
            .iter()
            .map(|row| self.row_to_doc(row))
            .collect::<StrataResult<Vec<_>>>()?;
        if backwards {
            docs.reverse();
        }
        Ok(docs)
    }

    pub(crate) async fn documents_count(
        &self,
        collection: &Collection,
        filters: &[Query],
        max: Option<i64>,
    ) -> StrataResult<i64> {
        let mut params: Vec<Value> = Vec::new();
        let mut conditions: Vec<String> = Vec::new();
        if let Some(clause) = self.tenant_clause(&mut params) {
            conditions.push(clause);
        }
        if let Some(clause) = filters_clause(collection, filters, &mut params)? {
            conditions.push(clause);
        }
        let mut inner = format!("SELECT 1 FROM {}", self.table_ref(&collection.id));
        if !conditions.is_empty() {
            inner.push_str(&format!(" WHERE {}", conditions.join(" AND ")));
        }
        if let Some(max) = max {
            inner.push_str(&format!(" LIMIT {}", max.max(0)));
        }
        let sql = format!("SELECT COUNT(1) FROM ({}) AS sub", inner);
        let rows = self.client().query(&sql, &params).await?;
        let row = rows
            .first()
            .ok_or_else(|| StrataError::internal("COUNT returned no rows"))?;
        column_value(row, 0)?
            .as_integer()
            .ok_or_else(|| StrataError::internal("Non-integer COUNT"))
    }

    pub(crate) async fn documents_sum(
        &self,
        collection: &Collection,
        attribute: &str,
        filters: &[Query],
        max: Option<i64>,
    ) -> StrataResult<f64> {
        let mut params: Vec<Value> = Vec::new();
        let mut conditions: Vec<String> = Vec::new();
        if let Some(clause) = self.tenant_clause(&mut params) {
            conditions.push(clause);
        }
        if let Some(clause) = filters_clause(collection, filters, &mut params)? {
            conditions.push(clause);
        }
        let column = column_ident(attribute);
        let mut inner = format!(
            "SELECT {} FROM {}",
            column,
            self.table_ref(&collection.id)
        );
        if !conditions.is_empty() {
            inner.push_str(&format!(" WHERE {}", conditions.join(" AND ")));
        }
        if let Some(max) = max {
            inner.push_str(&format!(" LIMIT {}", max.max(0)));
        }
        let sql = format!(
            "SELECT COALESCE(SUM({}), 0)::FLOAT8 FROM ({}) AS sub",
            column, inner
        );
        let rows = self.client().query(&sql, &params).await?;
        let row = rows
            .first()
            .ok_or_else(|| StrataError::internal("SUM returned no rows"))?;
        column_value(row, 0)?
            .as_float()
            .ok_or_else(|| StrataError::internal("Non-numeric SUM"))
    }

    // ========================================================================
    // UPDATE
    // ========================================================================

    pub(crate) async fn document_update(
        &self,
        collection: &Collection,
        id: &str,
        mut doc: Doc,
    ) -> StrataResult<Doc> {
        let columns = self.doc_columns(collection);
        let mut params: Vec<Value> = Vec::new();
        let mut assignments: Vec<String> = Vec::new();
        for (column, field) in &columns {
            if field == Doc::ID {
                continue;
            }
            if let Some(value) = doc.get(field) {
                assignments.push(format!("{} = ?", Self::quote_ident(column)));
                params.push(value.clone());
            }
        }
        if assignments.is_empty() {
            return Err(StrataError::validation("Nothing to update"));
        }

        params.push(Value::String(id.to_string()));
        let mut conditions = vec![format!("{} = ?", Self::quote_ident(COL_UID))];
        if let Some(clause) = self.tenant_clause(&mut params) {
            conditions.push(clause);
        }
        let sql = format!(
            "UPDATE {} SET {} WHERE {} RETURNING {}",
            self.table_ref(&collection.id),
            assignments.join(", "),
            conditions.join(" AND "),
            Self::quote_ident(COL_SEQUENCE)
        );
        let rows = self
            .client()
            .query(&sql, &params)
            .await
            .map_err(|err| Self::map_write_error(err, "document", id))?;
        let row = rows
            .first()
            .ok_or_else(|| StrataError::not_found("document", id))?;
        let sequence = column_value(row, 0)?
            .as_integer()
            .ok_or_else(|| StrataError::internal("Non-integer sequence"))?;
        doc.set(Doc::SEQUENCE, Value::Integer(sequence));
        Ok(doc)
    }

    pub(crate) async fn documents_update(
        &self,
        collection: &Collection,
        updates: &Doc,
        ids: &[String],
    ) -> StrataResult<u64> {
        if ids.is_empty() {
            return Ok(0);
        }
        let columns = self.doc_columns(collection);
        let mut params: Vec<Value> = Vec::new();
        let mut assignments: Vec<String> = Vec::new();
        for (column, field) in &columns {
            if field == Doc::ID {
                continue;
            }
            if let Some(value) = updates.get(field) {
                assignments.push(format!("{} = ?", Self::quote_ident(column)));
                params.push(value.clone());
            }
        }
        if assignments.is_empty() {
            return Ok(0);
        }
        params.push(Value::Array(
            ids.iter().map(|id| Value::String(id.clone())).collect(),
        ));
        let mut conditions = vec![format!("{} = ANY(?)", Self::quote_ident(COL_UID))];
        if let Some(clause) = self.tenant_clause(&mut params) {
            conditions.push(clause);
        }
        let sql = format!(
            "UPDATE {} SET {} WHERE {}",
            self.table_ref(&collection.id),
            assignments.join(", "),
            conditions.join(" AND ")
        );
        self.client().execute(&sql, &params).await
    }

    #[allow(clippy::too_many_arguments)]
    pub(crate) async fn document_increase(
        &self,
        collection: &Collection,
        id: &str,
        attribute: &str,
        by: f64,
        min: Option<f64>,
        max: Option<f64>,
        updated_at: DateTime<Utc>,
    ) -> StrataResult<bool> {
        let column = column_ident(attribute);
        let mut params: Vec<Value> = vec![
            Value::Float(by),
            Value::Timestamp(updated_at),
            Value::String(id.to_string()),
        ];
        let mut conditions = vec![format!("{} = ?", Self::quote_ident(COL_UID))];
        if let Some(clause) = self.tenant_clause(&mut params) {
            conditions.push(clause);
        }
        if let Some(max) = max {
            conditions.push(format!("{} + ? <= ?", column));
            params.push(Value::Float(by));
            params.push(Value::Float(max));
        }
        if let Some(min) = min {
            conditions.push(format!("{} + ? >= ?", column));
            params.push(Value::Float(by));
            params.push(Value::Float(min));
        }
        let sql = format!(
            "UPDATE {} SET {} = {} + ?, {} = ? WHERE {}",
            self.table_ref(&collection.id),
            column,
            column,
            Self::quote_ident(COL_UPDATED_AT),
            conditions.join(" AND ")
        );
        Ok(self.client().execute(&sql, &params).await? > 0)
    }

    // ========================================================================
    // DELETE
    // ========================================================================

    pub(crate) async fn document_delete(
        &self,
        collection: &Collection,
        id: &str,
    ) -> StrataResult<bool> {
        let mut params: Vec<Value> = vec![Value::String(id.to_string())];
        let mut conditions = vec![format!("{} = ?", Self::quote_ident(COL_UID))];
        if let Some(clause) = self.tenant_clause(&mut params) {
            conditions.push(clause);
        }
        let sql = format!(
            "DELETE FROM {} WHERE {}",
            self.table_ref(&collection.id),
            conditions.join(" AND ")
        );
        Ok(self.client().execute(&sql, &params).await? > 0)
    }

    pub(crate) async fn documents_delete(
        &self,
        collection: &Collection,
        ids: &[String],
    ) -> StrataResult<u64> {
        if ids.is_empty() {
            return Ok(0);
        }
        let mut params: Vec<Value> = vec![Value::Array(
            ids.iter().map(|id| Value::String(id.clone())).collect(),
        )];
        let mut conditions = vec![format!("{} = ANY(?)", Self::quote_ident(COL_UID))];
        if let Some(clause) = self.tenant_clause(&mut params) {
            conditions.push(clause);
        }
        let sql = format!(
            "DELETE FROM {} WHERE {}",
            self.table_ref(&collection.id),
            conditions.join(" AND ")
        );
        self.client().execute(&sql, &params).await
    }
}

/// Boundary condition for cursor pagination over direction-adjusted
/// orders: strictly beyond the cursor in traversal order.
fn cursor_condition(
    orders: &[(String, Order)],
    cursor: &Doc,
    params: &mut Vec<Value>,
) -> Option<String> {
    if orders.is_empty() {
        return None;
    }
    let mut terms: Vec<String> = Vec::with_capacity(orders.len());
    for (position, (attribute, order)) in orders.iter().enumerate() {
        let mut clauses: Vec<String> = Vec::with_capacity(position + 1);
        for (tie_attr, _) in orders.iter().take(position) {
            clauses.push(format!("{} = ?", column_ident(tie_attr)));
            params.push(cursor.get(tie_attr).cloned().unwrap_or(Value::Null));
        }
        let operator = match order {
            Order::Asc => ">",
            Order::Desc => "<",
        };
        clauses.push(format!("{} {} ?", column_ident(attribute), operator));
        params.push(cursor.get(attribute).cloned().unwrap_or(Value::Null));
        terms.push(format!("({})", clauses.join(" AND ")));
    }
    Some(format!("({})", terms.join(" OR ")))
}
