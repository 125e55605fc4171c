//! Schema DDL
//!
//! Schema containers, collection tables, column and index DDL. Table
//! creation lays down the internal columns and constraints; user columns
//! come from the declared attributes that own physical storage.

use super::{
    PostgresAdapter, COL_CREATED_AT, COL_PERMISSIONS, COL_SEQUENCE, COL_TENANT, COL_UID,
    COL_UPDATED_AT,
};
use strata_core::{
    Attribute, Collection, Doc, Index, IndexType, Order, StrataError, StrataResult, Value,
};
use strata_storage::Adapter;

impl PostgresAdapter {
    // ========================================================================
    // SCHEMA CONTAINER
    // ========================================================================

    pub(crate) async fn schema_create(&self, name: &str) -> StrataResult<()> {
        let sql = format!(
            "CREATE SCHEMA IF NOT EXISTS {}",
            Self::quote_ident(name)
        );
        self.client().execute(&sql, &[]).await.map(|_| ())
    }

    pub(crate) async fn schema_exists_impl(&self, name: &str) -> StrataResult<bool> {
        let rows = self
            .client()
            .query(
                "SELECT 1 FROM information_schema.schemata WHERE schema_name = ?",
                &[Value::String(name.to_string())],
            )
            .await?;
        Ok(!rows.is_empty())
    }

    pub(crate) async fn schema_delete(&self, name: &str) -> StrataResult<()> {
        let sql = format!("DROP SCHEMA {} CASCADE", Self::quote_ident(name));
        self.client().execute(&sql, &[]).await.map(|_| ())
    }

    // ========================================================================
    // COLLECTIONS
    // ========================================================================

    pub(crate) async fn collection_create(
        &self,
        id: &str,
        attributes: &[Attribute],
        indexes: &[Index],
    ) -> StrataResult<()> {
        let scope = self.scope();
        let mut columns: Vec<String> = vec![
            format!("{} BIGSERIAL NOT NULL", Self::quote_ident(COL_SEQUENCE)),
            format!("{} VARCHAR(255) NOT NULL", Self::quote_ident(COL_UID)),
            format!("{} TIMESTAMPTZ(3) DEFAULT NULL", Self::quote_ident(COL_CREATED_AT)),
            format!("{} TIMESTAMPTZ(3) DEFAULT NULL", Self::quote_ident(COL_UPDATED_AT)),
            format!("{} TEXT[] NOT NULL DEFAULT '{{}}'", Self::quote_ident(COL_PERMISSIONS)),
        ];
        if scope.shared_tables {
            columns.push(format!(
                "{} BIGINT DEFAULT NULL",
                Self::quote_ident(COL_TENANT)
            ));
        }
        for attribute in attributes.iter().filter(|attr| attr.has_column()) {
            columns.push(format!(
                "{} {}",
                Self::quote_ident(&attribute.key),
                self.column_type(attribute)?
            ));
        }
        columns.push(format!("PRIMARY KEY ({})", Self::quote_ident(COL_SEQUENCE)));
        if scope.shared_tables {
            columns.push(format!(
                "UNIQUE ({}, {})",
                Self::quote_ident(COL_UID),
                Self::quote_ident(COL_TENANT)
            ));
        } else {
            columns.push(format!("UNIQUE ({})", Self::quote_ident(COL_UID)));
        }

        let sql = format!(
            "CREATE TABLE {} (\n  {}\n)",
            self.table_ref(id),
            columns.join(",\n  ")
        );
        self.client().execute(&sql, &[]).await?;

        let mut collection = Collection::new(id);
        collection.attributes = attributes.to_vec();
        for index in indexes {
            self.index_create(&collection, index).await?;
        }
        Ok(())
    }

    pub(crate) async fn collection_delete(&self, id: &str) -> StrataResult<()> {
        let sql = format!("DROP TABLE IF EXISTS {} CASCADE", self.table_ref(id));
        self.client().execute(&sql, &[]).await.map(|_| ())
    }

    pub(crate) async fn collection_exists_impl(&self, id: &str) -> StrataResult<bool> {
        let scope = self.scope();
        let rows = self
            .client()
            .query(
                "SELECT 1 FROM information_schema.tables \
                 WHERE table_schema = ? AND table_name = ?",
                &[
                    Value::String(scope.schema),
                    Value::String(self.physical_name(id)),
                ],
            )
            .await?;
        Ok(!rows.is_empty())
    }

    pub(crate) async fn collection_analyze(&self, id: &str) -> StrataResult<bool> {
        let sql = format!("ANALYZE {}", self.table_ref(id));
        self.client().execute(&sql, &[]).await?;
        Ok(true)
    }

    pub(crate) async fn collection_size(&self, id: &str) -> StrataResult<i64> {
        let rows = self
            .client()
            .query(
                "SELECT pg_total_relation_size(?::regclass)",
                &[Value::String(self.table_ref(id))],
            )
            .await?;
        let row = rows
            .first()
            .ok_or_else(|| StrataError::internal("pg_total_relation_size returned no rows"))?;
        crate::row::column_value(row, 0)?
            .as_integer()
            .ok_or_else(|| StrataError::internal("pg_total_relation_size returned non-integer"))
    }

    // ========================================================================
    // ATTRIBUTES
    // ========================================================================

    pub(crate) async fn attribute_create(
        &self,
        collection: &str,
        attribute: &Attribute,
    ) -> StrataResult<()> {
        if !attribute.has_column() {
            return Ok(());
        }
        let sql = format!(
            "ALTER TABLE {} ADD COLUMN {} {}",
            self.table_ref(collection),
            Self::quote_ident(&attribute.key),
            self.column_type(attribute)?
        );
        self.client().execute(&sql, &[]).await.map(|_| ())
    }

    pub(crate) async fn attributes_create(
        &self,
        collection: &str,
        attributes: &[Attribute],
    ) -> StrataResult<()> {
        let clauses = attributes
            .iter()
            .filter(|attr| attr.has_column())
            .map(|attr| {
                Ok(format!(
                    "ADD COLUMN {} {}",
                    Self::quote_ident(&attr.key),
                    self.column_type(attr)?
                ))
            })
            .collect::<StrataResult<Vec<_>>>()?;
        if clauses.is_empty() {
            return Ok(());
        }
        let sql = format!(
            "ALTER TABLE {} {}",
            self.table_ref(collection),
            clauses.join(", ")
        );
        self.client().execute(&sql, &[]).await.map(|_| ())
    }

    pub(crate) async fn attribute_update(
        &self,
        collection: &str,
        attribute: &Attribute,
    ) -> StrataResult<()> {
        let column_type = self.column_type(attribute)?;
        let sql = format!(
            "ALTER TABLE {} ALTER COLUMN {} TYPE {} USING {}::{}",
            self.table_ref(collection),
            Self::quote_ident(&attribute.key),
            column_type,
            Self::quote_ident(&attribute.key),
            column_type
        );
        self.client().execute(&sql, &[]).await.map(|_| ())
    }

    pub(crate) async fn attribute_rename(
        &self,
        collection: &str,
        old: &str,
        new: &str,
    ) -> StrataResult<()> {
        let sql = format!(
            "ALTER TABLE {} RENAME COLUMN {} TO {}",
            self.table_ref(collection),
            Self::quote_ident(old),
            Self::quote_ident(new)
        );
        self.client().execute(&sql, &[]).await.map(|_| ())
    }

    pub(crate) async fn attribute_delete(&self, collection: &str, key: &str) -> StrataResult<()> {
        let sql = format!(
            "ALTER TABLE {} DROP COLUMN {}",
            self.table_ref(collection),
            Self::quote_ident(key)
        );
        self.client().execute(&sql, &[]).await.map(|_| ())
    }

    pub(crate) async fn schema_attributes(&self, collection: &str) -> StrataResult<Vec<Doc>> {
        let scope = self.scope();
        let rows = self
            .client()
            .query(
                "SELECT column_name, data_type, COALESCE(character_maximum_length, 0) \
                 FROM information_schema.columns \
                 WHERE table_schema = ? AND table_name = ? \
                 ORDER BY ordinal_position",
                &[
                    Value::String(scope.schema),
                    Value::String(self.physical_name(collection)),
                ],
            )
            .await?;
        rows.iter()
            .map(|row| {
                Doc::from_json(serde_json::json!({
                    "columnName": crate::row::column_value(row, 0)?.to_json(),
                    "dataType": crate::row::column_value(row, 1)?.to_json(),
                    "size": crate::row::column_value(row, 2)?.to_json(),
                }))
            })
            .collect()
    }

    // ========================================================================
    // INDEXES
    // ========================================================================

    fn index_physical_name(&self, collection: &str, key: &str) -> String {
        format!("{}_{}", self.physical_name(collection), key)
    }

    pub(crate) async fn index_create(
        &self,
        collection: &Collection,
        index: &Index,
    ) -> StrataResult<()> {
        let scope = self.scope();
        let name = Self::quote_ident(&self.index_physical_name(&collection.id, &index.key));
        let table = self.table_ref(&collection.id);

        let sql = match index.type_ {
            IndexType::Fulltext => {
                let expression = if index.attributes.len() == 1 {
                    format!(
                        "to_tsvector('simple', {})",
                        Self::quote_ident(&index.attributes[0])
                    )
                } else {
                    let parts: Vec<String> = index
                        .attributes
                        .iter()
                        .map(|attr| Self::quote_ident(attr))
                        .collect();
                    format!(
                        "to_tsvector('simple', concat_ws(' ', {}))",
                        parts.join(", ")
                    )
                };
                format!("CREATE INDEX {} ON {} USING GIN ({})", name, table, expression)
            }
            IndexType::Spatial => {
                let columns: Vec<String> = index
                    .attributes
                    .iter()
                    .map(|attr| Self::quote_ident(attr))
                    .collect();
                format!(
                    "CREATE INDEX {} ON {} USING GIST ({})",
                    name,
                    table,
                    columns.join(", ")
                )
            }
            IndexType::Key | IndexType::Unique => {
                let mut columns: Vec<String> = Vec::new();
                // Scope unique indexes per tenant under shared tables.
                if scope.shared_tables && index.type_ == IndexType::Unique {
                    columns.push(Self::quote_ident(COL_TENANT));
                }
                for (position, attribute) in index.attributes.iter().enumerate() {
                    let order = index
                        .orders
                        .get(position)
                        .copied()
                        .flatten()
                        .unwrap_or(Order::Asc);
                    columns.push(format!(
                        "{} {}",
                        Self::quote_ident(PostgresAdapter::column_name(attribute)),
                        order.as_sql()
                    ));
                }
                let unique = if index.type_ == IndexType::Unique {
                    "UNIQUE "
                } else {
                    ""
                };
                format!(
                    "CREATE {}INDEX {} ON {} ({})",
                    unique,
                    name,
                    table,
                    columns.join(", ")
                )
            }
        };
        self.client().execute(&sql, &[]).await.map(|_| ())
    }

    pub(crate) async fn index_rename(
        &self,
        collection: &str,
        old: &str,
        new: &str,
    ) -> StrataResult<()> {
        let scope = self.scope();
        let sql = format!(
            "ALTER INDEX {}.{} RENAME TO {}",
            Self::quote_ident(&scope.schema),
            Self::quote_ident(&self.index_physical_name(collection, old)),
            Self::quote_ident(&self.index_physical_name(collection, new))
        );
        self.client().execute(&sql, &[]).await.map(|_| ())
    }

    pub(crate) async fn index_delete(&self, collection: &str, key: &str) -> StrataResult<()> {
        let scope = self.scope();
        let sql = format!(
            "DROP INDEX IF EXISTS {}.{}",
            Self::quote_ident(&scope.schema),
            Self::quote_ident(&self.index_physical_name(collection, key))
        );
        self.client().execute(&sql, &[]).await.map(|_| ())
    }
}
