//! Schema introspection from `pg_catalog`.
//!
//! Unqualified names resolve against `current_schema()`.

use async_trait::async_trait;
use tokio_postgres::Row;

use super::session::PgSession;
use crate::core::identifier::TableRef;
use crate::core::schema::{
    ColumnDescriptor, ConstraintDescriptor, ForeignKeyAction, TableDescriptor, ViewDescriptor,
};
use crate::core::traits::{Connection, Introspector};
use crate::error::{Result, ZdError};

const COLUMN_QUERY: &str = r#"
SELECT format_type(a.atttypid, a.atttypmod) AS data_type,
       NOT a.attnotnull AS nullable,
       pg_get_expr(d.adbin, d.adrelid) AS default_value
FROM pg_attribute a
JOIN pg_class c ON c.oid = a.attrelid
JOIN pg_namespace n ON n.oid = c.relnamespace
LEFT JOIN pg_attrdef d ON d.adrelid = a.attrelid AND d.adnum = a.attnum
WHERE n.nspname = COALESCE($1::text, current_schema())
  AND c.relname = $2
  AND a.attname = $3
  AND a.attnum > 0
  AND NOT a.attisdropped
"#;

const COLUMN_CONSTRAINTS_QUERY: &str = r#"
SELECT con.conname::text AS name,
       con.contype::text AS kind,
       ARRAY(SELECT att.attname::text
             FROM unnest(con.conkey) WITH ORDINALITY AS k(attnum, ord)
             JOIN pg_attribute att ON att.attrelid = con.conrelid AND att.attnum = k.attnum
             ORDER BY k.ord) AS columns,
       fn.nspname::text AS referenced_schema,
       fc.relname::text AS referenced_table,
       ARRAY(SELECT att.attname::text
             FROM unnest(con.confkey) WITH ORDINALITY AS k(attnum, ord)
             JOIN pg_attribute att ON att.attrelid = con.confrelid AND att.attnum = k.attnum
             ORDER BY k.ord) AS referenced_columns,
       con.condeferrable AS deferrable,
       con.condeferred AS initially_deferred,
       con.confdeltype::text AS on_delete,
       con.confupdtype::text AS on_update
FROM pg_constraint con
JOIN pg_class c ON c.oid = con.conrelid
JOIN pg_namespace n ON n.oid = c.relnamespace
LEFT JOIN pg_class fc ON fc.oid = con.confrelid
LEFT JOIN pg_namespace fn ON fn.oid = fc.relnamespace
WHERE n.nspname = COALESCE($1::text, current_schema())
  AND c.relname = $2
  AND con.contype IN ('p', 'f', 'u')
  AND EXISTS (
      SELECT 1 FROM pg_attribute a
      WHERE a.attrelid = con.conrelid
        AND a.attnum = ANY (con.conkey)
        AND a.attname = $3)
ORDER BY con.conname
"#;

const TABLE_COLUMNS_QUERY: &str = r#"
SELECT a.attname::text
FROM pg_attribute a
JOIN pg_class c ON c.oid = a.attrelid
JOIN pg_namespace n ON n.oid = c.relnamespace
WHERE n.nspname = COALESCE($1::text, current_schema())
  AND c.relname = $2
  AND c.relkind IN ('r', 'p')
  AND a.attnum > 0
  AND NOT a.attisdropped
ORDER BY a.attnum
"#;

const INDEX_COLUMNS: &str = r#"
ARRAY(SELECT a.attname::text
      FROM unnest(i.indkey::int2[]) WITH ORDINALITY AS k(attnum, ord)
      JOIN pg_attribute a ON a.attrelid = i.indrelid AND a.attnum = k.attnum
      ORDER BY k.ord)
"#;

const VIEW_QUERY: &str = r#"
SELECT pg_get_viewdef(c.oid, true)
FROM pg_class c
JOIN pg_namespace n ON n.oid = c.relnamespace
WHERE n.nspname = COALESCE($1::text, current_schema())
  AND c.relname = $2
  AND c.relkind IN ('v', 'm')
"#;

fn primary_key_query() -> String {
    format!(
        "SELECT {} FROM pg_index i \
         JOIN pg_class c ON c.oid = i.indrelid \
         JOIN pg_namespace n ON n.oid = c.relnamespace \
         WHERE n.nspname = COALESCE($1::text, current_schema()) \
           AND c.relname = $2 AND i.indisprimary",
        INDEX_COLUMNS.trim()
    )
}

/// Primary key first, then the narrowest unique index over NOT NULL columns.
/// Partial and expression indexes cannot identify rows and are skipped.
fn best_row_identifier_query() -> String {
    format!(
        "SELECT {} FROM pg_index i \
         JOIN pg_class c ON c.oid = i.indrelid \
         JOIN pg_namespace n ON n.oid = c.relnamespace \
         WHERE n.nspname = COALESCE($1::text, current_schema()) \
           AND c.relname = $2 \
           AND i.indisunique AND i.indisvalid \
           AND i.indpred IS NULL AND i.indexprs IS NULL \
           AND NOT EXISTS (SELECT 1 FROM pg_attribute a \
                           WHERE a.attrelid = i.indrelid \
                             AND a.attnum = ANY (i.indkey::int2[]) \
                             AND NOT a.attnotnull) \
         ORDER BY i.indisprimary DESC, i.indnatts, i.indexrelid \
         LIMIT 1",
        INDEX_COLUMNS.trim()
    )
}

fn constraint_from_row(row: &Row) -> Option<ConstraintDescriptor> {
    let name: String = row.get("name");
    let kind: String = row.get("kind");
    let columns: Vec<String> = row.get("columns");
    let deferrable: bool = row.get("deferrable");
    let initially_deferred: bool = row.get("initially_deferred");

    match kind.as_str() {
        "p" => Some(ConstraintDescriptor::PrimaryKey { name, columns }),
        "u" => Some(ConstraintDescriptor::Unique {
            name,
            columns,
            deferrable,
            initially_deferred,
        }),
        "f" => {
            let schema: Option<String> = row.get("referenced_schema");
            let table: Option<String> = row.get("referenced_table");
            let referenced_table = match (schema, table) {
                (Some(schema), Some(table)) => TableRef::with_schema(schema, table),
                (None, Some(table)) => TableRef::new(table),
                _ => return None,
            };
            let on_delete: String = row.get("on_delete");
            let on_update: String = row.get("on_update");
            Some(ConstraintDescriptor::ForeignKey {
                name,
                columns,
                referenced_table,
                referenced_columns: row.get("referenced_columns"),
                deferrable,
                initially_deferred,
                on_delete: ForeignKeyAction::from_catalog_code(&on_delete),
                on_update: ForeignKeyAction::from_catalog_code(&on_update),
            })
        }
        _ => None,
    }
}

impl PgSession {
    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            Err(ZdError::NotConnected)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Introspector for PgSession {
    async fn describe_column(&self, table: &TableRef, column: &str) -> Result<ColumnDescriptor> {
        self.ensure_open()?;
        let schema = table.schema.as_deref();
        let row = self
            .client()
            .query_opt(COLUMN_QUERY, &[&schema, &table.name, &column])
            .await?
            .ok_or_else(|| ZdError::not_found("Column", format!("{}.{}", table, column)))?;

        let constraints = self
            .client()
            .query(COLUMN_CONSTRAINTS_QUERY, &[&schema, &table.name, &column])
            .await?
            .iter()
            .filter_map(constraint_from_row)
            .collect();

        Ok(ColumnDescriptor {
            data_type: row.get("data_type"),
            nullable: row.get("nullable"),
            default_value: row.get("default_value"),
            constraints,
        })
    }

    async fn describe_table(&self, table: &TableRef) -> Result<TableDescriptor> {
        self.ensure_open()?;
        let schema = table.schema.as_deref();
        let column_names: Vec<String> = self
            .client()
            .query(TABLE_COLUMNS_QUERY, &[&schema, &table.name])
            .await?
            .iter()
            .map(|r| r.get(0))
            .collect();
        if column_names.is_empty() {
            return Err(ZdError::not_found("Table", table.to_string()));
        }

        let primary_column_names = self
            .client()
            .query_opt(primary_key_query().as_str(), &[&schema, &table.name])
            .await?
            .map(|r| r.get::<_, Vec<String>>(0))
            .unwrap_or_default();

        Ok(TableDescriptor {
            column_names,
            primary_column_names,
        })
    }

    async fn describe_view(&self, view: &TableRef) -> Result<ViewDescriptor> {
        self.ensure_open()?;
        let row = self
            .client()
            .query_opt(VIEW_QUERY, &[&view.schema.as_deref(), &view.name])
            .await?
            .ok_or_else(|| ZdError::not_found("View", view.to_string()))?;
        Ok(ViewDescriptor {
            definition: row.get(0),
        })
    }

    async fn best_row_identifier(&self, table: &TableRef) -> Result<Vec<String>> {
        self.ensure_open()?;
        Ok(self
            .client()
            .query_opt(
                best_row_identifier_query().as_str(),
                &[&table.schema.as_deref(), &table.name],
            )
            .await?
            .map(|r| r.get::<_, Vec<String>>(0))
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queries_bind_schema_and_name() {
        for sql in [
            COLUMN_QUERY.to_string(),
            COLUMN_CONSTRAINTS_QUERY.to_string(),
            TABLE_COLUMNS_QUERY.to_string(),
            VIEW_QUERY.to_string(),
            primary_key_query(),
            best_row_identifier_query(),
        ] {
            assert!(sql.contains("COALESCE($1::text, current_schema())"), "{}", sql);
            assert!(sql.contains("c.relname = $2"), "{}", sql);
        }
    }

    #[test]
    fn test_best_row_identifier_prefers_primary_key() {
        let sql = best_row_identifier_query();
        assert!(sql.contains("ORDER BY i.indisprimary DESC"));
        assert!(sql.contains("i.indpred IS NULL"));
        assert!(sql.contains("NOT a.attnotnull"));
    }
}
