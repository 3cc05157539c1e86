//! PostgreSQL SQL dialect.
//!
//! Drops are written with `IF EXISTS` so contract and rollback plans can be
//! re-run against a database where they already partially ran.

use super::{alter_table_if_exists, quote, render_baseline, unsupported};
use crate::core::identifier::{quote_list, quote_literal, validate_check_expression};
use crate::core::operation::{ForeignKeySpec, Operation};
use crate::core::traits::Dialect;
use crate::error::Result;
use crate::sync;

#[derive(Debug, Clone, Default)]
pub struct PostgresDialect;

impl PostgresDialect {
    pub fn new() -> Self {
        Self
    }

    fn render_foreign_key(&self, fk: &ForeignKeySpec) -> Result<String> {
        let mut sql = format!(
            "ALTER TABLE {} ADD CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} ({}) ON DELETE {} ON UPDATE {}",
            fk.table.render()?,
            quote(&fk.name)?,
            quote_list(&fk.columns)?,
            fk.referenced_table.render()?,
            quote_list(&fk.referenced_columns)?,
            fk.on_delete.as_sql(),
            fk.on_update.as_sql()
        );
        sql.push_str(deferrable_clause(fk.deferrable, fk.initially_deferred));
        if !fk.validate {
            sql.push_str(" NOT VALID");
        }
        Ok(sql)
    }
}

fn deferrable_clause(deferrable: bool, initially_deferred: bool) -> &'static str {
    match (deferrable, initially_deferred) {
        (true, true) => " DEFERRABLE INITIALLY DEFERRED",
        (true, false) => " DEFERRABLE",
        _ => "",
    }
}

impl Dialect for PostgresDialect {
    fn name(&self) -> &str {
        "postgres"
    }

    fn quote_ident(&self, name: &str) -> Result<String> {
        quote(name)
    }

    fn supports(&self, op: &Operation) -> bool {
        !matches!(op, Operation::Backfill(_))
    }

    fn render(&self, op: &Operation) -> Result<Vec<String>> {
        if let Some(sql) = render_baseline(op)? {
            return Ok(vec![sql]);
        }

        let sql = match op {
            Operation::AddColumn {
                table,
                column,
                data_type,
            } => format!(
                "ALTER TABLE {} ADD COLUMN {} {}",
                table.render()?,
                quote(column)?,
                data_type
            ),
            Operation::DropColumn { table, column } => format!(
                "{} DROP COLUMN IF EXISTS {}",
                alter_table_if_exists(table)?,
                quote(column)?
            ),
            Operation::AddNotNull { table, column } => format!(
                "ALTER TABLE {} ALTER COLUMN {} SET NOT NULL",
                table.render()?,
                quote(column)?
            ),
            Operation::DropNotNull { table, column } => format!(
                "{} ALTER COLUMN {} DROP NOT NULL",
                alter_table_if_exists(table)?,
                quote(column)?
            ),
            Operation::AddDefault {
                table,
                column,
                default_value,
            } => format!(
                "ALTER TABLE {} ALTER COLUMN {} SET DEFAULT {}",
                table.render()?,
                quote(column)?,
                default_value
            ),
            Operation::AddPrimaryKey {
                table,
                name,
                columns,
            } => format!(
                "ALTER TABLE {} ADD CONSTRAINT {} PRIMARY KEY ({})",
                table.render()?,
                quote(name)?,
                quote_list(columns)?
            ),
            Operation::AddUniqueConstraint {
                table,
                name,
                columns,
                deferrable,
                initially_deferred,
            } => format!(
                "ALTER TABLE {} ADD CONSTRAINT {} UNIQUE ({}){}",
                table.render()?,
                quote(name)?,
                quote_list(columns)?,
                deferrable_clause(*deferrable, *initially_deferred)
            ),
            Operation::AddForeignKey(fk) => self.render_foreign_key(fk)?,
            Operation::AddCheckConstraint {
                table,
                name,
                expression,
                validate,
            } => {
                validate_check_expression(expression)?;
                format!(
                    "ALTER TABLE {} ADD CONSTRAINT {} CHECK ({}){}",
                    table.render()?,
                    quote(name)?,
                    expression,
                    if *validate { "" } else { " NOT VALID" }
                )
            }
            Operation::ValidateConstraint { table, name } => format!(
                "ALTER TABLE {} VALIDATE CONSTRAINT {}",
                table.render()?,
                quote(name)?
            ),
            Operation::DropConstraint { table, name } => format!(
                "{} DROP CONSTRAINT IF EXISTS {}",
                alter_table_if_exists(table)?,
                quote(name)?
            ),
            Operation::CreateSyncTrigger(trigger) => return trigger.render(),
            Operation::DropSyncTrigger { label, table } => return sync::render_drop(label, table),
            Operation::CopyTable {
                source,
                destination,
            } => {
                let src = source.render()?;
                let dst = destination.render()?;
                // LIKE ... INCLUDING ALL leaves foreign keys behind; they are
                // recreated from the catalog with the table name swapped in
                // the constraint name.
                format!(
                    "DO $zd$\nDECLARE\n    rec record;\nBEGIN\n    EXECUTE format('CREATE TABLE %s (LIKE %s INCLUDING ALL)', {dst_lit}, {src_lit});\n    FOR rec IN\n        SELECT oid, conname FROM pg_constraint\n        WHERE contype = 'f' AND conrelid = {src_lit}::regclass\n    LOOP\n        EXECUTE format('ALTER TABLE %s ADD CONSTRAINT %I %s', {dst_lit},\n            replace(rec.conname, {src_name}, {dst_name}), pg_get_constraintdef(rec.oid));\n    END LOOP;\nEND\n$zd$",
                    dst_lit = quote_literal(&dst),
                    src_lit = quote_literal(&src),
                    src_name = quote_literal(&source.name),
                    dst_name = quote_literal(&destination.name)
                )
            }
            Operation::DropTable { table, cascade } => format!(
                "DROP TABLE IF EXISTS {}{}",
                table.render()?,
                if *cascade { " CASCADE" } else { "" }
            ),
            Operation::CreateView { view, definition } => format!(
                "CREATE OR REPLACE VIEW {} AS {}",
                view.render()?,
                definition.trim().trim_end_matches(';').trim_end()
            ),
            Operation::DropView { view } => format!("DROP VIEW IF EXISTS {}", view.render()?),
            Operation::LoadData(job) => job.copy_sql()?,
            Operation::Backfill(_)
            | Operation::RenameColumn { .. }
            | Operation::ModifyDataType { .. }
            | Operation::RenameTable { .. }
            | Operation::RenameView { .. } => return Err(unsupported(self.name(), op)),
        };
        Ok(vec![sql])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backfill::BackfillJob;
    use crate::core::identifier::TableRef;
    use crate::core::schema::ForeignKeyAction;

    fn customer() -> TableRef {
        TableRef::new("customer")
    }

    fn render_one(op: Operation) -> String {
        let mut sql = PostgresDialect::new().render(&op).unwrap();
        assert_eq!(sql.len(), 1);
        sql.remove(0)
    }

    #[test]
    fn test_quote_ident() {
        let dialect = PostgresDialect::new();
        assert_eq!(dialect.quote_ident("users").unwrap(), "\"users\"");
        assert_eq!(dialect.quote_ident("a\"b").unwrap(), "\"a\"\"b\"");
    }

    #[test]
    fn test_add_column_is_nullable() {
        assert_eq!(
            render_one(Operation::AddColumn {
                table: customer(),
                column: "phoneNumber".into(),
                data_type: "character varying(20)".into(),
            }),
            "ALTER TABLE \"customer\" ADD COLUMN \"phoneNumber\" character varying(20)"
        );
    }

    #[test]
    fn test_catalog_default_rendered_verbatim() {
        // Defaults come from pg_get_expr and are rendered as returned.
        for default_value in [
            "'call to update'::character varying",
            "'a;b'::text",
            "'--'::text",
        ] {
            assert_eq!(
                render_one(Operation::AddDefault {
                    table: customer(),
                    column: "phoneNumber".into(),
                    default_value: default_value.into(),
                }),
                format!(
                    "ALTER TABLE \"customer\" ALTER COLUMN \"phoneNumber\" SET DEFAULT {}",
                    default_value
                )
            );
        }
    }

    #[test]
    fn test_foreign_key_not_valid() {
        let sql = render_one(Operation::AddForeignKey(ForeignKeySpec {
            table: customer(),
            name: "customer_regionId_fkey".into(),
            columns: vec!["regionId".into()],
            referenced_table: TableRef::new("region"),
            referenced_columns: vec!["id".into()],
            deferrable: true,
            initially_deferred: true,
            on_delete: ForeignKeyAction::Cascade,
            on_update: ForeignKeyAction::NoAction,
            validate: false,
        }));
        assert_eq!(
            sql,
            "ALTER TABLE \"customer\" ADD CONSTRAINT \"customer_regionId_fkey\" FOREIGN KEY (\"regionId\") \
             REFERENCES \"region\" (\"id\") ON DELETE CASCADE ON UPDATE NO ACTION \
             DEFERRABLE INITIALLY DEFERRED NOT VALID"
        );
    }

    #[test]
    fn test_check_constraint_not_valid_and_validate() {
        let sql = render_one(Operation::AddCheckConstraint {
            table: customer(),
            name: "customer_age_check".into(),
            expression: "age >= 0".into(),
            validate: false,
        });
        assert_eq!(
            sql,
            "ALTER TABLE \"customer\" ADD CONSTRAINT \"customer_age_check\" CHECK (age >= 0) NOT VALID"
        );

        let sql = render_one(Operation::ValidateConstraint {
            table: customer(),
            name: "customer_age_check".into(),
        });
        assert_eq!(
            sql,
            "ALTER TABLE \"customer\" VALIDATE CONSTRAINT \"customer_age_check\""
        );
    }

    #[test]
    fn test_drops_tolerate_missing_objects() {
        assert_eq!(
            render_one(Operation::DropConstraint {
                table: customer(),
                name: "customer_phone_key".into(),
            }),
            "ALTER TABLE IF EXISTS \"customer\" DROP CONSTRAINT IF EXISTS \"customer_phone_key\""
        );
        assert_eq!(
            render_one(Operation::DropColumn {
                table: customer(),
                column: "phone".into(),
            }),
            "ALTER TABLE IF EXISTS \"customer\" DROP COLUMN IF EXISTS \"phone\""
        );
        assert_eq!(
            render_one(Operation::DropTable {
                table: customer(),
                cascade: true,
            }),
            "DROP TABLE IF EXISTS \"customer\" CASCADE"
        );
        assert_eq!(
            render_one(Operation::DropView { view: customer() }),
            "DROP VIEW IF EXISTS \"customer\""
        );
    }

    #[test]
    fn test_not_null_and_default() {
        assert_eq!(
            render_one(Operation::AddNotNull {
                table: customer(),
                column: "phoneNumber".into(),
            }),
            "ALTER TABLE \"customer\" ALTER COLUMN \"phoneNumber\" SET NOT NULL"
        );
        assert_eq!(
            render_one(Operation::AddDefault {
                table: customer(),
                column: "phoneNumber".into(),
                default_value: "'n/a'::character varying".into(),
            }),
            "ALTER TABLE \"customer\" ALTER COLUMN \"phoneNumber\" SET DEFAULT 'n/a'::character varying"
        );
    }

    #[test]
    fn test_copy_table_recreates_foreign_keys() {
        let sql = render_one(Operation::CopyTable {
            source: TableRef::with_schema("app", "customer"),
            destination: TableRef::with_schema("app", "client"),
        });
        assert!(sql.starts_with("DO $zd$"));
        assert!(sql.contains(
            "format('CREATE TABLE %s (LIKE %s INCLUDING ALL)', '\"app\".\"client\"', '\"app\".\"customer\"')"
        ));
        assert!(sql.contains("contype = 'f' AND conrelid = '\"app\".\"customer\"'::regclass"));
        assert!(sql.contains("replace(rec.conname, 'customer', 'client')"));
    }

    #[test]
    fn test_create_view_strips_trailing_semicolon() {
        assert_eq!(
            render_one(Operation::CreateView {
                view: TableRef::new("v_client"),
                definition: " SELECT customer.id\n   FROM customer;".into(),
            }),
            "CREATE OR REPLACE VIEW \"v_client\" AS SELECT customer.id\n   FROM customer"
        );
    }

    #[test]
    fn test_backfill_is_not_rendered() {
        let job = BackfillJob::table(TableRef::new("a"), TableRef::new("b"), 10, 0).unwrap();
        let op = Operation::Backfill(job);
        let dialect = PostgresDialect::new();
        assert!(!dialect.supports(&op));
        assert!(dialect.render(&op).is_err());
    }

    #[test]
    fn test_load_data_renders_copy_from_stdin() {
        let job = crate::load::LoadDataJob {
            table: TableRef::with_schema("crm", "customer"),
            file: "customers.csv".into(),
            columns: vec!["id".into(), "phone".into()],
            delimiter: b';',
            quote: Some(b'\''),
            encoding: "latin1".into(),
        };
        let op = Operation::LoadData(job);
        let dialect = PostgresDialect::new();
        assert!(dialect.supports(&op));
        assert_eq!(
            dialect.render(&op).unwrap(),
            vec!["COPY \"crm\".\"customer\" (\"id\", \"phone\") FROM STDIN \
                  (FORMAT csv, HEADER true, DELIMITER ';', QUOTE '''', NULL '\\N', ENCODING 'latin1')"
                .to_string()]
        );
    }
}
