//! Sync triggers that keep two columns or two tables consistent while both
//! are live.
//!
//! Every trigger is a `BEFORE ... FOR EACH ROW` trigger bound to a PL/pgSQL
//! function. Names are derived from a short label (`t1`, `t2`, `t3`) and the
//! table name, so contract and rollback can drop them without stored state:
//!
//! - trigger `zd_{label}_{table}`
//! - function `zd_{label}_{table}_sync`
//!
//! Column triggers only fire when their source column changed
//! (`IS DISTINCT FROM`), so a forward and a backward trigger on the same pair
//! never chase each other. Table triggers are guarded by
//! `pg_trigger_depth() < 1`: a write made by the opposite trigger is not
//! echoed back.

use serde::{Deserialize, Serialize};

use crate::core::identifier::{generated_name, quote_pg, TableRef};
use crate::core::operation::Operation;
use crate::core::schema::TableDescriptor;
use crate::error::{Result, ZdError};

/// What a sync trigger copies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "scope", rename_all = "snake_case")]
pub enum SyncKind {
    Column {
        from: String,
        to: String,
        on_insert: bool,
        on_update: bool,
    },
    Table {
        destination: TableRef,
        columns: Vec<String>,
        key: Vec<String>,
    },
}

/// A trigger plus its function, ready to render.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncTrigger {
    pub label: String,
    pub table: TableRef,
    pub kind: SyncKind,
}

pub fn trigger_name(label: &str, table: &TableRef) -> String {
    generated_name(&["zd", label, &table.name])
}

pub fn function_name(label: &str, table: &TableRef) -> String {
    generated_name(&["zd", label, &table.name, "sync"])
}

/// Column-level sync from `from` into `to` on `table`.
///
/// On UPDATE the trigger copies `from` into `to` whenever `from` changed.
/// On INSERT it copies whichever column the writer supplied into the other
/// one, preferring `to` when both are set.
pub fn build_column_sync(
    label: &str,
    table: &TableRef,
    from: &str,
    to: &str,
    on_insert: bool,
    on_update: bool,
) -> Result<Operation> {
    if !on_insert && !on_update {
        return Err(ZdError::Config(format!(
            "Sync trigger {} on {} must fire on INSERT or UPDATE",
            label, table
        )));
    }
    if from == to {
        return Err(ZdError::Config(format!(
            "Sync trigger {} on {} cannot copy column {} onto itself",
            label, table, from
        )));
    }

    Ok(Operation::CreateSyncTrigger(SyncTrigger {
        label: label.to_string(),
        table: table.clone(),
        kind: SyncKind::Column {
            from: from.to_string(),
            to: to.to_string(),
            on_insert,
            on_update,
        },
    }))
}

/// Table-level sync mirroring INSERT, UPDATE and DELETE on `source` into
/// `destination`, matching rows by the primary key of `descriptor`.
pub fn build_table_sync(
    label: &str,
    source: &TableRef,
    destination: &TableRef,
    descriptor: &TableDescriptor,
) -> Result<Operation> {
    if !descriptor.has_pk() {
        return Err(ZdError::NoRowIdentifier(source.to_string()));
    }
    if let Some(missing) = descriptor
        .primary_column_names
        .iter()
        .find(|k| !descriptor.column_names.contains(k))
    {
        return Err(ZdError::Config(format!(
            "Primary key column {} is not a column of {}",
            missing, source
        )));
    }

    Ok(Operation::CreateSyncTrigger(SyncTrigger {
        label: label.to_string(),
        table: source.clone(),
        kind: SyncKind::Table {
            destination: destination.clone(),
            columns: descriptor.column_names.clone(),
            key: descriptor.primary_column_names.clone(),
        },
    }))
}

/// Drop the trigger and function installed under `label` on `table`.
pub fn drop_sync(label: &str, table: &TableRef) -> Operation {
    Operation::DropSyncTrigger {
        label: label.to_string(),
        table: table.clone(),
    }
}

impl SyncTrigger {
    /// Render `CREATE OR REPLACE FUNCTION` followed by `CREATE TRIGGER`.
    ///
    /// An existing trigger of the same name is dropped first so a re-run
    /// of a partially applied expand does not fail.
    pub fn render(&self) -> Result<Vec<String>> {
        let table = self.table.render()?;
        let function = self.table.sibling(function_name(&self.label, &self.table)).render()?;
        let trigger = quote_pg(&trigger_name(&self.label, &self.table))?;

        let (body, events, when) = match &self.kind {
            SyncKind::Column {
                from,
                to,
                on_insert,
                on_update,
            } => column_body(from, to, *on_insert, *on_update)?,
            SyncKind::Table {
                destination,
                columns,
                key,
            } => table_body(destination, columns, key)?,
        };

        let create_function = format!(
            "CREATE OR REPLACE FUNCTION {}() RETURNS TRIGGER\n    LANGUAGE plpgsql\nAS $$\nBEGIN\n{}END;\n$$",
            function, body
        );
        let drop_trigger = format!("DROP TRIGGER IF EXISTS {} ON {}", trigger, table);
        let create_trigger = format!(
            "CREATE TRIGGER {}\n    BEFORE {} ON {}\n    FOR EACH ROW\n    WHEN ({})\n    EXECUTE PROCEDURE {}()",
            trigger, events, table, when, function
        );
        Ok(vec![create_function, drop_trigger, create_trigger])
    }
}

/// Render the statements for [`Operation::DropSyncTrigger`].
pub fn render_drop(label: &str, table: &TableRef) -> Result<Vec<String>> {
    let trigger = quote_pg(&trigger_name(label, table))?;
    let function = table.sibling(function_name(label, table)).render()?;
    Ok(vec![
        format!("DROP TRIGGER IF EXISTS {} ON {}", trigger, table.render()?),
        format!("DROP FUNCTION IF EXISTS {}()", function),
    ])
}

fn column_body(
    from: &str,
    to: &str,
    on_insert: bool,
    on_update: bool,
) -> Result<(String, &'static str, String)> {
    let from = quote_pg(from)?;
    let to = quote_pg(to)?;

    let insert_branch = format!(
        "IF NEW.{to} IS NOT NULL THEN\n        NEW.{from} := NEW.{to};\n    ELSE\n        NEW.{to} := NEW.{from};\n    END IF;",
        from = from,
        to = to
    );

    let result = match (on_insert, on_update) {
        (true, true) => (
            format!(
                "    IF (TG_OP = 'INSERT') THEN\n        {insert}\n    ELSIF NEW.{from} IS DISTINCT FROM OLD.{from} THEN\n        NEW.{to} := NEW.{from};\n    END IF;\n    RETURN NEW;\n",
                insert = insert_branch.replace("\n    ", "\n        "),
                from = from,
                to = to
            ),
            "INSERT OR UPDATE",
            "TRUE".to_string(),
        ),
        (false, true) => (
            format!("    NEW.{} := NEW.{};\n    RETURN NEW;\n", to, from),
            "UPDATE",
            format!("OLD.{0} IS DISTINCT FROM NEW.{0}", from),
        ),
        (true, false) => (
            format!("    {}\n    RETURN NEW;\n", insert_branch),
            "INSERT",
            format!("NEW.{} IS DISTINCT FROM NEW.{}", from, to),
        ),
        (false, false) => {
            return Err(ZdError::Config(
                "Sync trigger must fire on INSERT or UPDATE".to_string(),
            ))
        }
    };
    Ok(result)
}

fn table_body(
    destination: &TableRef,
    columns: &[String],
    key: &[String],
) -> Result<(String, &'static str, String)> {
    let dst = destination.render()?;
    let cols = columns.iter().map(|c| quote_pg(c)).collect::<Result<Vec<_>>>()?;
    let keys = key.iter().map(|c| quote_pg(c)).collect::<Result<Vec<_>>>()?;

    let col_list = cols.join(", ");
    let new_values = cols
        .iter()
        .map(|c| format!("NEW.{}", c))
        .collect::<Vec<_>>()
        .join(", ");
    let key_list = keys.join(", ");
    let match_old = keys
        .iter()
        .map(|k| format!("{0} = OLD.{0}", k))
        .collect::<Vec<_>>()
        .join(" AND ");

    let insert = format!(
        "INSERT INTO {} ({}) VALUES ({}) ON CONFLICT ({}) DO NOTHING;",
        dst, col_list, new_values, key_list
    );

    let body = format!(
        "    IF (TG_OP = 'INSERT') THEN\n        {insert}\n        RETURN NEW;\n    ELSIF (TG_OP = 'UPDATE') THEN\n        UPDATE {dst} SET ({cols}) = ROW({values}) WHERE {matcher};\n        IF NOT FOUND THEN\n            {insert}\n        END IF;\n        RETURN NEW;\n    ELSIF (TG_OP = 'DELETE') THEN\n        DELETE FROM {dst} WHERE {matcher};\n        RETURN OLD;\n    END IF;\n    RETURN NULL;\n",
        insert = insert,
        dst = dst,
        cols = col_list,
        values = new_values,
        matcher = match_old
    );

    Ok((
        body,
        "INSERT OR UPDATE OR DELETE",
        "pg_trigger_depth() < 1".to_string(),
    ))
}
