//! Schema metadata captured by introspection.
//!
//! Descriptors are snapshots: they are produced once from the live catalog,
//! never mutated, and consumed by a single change generator.

use serde::{Deserialize, Serialize};

use super::identifier::{generated_name, TableRef};
use super::operation::{ForeignKeySpec, Operation};
use crate::error::{Result, ZdError};

/// Shape of one column as seen by a change generator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDescriptor {
    /// Formatted type, e.g. `character varying(20)`.
    pub data_type: String,

    pub nullable: bool,

    /// Default expression as stored by the server.
    pub default_value: Option<String>,

    /// Constraints that include this column, in catalog order.
    pub constraints: Vec<ConstraintDescriptor>,
}

impl ColumnDescriptor {
    /// Whether the column takes part in the table's primary key.
    pub fn is_primary_key(&self) -> bool {
        self.constraints
            .iter()
            .any(|c| matches!(c, ConstraintDescriptor::PrimaryKey { .. }))
    }
}

/// Column lists of a table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDescriptor {
    /// All columns in ordinal order.
    pub column_names: Vec<String>,

    /// Primary key columns in key order.
    pub primary_column_names: Vec<String>,
}

impl TableDescriptor {
    pub fn has_pk(&self) -> bool {
        !self.primary_column_names.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewDescriptor {
    /// The `SELECT` text returned by `pg_get_viewdef`.
    pub definition: String,
}

/// Referential action of a foreign key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ForeignKeyAction {
    #[default]
    NoAction,
    Restrict,
    Cascade,
    SetNull,
    SetDefault,
}

impl ForeignKeyAction {
    /// Decode the single-character code stored in `pg_constraint.confdeltype`
    /// and `confupdtype`. Unknown codes map to `NO ACTION`.
    pub fn from_catalog_code(code: &str) -> Self {
        match code {
            "r" => ForeignKeyAction::Restrict,
            "c" => ForeignKeyAction::Cascade,
            "n" => ForeignKeyAction::SetNull,
            "d" => ForeignKeyAction::SetDefault,
            _ => ForeignKeyAction::NoAction,
        }
    }

    pub fn as_sql(&self) -> &'static str {
        match self {
            ForeignKeyAction::NoAction => "NO ACTION",
            ForeignKeyAction::Restrict => "RESTRICT",
            ForeignKeyAction::Cascade => "CASCADE",
            ForeignKeyAction::SetNull => "SET NULL",
            ForeignKeyAction::SetDefault => "SET DEFAULT",
        }
    }
}

/// A primary key, foreign key or unique constraint owning a column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConstraintDescriptor {
    PrimaryKey {
        name: String,
        columns: Vec<String>,
    },
    ForeignKey {
        name: String,
        columns: Vec<String>,
        referenced_table: TableRef,
        referenced_columns: Vec<String>,
        deferrable: bool,
        initially_deferred: bool,
        on_delete: ForeignKeyAction,
        on_update: ForeignKeyAction,
    },
    Unique {
        name: String,
        columns: Vec<String>,
        deferrable: bool,
        initially_deferred: bool,
    },
}

impl ConstraintDescriptor {
    /// Name captured from the catalog.
    pub fn name(&self) -> &str {
        match self {
            ConstraintDescriptor::PrimaryKey { name, .. }
            | ConstraintDescriptor::ForeignKey { name, .. }
            | ConstraintDescriptor::Unique { name, .. } => name,
        }
    }

    pub fn columns(&self) -> &[String] {
        match self {
            ConstraintDescriptor::PrimaryKey { columns, .. }
            | ConstraintDescriptor::ForeignKey { columns, .. }
            | ConstraintDescriptor::Unique { columns, .. } => columns,
        }
    }

    pub fn is_foreign_key(&self) -> bool {
        matches!(self, ConstraintDescriptor::ForeignKey { .. })
    }

    /// Build the replica of this constraint bound to `new_column`.
    ///
    /// Only elements of the base column list equal to `old_column` are
    /// replaced. The replica gets a regenerated name so it can coexist with
    /// the original until contract. Foreign keys are added `NOT VALID`.
    pub fn to_change(&self, table: &TableRef, old_column: &str, new_column: &str) -> Result<Operation> {
        let columns = substitute(self.columns(), old_column, new_column);
        if columns.iter().all(|c| c != new_column) {
            return Err(ZdError::Unsupported(format!(
                "Constraint {} on {} does not cover column {}",
                self.name(),
                table,
                old_column
            )));
        }

        let op = match self {
            ConstraintDescriptor::PrimaryKey { .. } => Operation::AddPrimaryKey {
                table: table.clone(),
                name: replica_name(table, &columns, "pkey"),
                columns,
            },
            ConstraintDescriptor::Unique {
                deferrable,
                initially_deferred,
                ..
            } => Operation::AddUniqueConstraint {
                table: table.clone(),
                name: replica_name(table, &columns, "key"),
                columns,
                deferrable: *deferrable,
                initially_deferred: *initially_deferred,
            },
            ConstraintDescriptor::ForeignKey {
                referenced_table,
                referenced_columns,
                deferrable,
                initially_deferred,
                on_delete,
                on_update,
                ..
            } => Operation::AddForeignKey(ForeignKeySpec {
                table: table.clone(),
                name: replica_name(table, &columns, "fkey"),
                columns,
                referenced_table: referenced_table.clone(),
                referenced_columns: referenced_columns.clone(),
                deferrable: *deferrable,
                initially_deferred: *initially_deferred,
                on_delete: *on_delete,
                on_update: *on_update,
                validate: false,
            }),
        };
        Ok(op)
    }

    /// Drop this constraint by its captured name.
    pub fn to_rollback(&self, table: &TableRef) -> Operation {
        Operation::DropConstraint {
            table: table.clone(),
            name: self.name().to_string(),
        }
    }
}

fn substitute(columns: &[String], old_column: &str, new_column: &str) -> Vec<String> {
    columns
        .iter()
        .map(|c| {
            if c == old_column {
                new_column.to_string()
            } else {
                c.clone()
            }
        })
        .collect()
}

fn replica_name(table: &TableRef, columns: &[String], suffix: &str) -> String {
    let mut parts: Vec<&str> = Vec::with_capacity(columns.len() + 2);
    parts.push(&table.name);
    parts.extend(columns.iter().map(String::as_str));
    parts.push(suffix);
    generated_name(&parts)
}
