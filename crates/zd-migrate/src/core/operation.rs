//! Primitive schema operations that make up a migration plan.
//!
//! Operations are plain data; a [`Dialect`](super::traits::Dialect) turns
//! them into SQL and the backfill engine executes [`Operation::Backfill`].
//! [`Operation::LoadData`] renders to a `COPY` that is fed from a file.

use serde::{Deserialize, Serialize};

use super::identifier::TableRef;
use super::schema::ForeignKeyAction;
use crate::backfill::BackfillJob;
use crate::load::LoadDataJob;
use crate::sync::SyncTrigger;

/// Foreign key definition for [`Operation::AddForeignKey`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKeySpec {
    pub table: TableRef,
    pub name: String,
    pub columns: Vec<String>,
    pub referenced_table: TableRef,
    pub referenced_columns: Vec<String>,
    pub deferrable: bool,
    pub initially_deferred: bool,
    pub on_delete: ForeignKeyAction,
    pub on_update: ForeignKeyAction,
    /// `false` adds the constraint `NOT VALID`.
    pub validate: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Operation {
    // ===== One-shot changes =====
    RenameColumn {
        table: TableRef,
        column: String,
        new_column: String,
    },
    ModifyDataType {
        table: TableRef,
        column: String,
        new_data_type: String,
    },
    RenameTable {
        table: TableRef,
        new_name: String,
    },
    RenameView {
        view: TableRef,
        new_name: String,
    },

    // ===== Columns =====
    AddColumn {
        table: TableRef,
        column: String,
        data_type: String,
    },
    DropColumn {
        table: TableRef,
        column: String,
    },
    AddNotNull {
        table: TableRef,
        column: String,
    },
    DropNotNull {
        table: TableRef,
        column: String,
    },
    AddDefault {
        table: TableRef,
        column: String,
        default_value: String,
    },

    // ===== Constraints =====
    AddPrimaryKey {
        table: TableRef,
        name: String,
        columns: Vec<String>,
    },
    AddUniqueConstraint {
        table: TableRef,
        name: String,
        columns: Vec<String>,
        deferrable: bool,
        initially_deferred: bool,
    },
    AddForeignKey(ForeignKeySpec),
    AddCheckConstraint {
        table: TableRef,
        name: String,
        expression: String,
        validate: bool,
    },
    ValidateConstraint {
        table: TableRef,
        name: String,
    },
    DropConstraint {
        table: TableRef,
        name: String,
    },

    // ===== Sync and data =====
    CreateSyncTrigger(SyncTrigger),
    DropSyncTrigger {
        label: String,
        table: TableRef,
    },
    Backfill(BackfillJob),
    LoadData(LoadDataJob),

    // ===== Tables and views =====
    CopyTable {
        source: TableRef,
        destination: TableRef,
    },
    DropTable {
        table: TableRef,
        cascade: bool,
    },
    CreateView {
        view: TableRef,
        definition: String,
    },
    DropView {
        view: TableRef,
    },
}

impl Operation {
    /// Short name used in logs and plan output.
    pub fn kind(&self) -> &'static str {
        match self {
            Operation::RenameColumn { .. } => "rename_column",
            Operation::ModifyDataType { .. } => "modify_data_type",
            Operation::RenameTable { .. } => "rename_table",
            Operation::RenameView { .. } => "rename_view",
            Operation::AddColumn { .. } => "add_column",
            Operation::DropColumn { .. } => "drop_column",
            Operation::AddNotNull { .. } => "add_not_null",
            Operation::DropNotNull { .. } => "drop_not_null",
            Operation::AddDefault { .. } => "add_default",
            Operation::AddPrimaryKey { .. } => "add_primary_key",
            Operation::AddUniqueConstraint { .. } => "add_unique_constraint",
            Operation::AddForeignKey(_) => "add_foreign_key",
            Operation::AddCheckConstraint { .. } => "add_check_constraint",
            Operation::ValidateConstraint { .. } => "validate_constraint",
            Operation::DropConstraint { .. } => "drop_constraint",
            Operation::CreateSyncTrigger(_) => "create_sync_trigger",
            Operation::DropSyncTrigger { .. } => "drop_sync_trigger",
            Operation::Backfill(_) => "backfill",
            Operation::LoadData(_) => "load_data",
            Operation::CopyTable { .. } => "copy_table",
            Operation::DropTable { .. } => "drop_table",
            Operation::CreateView { .. } => "create_view",
            Operation::DropView { .. } => "drop_view",
        }
    }

    /// One-shot changes are the only operations every dialect can render.
    pub fn is_baseline(&self) -> bool {
        matches!(
            self,
            Operation::RenameColumn { .. }
                | Operation::ModifyDataType { .. }
                | Operation::RenameTable { .. }
                | Operation::RenameView { .. }
        )
    }
}
