//! Column rename and column retype.
//!
//! Both work the same way: a shadow column is added next to the old one,
//! kept in sync by triggers, backfilled, and finally left as the only column
//! when contract drops the old one. They differ in the one-shot change and
//! in the type of the shadow column.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{
    check_identifier, finish_validation, BatchSettings, ExpandContract, BACKWARD_UPDATE,
    FORWARD_INSERT, FORWARD_UPDATE,
};
use crate::backfill::BackfillJob;
use crate::core::identifier::{validate_sql_fragment, TableRef};
use crate::core::operation::Operation;
use crate::core::schema::ColumnDescriptor;
use crate::core::traits::Introspector;
use crate::error::{Result, ZdError};
use crate::sync::{build_column_sync, drop_sync};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenameColumn {
    pub table: TableRef,
    pub old_column: String,
    pub new_column: String,
    pub batch: BatchSettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModifyDataType {
    pub table: TableRef,
    pub column: String,
    /// Shadow column that carries the new type and survives contract.
    pub new_column: String,
    pub new_data_type: String,
    pub batch: BatchSettings,
}

/// The parts of a column change the shared generators need.
struct ShadowColumn<'a> {
    table: &'a TableRef,
    old: &'a str,
    new: &'a str,
    new_type: Option<&'a str>,
    batch: BatchSettings,
}

impl ShadowColumn<'_> {
    async fn expand(&self, catalog: &dyn Introspector) -> Result<Vec<Operation>> {
        let column = catalog.describe_column(self.table, self.old).await?;
        if column.is_primary_key() {
            return Err(ZdError::Unsupported(format!(
                "Column {}.{} is part of the primary key and cannot be migrated with zero downtime",
                self.table, self.old
            )));
        }

        let job = BackfillJob::columns(
            self.table.clone(),
            vec![self.old.to_string()],
            vec![self.new.to_string()],
            self.batch.chunk_size,
            self.batch.sleep_time_ms,
        )?;

        let mut replicas = Vec::new();
        let mut foreign_keys = Vec::new();
        for constraint in &column.constraints {
            let op = constraint.to_change(self.table, self.old, self.new)?;
            if constraint.is_foreign_key() {
                foreign_keys.push(op);
            } else {
                replicas.push(op);
            }
        }
        debug!(
            "{}.{}: {} constraint replicas, {} foreign keys deferred past backfill",
            self.table,
            self.old,
            replicas.len(),
            foreign_keys.len()
        );

        let mut ops = Vec::new();
        ops.push(Operation::AddColumn {
            table: self.table.clone(),
            column: self.new.to_string(),
            data_type: self
                .new_type
                .map(str::to_string)
                .unwrap_or_else(|| column.data_type.clone()),
        });
        ops.extend(replicas);
        ops.push(build_column_sync(FORWARD_UPDATE, self.table, self.old, self.new, false, true)?);
        ops.push(build_column_sync(FORWARD_INSERT, self.table, self.old, self.new, true, false)?);
        ops.push(Operation::Backfill(job));

        let validations: Vec<Operation> = foreign_keys
            .iter()
            .filter_map(|op| match op {
                Operation::AddForeignKey(fk) => Some(Operation::ValidateConstraint {
                    table: fk.table.clone(),
                    name: fk.name.clone(),
                }),
                _ => None,
            })
            .collect();
        ops.extend(foreign_keys);

        if !column.nullable {
            ops.push(Operation::AddNotNull {
                table: self.table.clone(),
                column: self.new.to_string(),
            });
        }
        if let Some(default_value) = &column.default_value {
            ops.push(Operation::AddDefault {
                table: self.table.clone(),
                column: self.new.to_string(),
                default_value: default_value.clone(),
            });
        }
        ops.push(build_column_sync(BACKWARD_UPDATE, self.table, self.new, self.old, false, true)?);
        ops.extend(validations);
        Ok(ops)
    }

    async fn contract(&self, catalog: &dyn Introspector) -> Result<Vec<Operation>> {
        let old = describe_if_present(catalog, self.table, self.old).await?;
        Ok(self.teardown(old, self.old, [FORWARD_UPDATE, FORWARD_INSERT, BACKWARD_UPDATE]))
    }

    async fn expand_inverse(&self, catalog: &dyn Introspector) -> Result<Vec<Operation>> {
        let new = describe_if_present(catalog, self.table, self.new).await?;
        Ok(self.teardown(new, self.new, [BACKWARD_UPDATE, FORWARD_INSERT, FORWARD_UPDATE]))
    }

    /// Drop the triggers, then the constraints of `column`, then `column`.
    fn teardown(
        &self,
        descriptor: Option<ColumnDescriptor>,
        column: &str,
        labels: [&str; 3],
    ) -> Vec<Operation> {
        let mut ops: Vec<Operation> = labels
            .iter()
            .map(|label| drop_sync(label, self.table))
            .collect();
        if let Some(descriptor) = descriptor {
            ops.extend(descriptor.constraints.iter().map(|c| c.to_rollback(self.table)));
        }
        ops.push(Operation::DropColumn {
            table: self.table.clone(),
            column: column.to_string(),
        });
        ops
    }
}

/// Describe a column, treating a missing column as already dropped.
async fn describe_if_present(
    catalog: &dyn Introspector,
    table: &TableRef,
    column: &str,
) -> Result<Option<ColumnDescriptor>> {
    match catalog.describe_column(table, column).await {
        Ok(descriptor) => Ok(Some(descriptor)),
        Err(ZdError::NotFound { .. }) => {
            debug!("{}.{} not found, nothing to drop", table, column);
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

impl RenameColumn {
    fn shadow(&self) -> ShadowColumn<'_> {
        ShadowColumn {
            table: &self.table,
            old: &self.old_column,
            new: &self.new_column,
            new_type: None,
            batch: self.batch,
        }
    }
}

#[async_trait]
impl ExpandContract for RenameColumn {
    fn name(&self) -> &'static str {
        "rename_column"
    }

    fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();
        check_identifier("table", &self.table.name, &mut errors);
        check_identifier("old_column", &self.old_column, &mut errors);
        check_identifier("new_column", &self.new_column, &mut errors);
        if !self.old_column.is_empty() && self.old_column == self.new_column {
            errors.push(format!("Column {} cannot be renamed to itself", self.old_column));
        }
        self.batch.check(&mut errors);
        finish_validation(self.name(), errors)
    }

    fn original(&self) -> Vec<Operation> {
        vec![Operation::RenameColumn {
            table: self.table.clone(),
            column: self.old_column.clone(),
            new_column: self.new_column.clone(),
        }]
    }

    fn original_inverse(&self) -> Result<Vec<Operation>> {
        Ok(vec![Operation::RenameColumn {
            table: self.table.clone(),
            column: self.new_column.clone(),
            new_column: self.old_column.clone(),
        }])
    }

    async fn expand(&self, catalog: &dyn Introspector) -> Result<Vec<Operation>> {
        self.shadow().expand(catalog).await
    }

    async fn contract(&self, catalog: &dyn Introspector) -> Result<Vec<Operation>> {
        self.shadow().contract(catalog).await
    }

    async fn expand_inverse(&self, catalog: &dyn Introspector) -> Result<Vec<Operation>> {
        self.shadow().expand_inverse(catalog).await
    }
}

impl ModifyDataType {
    fn shadow(&self) -> ShadowColumn<'_> {
        ShadowColumn {
            table: &self.table,
            old: &self.column,
            new: &self.new_column,
            new_type: Some(&self.new_data_type),
            batch: self.batch,
        }
    }
}

#[async_trait]
impl ExpandContract for ModifyDataType {
    fn name(&self) -> &'static str {
        "modify_data_type"
    }

    fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();
        check_identifier("table", &self.table.name, &mut errors);
        check_identifier("column", &self.column, &mut errors);
        check_identifier("new_column", &self.new_column, &mut errors);
        if !self.column.is_empty() && self.column == self.new_column {
            errors.push(format!(
                "new_column must differ from column {}",
                self.column
            ));
        }
        if let Err(e) = validate_sql_fragment("new_data_type", &self.new_data_type) {
            errors.push(e.to_string());
        }
        self.batch.check(&mut errors);
        finish_validation(self.name(), errors)
    }

    fn original(&self) -> Vec<Operation> {
        vec![Operation::ModifyDataType {
            table: self.table.clone(),
            column: self.column.clone(),
            new_data_type: self.new_data_type.clone(),
        }]
    }

    fn original_inverse(&self) -> Result<Vec<Operation>> {
        Err(ZdError::Unsupported(format!(
            "No inverse for changing the type of {}.{}: the previous type is not recorded",
            self.table, self.column
        )))
    }

    async fn expand(&self, catalog: &dyn Introspector) -> Result<Vec<Operation>> {
        self.shadow().expand(catalog).await
    }

    async fn contract(&self, catalog: &dyn Introspector) -> Result<Vec<Operation>> {
        self.shadow().contract(catalog).await
    }

    async fn expand_inverse(&self, catalog: &dyn Introspector) -> Result<Vec<Operation>> {
        self.shadow().expand_inverse(catalog).await
    }
}
