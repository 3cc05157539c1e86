//! Table renames.
//!
//! Two strategies are offered. The copy strategy builds a second table,
//! mirrors writes between the two and backfills the rest, which keeps both
//! names writable. The view strategy renames in place and leaves a view
//! under the old name, which is cheaper but read-mostly for old readers.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{check_identifier, finish_validation, BatchSettings, ExpandContract};
use crate::backfill::BackfillJob;
use crate::core::identifier::TableRef;
use crate::core::operation::Operation;
use crate::core::traits::Introspector;
use crate::error::{Result, ZdError};
use crate::sync::{build_table_sync, drop_sync};

/// Trigger on the old table writing into the new one.
const OLD_TO_NEW: &str = "t1";
/// Trigger on the new table writing back into the old one.
const NEW_TO_OLD: &str = "t2";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenameTableUsingCopy {
    pub table: TableRef,
    pub new_name: String,
    pub batch: BatchSettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenameTableUsingView {
    pub table: TableRef,
    pub new_name: String,
}

fn check_rename(table: &TableRef, new_name: &str, errors: &mut Vec<String>) {
    check_identifier("table", &table.name, errors);
    if let Some(schema) = &table.schema {
        check_identifier("schema", schema, errors);
    }
    check_identifier("new_table", new_name, errors);
    if !table.name.is_empty() && table.name == new_name {
        errors.push(format!("Table {} cannot be renamed to itself", table));
    }
}

fn rename_table(table: &TableRef, new_name: &str) -> Operation {
    Operation::RenameTable {
        table: table.clone(),
        new_name: new_name.to_string(),
    }
}

impl RenameTableUsingCopy {
    fn new_table(&self) -> TableRef {
        self.table.sibling(&self.new_name)
    }

    fn teardown(&self, dropped: TableRef) -> Vec<Operation> {
        vec![
            drop_sync(NEW_TO_OLD, &self.new_table()),
            drop_sync(OLD_TO_NEW, &self.table),
            Operation::DropTable {
                table: dropped,
                cascade: true,
            },
        ]
    }
}

#[async_trait]
impl ExpandContract for RenameTableUsingCopy {
    fn name(&self) -> &'static str {
        "rename_table_using_copy"
    }

    fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();
        check_rename(&self.table, &self.new_name, &mut errors);
        self.batch.check(&mut errors);
        finish_validation(self.name(), errors)
    }

    fn original(&self) -> Vec<Operation> {
        vec![rename_table(&self.table, &self.new_name)]
    }

    fn original_inverse(&self) -> Result<Vec<Operation>> {
        Ok(vec![rename_table(&self.new_table(), &self.table.name)])
    }

    async fn expand(&self, catalog: &dyn Introspector) -> Result<Vec<Operation>> {
        let new_table = self.new_table();
        let descriptor = catalog.describe_table(&self.table).await?;
        if !descriptor.has_pk() {
            return Err(ZdError::NoRowIdentifier(self.table.to_string()));
        }
        debug!(
            "{}: copying {} columns keyed by ({})",
            self.table,
            descriptor.column_names.len(),
            descriptor.primary_column_names.join(", ")
        );

        let job = BackfillJob::table(
            self.table.clone(),
            new_table.clone(),
            self.batch.chunk_size,
            self.batch.sleep_time_ms,
        )?
        .with_row_identifier(descriptor.primary_column_names.clone());

        Ok(vec![
            Operation::CopyTable {
                source: self.table.clone(),
                destination: new_table.clone(),
            },
            build_table_sync(OLD_TO_NEW, &self.table, &new_table, &descriptor)?,
            Operation::Backfill(job),
            build_table_sync(NEW_TO_OLD, &new_table, &self.table, &descriptor)?,
        ])
    }

    async fn contract(&self, _catalog: &dyn Introspector) -> Result<Vec<Operation>> {
        Ok(self.teardown(self.table.clone()))
    }

    async fn expand_inverse(&self, _catalog: &dyn Introspector) -> Result<Vec<Operation>> {
        Ok(self.teardown(self.new_table()))
    }
}

impl RenameTableUsingView {
    fn new_table(&self) -> TableRef {
        self.table.sibling(&self.new_name)
    }
}

#[async_trait]
impl ExpandContract for RenameTableUsingView {
    fn name(&self) -> &'static str {
        "rename_table_using_view"
    }

    fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();
        check_rename(&self.table, &self.new_name, &mut errors);
        finish_validation(self.name(), errors)
    }

    fn original(&self) -> Vec<Operation> {
        vec![rename_table(&self.table, &self.new_name)]
    }

    fn original_inverse(&self) -> Result<Vec<Operation>> {
        Ok(vec![rename_table(&self.new_table(), &self.table.name)])
    }

    async fn expand(&self, _catalog: &dyn Introspector) -> Result<Vec<Operation>> {
        Ok(vec![
            rename_table(&self.table, &self.new_name),
            Operation::CreateView {
                view: self.table.clone(),
                definition: format!("SELECT * FROM {}", self.new_table().render()?),
            },
        ])
    }

    async fn contract(&self, _catalog: &dyn Introspector) -> Result<Vec<Operation>> {
        Ok(vec![Operation::DropView {
            view: self.table.clone(),
        }])
    }

    async fn expand_inverse(&self, _catalog: &dyn Introspector) -> Result<Vec<Operation>> {
        Ok(vec![
            Operation::DropView {
                view: self.table.clone(),
            },
            rename_table(&self.new_table(), &self.table.name),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backfill::BackfillTarget;
    use crate::sync::SyncKind;
    use crate::testing::SchemaModel;

    fn copy_rename() -> RenameTableUsingCopy {
        RenameTableUsingCopy {
            table: TableRef::new("customer"),
            new_name: "client".into(),
            batch: BatchSettings {
                chunk_size: 500,
                sleep_time_ms: 10,
            },
        }
    }

    #[tokio::test]
    async fn test_copy_expand() {
        let model = SchemaModel::customer();
        let ops = copy_rename().expand(&model).await.unwrap();
        assert_eq!(
            ops.iter().map(Operation::kind).collect::<Vec<_>>(),
            vec!["copy_table", "create_sync_trigger", "backfill", "create_sync_trigger"]
        );

        match &ops[1] {
            Operation::CreateSyncTrigger(t) => {
                assert_eq!(t.table, TableRef::new("customer"));
                assert_eq!(
                    t.kind,
                    SyncKind::Table {
                        destination: TableRef::new("client"),
                        columns: vec!["id".into(), "phone".into(), "region_id".into()],
                        key: vec!["id".into()],
                    }
                );
            }
            other => panic!("unexpected {:?}", other),
        }
        match &ops[2] {
            Operation::Backfill(job) => {
                assert_eq!(job.chunk_size, 500);
                assert_eq!(job.throttle_ms, 10);
                assert_eq!(job.row_identifier, Some(vec!["id".to_string()]));
                assert_eq!(
                    job.target,
                    BackfillTarget::Table {
                        source: TableRef::new("customer"),
                        destination: TableRef::new("client"),
                    }
                );
            }
            other => panic!("unexpected {:?}", other),
        }
        match &ops[3] {
            Operation::CreateSyncTrigger(t) => assert_eq!(t.table, TableRef::new("client")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_copy_requires_primary_key() {
        let model = SchemaModel::new();
        model.add_table("audit", &[("at", "timestamp", true, None)], vec![]);
        let change = RenameTableUsingCopy {
            table: TableRef::new("audit"),
            new_name: "audit_log".into(),
            batch: BatchSettings::default(),
        };
        assert!(matches!(
            change.expand(&model).await.unwrap_err(),
            ZdError::NoRowIdentifier(_)
        ));
    }

    #[tokio::test]
    async fn test_copy_expand_inverse_restores_schema() {
        let model = SchemaModel::customer();
        let before = model.snapshot();
        let change = copy_rename();

        model.apply_all(&change.expand(&model).await.unwrap());
        assert!(model.snapshot().tables.contains_key("client"));

        model.apply_all(&change.expand_inverse(&model).await.unwrap());
        assert_eq!(model.snapshot(), before);
    }

    #[tokio::test]
    async fn test_copy_contract_leaves_new_table() {
        let model = SchemaModel::customer();
        let change = copy_rename();
        model.apply_all(&change.expand(&model).await.unwrap());
        model.apply_all(&change.contract(&model).await.unwrap());

        let snapshot = model.snapshot();
        assert!(!snapshot.tables.contains_key("customer"));
        let client = &snapshot.tables["client"];
        assert!(client.triggers.is_empty());
        assert!(client.constraints.iter().any(|c| c.name() == "client_pkey"));
    }

    #[tokio::test]
    async fn test_view_strategy() {
        let model = SchemaModel::customer();
        let before = model.snapshot();
        let change = RenameTableUsingView {
            table: TableRef::with_schema("public", "customer"),
            new_name: "client".into(),
        };

        let expand = change.expand(&model).await.unwrap();
        assert_eq!(
            expand[1],
            Operation::CreateView {
                view: TableRef::with_schema("public", "customer"),
                definition: "SELECT * FROM \"public\".\"client\"".into(),
            }
        );
        model.apply_all(&expand);
        assert!(model.snapshot().views.contains_key("customer"));

        model.apply_all(&change.expand_inverse(&model).await.unwrap());
        assert_eq!(model.snapshot(), before);

        assert_eq!(
            change.contract(&model).await.unwrap(),
            vec![Operation::DropView {
                view: TableRef::with_schema("public", "customer"),
            }]
        );
    }

    #[test]
    fn test_rename_to_itself_rejected() {
        let change = RenameTableUsingView {
            table: TableRef::new("customer"),
            new_name: "customer".into(),
        };
        let err = change.validate().unwrap_err();
        assert!(err.to_string().contains("cannot be renamed to itself"));
    }

    #[test]
    fn test_original_inverse() {
        assert_eq!(
            copy_rename().original_inverse().unwrap(),
            vec![Operation::RenameTable {
                table: TableRef::new("client"),
                new_name: "customer".into(),
            }]
        );
    }
}
