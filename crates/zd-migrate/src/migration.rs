//! One change, bound to a mode and a database kind for one invocation.
//!
//! [`Migration`] is the dispatch point: it picks the one-shot change, the
//! expand step or the contract step and memoizes the generated plans so
//! every request in the invocation sees the same statements.

use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::backfill::BackfillJob;
use crate::change::{ExpandContract, ZdChange};
use crate::core::identifier::{validate_check_expression, TableRef};
use crate::core::operation::Operation;
use crate::core::traits::Introspector;
use crate::dialect::DatabaseKind;
use crate::error::{Result, ZdError};
use crate::load::LoadData;
use crate::mode::{MigrationConfig, MigrationMode};
use crate::plan::MigrationPlan;

/// The change a migration carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Change {
    /// A change with an expand/contract decomposition.
    ZeroDowntime(ZdChange),
    /// A standalone backfill, run as is in every mode.
    Batch(BackfillJob),
    /// A check constraint, optionally left unvalidated.
    CheckConstraint {
        table: TableRef,
        name: String,
        expression: String,
        validate: bool,
    },
    /// A CSV file loaded into an existing table.
    LoadData(LoadData),
}

impl Change {
    pub fn kind(&self) -> &'static str {
        match self {
            Change::ZeroDowntime(change) => change.generator().name(),
            Change::Batch(_) => "batch_migration",
            Change::CheckConstraint { .. } => "add_check_constraint",
            Change::LoadData(_) => "load_large_data",
        }
    }

    fn validate(&self) -> Result<()> {
        match self {
            Change::ZeroDowntime(change) => change.generator().validate(),
            // Checked when the job was built.
            Change::Batch(_) => Ok(()),
            Change::CheckConstraint {
                table,
                name,
                expression,
                ..
            } => {
                let mut errors = Vec::new();
                crate::change::check_identifier("table", &table.name, &mut errors);
                crate::change::check_identifier("name", name, &mut errors);
                if let Err(e) = validate_check_expression(expression) {
                    errors.push(e.to_string());
                }
                crate::change::finish_validation("add_check_constraint", errors)
            }
            Change::LoadData(load) => load.validate(),
        }
    }
}

pub struct Migration {
    id: String,
    change: Change,
    mode: MigrationMode,
    kind: DatabaseKind,
    expand: OnceCell<MigrationPlan>,
    contract: OnceCell<MigrationPlan>,
    expand_inverse: OnceCell<MigrationPlan>,
}

impl Migration {
    /// Validate `change` and resolve the mode from `config`.
    ///
    /// The mode is fixed for the lifetime of the migration.
    pub fn new(
        id: impl Into<String>,
        change: Change,
        config: &MigrationConfig,
        kind: DatabaseKind,
    ) -> Result<Self> {
        change.validate()?;
        let mode = MigrationMode::resolve(config);
        let id = id.into();
        debug!("{}: {} in {} mode on {}", id, change.kind(), mode, kind);
        Ok(Self {
            id,
            change,
            mode,
            kind,
            expand: OnceCell::new(),
            contract: OnceCell::new(),
            expand_inverse: OnceCell::new(),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn mode(&self) -> MigrationMode {
        self.mode
    }

    pub fn change(&self) -> &Change {
        &self.change
    }

    pub fn database_kind(&self) -> &DatabaseKind {
        &self.kind
    }

    /// Operations to apply for this invocation.
    pub async fn plan(&self, catalog: &dyn Introspector) -> Result<MigrationPlan> {
        match &self.change {
            Change::ZeroDowntime(change) => self.zero_downtime_plan(change.generator(), catalog).await,
            Change::Batch(job) => {
                if self.kind.supports_zero_downtime() {
                    Ok(MigrationPlan::new(vec![Operation::Backfill(job.clone())]))
                } else {
                    info!(
                        "{}: batch migration skipped, {} is not supported",
                        self.id, self.kind
                    );
                    Ok(MigrationPlan::default())
                }
            }
            Change::CheckConstraint {
                table,
                name,
                expression,
                validate,
            } => Ok(MigrationPlan::new(vec![Operation::AddCheckConstraint {
                table: table.clone(),
                name: name.clone(),
                expression: expression.clone(),
                validate: *validate,
            }])),
            Change::LoadData(load) => {
                if !self.kind.supports_zero_downtime() {
                    info!("{}: data load skipped, {} is not supported", self.id, self.kind);
                    return Ok(MigrationPlan::default());
                }
                match self.mode {
                    MigrationMode::Off | MigrationMode::Expand => {
                        Ok(MigrationPlan::new(vec![Operation::LoadData(load.read_header()?)]))
                    }
                    // Loading again would duplicate the rows.
                    MigrationMode::Contract => {
                        info!("{}: data was loaded by the expand step", self.id);
                        Ok(MigrationPlan::default())
                    }
                }
            }
        }
    }

    /// Operations that undo [`plan`](Self::plan).
    pub async fn rollback_plan(&self, catalog: &dyn Introspector) -> Result<MigrationPlan> {
        match &self.change {
            Change::ZeroDowntime(change) => {
                let generator = change.generator();
                if !self.kind.supports_zero_downtime() {
                    return Ok(MigrationPlan::new(generator.original_inverse()?));
                }
                match self.mode {
                    MigrationMode::Off => Ok(MigrationPlan::new(generator.original_inverse()?)),
                    MigrationMode::Expand => {
                        self.expand_inverse
                            .get_or_try_init(|| async {
                                generator.expand_inverse(catalog).await.map(MigrationPlan::new)
                            })
                            .await
                            .cloned()
                    }
                    MigrationMode::Contract => Err(ZdError::RollbackImpossible(format!(
                        "{}: the contract step of {} has already removed the old schema",
                        self.id,
                        generator.name()
                    ))),
                }
            }
            Change::Batch(_) => Ok(MigrationPlan::default()),
            Change::CheckConstraint { table, name, .. } => {
                Ok(MigrationPlan::new(vec![Operation::DropConstraint {
                    table: table.clone(),
                    name: name.clone(),
                }]))
            }
            Change::LoadData(load) => Err(ZdError::Unsupported(format!(
                "{}: rows loaded from {} cannot be removed automatically",
                self.id, load.file
            ))),
        }
    }

    async fn zero_downtime_plan(
        &self,
        generator: &dyn ExpandContract,
        catalog: &dyn Introspector,
    ) -> Result<MigrationPlan> {
        if !self.kind.supports_zero_downtime() {
            return Ok(MigrationPlan::new(generator.original()));
        }
        match self.mode {
            MigrationMode::Off => Ok(MigrationPlan::new(generator.original())),
            MigrationMode::Expand => {
                self.expand
                    .get_or_try_init(|| async { generator.expand(catalog).await.map(MigrationPlan::new) })
                    .await
                    .cloned()
            }
            MigrationMode::Contract => {
                self.contract
                    .get_or_try_init(|| async { generator.contract(catalog).await.map(MigrationPlan::new) })
                    .await
                    .cloned()
            }
        }
    }
}
