//! Ordered operation lists and their rendered form.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::backfill::{BackfillEngine, BackfillJob, BackfillStats};
use crate::core::operation::Operation;
use crate::core::traits::{Connection, Dialect, Introspector};
use crate::dialect::unsupported;
use crate::error::{Result, ZdError};
use crate::load::{self, LoadStats};

/// An ordered list of primitive operations produced for one invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationPlan {
    pub operations: Vec<Operation>,
}

/// One executable step of a rendered plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Statement {
    Sql(String),
    /// Run by the backfill engine, not sent as one statement.
    Backfill(BackfillJob),
    /// A `COPY ... FROM STDIN` fed from a client-side file.
    Load { sql: String, file: String },
}

impl Statement {
    /// Whether the engine drives this step itself rather than sending one
    /// statement. Those steps need a PostgreSQL connection.
    pub fn is_engine_step(&self) -> bool {
        matches!(self, Statement::Backfill(_) | Statement::Load { .. })
    }
}

impl MigrationPlan {
    pub fn new(operations: Vec<Operation>) -> Self {
        Self { operations }
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    /// Render every operation with `dialect`, keeping plan order.
    ///
    /// Fails on the first operation the dialect does not support.
    pub fn statements(&self, dialect: &dyn Dialect) -> Result<Vec<Statement>> {
        let mut statements = Vec::with_capacity(self.operations.len());
        for op in &self.operations {
            match op {
                Operation::Backfill(job) => statements.push(Statement::Backfill(job.clone())),
                op if !dialect.supports(op) => return Err(unsupported(dialect.name(), op)),
                Operation::LoadData(job) => {
                    for sql in dialect.render(op)? {
                        statements.push(Statement::Load {
                            sql,
                            file: job.file.clone(),
                        });
                    }
                }
                other => statements.extend(dialect.render(other)?.into_iter().map(Statement::Sql)),
            }
        }
        Ok(statements)
    }

    /// SHA256 over the rendered statements. Two plans that would run the
    /// same statements have the same checksum.
    pub fn checksum(&self, dialect: &dyn Dialect) -> Result<String> {
        let statements = self.statements(dialect)?;
        let json = serde_json::to_string(&statements)?;
        let mut hasher = Sha256::new();
        hasher.update(json.as_bytes());
        Ok(format!("{:x}", hasher.finalize()))
    }
}

/// What executing a plan did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PlanOutcome {
    /// SQL statements executed.
    pub statements: usize,
    /// One entry per backfill, in plan order.
    pub backfills: Vec<BackfillStats>,
    /// One entry per data load, in plan order.
    pub loads: Vec<LoadStats>,
}

impl MigrationPlan {
    /// Execute the plan statement by statement.
    ///
    /// Each statement commits on its own. A failure stops the plan and
    /// leaves earlier statements applied. Nothing runs when `dialect` is not
    /// the connection's dialect, or when the plan has backfills or loads and
    /// the connection is not PostgreSQL.
    pub async fn execute(
        &self,
        dialect: &dyn Dialect,
        connection: &dyn Connection,
        catalog: &dyn Introspector,
    ) -> Result<PlanOutcome> {
        // Render everything up front so a bad operation fails before any
        // statement runs.
        let statements = self.statements(dialect)?;
        let kind = connection.database_kind();
        if kind.dialect().name() != dialect.name() {
            return Err(ZdError::Unsupported(format!(
                "the {} dialect cannot run on a {} connection",
                dialect.name(),
                kind
            )));
        }
        if !kind.supports_zero_downtime() && statements.iter().any(Statement::is_engine_step) {
            return Err(ZdError::UnsupportedDatabase(kind.to_string()));
        }
        let mut outcome = PlanOutcome::default();

        for statement in &statements {
            match statement {
                Statement::Sql(sql) => {
                    debug!("Executing: {}", sql);
                    connection.execute(sql).await?;
                    outcome.statements += 1;
                }
                Statement::Backfill(job) => {
                    let stats = BackfillEngine::new(connection, catalog).run(job).await?;
                    outcome.backfills.push(stats);
                }
                Statement::Load { sql, file } => {
                    debug!("Loading {}: {}", file, sql);
                    outcome.loads.push(load::run(connection, sql, file).await?);
                }
            }
        }

        info!(
            "Plan executed: {} statements, {} backfills, {} loads",
            outcome.statements,
            outcome.backfills.len(),
            outcome.loads.len()
        );
        Ok(outcome)
    }
}

impl From<Vec<Operation>> for MigrationPlan {
    fn from(operations: Vec<Operation>) -> Self {
        Self::new(operations)
    }
}
