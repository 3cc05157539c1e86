//! Orchestrator - loads change sets, plans them and applies them in order.

use std::time::Instant;

use serde::Serialize;
use tracing::{error, info, warn};

use crate::backfill::BackfillStats;
use crate::config::Config;
use crate::core::traits::{Connection, Dialect, Introspector};
use crate::dialect::DatabaseKind;
use crate::drivers::{OfflineCatalog, PgSession};
use crate::error::{Result, ZdError};
use crate::load::LoadStats;
use crate::migration::Migration;
use crate::mode::{MigrationConfig, MigrationMode, MODE_KEY};
use crate::plan::Statement;

/// Migration orchestrator.
pub struct Orchestrator {
    config: Config,
    kind: DatabaseKind,
    mode_override: Option<MigrationMode>,
    session: Option<PgSession>,
    offline: OfflineCatalog,
}

/// Rendered plan for one change set.
#[derive(Debug, Clone, Serialize)]
pub struct ChangeSetPlan {
    pub id: String,
    pub kind: String,
    pub mode: MigrationMode,
    pub statements: Vec<Statement>,
    pub checksum: String,
}

/// Result of `plan`.
#[derive(Debug, Clone, Serialize)]
pub struct PlanReport {
    pub database: String,
    pub config_hash: String,
    pub change_sets: Vec<ChangeSetPlan>,
}

/// What one change set did.
#[derive(Debug, Clone, Serialize)]
pub struct ChangeSetResult {
    pub id: String,
    pub kind: String,
    pub mode: MigrationMode,
    pub statements_executed: usize,
    pub backfills: Vec<BackfillStats>,
    pub rows_backfilled: u64,
    pub loads: Vec<LoadStats>,
    pub rows_loaded: u64,
}

/// Result of `run` or `rollback`.
#[derive(Debug, Clone, Serialize)]
pub struct RunResult {
    pub status: String,
    pub duration_seconds: f64,
    pub change_sets: Vec<ChangeSetResult>,
}

/// Result of a connectivity check.
#[derive(Debug, Clone, Serialize)]
pub struct HealthCheckResult {
    pub healthy: bool,
    pub database: String,
    pub latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Orchestrator {
    /// Create a new orchestrator. PostgreSQL databases are connected now;
    /// other kinds are planned offline.
    pub async fn new(config: Config) -> Result<Self> {
        let kind = config.database.kind();
        let session = match kind {
            DatabaseKind::Postgres => Some(PgSession::connect(&config.database).await?),
            DatabaseKind::Other(ref name) => {
                warn!(
                    "Database type '{}' has no zero-downtime support; plans contain the plain changes",
                    name
                );
                None
            }
        };
        Ok(Self {
            config,
            offline: OfflineCatalog::new(kind.clone()),
            kind,
            mode_override: None,
            session,
        })
    }

    /// Force the mode for every change set, ignoring `zd-mode` in the file.
    pub fn with_mode(mut self, mode: MigrationMode) -> Self {
        self.mode_override = Some(mode);
        self
    }

    fn catalog(&self) -> &dyn Introspector {
        match &self.session {
            Some(session) => session as &dyn Introspector,
            None => &self.offline,
        }
    }

    fn connection(&self) -> Result<&PgSession> {
        self.session
            .as_ref()
            .ok_or_else(|| ZdError::UnsupportedDatabase(self.kind.to_string()))
    }

    fn migrations(&self) -> Result<Vec<Migration>> {
        build_migrations(&self.config, self.mode_override, &self.kind)
    }

    /// Generate and render every change set without executing anything.
    pub async fn plan(&self) -> Result<PlanReport> {
        let migrations = self.migrations()?;
        let change_sets = plan_all(&migrations, &*self.kind.dialect(), self.catalog()).await?;
        Ok(PlanReport {
            database: self.kind.to_string(),
            config_hash: self.config.hash(),
            change_sets,
        })
    }

    /// Apply every change set in order. The first failure stops the run.
    pub async fn run(&self) -> Result<RunResult> {
        let session = self.connection()?;
        let migrations = self.migrations()?;
        info!("Applying {} change sets", migrations.len());
        apply_all(&migrations, &*self.kind.dialect(), session, session, Direction::Forward).await
    }

    /// Undo every change set, last one first.
    pub async fn rollback(&self) -> Result<RunResult> {
        let session = self.connection()?;
        let migrations = self.migrations()?;
        info!("Rolling back {} change sets", migrations.len());
        apply_all(&migrations, &*self.kind.dialect(), session, session, Direction::Rollback).await
    }

    /// Check that the database answers.
    pub async fn health_check(&self) -> Result<HealthCheckResult> {
        let session = self.connection()?;
        let start = Instant::now();
        let result = session.server_version().await;
        let latency_ms = start.elapsed().as_millis() as u64;

        Ok(match result {
            Ok(version) => HealthCheckResult {
                healthy: true,
                database: self.kind.to_string(),
                latency_ms,
                server_version: Some(version),
                error: None,
            },
            Err(e) => HealthCheckResult {
                healthy: false,
                database: self.kind.to_string(),
                latency_ms,
                server_version: None,
                error: Some(e.to_string()),
            },
        })
    }
}

fn build_migrations(
    config: &Config,
    mode_override: Option<MigrationMode>,
    kind: &DatabaseKind,
) -> Result<Vec<Migration>> {
    config
        .changes
        .iter()
        .map(|change_set| {
            let mut parameters = config.migration_config(change_set).parameters;
            if let Some(mode) = mode_override {
                parameters.insert(MODE_KEY.to_string(), mode.key().to_string());
            }
            Migration::new(
                change_set.id.clone(),
                change_set.change.into_change()?,
                &MigrationConfig::new(parameters),
                kind.clone(),
            )
        })
        .collect()
}

async fn plan_all(
    migrations: &[Migration],
    dialect: &dyn Dialect,
    catalog: &dyn Introspector,
) -> Result<Vec<ChangeSetPlan>> {
    let mut plans = Vec::with_capacity(migrations.len());
    for migration in migrations {
        let plan = migration.plan(catalog).await?;
        plans.push(ChangeSetPlan {
            id: migration.id().to_string(),
            kind: migration.change().kind().to_string(),
            mode: migration.mode(),
            statements: plan.statements(dialect)?,
            checksum: plan.checksum(dialect)?,
        });
    }
    Ok(plans)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Forward,
    Rollback,
}

async fn apply_all(
    migrations: &[Migration],
    dialect: &dyn Dialect,
    connection: &dyn Connection,
    catalog: &dyn Introspector,
    direction: Direction,
) -> Result<RunResult> {
    let start = Instant::now();
    let mut results = Vec::with_capacity(migrations.len());

    let ordered: Vec<&Migration> = match direction {
        Direction::Forward => migrations.iter().collect(),
        Direction::Rollback => migrations.iter().rev().collect(),
    };

    for migration in ordered {
        let plan = match direction {
            Direction::Forward => migration.plan(catalog).await?,
            Direction::Rollback => migration.rollback_plan(catalog).await?,
        };
        info!(
            "{}: {} ({} mode, {} operations)",
            migration.id(),
            migration.change().kind(),
            migration.mode(),
            plan.len()
        );

        let outcome = plan
            .execute(dialect, connection, catalog)
            .await
            .map_err(|e| {
                error!("{}: failed: {}", migration.id(), e);
                e
            })?;
        let rows_backfilled = outcome.backfills.iter().map(|b| b.rows).sum();
        let rows_loaded = outcome.loads.iter().map(|l| l.rows).sum();
        results.push(ChangeSetResult {
            id: migration.id().to_string(),
            kind: migration.change().kind().to_string(),
            mode: migration.mode(),
            statements_executed: outcome.statements,
            backfills: outcome.backfills,
            rows_backfilled,
            loads: outcome.loads,
            rows_loaded,
        });
    }

    let duration_seconds = start.elapsed().as_secs_f64();
    info!(
        "{} change sets applied in {:.1}s",
        results.len(),
        duration_seconds
    );
    Ok(RunResult {
        status: "completed".to_string(),
        duration_seconds,
        change_sets: results,
    })
}

impl PlanReport {
    /// Convert to JSON string.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

impl RunResult {
    /// Convert to JSON string.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

impl HealthCheckResult {
    /// Convert to JSON string.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::PostgresDialect;
    use crate::testing::{MockConnection, SchemaModel};

    const YAML: &str = r#"
database:
  host: localhost
  database: app
  user: app
  ssl_mode: disable
parameters:
  zd-mode: expand
changes:
  - id: rename-phone
    change:
      rename_column:
        table: customer
        old_column: phone
        new_column: phoneNumber
  - id: phone-not-blank
    change:
      add_check_constraint:
        table: customer
        name: customer_phone_not_blank
        expression: "phone <> ''"
        validate: false
"#;

    fn config() -> Config {
        Config::from_yaml(YAML).unwrap()
    }

    #[tokio::test]
    async fn test_plan_all_renders_each_change_set() {
        let migrations = build_migrations(&config(), None, &DatabaseKind::Postgres).unwrap();
        let model = SchemaModel::customer();
        let plans = plan_all(&migrations, &PostgresDialect::new(), &model).await.unwrap();

        assert_eq!(plans.len(), 2);
        assert_eq!(plans[0].kind, "rename_column");
        assert_eq!(plans[0].mode, MigrationMode::Expand);
        assert!(plans[0]
            .statements
            .iter()
            .any(|s| matches!(s, Statement::Backfill(_))));
        assert_eq!(
            plans[1].statements,
            vec![Statement::Sql(
                "ALTER TABLE \"customer\" ADD CONSTRAINT \"customer_phone_not_blank\" CHECK (phone <> '') NOT VALID"
                    .to_string()
            )]
        );
    }

    #[tokio::test]
    async fn test_mode_override_wins() {
        let migrations = build_migrations(
            &config(),
            Some(MigrationMode::Off),
            &DatabaseKind::Postgres,
        )
        .unwrap();
        assert!(migrations.iter().all(|m| m.mode() == MigrationMode::Off));
    }

    #[tokio::test]
    async fn test_unsupported_database_plans_offline() {
        let kind = DatabaseKind::from_name("mysql");
        let migrations = build_migrations(&config(), None, &kind).unwrap();
        let catalog = OfflineCatalog::new(kind.clone());
        let plans = plan_all(&migrations, &*kind.dialect(), &catalog).await.unwrap();
        assert_eq!(
            plans[0].statements,
            vec![Statement::Sql(
                "ALTER TABLE \"customer\" RENAME COLUMN \"phone\" TO \"phoneNumber\"".to_string()
            )]
        );
    }

    #[tokio::test]
    async fn test_apply_all_runs_batch_then_rolls_back_in_reverse() {
        let yaml = r#"
database:
  host: localhost
  database: app
  user: app
changes:
  - id: fill-phone
    change:
      batch_column_migration:
        table: customer
        from_columns: [phone]
        to_columns: [phoneNumber]
        chunk_size: 100
  - id: phone-not-blank
    change:
      add_check_constraint:
        table: customer
        name: customer_phone_not_blank
        expression: "phone <> ''"
"#;
        let config = Config::from_yaml(yaml).unwrap();
        let migrations = build_migrations(&config, None, &DatabaseKind::Postgres).unwrap();
        let conn = MockConnection::with_pending_rows(150);
        let dialect = PostgresDialect::new();

        let result = apply_all(&migrations, &dialect, &conn, &conn, Direction::Forward)
            .await
            .unwrap();
        assert_eq!(result.status, "completed");
        assert_eq!(result.change_sets[0].rows_backfilled, 150);
        assert_eq!(result.change_sets[0].backfills[0].executions, 3);
        assert_eq!(result.change_sets[1].statements_executed, 1);

        let result = apply_all(&migrations, &dialect, &conn, &conn, Direction::Rollback)
            .await
            .unwrap();
        assert_eq!(result.change_sets[0].id, "phone-not-blank");
        assert_eq!(result.change_sets[1].statements_executed, 0);
        assert!(conn
            .executed()
            .last()
            .unwrap()
            .contains("DROP CONSTRAINT IF EXISTS \"customer_phone_not_blank\""));
    }

    #[tokio::test]
    async fn test_apply_all_stops_at_first_failure() {
        let migrations = build_migrations(&config(), None, &DatabaseKind::Postgres).unwrap();
        let conn = MockConnection::with_pending_rows(0);
        // MockConnection knows no columns, so the expand of the first change
        // set fails before anything runs.
        let err = apply_all(
            &migrations,
            &PostgresDialect::new(),
            &conn,
            &conn,
            Direction::Forward,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ZdError::NotFound { .. }));
        assert!(conn.executed().is_empty());
    }
}
