//! In-memory stand-ins for a database, shared by unit tests.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::core::identifier::TableRef;
use crate::core::operation::Operation;
use crate::core::schema::{ColumnDescriptor, ConstraintDescriptor, TableDescriptor, ViewDescriptor};
use crate::core::traits::{ChunkStatement, Connection, Introspector};
use crate::dialect::DatabaseKind;
use crate::error::{Result, ZdError};

// =============================================================================
// Backfill connection
// =============================================================================

#[derive(Debug)]
struct ConnectionState {
    kind: DatabaseKind,
    closed: bool,
    pending: u64,
    staged: Option<u64>,
    fail_on: Option<u64>,
    executions: u64,
    prepares: u64,
    closes: u64,
    commits: u64,
    history: Vec<u64>,
    statements: Vec<String>,
    executed: Vec<String>,
    copied: Vec<String>,
    best_row_identifier: Vec<String>,
    primary_key: Vec<String>,
    lookups: u64,
}

/// A connection holding a count of rows still waiting for a backfill.
///
/// Chunks stage their rows on execute; only a commit removes them from the
/// pending count, and closing an uncommitted chunk discards the stage.
#[derive(Clone)]
pub struct MockConnection {
    state: Arc<Mutex<ConnectionState>>,
}

impl MockConnection {
    pub fn with_pending_rows(rows: u64) -> Self {
        Self {
            state: Arc::new(Mutex::new(ConnectionState {
                kind: DatabaseKind::Postgres,
                closed: false,
                pending: rows,
                staged: None,
                fail_on: None,
                executions: 0,
                prepares: 0,
                closes: 0,
                commits: 0,
                history: Vec::new(),
                statements: Vec::new(),
                executed: Vec::new(),
                copied: Vec::new(),
                best_row_identifier: vec!["id".into()],
                primary_key: vec!["id".into()],
                lookups: 0,
            })),
        }
    }

    pub fn with_kind(kind: DatabaseKind) -> Self {
        let conn = Self::with_pending_rows(0);
        conn.lock().kind = kind;
        conn
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ConnectionState> {
        self.state.lock().unwrap()
    }

    /// Fail the n-th chunk execution (1-based, counted across runs).
    pub fn fail_on_execution(&self, n: u64) {
        let mut state = self.lock();
        state.fail_on = Some(state.executions + n);
    }

    pub fn clear_failure(&self) {
        self.lock().fail_on = None;
    }

    pub fn close(&self) {
        self.lock().closed = true;
    }

    pub fn set_best_row_identifier(&self, columns: Vec<String>) {
        self.lock().best_row_identifier = columns;
    }

    pub fn set_primary_key(&self, columns: Vec<String>) {
        self.lock().primary_key = columns;
    }

    pub fn pending_rows(&self) -> u64 {
        self.lock().pending
    }

    pub fn prepares(&self) -> u64 {
        self.lock().prepares
    }

    pub fn closes(&self) -> u64 {
        self.lock().closes
    }

    pub fn commits(&self) -> u64 {
        self.lock().commits
    }

    pub fn affected_history(&self) -> Vec<u64> {
        self.lock().history.clone()
    }

    /// Chunk statements, in prepare order.
    pub fn statements(&self) -> Vec<String> {
        self.lock().statements.clone()
    }

    /// Statements run through [`Connection::execute`].
    pub fn executed(&self) -> Vec<String> {
        self.lock().executed.clone()
    }

    /// Statements run through [`Connection::copy_in`].
    pub fn copied(&self) -> Vec<String> {
        self.lock().copied.clone()
    }

    pub fn row_identifier_lookups(&self) -> u64 {
        self.lock().lookups
    }
}

fn parse_limit(sql: &str) -> u64 {
    sql.rsplit("LIMIT ")
        .next()
        .and_then(|rest| {
            let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
            digits.parse().ok()
        })
        .unwrap_or(u64::MAX)
}

struct MockChunk {
    state: Arc<Mutex<ConnectionState>>,
    limit: u64,
}

#[async_trait]
impl ChunkStatement for MockChunk {
    async fn execute(&mut self) -> Result<u64> {
        let mut state = self.state.lock().unwrap();
        state.executions += 1;
        if state.fail_on == Some(state.executions) {
            return Err(ZdError::Config("injected chunk failure".into()));
        }
        let rows = state.pending.min(self.limit);
        state.staged = Some(rows);
        state.history.push(rows);
        Ok(rows)
    }

    async fn close(self: Box<Self>) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.staged = None;
        state.closes += 1;
        Ok(())
    }
}

#[async_trait]
impl Connection for MockConnection {
    fn database_kind(&self) -> DatabaseKind {
        self.lock().kind.clone()
    }

    fn is_closed(&self) -> bool {
        self.lock().closed
    }

    async fn execute(&self, sql: &str) -> Result<u64> {
        let mut state = self.lock();
        if state.closed {
            return Err(ZdError::NotConnected);
        }
        state.executed.push(sql.to_string());
        Ok(0)
    }

    async fn prepare(&self, sql: &str) -> Result<Box<dyn ChunkStatement>> {
        let mut state = self.lock();
        if state.closed {
            return Err(ZdError::NotConnected);
        }
        state.prepares += 1;
        state.statements.push(sql.to_string());
        Ok(Box::new(MockChunk {
            state: Arc::clone(&self.state),
            limit: parse_limit(sql),
        }))
    }

    async fn commit(&self) -> Result<()> {
        let mut state = self.lock();
        if let Some(rows) = state.staged.take() {
            state.pending -= rows;
        }
        state.commits += 1;
        Ok(())
    }

    /// Counts data lines, less the header.
    async fn copy_in(&self, sql: &str, mut source: Box<dyn AsyncRead + Send + Unpin>) -> Result<u64> {
        if self.is_closed() {
            return Err(ZdError::NotConnected);
        }
        let mut data = String::new();
        source.read_to_string(&mut data).await?;
        self.lock().copied.push(sql.to_string());
        let lines = data.lines().filter(|l| !l.is_empty()).count() as u64;
        Ok(lines.saturating_sub(1))
    }
}

#[async_trait]
impl Introspector for MockConnection {
    async fn describe_column(&self, table: &TableRef, column: &str) -> Result<ColumnDescriptor> {
        Err(ZdError::not_found("Column", format!("{}.{}", table, column)))
    }

    async fn describe_table(&self, _table: &TableRef) -> Result<TableDescriptor> {
        let state = self.lock();
        Ok(TableDescriptor {
            column_names: vec!["id".into(), "phone".into(), "phoneNumber".into()],
            primary_column_names: state.primary_key.clone(),
        })
    }

    async fn describe_view(&self, view: &TableRef) -> Result<ViewDescriptor> {
        Err(ZdError::not_found("View", view.to_string()))
    }

    async fn best_row_identifier(&self, _table: &TableRef) -> Result<Vec<String>> {
        let mut state = self.lock();
        state.lookups += 1;
        Ok(state.best_row_identifier.clone())
    }
}

// =============================================================================
// Schema model
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelColumn {
    pub data_type: String,
    pub nullable: bool,
    pub default_value: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModelTable {
    pub columns: Vec<(String, ModelColumn)>,
    pub constraints: Vec<ConstraintDescriptor>,
    pub checks: BTreeSet<String>,
    pub triggers: BTreeSet<String>,
}

impl ModelTable {
    fn column(&self, name: &str) -> Option<&ModelColumn> {
        self.columns.iter().find(|(n, _)| n == name).map(|(_, c)| c)
    }

    fn column_mut(&mut self, name: &str) -> Option<&mut ModelColumn> {
        self.columns.iter_mut().find(|(n, _)| n == name).map(|(_, c)| c)
    }
}

/// Schema state that can be compared before and after a plan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchemaSnapshot {
    pub tables: BTreeMap<String, ModelTable>,
    pub views: BTreeMap<String, String>,
}

/// An introspector backed by a schema model that plans can be applied to.
#[derive(Default)]
pub struct SchemaModel {
    snapshot: Mutex<SchemaSnapshot>,
    column_lookups: Mutex<u64>,
}

impl SchemaModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// `customer(id PK, phone varchar NOT NULL DEFAULT 'n/a' UNIQUE,
    /// region_id -> region(id) ON DELETE CASCADE)` plus `region(id PK)`.
    pub fn customer() -> Self {
        let model = Self::new();
        model.add_table(
            "region",
            &[("id", "integer", false, None)],
            vec![ConstraintDescriptor::PrimaryKey {
                name: "region_pkey".into(),
                columns: vec!["id".into()],
            }],
        );
        model.add_table(
            "customer",
            &[
                ("id", "integer", false, None),
                ("phone", "character varying(20)", false, Some("'n/a'::character varying")),
                ("region_id", "integer", true, None),
            ],
            vec![
                ConstraintDescriptor::PrimaryKey {
                    name: "customer_pkey".into(),
                    columns: vec!["id".into()],
                },
                ConstraintDescriptor::Unique {
                    name: "customer_phone_key".into(),
                    columns: vec!["phone".into()],
                    deferrable: false,
                    initially_deferred: false,
                },
                ConstraintDescriptor::ForeignKey {
                    name: "customer_region_id_fkey".into(),
                    columns: vec!["region_id".into()],
                    referenced_table: TableRef::new("region"),
                    referenced_columns: vec!["id".into()],
                    deferrable: false,
                    initially_deferred: false,
                    on_delete: crate::core::schema::ForeignKeyAction::Cascade,
                    on_update: crate::core::schema::ForeignKeyAction::NoAction,
                },
            ],
        );
        model
    }

    pub fn add_table(
        &self,
        name: &str,
        columns: &[(&str, &str, bool, Option<&str>)],
        constraints: Vec<ConstraintDescriptor>,
    ) {
        let table = ModelTable {
            columns: columns
                .iter()
                .map(|(n, t, nullable, default)| {
                    (
                        n.to_string(),
                        ModelColumn {
                            data_type: t.to_string(),
                            nullable: *nullable,
                            default_value: default.map(str::to_string),
                        },
                    )
                })
                .collect(),
            constraints,
            ..Default::default()
        };
        self.snapshot.lock().unwrap().tables.insert(name.to_string(), table);
    }

    pub fn add_view(&self, name: &str, definition: &str) {
        self.snapshot
            .lock()
            .unwrap()
            .views
            .insert(name.to_string(), definition.to_string());
    }

    pub fn snapshot(&self) -> SchemaSnapshot {
        self.snapshot.lock().unwrap().clone()
    }

    pub fn column_lookups(&self) -> u64 {
        *self.column_lookups.lock().unwrap()
    }

    pub fn apply_all(&self, ops: &[Operation]) {
        for op in ops {
            self.apply(op);
        }
    }

    /// Apply one operation the way PostgreSQL would, as far as columns,
    /// constraints, triggers and views are concerned.
    pub fn apply(&self, op: &Operation) {
        let mut s = self.snapshot.lock().unwrap();
        match op {
            Operation::RenameColumn {
                table,
                column,
                new_column,
            } => {
                let t = s.tables.get_mut(&table.name).unwrap();
                for (name, _) in t.columns.iter_mut() {
                    if name == column {
                        *name = new_column.clone();
                    }
                }
                for c in t.constraints.iter_mut() {
                    rename_in_constraint(c, column, new_column);
                }
            }
            Operation::ModifyDataType {
                table,
                column,
                new_data_type,
            } => {
                let t = s.tables.get_mut(&table.name).unwrap();
                t.column_mut(column).unwrap().data_type = new_data_type.clone();
            }
            Operation::RenameTable { table, new_name } => {
                let t = s.tables.remove(&table.name).unwrap();
                s.tables.insert(new_name.clone(), t);
            }
            Operation::RenameView { view, new_name } => {
                let v = s.views.remove(&view.name).unwrap();
                s.views.insert(new_name.clone(), v);
            }
            Operation::AddColumn {
                table,
                column,
                data_type,
            } => {
                let t = s.tables.get_mut(&table.name).unwrap();
                assert!(t.column(column).is_none(), "column {} exists", column);
                t.columns.push((
                    column.clone(),
                    ModelColumn {
                        data_type: data_type.clone(),
                        nullable: true,
                        default_value: None,
                    },
                ));
            }
            Operation::DropColumn { table, column } => {
                if let Some(t) = s.tables.get_mut(&table.name) {
                    t.columns.retain(|(n, _)| n != column);
                    t.constraints.retain(|c| !c.columns().contains(column));
                }
            }
            Operation::AddNotNull { table, column } => {
                let t = s.tables.get_mut(&table.name).unwrap();
                t.column_mut(column).unwrap().nullable = false;
            }
            Operation::DropNotNull { table, column } => {
                if let Some(c) = s.tables.get_mut(&table.name).and_then(|t| t.column_mut(column)) {
                    c.nullable = true;
                }
            }
            Operation::AddDefault {
                table,
                column,
                default_value,
            } => {
                let t = s.tables.get_mut(&table.name).unwrap();
                t.column_mut(column).unwrap().default_value = Some(default_value.clone());
            }
            Operation::AddPrimaryKey {
                table,
                name,
                columns,
            } => {
                s.tables
                    .get_mut(&table.name)
                    .unwrap()
                    .constraints
                    .push(ConstraintDescriptor::PrimaryKey {
                        name: name.clone(),
                        columns: columns.clone(),
                    });
            }
            Operation::AddUniqueConstraint {
                table,
                name,
                columns,
                deferrable,
                initially_deferred,
            } => {
                s.tables
                    .get_mut(&table.name)
                    .unwrap()
                    .constraints
                    .push(ConstraintDescriptor::Unique {
                        name: name.clone(),
                        columns: columns.clone(),
                        deferrable: *deferrable,
                        initially_deferred: *initially_deferred,
                    });
            }
            Operation::AddForeignKey(fk) => {
                s.tables
                    .get_mut(&fk.table.name)
                    .unwrap()
                    .constraints
                    .push(ConstraintDescriptor::ForeignKey {
                        name: fk.name.clone(),
                        columns: fk.columns.clone(),
                        referenced_table: fk.referenced_table.clone(),
                        referenced_columns: fk.referenced_columns.clone(),
                        deferrable: fk.deferrable,
                        initially_deferred: fk.initially_deferred,
                        on_delete: fk.on_delete,
                        on_update: fk.on_update,
                    });
            }
            Operation::AddCheckConstraint { table, name, .. } => {
                s.tables.get_mut(&table.name).unwrap().checks.insert(name.clone());
            }
            Operation::ValidateConstraint { .. }
            | Operation::Backfill(_)
            | Operation::LoadData(_) => {}
            Operation::DropConstraint { table, name } => {
                if let Some(t) = s.tables.get_mut(&table.name) {
                    t.constraints.retain(|c| c.name() != name);
                    t.checks.remove(name);
                }
            }
            Operation::CreateSyncTrigger(trigger) => {
                let name = crate::sync::trigger_name(&trigger.label, &trigger.table);
                s.tables.get_mut(&trigger.table.name).unwrap().triggers.insert(name);
            }
            Operation::DropSyncTrigger { label, table } => {
                if let Some(t) = s.tables.get_mut(&table.name) {
                    t.triggers.remove(&crate::sync::trigger_name(label, table));
                }
            }
            Operation::CopyTable {
                source,
                destination,
            } => {
                let src = s.tables.get(&source.name).unwrap().clone();
                let copy = ModelTable {
                    columns: src.columns.clone(),
                    constraints: src
                        .constraints
                        .iter()
                        .map(|c| rename_constraint(c, &source.name, &destination.name))
                        .collect(),
                    checks: src.checks.clone(),
                    triggers: BTreeSet::new(),
                };
                s.tables.insert(destination.name.clone(), copy);
            }
            Operation::DropTable { table, .. } => {
                s.tables.remove(&table.name);
            }
            Operation::CreateView { view, definition } => {
                s.views.insert(view.name.clone(), definition.clone());
            }
            Operation::DropView { view } => {
                s.views.remove(&view.name);
            }
        }
    }
}

fn rename_in_constraint(c: &mut ConstraintDescriptor, old: &str, new: &str) {
    let columns = match c {
        ConstraintDescriptor::PrimaryKey { columns, .. }
        | ConstraintDescriptor::ForeignKey { columns, .. }
        | ConstraintDescriptor::Unique { columns, .. } => columns,
    };
    for col in columns.iter_mut() {
        if col == old {
            *col = new.to_string();
        }
    }
}

fn rename_constraint(c: &ConstraintDescriptor, old_table: &str, new_table: &str) -> ConstraintDescriptor {
    let mut copy = c.clone();
    let name = match &mut copy {
        ConstraintDescriptor::PrimaryKey { name, .. }
        | ConstraintDescriptor::ForeignKey { name, .. }
        | ConstraintDescriptor::Unique { name, .. } => name,
    };
    *name = name.replace(old_table, new_table);
    copy
}

#[async_trait]
impl Introspector for SchemaModel {
    async fn describe_column(&self, table: &TableRef, column: &str) -> Result<ColumnDescriptor> {
        *self.column_lookups.lock().unwrap() += 1;
        let s = self.snapshot.lock().unwrap();
        let t = s
            .tables
            .get(&table.name)
            .ok_or_else(|| ZdError::not_found("Table", table.to_string()))?;
        let col = t
            .column(column)
            .ok_or_else(|| ZdError::not_found("Column", format!("{}.{}", table, column)))?;
        Ok(ColumnDescriptor {
            data_type: col.data_type.clone(),
            nullable: col.nullable,
            default_value: col.default_value.clone(),
            constraints: t
                .constraints
                .iter()
                .filter(|c| c.columns().iter().any(|n| n == column))
                .cloned()
                .collect(),
        })
    }

    async fn describe_table(&self, table: &TableRef) -> Result<TableDescriptor> {
        let s = self.snapshot.lock().unwrap();
        let t = s
            .tables
            .get(&table.name)
            .ok_or_else(|| ZdError::not_found("Table", table.to_string()))?;
        let primary_column_names = t
            .constraints
            .iter()
            .find_map(|c| match c {
                ConstraintDescriptor::PrimaryKey { columns, .. } => Some(columns.clone()),
                _ => None,
            })
            .unwrap_or_default();
        Ok(TableDescriptor {
            column_names: t.columns.iter().map(|(n, _)| n.clone()).collect(),
            primary_column_names,
        })
    }

    async fn describe_view(&self, view: &TableRef) -> Result<ViewDescriptor> {
        let s = self.snapshot.lock().unwrap();
        s.views
            .get(&view.name)
            .map(|d| ViewDescriptor {
                definition: d.clone(),
            })
            .ok_or_else(|| ZdError::not_found("View", view.to_string()))
    }

    async fn best_row_identifier(&self, table: &TableRef) -> Result<Vec<String>> {
        Ok(self.describe_table(table).await?.primary_column_names)
    }
}
