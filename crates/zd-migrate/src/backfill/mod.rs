//! Chunked, throttled, resumable backfill.
//!
//! A backfill repeatedly runs one statement that copies at most
//! `chunk_size` not-yet-copied rows, commits, optionally sleeps, and stops
//! once a chunk affects no rows. The statement only ever selects rows whose
//! destination is still empty, so an interrupted backfill resumes where it
//! stopped when it is run again. There is no checkpoint to keep.
//!
//! Each chunk runs in its own transaction. A failed chunk is rolled back by
//! closing its statement and aborts the job; nothing is retried.

use std::collections::HashSet;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::core::identifier::{quote_pg, TableRef};
use crate::core::traits::{Connection, Introspector};
use crate::error::{Result, ZdError};

/// Default number of rows per chunk.
pub const DEFAULT_CHUNK_SIZE: i64 = 1000;

/// Default pause between chunks, in milliseconds.
pub const DEFAULT_SLEEP_TIME_MS: i64 = 0;

/// What a backfill copies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackfillTarget {
    /// Copy `from_columns[i]` into `to_columns[i]` within one table.
    Columns {
        table: TableRef,
        from_columns: Vec<String>,
        to_columns: Vec<String>,
    },
    /// Copy whole rows from `source` into `destination`.
    Table {
        source: TableRef,
        destination: TableRef,
    },
}

/// A validated backfill job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackfillJob {
    pub target: BackfillTarget,
    pub chunk_size: u64,
    pub throttle_ms: u64,
    /// Row identifier columns. Resolved from the catalog when `None`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub row_identifier: Option<Vec<String>>,
}

/// Counters from one backfill run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BackfillStats {
    /// Chunks that copied at least one row.
    pub chunks: u64,
    /// Total rows affected.
    pub rows: u64,
    /// Chunk statements executed, including the final empty one.
    pub executions: u64,
    /// Wall-clock duration of the run.
    #[serde(skip)]
    pub elapsed: Duration,
}

impl BackfillJob {
    /// Column-to-column job. `chunk_size` and `throttle_ms` come straight
    /// from configuration and are checked here.
    pub fn columns(
        table: TableRef,
        from_columns: Vec<String>,
        to_columns: Vec<String>,
        chunk_size: i64,
        throttle_ms: i64,
    ) -> Result<Self> {
        let mut errors = Vec::new();
        if table.name.is_empty() {
            errors.push("Table is not provided".to_string());
        }
        if from_columns.is_empty() || to_columns.is_empty() {
            errors.push("Both from_columns and to_columns need to be provided".to_string());
        }
        check_settings(chunk_size, throttle_ms, &mut errors);
        if errors.is_empty() {
            check_column_mapping(&from_columns, &to_columns, &mut errors);
        }
        if !errors.is_empty() {
            return Err(ZdError::validation("batch column migration", errors));
        }

        Ok(Self {
            target: BackfillTarget::Columns {
                table,
                from_columns,
                to_columns,
            },
            chunk_size: chunk_size as u64,
            throttle_ms: throttle_ms as u64,
            row_identifier: None,
        })
    }

    /// Table-to-table job.
    pub fn table(
        source: TableRef,
        destination: TableRef,
        chunk_size: i64,
        throttle_ms: i64,
    ) -> Result<Self> {
        let mut errors = Vec::new();
        if source.name.is_empty() {
            errors.push("from_table is not provided".to_string());
        }
        if destination.name.is_empty() {
            errors.push("to_table is not provided".to_string());
        }
        if !source.name.is_empty() && source == destination {
            errors.push(format!("Table {} should not be migrated to itself", source));
        }
        check_settings(chunk_size, throttle_ms, &mut errors);
        if !errors.is_empty() {
            return Err(ZdError::validation("batch table migration", errors));
        }

        Ok(Self {
            target: BackfillTarget::Table {
                source,
                destination,
            },
            chunk_size: chunk_size as u64,
            throttle_ms: throttle_ms as u64,
            row_identifier: None,
        })
    }

    /// Use these columns to match rows instead of asking the catalog.
    pub fn with_row_identifier(mut self, columns: Vec<String>) -> Self {
        self.row_identifier = if columns.is_empty() { None } else { Some(columns) };
        self
    }

    /// The table whose row identifier drives the chunks.
    pub fn key_table(&self) -> &TableRef {
        match &self.target {
            BackfillTarget::Columns { table, .. } => table,
            BackfillTarget::Table { source, .. } => source,
        }
    }

    /// Human readable description for logs and errors.
    pub fn describe(&self) -> String {
        match &self.target {
            BackfillTarget::Columns {
                table,
                from_columns,
                to_columns,
            } => format!(
                "{}({} -> {})",
                table,
                from_columns.join(", "),
                to_columns.join(", ")
            ),
            BackfillTarget::Table {
                source,
                destination,
            } => format!("{} -> {}", source, destination),
        }
    }

    /// Build the chunk statement for the given row identifier.
    pub fn chunk_sql(&self, row_identifier: &[String]) -> Result<String> {
        if row_identifier.is_empty() {
            return Err(ZdError::NoRowIdentifier(self.key_table().to_string()));
        }
        let rid = row_identifier
            .iter()
            .map(|c| quote_pg(c))
            .collect::<Result<Vec<_>>>()?;

        match &self.target {
            BackfillTarget::Columns {
                table,
                from_columns,
                to_columns,
            } => {
                let table = table.render()?;
                let mut assignments = Vec::with_capacity(from_columns.len());
                let mut pending = Vec::with_capacity(from_columns.len());
                for (from, to) in from_columns.iter().zip(to_columns) {
                    let from = quote_pg(from)?;
                    let to = quote_pg(to)?;
                    assignments.push(format!("{} = {}", to, from));
                    pending.push(format!("({} IS NULL AND {} IS NOT NULL)", to, from));
                }
                let rid = rid.join(", ");
                Ok(format!(
                    "UPDATE {table} SET {set} WHERE ({rid}) IN (SELECT {rid} FROM {table} WHERE {pending} LIMIT {limit})",
                    table = table,
                    set = assignments.join(", "),
                    rid = rid,
                    pending = pending.join(" OR "),
                    limit = self.chunk_size
                ))
            }
            BackfillTarget::Table {
                source,
                destination,
            } => {
                let src = source.render()?;
                let dst = destination.render()?;
                let matcher = rid
                    .iter()
                    .map(|k| format!("d.{0} = s.{0}", k))
                    .collect::<Vec<_>>()
                    .join(" AND ");
                Ok(format!(
                    "INSERT INTO {dst} SELECT s.* FROM {src} s WHERE NOT EXISTS (SELECT 1 FROM {dst} d WHERE {matcher}) LIMIT {limit} ON CONFLICT DO NOTHING",
                    dst = dst,
                    src = src,
                    matcher = matcher,
                    limit = self.chunk_size
                ))
            }
        }
    }
}

fn check_settings(chunk_size: i64, throttle_ms: i64, errors: &mut Vec<String>) {
    if chunk_size <= 0 {
        errors.push("chunk_size should be provided as a positive integer".to_string());
    }
    if throttle_ms < 0 {
        errors.push("sleep_time_ms cannot be negative".to_string());
    }
}

fn check_column_mapping(from: &[String], to: &[String], errors: &mut Vec<String>) {
    if has_duplicates(from) {
        errors.push("Duplicate elements in from_columns".to_string());
        return;
    }
    if has_duplicates(to) {
        errors.push("Duplicate elements in to_columns".to_string());
        return;
    }
    if from.len() != to.len() {
        errors.push("Both in and output columns require a 1:1 relationship".to_string());
        return;
    }

    let targets: HashSet<&String> = to.iter().collect();
    for (col, dst) in from.iter().zip(to) {
        if col == dst {
            errors.push(format!("Column {} should not be migrated to itself", col));
        } else if targets.contains(col) {
            errors.push(format!("Migration of {} crosses, which is not possible", col));
        }
    }
}

fn has_duplicates(columns: &[String]) -> bool {
    let mut seen = HashSet::with_capacity(columns.len());
    columns.iter().any(|c| !seen.insert(c))
}

/// Runs backfill jobs over one connection.
pub struct BackfillEngine<'a> {
    connection: &'a dyn Connection,
    catalog: &'a dyn Introspector,
}

impl<'a> BackfillEngine<'a> {
    pub fn new(connection: &'a dyn Connection, catalog: &'a dyn Introspector) -> Self {
        Self {
            connection,
            catalog,
        }
    }

    /// Run `job` until a chunk affects zero rows.
    pub async fn run(&self, job: &BackfillJob) -> Result<BackfillStats> {
        if self.connection.is_closed() {
            return Err(ZdError::NotConnected);
        }

        let start = Instant::now();
        let target = job.describe();
        let row_identifier = self.resolve_row_identifier(job).await?;
        let sql = job.chunk_sql(&row_identifier)?;
        let throttle = Duration::from_millis(job.throttle_ms);

        info!(
            "{}: backfill starting (chunk_size={}, throttle={}ms, row_id={})",
            target,
            job.chunk_size,
            job.throttle_ms,
            row_identifier.join(", ")
        );
        debug!("{}: chunk statement: {}", target, sql);

        let mut stats = BackfillStats::default();
        loop {
            let rows = self
                .run_chunk(&sql)
                .await
                .map_err(|e| ZdError::backfill(target.clone(), stats.chunks, e))?;
            stats.executions += 1;

            if rows == 0 {
                break;
            }
            stats.chunks += 1;
            stats.rows += rows;
            debug!(
                "{}: chunk {} committed ({} rows, {} total)",
                target, stats.chunks, rows, stats.rows
            );

            if !throttle.is_zero() {
                tokio::time::sleep(throttle).await;
            }
        }

        stats.elapsed = start.elapsed();
        info!(
            "{}: backfill complete ({} rows in {} chunks, {:.1}s)",
            target,
            stats.rows,
            stats.chunks,
            stats.elapsed.as_secs_f64()
        );
        Ok(stats)
    }

    async fn resolve_row_identifier(&self, job: &BackfillJob) -> Result<Vec<String>> {
        if let Some(columns) = &job.row_identifier {
            if !columns.is_empty() {
                return Ok(columns.clone());
            }
        }

        let table = job.key_table();
        let best = self.catalog.best_row_identifier(table).await?;
        if !best.is_empty() {
            return Ok(best);
        }

        let pk = self.catalog.describe_table(table).await?.primary_column_names;
        if pk.is_empty() {
            return Err(ZdError::NoRowIdentifier(table.to_string()));
        }
        Ok(pk)
    }

    /// Prepare, execute and commit one chunk. The statement is closed on
    /// every path once it was prepared.
    async fn run_chunk(&self, sql: &str) -> Result<u64> {
        let mut stmt = self.connection.prepare(sql).await?;
        let outcome = match stmt.execute().await {
            Ok(rows) => self.connection.commit().await.map(|_| rows),
            Err(e) => Err(e),
        };
        let closed = stmt.close().await;
        let rows = outcome?;
        closed?;
        Ok(rows)
    }
}
