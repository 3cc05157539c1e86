//! Core traits for the migration engine.
//!
//! - [`Introspector`]: reads column, table and view metadata from the catalog
//! - [`Connection`]: executes statements, runs chunked backfill statements
//!   and streams bulk loads
//! - [`ChunkStatement`]: a prepared chunk that must be closed after use
//! - [`Dialect`]: renders primitive operations to SQL
//!
//! Generators and the backfill engine only see these traits, which keeps
//! them testable with in-memory implementations.

use async_trait::async_trait;
use tokio::io::AsyncRead;

use super::identifier::TableRef;
use super::operation::Operation;
use super::schema::{ColumnDescriptor, TableDescriptor, ViewDescriptor};
use crate::dialect::DatabaseKind;
use crate::error::Result;

/// Read schema metadata from the live catalog.
///
/// Implementations fail with `ZdError::NotConnected` when the connection is
/// gone, `ZdError::UnsupportedDatabase` for database kinds they cannot read
/// and `ZdError::NotFound` for missing objects.
#[async_trait]
pub trait Introspector: Send + Sync {
    /// Type, nullability, default and owning constraints of a column.
    async fn describe_column(&self, table: &TableRef, column: &str) -> Result<ColumnDescriptor>;

    /// Column and primary key lists of a table.
    async fn describe_table(&self, table: &TableRef) -> Result<TableDescriptor>;

    /// Definition of a view.
    async fn describe_view(&self, view: &TableRef) -> Result<ViewDescriptor>;

    /// Columns of the best unique, all-not-null index (primary key first).
    ///
    /// Returns an empty list when the table has no such index.
    async fn best_row_identifier(&self, table: &TableRef) -> Result<Vec<String>>;
}

/// A single database connection owned by one migration invocation.
#[async_trait]
pub trait Connection: Send + Sync {
    fn database_kind(&self) -> DatabaseKind;

    fn is_closed(&self) -> bool;

    /// Execute one statement outside of chunk handling (autocommit).
    async fn execute(&self, sql: &str) -> Result<u64>;

    /// Open a transaction and prepare a chunk statement in it.
    async fn prepare(&self, sql: &str) -> Result<Box<dyn ChunkStatement>>;

    /// Commit the transaction opened by [`Connection::prepare`].
    async fn commit(&self) -> Result<()>;

    /// Run a `COPY ... FROM STDIN` statement fed from `source`, returning
    /// the number of rows copied.
    async fn copy_in(&self, sql: &str, source: Box<dyn AsyncRead + Send + Unpin>) -> Result<u64>;
}

/// One prepared chunk of a backfill.
#[async_trait]
pub trait ChunkStatement: Send {
    /// Run the chunk, returning the number of affected rows.
    async fn execute(&mut self) -> Result<u64>;

    /// Release the statement. Rolls back if the chunk was not committed.
    async fn close(self: Box<Self>) -> Result<()>;
}

/// SQL rendering strategy for a database kind.
pub trait Dialect: Send + Sync {
    /// Dialect identifier (e.g. "postgres").
    fn name(&self) -> &str;

    /// Quote an identifier.
    fn quote_ident(&self, name: &str) -> Result<String>;

    /// Whether this dialect can render `op`.
    fn supports(&self, op: &Operation) -> bool;

    /// Render `op` as one or more statements, in execution order.
    ///
    /// Backfill operations are executed by the engine, not rendered; a
    /// dialect returns `ZdError::Unsupported` for them.
    fn render(&self, op: &Operation) -> Result<Vec<String>>;
}
