//! SQL dialects and database kinds.
//!
//! - [`PostgresDialect`]: renders every primitive operation
//! - [`GenericDialect`]: renders only the one-shot changes, for databases
//!   where zero-downtime mode is a no-op
//!
//! Use [`DatabaseKind::dialect`] to pick the right one for a connection.

mod generic;
mod postgres;

use std::fmt;

use crate::core::identifier::TableRef;
use crate::core::operation::Operation;
use crate::core::traits::Dialect;
use crate::error::{Result, ZdError};

pub use generic::GenericDialect;
pub use postgres::PostgresDialect;

/// Kind of database behind a connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DatabaseKind {
    Postgres,
    Other(String),
}

impl DatabaseKind {
    /// Parse the configured database type. Anything that is not a known
    /// PostgreSQL alias is carried as `Other`.
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_lowercase().as_str() {
            "postgres" | "postgresql" | "pg" => DatabaseKind::Postgres,
            other => DatabaseKind::Other(other.to_string()),
        }
    }

    /// Whether expand/contract plans are generated for this kind.
    pub fn supports_zero_downtime(&self) -> bool {
        matches!(self, DatabaseKind::Postgres)
    }

    pub fn dialect(&self) -> Box<dyn Dialect> {
        match self {
            DatabaseKind::Postgres => Box::new(PostgresDialect::new()),
            DatabaseKind::Other(name) => Box::new(GenericDialect::new(name.clone())),
        }
    }
}

impl fmt::Display for DatabaseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DatabaseKind::Postgres => write!(f, "postgres"),
            DatabaseKind::Other(name) => write!(f, "{}", name),
        }
    }
}

/// Render a one-shot change. Shared by both dialects; `None` for anything
/// that is not a one-shot change.
fn render_baseline(op: &Operation) -> Result<Option<String>> {
    let sql = match op {
        Operation::RenameColumn {
            table,
            column,
            new_column,
        } => format!(
            "ALTER TABLE {} RENAME COLUMN {} TO {}",
            table.render()?,
            quote(column)?,
            quote(new_column)?
        ),
        Operation::ModifyDataType {
            table,
            column,
            new_data_type,
        } => format!(
            "ALTER TABLE {} ALTER COLUMN {} TYPE {}",
            table.render()?,
            quote(column)?,
            new_data_type
        ),
        Operation::RenameTable { table, new_name } => {
            format!("ALTER TABLE {} RENAME TO {}", table.render()?, quote(new_name)?)
        }
        Operation::RenameView { view, new_name } => {
            format!("ALTER VIEW {} RENAME TO {}", view.render()?, quote(new_name)?)
        }
        _ => return Ok(None),
    };
    Ok(Some(sql))
}

fn quote(name: &str) -> Result<String> {
    crate::core::identifier::quote_pg(name)
}

pub(crate) fn unsupported(dialect: &str, op: &Operation) -> ZdError {
    ZdError::Unsupported(format!(
        "{} cannot be rendered by the {} dialect",
        op.kind(),
        dialect
    ))
}

/// `ALTER TABLE` prefix tolerant of a table that is already gone.
fn alter_table_if_exists(table: &TableRef) -> Result<String> {
    Ok(format!("ALTER TABLE IF EXISTS {}", table.render()?))
}
