//! Database driver implementations.
//!
//! - [`postgres`]: the only database with a live driver
//! - [`common`]: shared utilities (TLS)
//!
//! Other database kinds are planned offline: their plans consist of
//! one-shot changes that need no catalog lookups, so they get an
//! [`OfflineCatalog`] instead of a session.

pub mod common;
pub mod postgres;

use async_trait::async_trait;

pub use common::SslMode;
pub use postgres::PgSession;

use crate::core::identifier::TableRef;
use crate::core::schema::{ColumnDescriptor, TableDescriptor, ViewDescriptor};
use crate::core::traits::Introspector;
use crate::dialect::DatabaseKind;
use crate::error::{Result, ZdError};

/// Introspector for databases without a driver. Every lookup fails.
#[derive(Debug, Clone)]
pub struct OfflineCatalog {
    kind: DatabaseKind,
}

impl OfflineCatalog {
    pub fn new(kind: DatabaseKind) -> Self {
        Self { kind }
    }

    fn unsupported(&self) -> ZdError {
        ZdError::UnsupportedDatabase(self.kind.to_string())
    }
}

#[async_trait]
impl Introspector for OfflineCatalog {
    async fn describe_column(&self, _table: &TableRef, _column: &str) -> Result<ColumnDescriptor> {
        Err(self.unsupported())
    }

    async fn describe_table(&self, _table: &TableRef) -> Result<TableDescriptor> {
        Err(self.unsupported())
    }

    async fn describe_view(&self, _view: &TableRef) -> Result<ViewDescriptor> {
        Err(self.unsupported())
    }

    async fn best_row_identifier(&self, _table: &TableRef) -> Result<Vec<String>> {
        Err(self.unsupported())
    }
}
