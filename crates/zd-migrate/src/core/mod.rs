//! Core abstractions for the migration engine.
//!
//! - [`identifier`]: identifier validation, quoting and qualified names
//! - [`schema`]: column, table, view and constraint descriptors
//! - [`operation`]: primitive operations that make up a plan
//! - [`traits`]: introspection, connection and dialect seams

pub mod identifier;
pub mod operation;
pub mod schema;
pub mod traits;

pub use identifier::TableRef;
pub use operation::{ForeignKeySpec, Operation};
pub use schema::{
    ColumnDescriptor, ConstraintDescriptor, ForeignKeyAction, TableDescriptor, ViewDescriptor,
};
pub use traits::{ChunkStatement, Connection, Dialect, Introspector};
