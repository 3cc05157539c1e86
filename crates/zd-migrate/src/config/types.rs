//! Configuration type definitions.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::backfill::{BackfillJob, DEFAULT_CHUNK_SIZE, DEFAULT_SLEEP_TIME_MS};
use crate::change::{
    BatchSettings, ModifyDataType, RenameColumn, RenameTableUsingCopy, RenameTableUsingView,
    RenameView, ZdChange,
};
use crate::core::identifier::TableRef;
use crate::error::Result;
use crate::load::{LoadData, DEFAULT_ENCODING, DEFAULT_QUOTE, DEFAULT_SEPARATOR};
use crate::migration::Change;
use crate::mode::MigrationConfig;

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Database the changes are applied to.
    pub database: DatabaseConfig,

    /// Run-scoped parameters such as `zd-mode`.
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,

    /// Change sets, applied in order.
    #[serde(default)]
    pub changes: Vec<ChangeSet>,
}

impl Config {
    /// Parameters for one change set: the global ones, overridden by the
    /// change set's own.
    pub fn migration_config(&self, change_set: &ChangeSet) -> MigrationConfig {
        let mut parameters = self.parameters.clone();
        parameters.extend(
            change_set
                .parameters
                .iter()
                .map(|(k, v)| (k.clone(), v.clone())),
        );
        MigrationConfig::new(parameters)
    }
}

/// Database connection configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Database type. Only "postgres" gets zero-downtime plans; anything else
    /// receives the plain one-shot changes.
    #[serde(default = "default_postgres")]
    pub r#type: String,

    /// Database host.
    pub host: String,

    /// Database port (default: 5432).
    #[serde(default = "default_pg_port")]
    pub port: u16,

    /// Database name.
    pub database: String,

    /// Username.
    pub user: String,

    /// Password.
    #[serde(default, skip_serializing)]
    pub password: String,

    /// SSL mode (default: "require").
    #[serde(default = "default_require")]
    pub ssl_mode: String,
}

impl fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("type", &self.r#type)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .field("ssl_mode", &self.ssl_mode)
            .finish()
    }
}

/// One entry of the change list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeSet {
    /// Identifier used in logs and results.
    pub id: String,

    /// Parameters overriding the global ones for this change set.
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,

    /// The change itself, written as a single-key map
    /// (`rename_column: {...}`).
    #[serde(with = "serde_yaml::with::singleton_map")]
    pub change: ChangeSpec,
}

/// A change as written in the configuration file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeSpec {
    RenameColumn {
        table: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        schema: Option<String>,
        old_column: String,
        new_column: String,
        #[serde(default = "default_chunk_size")]
        chunk_size: i64,
        #[serde(default = "default_sleep_time_ms")]
        sleep_time_ms: i64,
    },
    ModifyDataType {
        table: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        schema: Option<String>,
        column: String,
        /// Column that receives the new type and replaces `column`.
        new_column: String,
        new_data_type: String,
        #[serde(default = "default_chunk_size")]
        chunk_size: i64,
        #[serde(default = "default_sleep_time_ms")]
        sleep_time_ms: i64,
    },
    RenameTableUsingCopy {
        table: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        schema: Option<String>,
        new_table: String,
        #[serde(default = "default_chunk_size")]
        chunk_size: i64,
        #[serde(default = "default_sleep_time_ms")]
        sleep_time_ms: i64,
    },
    RenameTableUsingView {
        table: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        schema: Option<String>,
        new_table: String,
    },
    RenameView {
        view: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        schema: Option<String>,
        new_view: String,
    },
    BatchColumnMigration {
        table: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        schema: Option<String>,
        from_columns: Vec<String>,
        to_columns: Vec<String>,
        /// Row identifier columns. Looked up in the catalog when absent.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        row_id: Option<Vec<String>>,
        #[serde(default = "default_chunk_size")]
        chunk_size: i64,
        #[serde(default = "default_sleep_time_ms")]
        sleep_time_ms: i64,
    },
    BatchTableMigration {
        from_table: String,
        to_table: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        schema: Option<String>,
        #[serde(default = "default_chunk_size")]
        chunk_size: i64,
        #[serde(default = "default_sleep_time_ms")]
        sleep_time_ms: i64,
    },
    AddCheckConstraint {
        table: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        schema: Option<String>,
        name: String,
        expression: String,
        /// Validate existing rows now (default: true).
        #[serde(default = "default_true")]
        validate: bool,
    },
    /// Load a CSV file, read on the machine running the migration, into an
    /// existing table.
    LoadLargeData {
        table: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        schema: Option<String>,
        file: String,
        #[serde(default = "default_separator")]
        separator: String,
        /// Quote character. Empty disables quoting.
        #[serde(default = "default_quote")]
        quote: String,
        #[serde(default = "default_encoding")]
        encoding: String,
        /// Target columns, in file order. The header names them when absent.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        column_names: Option<Vec<String>>,
    },
}

fn table_ref(schema: &Option<String>, name: &str) -> TableRef {
    match schema {
        Some(schema) => TableRef::with_schema(schema.clone(), name),
        None => TableRef::new(name),
    }
}

impl ChangeSpec {
    /// Build the engine-level change. Batch settings are checked here; the
    /// rest is checked when the migration is built.
    pub fn into_change(&self) -> Result<Change> {
        let change = match self {
            ChangeSpec::RenameColumn {
                table,
                schema,
                old_column,
                new_column,
                chunk_size,
                sleep_time_ms,
            } => Change::ZeroDowntime(ZdChange::RenameColumn(RenameColumn {
                table: table_ref(schema, table),
                old_column: old_column.clone(),
                new_column: new_column.clone(),
                batch: BatchSettings {
                    chunk_size: *chunk_size,
                    sleep_time_ms: *sleep_time_ms,
                },
            })),
            ChangeSpec::ModifyDataType {
                table,
                schema,
                column,
                new_column,
                new_data_type,
                chunk_size,
                sleep_time_ms,
            } => Change::ZeroDowntime(ZdChange::ModifyDataType(ModifyDataType {
                table: table_ref(schema, table),
                column: column.clone(),
                new_column: new_column.clone(),
                new_data_type: new_data_type.clone(),
                batch: BatchSettings {
                    chunk_size: *chunk_size,
                    sleep_time_ms: *sleep_time_ms,
                },
            })),
            ChangeSpec::RenameTableUsingCopy {
                table,
                schema,
                new_table,
                chunk_size,
                sleep_time_ms,
            } => Change::ZeroDowntime(ZdChange::RenameTableUsingCopy(RenameTableUsingCopy {
                table: table_ref(schema, table),
                new_name: new_table.clone(),
                batch: BatchSettings {
                    chunk_size: *chunk_size,
                    sleep_time_ms: *sleep_time_ms,
                },
            })),
            ChangeSpec::RenameTableUsingView {
                table,
                schema,
                new_table,
            } => Change::ZeroDowntime(ZdChange::RenameTableUsingView(RenameTableUsingView {
                table: table_ref(schema, table),
                new_name: new_table.clone(),
            })),
            ChangeSpec::RenameView {
                view,
                schema,
                new_view,
            } => Change::ZeroDowntime(ZdChange::RenameView(RenameView {
                view: table_ref(schema, view),
                new_name: new_view.clone(),
            })),
            ChangeSpec::BatchColumnMigration {
                table,
                schema,
                from_columns,
                to_columns,
                row_id,
                chunk_size,
                sleep_time_ms,
            } => {
                let job = BackfillJob::columns(
                    table_ref(schema, table),
                    from_columns.clone(),
                    to_columns.clone(),
                    *chunk_size,
                    *sleep_time_ms,
                )?;
                Change::Batch(job.with_row_identifier(row_id.clone().unwrap_or_default()))
            }
            ChangeSpec::BatchTableMigration {
                from_table,
                to_table,
                schema,
                chunk_size,
                sleep_time_ms,
            } => Change::Batch(BackfillJob::table(
                table_ref(schema, from_table),
                table_ref(schema, to_table),
                *chunk_size,
                *sleep_time_ms,
            )?),
            ChangeSpec::AddCheckConstraint {
                table,
                schema,
                name,
                expression,
                validate,
            } => Change::CheckConstraint {
                table: table_ref(schema, table),
                name: name.clone(),
                expression: expression.clone(),
                validate: *validate,
            },
            ChangeSpec::LoadLargeData {
                table,
                schema,
                file,
                separator,
                quote,
                encoding,
                column_names,
            } => Change::LoadData(LoadData {
                table: table_ref(schema, table),
                file: file.clone(),
                separator: separator.clone(),
                quote: quote.clone(),
                encoding: encoding.clone(),
                column_names: column_names.clone(),
            }),
        };
        Ok(change)
    }
}

// Default value functions for serde
fn default_postgres() -> String {
    "postgres".to_string()
}

fn default_pg_port() -> u16 {
    5432
}

fn default_require() -> String {
    "require".to_string()
}

fn default_chunk_size() -> i64 {
    DEFAULT_CHUNK_SIZE
}

fn default_sleep_time_ms() -> i64 {
    DEFAULT_SLEEP_TIME_MS
}

fn default_true() -> bool {
    true
}

fn default_separator() -> String {
    DEFAULT_SEPARATOR.to_string()
}

fn default_quote() -> String {
    DEFAULT_QUOTE.to_string()
}

fn default_encoding() -> String {
    DEFAULT_ENCODING.to_string()
}
