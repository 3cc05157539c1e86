//! Error types for the zero-downtime migration library.

use thiserror::Error;

/// Exit code for configuration and validation errors.
pub const EXIT_CONFIG_ERROR: u8 = 1;
/// Exit code for connectivity errors.
pub const EXIT_CONNECTION_ERROR: u8 = 2;
/// Exit code for statement or backfill execution errors.
pub const EXIT_EXECUTION_ERROR: u8 = 3;
/// Exit code for unsupported operations (including impossible rollbacks).
pub const EXIT_UNSUPPORTED: u8 = 4;
/// Exit code for file system errors.
pub const EXIT_IO_ERROR: u8 = 7;

/// Main error type for migration operations.
#[derive(Error, Debug)]
pub enum ZdError {
    /// Configuration error (invalid YAML, missing fields, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// A change failed validation before any statement was issued.
    #[error("Validation failed for {subject}: {}", .errors.join("; "))]
    Validation {
        subject: String,
        errors: Vec<String>,
    },

    /// No usable connection (absent or already closed).
    #[error("Not connected to database")]
    NotConnected,

    /// Introspection or execution was requested against a database kind
    /// that does not support it.
    #[error("Unsupported database: {0}")]
    UnsupportedDatabase(String),

    /// A catalog object could not be found.
    #[error("{kind} {name} not found")]
    NotFound { kind: &'static str, name: String },

    /// No row identifier could be resolved for a backfill.
    #[error("Table {0} has no primary key or unique not-null index to match rows by")]
    NoRowIdentifier(String),

    /// The requested operation is not supported by this engine.
    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    /// A rollback was requested for a terminal contract step.
    #[error("Rollback impossible: {0}")]
    RollbackImpossible(String),

    /// A backfill chunk failed.
    #[error("Backfill of {target} failed after {chunks_committed} committed chunks: {source}")]
    Backfill {
        target: String,
        chunks_committed: u64,
        #[source]
        source: Box<ZdError>,
    },

    /// Database query or connection error
    #[error("Database error: {0}")]
    Database(#[from] tokio_postgres::Error),

    /// IO error (file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ZdError {
    /// Create a Validation error for a subject with collected messages.
    pub fn validation(subject: impl Into<String>, errors: Vec<String>) -> Self {
        ZdError::Validation {
            subject: subject.into(),
            errors,
        }
    }

    /// Create a NotFound error.
    pub fn not_found(kind: &'static str, name: impl Into<String>) -> Self {
        ZdError::NotFound {
            kind,
            name: name.into(),
        }
    }

    /// Wrap a chunk failure with the backfill target and progress reached.
    pub fn backfill(target: impl Into<String>, chunks_committed: u64, source: ZdError) -> Self {
        ZdError::Backfill {
            target: target.into(),
            chunks_committed,
            source: Box::new(source),
        }
    }

    /// Whether this error means "the connection is unusable".
    pub fn is_connectivity(&self) -> bool {
        match self {
            ZdError::NotConnected => true,
            ZdError::Database(e) => e.is_closed(),
            _ => false,
        }
    }

    /// Process exit code for the CLI.
    pub fn exit_code(&self) -> u8 {
        match self {
            ZdError::Config(_)
            | ZdError::Validation { .. }
            | ZdError::Yaml(_)
            | ZdError::Json(_) => EXIT_CONFIG_ERROR,
            ZdError::NotConnected => EXIT_CONNECTION_ERROR,
            ZdError::Database(e) if e.is_closed() => EXIT_CONNECTION_ERROR,
            ZdError::Unsupported(_)
            | ZdError::UnsupportedDatabase(_)
            | ZdError::RollbackImpossible(_) => EXIT_UNSUPPORTED,
            ZdError::Io(_) => EXIT_IO_ERROR,
            ZdError::Backfill { source, .. } if source.is_connectivity() => EXIT_CONNECTION_ERROR,
            ZdError::NotFound { .. }
            | ZdError::NoRowIdentifier(_)
            | ZdError::Backfill { .. }
            | ZdError::Database(_) => EXIT_EXECUTION_ERROR,
        }
    }

    /// Format error with full details including error chain
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }
}

/// Result type alias for migration operations.
pub type Result<T> = std::result::Result<T, ZdError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_message_joins_errors() {
        let err = ZdError::validation(
            "batch_column_migration",
            vec!["Table is not provided".into(), "sleepTime cannot be negative".into()],
        );
        assert_eq!(
            err.to_string(),
            "Validation failed for batch_column_migration: Table is not provided; sleepTime cannot be negative"
        );
        assert_eq!(err.exit_code(), EXIT_CONFIG_ERROR);
    }

    #[test]
    fn test_backfill_error_keeps_progress_and_cause() {
        let err = ZdError::backfill("customer(phone -> phoneNumber)", 2, ZdError::NotConnected);
        assert!(err.to_string().contains("after 2 committed chunks"));
        assert_eq!(err.exit_code(), EXIT_CONNECTION_ERROR);

        let detailed = err.format_detailed();
        assert!(detailed.contains("Caused by:"));
        assert!(detailed.contains("Not connected to database"));
    }

    #[test]
    fn test_rollback_impossible_is_distinct_from_execution() {
        let rollback = ZdError::RollbackImpossible("contract".into());
        let exec = ZdError::backfill("t", 0, ZdError::Unsupported("x".into()));
        assert_eq!(rollback.exit_code(), EXIT_UNSUPPORTED);
        assert_eq!(exec.exit_code(), EXIT_EXECUTION_ERROR);
    }

    #[test]
    fn test_io_exit_code() {
        let err = ZdError::Io(std::io::Error::new(std::io::ErrorKind::NotFound, "missing"));
        assert_eq!(err.exit_code(), EXIT_IO_ERROR);
    }
}
