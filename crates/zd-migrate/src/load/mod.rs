//! Bulk CSV loads into an existing table.
//!
//! The header line is read when the plan is built, so the plan lists the
//! target columns. The file is streamed through `COPY ... FROM STDIN` when
//! the plan runs; it only has to exist on the machine running the
//! migration.

use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::change::{check_identifier, finish_validation};
use crate::core::identifier::{quote_list, quote_literal, TableRef};
use crate::core::traits::Connection;
use crate::error::{Result, ZdError};

pub const DEFAULT_SEPARATOR: &str = ",";
pub const DEFAULT_QUOTE: &str = "\"";
pub const DEFAULT_ENCODING: &str = "utf-8";

/// Cell text loaded as NULL.
pub const NULL_MARKER: &str = "\\N";

/// Stand-in quote byte when quoting is switched off. COPY always needs one.
const NO_QUOTE: u8 = 0x01;

/// A configured load. Column names come from the file header unless
/// `column_names` replaces them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadData {
    pub table: TableRef,
    pub file: String,
    pub separator: String,
    /// Empty disables quoting.
    pub quote: String,
    pub encoding: String,
    pub column_names: Option<Vec<String>>,
}

impl LoadData {
    pub fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();
        check_identifier("table", &self.table.name, &mut errors);
        if self.file.trim().is_empty() {
            errors.push("file is required".to_string());
        } else if self.file.ends_with(".gz") {
            errors.push("file: compressed files are not supported".to_string());
        }
        if let Err(e) = separator_byte(&self.separator) {
            errors.push(e);
        }
        if let Err(e) = quote_byte(&self.quote) {
            errors.push(e);
        }
        if self.encoding.is_empty()
            || !self
                .encoding
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            errors.push(format!("encoding: '{}' is not an encoding name", self.encoding));
        }
        if let Some(names) = &self.column_names {
            for name in names {
                check_identifier("column_names", name.trim(), &mut errors);
            }
        }
        finish_validation("load_large_data", errors)
    }

    /// Read the header line and fix the column list.
    pub fn read_header(&self) -> Result<LoadDataJob> {
        let delimiter = separator_byte(&self.separator).map_err(ZdError::Config)?;
        let quote = quote_byte(&self.quote).map_err(ZdError::Config)?;

        let mut builder = csv::ReaderBuilder::new();
        builder.delimiter(delimiter).has_headers(true);
        match quote {
            Some(q) => {
                builder.quote(q);
            }
            None => {
                builder.quoting(false);
            }
        }
        let mut reader = builder
            .from_path(&self.file)
            .map_err(|e| csv_error(&self.file, e))?;
        let header: Vec<String> = reader
            .byte_headers()
            .map_err(|e| csv_error(&self.file, e))?
            .iter()
            .map(|h| String::from_utf8_lossy(h).trim().to_string())
            .collect();

        if header.is_empty() {
            return Err(ZdError::Config(format!("Data file {} is empty", self.file)));
        }

        let columns = match &self.column_names {
            Some(names) if names.len() != header.len() => {
                return Err(ZdError::Config(format!(
                    "{}: column_names lists {} columns but the header has {} ({})",
                    self.file,
                    names.len(),
                    header.len(),
                    header.join(", ")
                )));
            }
            Some(names) => names.iter().map(|n| n.trim().to_string()).collect(),
            None => header,
        };
        if let Some(i) = columns.iter().position(String::is_empty) {
            return Err(ZdError::Config(format!(
                "{}: header column {} has no name",
                self.file,
                i + 1
            )));
        }

        Ok(LoadDataJob {
            table: self.table.clone(),
            file: self.file.clone(),
            columns,
            delimiter,
            quote,
            encoding: self.encoding.clone(),
        })
    }
}

/// A load with its column list resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadDataJob {
    pub table: TableRef,
    pub file: String,
    pub columns: Vec<String>,
    pub delimiter: u8,
    pub quote: Option<u8>,
    pub encoding: String,
}

impl LoadDataJob {
    /// The `COPY ... FROM STDIN` statement. The header line is skipped by
    /// the server.
    pub fn copy_sql(&self) -> Result<String> {
        Ok(format!(
            "COPY {} ({}) FROM STDIN (FORMAT csv, HEADER true, DELIMITER {}, QUOTE {}, NULL {}, ENCODING {})",
            self.table.render()?,
            quote_list(&self.columns)?,
            byte_literal(self.delimiter),
            byte_literal(self.quote.unwrap_or(NO_QUOTE)),
            quote_literal(NULL_MARKER),
            quote_literal(&self.encoding)
        ))
    }
}

/// What one load did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LoadStats {
    pub file: String,
    pub rows: u64,
}

/// Stream `file` into the server with the rendered `COPY` statement.
pub async fn run(connection: &dyn Connection, sql: &str, file: &str) -> Result<LoadStats> {
    let start = Instant::now();
    let source = tokio::fs::File::open(file).await?;
    let rows = connection.copy_in(sql, Box::new(source)).await?;
    info!(
        "Loaded {} rows from {} in {:.1}s",
        rows,
        file,
        start.elapsed().as_secs_f64()
    );
    Ok(LoadStats {
        file: file.to_string(),
        rows,
    })
}

fn separator_byte(value: &str) -> std::result::Result<u8, String> {
    match value {
        "\\t" | "\t" => Ok(b'\t'),
        v if v.len() == 1 && v.is_ascii() => Ok(v.as_bytes()[0]),
        v => Err(format!("separator must be one ASCII character, got '{}'", v)),
    }
}

fn quote_byte(value: &str) -> std::result::Result<Option<u8>, String> {
    match value.trim() {
        "" => Ok(None),
        v if v.len() == 1 && v.is_ascii() => Ok(Some(v.as_bytes()[0])),
        v => Err(format!("quote must be one ASCII character, got '{}'", v)),
    }
}

fn byte_literal(b: u8) -> String {
    match b {
        b'\t' => "E'\\t'".to_string(),
        b'\\' => "E'\\\\'".to_string(),
        b'\'' => "''''".to_string(),
        b if b == b' ' || b.is_ascii_graphic() => format!("'{}'", b as char),
        b => format!("E'\\x{:02x}'", b),
    }
}

fn csv_error(file: &str, e: csv::Error) -> ZdError {
    match e.into_kind() {
        csv::ErrorKind::Io(io) => ZdError::Io(io),
        other => ZdError::Config(format!("{}: unreadable CSV header: {:?}", file, other)),
    }
}
