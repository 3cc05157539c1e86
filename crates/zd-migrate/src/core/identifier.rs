//! Identifier validation and quoting for generated DDL.
//!
//! Table, column, constraint and trigger names cannot be bound as statement
//! parameters, so every identifier that ends up in generated SQL goes through
//! [`quote_pg`] (or [`TableRef::render`]). Quoting preserves case, which is
//! what lets `phoneNumber` stay `phoneNumber` instead of being folded.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Result, ZdError};

/// PostgreSQL truncates identifiers at 63 bytes (NAMEDATALEN - 1).
pub const MAX_IDENTIFIER_LENGTH: usize = 63;

/// Validate an identifier before it is quoted into SQL.
///
/// Rejects empty names, names containing a null byte and names longer than
/// [`MAX_IDENTIFIER_LENGTH`] bytes (PostgreSQL would silently truncate them,
/// which breaks the deterministic trigger and constraint naming).
pub fn validate_identifier(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(ZdError::Config("Identifier cannot be empty".to_string()));
    }

    if name.contains('\0') {
        return Err(ZdError::Config(format!(
            "SECURITY: Identifier contains null byte (possible injection attempt): {:?}",
            name
        )));
    }

    if name.len() > MAX_IDENTIFIER_LENGTH {
        return Err(ZdError::Config(format!(
            "Identifier exceeds maximum length of {} bytes (got {} bytes): {:?}",
            MAX_IDENTIFIER_LENGTH,
            name.len(),
            name
        )));
    }

    Ok(())
}

/// Quote a PostgreSQL identifier, doubling embedded double quotes.
pub fn quote_pg(name: &str) -> Result<String> {
    validate_identifier(name)?;
    Ok(format!("\"{}\"", name.replace('"', "\"\"")))
}

/// Qualify a PostgreSQL object name with its schema.
pub fn qualify_pg(schema: &str, name: &str) -> Result<String> {
    Ok(format!("{}.{}", quote_pg(schema)?, quote_pg(name)?))
}

/// Quote a list of column names and join them with `", "`.
pub fn quote_list(columns: &[String]) -> Result<String> {
    let quoted = columns
        .iter()
        .map(|c| quote_pg(c))
        .collect::<Result<Vec<_>>>()?;
    Ok(quoted.join(", "))
}

/// Build a generated object name from parts joined with `_`, truncated the
/// way PostgreSQL would truncate it so the name we later drop by is the name
/// the server actually stored.
pub fn generated_name(parts: &[&str]) -> String {
    let mut name = parts.join("_");
    if name.len() > MAX_IDENTIFIER_LENGTH {
        let mut cut = MAX_IDENTIFIER_LENGTH;
        while !name.is_char_boundary(cut) {
            cut -= 1;
        }
        name.truncate(cut);
    }
    name
}

/// Escape a value for use inside a single-quoted SQL literal.
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// A table or view name with an optional schema.
///
/// Without a schema the name resolves through the session `search_path`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TableRef {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,
    pub name: String,
}

impl TableRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            schema: None,
            name: name.into(),
        }
    }

    pub fn with_schema(schema: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            schema: Some(schema.into()),
            name: name.into(),
        }
    }

    /// Same schema, different object name.
    pub fn sibling(&self, name: impl Into<String>) -> Self {
        Self {
            schema: self.schema.clone(),
            name: name.into(),
        }
    }

    /// Render as a quoted, optionally schema-qualified name.
    pub fn render(&self) -> Result<String> {
        match &self.schema {
            Some(schema) => qualify_pg(schema, &self.name),
            None => quote_pg(&self.name),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(schema) = &self.schema {
            validate_identifier(schema)?;
        }
        validate_identifier(&self.name)
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.schema {
            Some(schema) => write!(f, "{}.{}", schema, self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

/// Screen a CHECK constraint expression before it is embedded in DDL.
///
/// Expressions should be plain boolean predicates. Anything that could
/// terminate the statement or smuggle a second one is rejected.
pub fn validate_check_expression(expression: &str) -> Result<()> {
    validate_sql_fragment("Check constraint", expression)
}

/// Screen a free-form SQL fragment (a check expression, a column type or a
/// default expression) before it is embedded in DDL.
///
/// Rejects semicolons, comment markers, dollar quoting and keywords that
/// have no business inside a predicate, type or default.
pub fn validate_sql_fragment(what: &str, fragment: &str) -> Result<()> {
    if fragment.trim().is_empty() {
        return Err(ZdError::Config(format!("{} cannot be empty", what)));
    }

    if fragment.contains(';') {
        return Err(ZdError::Config(format!(
            "SECURITY: {} contains semicolon (possible injection): {:?}",
            what, fragment
        )));
    }

    if fragment.contains("--") || fragment.contains("/*") || fragment.contains("*/") {
        return Err(ZdError::Config(format!(
            "SECURITY: {} contains SQL comment markers (possible injection): {:?}",
            what, fragment
        )));
    }

    if fragment.contains("$$") {
        return Err(ZdError::Config(format!(
            "SECURITY: {} contains dollar quoting (possible injection): {:?}",
            what, fragment
        )));
    }

    const FORBIDDEN_WORDS: &[&str] = &[
        "select", "insert", "update", "delete", "drop", "alter", "create", "truncate", "grant",
        "revoke", "execute", "copy",
    ];

    let lower = fragment.to_lowercase();
    let words = lower.split(|c: char| !(c.is_alphanumeric() || c == '_'));
    for word in words {
        if FORBIDDEN_WORDS.contains(&word) {
            return Err(ZdError::Config(format!(
                "SECURITY: {} contains forbidden keyword '{}' (possible injection): {:?}",
                what,
                word.to_uppercase(),
                fragment
            )));
        }
    }

    Ok(())
}
