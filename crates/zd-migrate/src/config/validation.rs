//! Configuration validation.

use std::collections::HashSet;

use super::Config;
use crate::drivers::common::SslMode;
use crate::error::{Result, ZdError};
use crate::mode::{MigrationMode, LEGACY_MODE_KEY, MODE_KEY};

/// Validate the configuration.
pub fn validate(config: &Config) -> Result<()> {
    let db = &config.database;
    if db.host.is_empty() {
        return Err(ZdError::Config("database.host is required".into()));
    }
    if db.database.is_empty() {
        return Err(ZdError::Config("database.database is required".into()));
    }
    if db.user.is_empty() {
        return Err(ZdError::Config("database.user is required".into()));
    }
    if db.port == 0 {
        return Err(ZdError::Config("database.port must be at least 1".into()));
    }
    SslMode::parse(&db.ssl_mode)?;

    check_mode_parameter("parameters", &config.parameters)?;

    let mut seen = HashSet::new();
    for change_set in &config.changes {
        if change_set.id.trim().is_empty() {
            return Err(ZdError::Config("changes[].id is required".into()));
        }
        if !seen.insert(change_set.id.as_str()) {
            return Err(ZdError::Config(format!(
                "Duplicate change set id '{}'",
                change_set.id
            )));
        }
        check_mode_parameter(&change_set.id, &change_set.parameters)?;
    }

    Ok(())
}

/// An unknown mode would silently fall back to `off`; reject it up front.
fn check_mode_parameter(
    scope: &str,
    parameters: &std::collections::BTreeMap<String, String>,
) -> Result<()> {
    for key in [MODE_KEY, LEGACY_MODE_KEY] {
        if let Some(value) = parameters.get(key) {
            if MigrationMode::parse(value).is_none() {
                return Err(ZdError::Config(format!(
                    "{}: {} must be one of off, expand, contract, got '{}'",
                    scope, key, value
                )));
            }
        }
    }
    Ok(())
}
