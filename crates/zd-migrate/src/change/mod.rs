//! Expand/contract generators, one per kind of schema change.
//!
//! Every kind implements [`ExpandContract`]. [`ZdChange`] is the closed set
//! of kinds; [`ZdChange::generator`] is the single place that dispatches on
//! the kind.

mod column;
mod table;
mod view;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::backfill::{DEFAULT_CHUNK_SIZE, DEFAULT_SLEEP_TIME_MS};
use crate::core::operation::Operation;
use crate::core::traits::Introspector;
use crate::error::{Result, ZdError};

pub use column::{ModifyDataType, RenameColumn};
pub use table::{RenameTableUsingCopy, RenameTableUsingView};
pub use view::RenameView;

/// Labels of the sync triggers installed by expand.
pub(crate) const FORWARD_UPDATE: &str = "t1";
pub(crate) const FORWARD_INSERT: &str = "t2";
pub(crate) const BACKWARD_UPDATE: &str = "t3";

/// Backfill tuning carried by changes that copy data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSettings {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: i64,
    #[serde(default = "default_sleep_time_ms")]
    pub sleep_time_ms: i64,
}

fn default_chunk_size() -> i64 {
    DEFAULT_CHUNK_SIZE
}

fn default_sleep_time_ms() -> i64 {
    DEFAULT_SLEEP_TIME_MS
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            sleep_time_ms: DEFAULT_SLEEP_TIME_MS,
        }
    }
}

impl BatchSettings {
    pub(crate) fn check(&self, errors: &mut Vec<String>) {
        if self.chunk_size <= 0 {
            errors.push("chunk_size should be provided as a positive integer".to_string());
        }
        if self.sleep_time_ms < 0 {
            errors.push("sleep_time_ms cannot be negative".to_string());
        }
    }
}

/// Statement generation for one kind of change.
///
/// `original` is the one-shot change. `expand`, `contract` and
/// `expand_inverse` look at the live catalog, so they are async.
#[async_trait]
pub trait ExpandContract: Send + Sync {
    /// Kind name used in logs and errors.
    fn name(&self) -> &'static str;

    /// Check the change's own parameters. Runs before anything is generated.
    fn validate(&self) -> Result<()>;

    fn original(&self) -> Vec<Operation>;

    fn original_inverse(&self) -> Result<Vec<Operation>>;

    async fn expand(&self, catalog: &dyn Introspector) -> Result<Vec<Operation>>;

    async fn contract(&self, catalog: &dyn Introspector) -> Result<Vec<Operation>>;

    async fn expand_inverse(&self, catalog: &dyn Introspector) -> Result<Vec<Operation>>;
}

/// A schema change that can be applied in zero-downtime mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ZdChange {
    RenameColumn(RenameColumn),
    ModifyDataType(ModifyDataType),
    RenameTableUsingCopy(RenameTableUsingCopy),
    RenameTableUsingView(RenameTableUsingView),
    RenameView(RenameView),
}

impl ZdChange {
    pub fn generator(&self) -> &dyn ExpandContract {
        match self {
            ZdChange::RenameColumn(c) => c,
            ZdChange::ModifyDataType(c) => c,
            ZdChange::RenameTableUsingCopy(c) => c,
            ZdChange::RenameTableUsingView(c) => c,
            ZdChange::RenameView(c) => c,
        }
    }
}

/// Collect validation messages into one error for `subject`.
pub(crate) fn finish_validation(subject: &str, errors: Vec<String>) -> Result<()> {
    if errors.is_empty() {
        Ok(())
    } else {
        Err(ZdError::validation(subject, errors))
    }
}

/// Push an error when an identifier is unusable.
pub(crate) fn check_identifier(field: &str, value: &str, errors: &mut Vec<String>) {
    if value.is_empty() {
        errors.push(format!("{} is required", field));
    } else if let Err(e) = crate::core::identifier::validate_identifier(value) {
        errors.push(format!("{}: {}", field, e));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_settings_defaults() {
        let settings: BatchSettings = serde_yaml::from_str("{}").unwrap();
        assert_eq!(settings, BatchSettings::default());
        assert_eq!(settings.chunk_size, 1000);
        assert_eq!(settings.sleep_time_ms, 0);
    }

    #[test]
    fn test_batch_settings_check() {
        let mut errors = Vec::new();
        BatchSettings {
            chunk_size: 0,
            sleep_time_ms: -5,
        }
        .check(&mut errors);
        assert_eq!(errors.len(), 2);
    }

    #[test]
    fn test_check_identifier() {
        let mut errors = Vec::new();
        check_identifier("table", "", &mut errors);
        check_identifier("column", "ok", &mut errors);
        check_identifier("new_column", &"x".repeat(100), &mut errors);
        assert_eq!(errors.len(), 2);
        assert_eq!(errors[0], "table is required");
        assert!(errors[1].starts_with("new_column: "));
    }
}
