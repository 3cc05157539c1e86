//! Migration mode resolution.
//!
//! The mode is read once from the run-scoped parameters when a
//! [`Migration`](crate::migration::Migration) is built and never re-read.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Parameter key holding the mode.
pub const MODE_KEY: &str = "zd-mode";

/// Older key accepted when `zd-mode` is absent.
pub const LEGACY_MODE_KEY: &str = "zd-strategy";

/// Which part of a zero-downtime change an invocation emits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MigrationMode {
    /// The plain one-shot change.
    #[default]
    Off,
    /// Add the new element alongside the old one and keep both in sync.
    Expand,
    /// Remove the old element and the sync machinery.
    Contract,
}

/// Run-scoped configuration handed to the entry point.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationConfig {
    pub parameters: BTreeMap<String, String>,
}

impl MigrationConfig {
    pub fn new(parameters: BTreeMap<String, String>) -> Self {
        Self { parameters }
    }

    /// Config with only the mode parameter set.
    pub fn with_mode(mode: MigrationMode) -> Self {
        let mut parameters = BTreeMap::new();
        parameters.insert(MODE_KEY.to_string(), mode.key().to_string());
        Self { parameters }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.parameters.get(key).map(String::as_str)
    }
}

impl MigrationMode {
    /// Resolve the mode from `zd-mode` (or `zd-strategy`). Matching is
    /// case-insensitive; absent or unknown values resolve to `Off`.
    pub fn resolve(config: &MigrationConfig) -> Self {
        config
            .get(MODE_KEY)
            .or_else(|| config.get(LEGACY_MODE_KEY))
            .and_then(Self::parse)
            .unwrap_or_default()
    }

    /// Parse a mode key. Returns `None` for unknown values.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "off" => Some(MigrationMode::Off),
            "expand" => Some(MigrationMode::Expand),
            "contract" => Some(MigrationMode::Contract),
            _ => None,
        }
    }

    pub fn key(&self) -> &'static str {
        match self {
            MigrationMode::Off => "off",
            MigrationMode::Expand => "expand",
            MigrationMode::Contract => "contract",
        }
    }
}

impl fmt::Display for MigrationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(pairs: &[(&str, &str)]) -> MigrationConfig {
        MigrationConfig::new(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }

    #[test]
    fn test_absent_resolves_to_off() {
        assert_eq!(MigrationMode::resolve(&MigrationConfig::default()), MigrationMode::Off);
    }

    #[test]
    fn test_case_insensitive() {
        assert_eq!(
            MigrationMode::resolve(&config(&[("zd-mode", "EXPAND")])),
            MigrationMode::Expand
        );
        assert_eq!(
            MigrationMode::resolve(&config(&[("zd-mode", "Contract")])),
            MigrationMode::Contract
        );
    }

    #[test]
    fn test_unknown_resolves_to_off() {
        assert_eq!(
            MigrationMode::resolve(&config(&[("zd-mode", "disabled")])),
            MigrationMode::Off
        );
    }

    #[test]
    fn test_legacy_key_is_fallback_only() {
        assert_eq!(
            MigrationMode::resolve(&config(&[("zd-strategy", "expand")])),
            MigrationMode::Expand
        );
        assert_eq!(
            MigrationMode::resolve(&config(&[("zd-mode", "contract"), ("zd-strategy", "expand")])),
            MigrationMode::Contract
        );
    }

    #[test]
    fn test_with_mode_round_trips() {
        for mode in [MigrationMode::Off, MigrationMode::Expand, MigrationMode::Contract] {
            assert_eq!(MigrationMode::resolve(&MigrationConfig::with_mode(mode)), mode);
        }
    }
}
