//! Ledger configuration.
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// When the store checks an event's expected version against its stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictDetection {
    /// Append unconditionally. Two writers that raced on the same version are
    /// both stored, and the conflict surfaces the next time the aggregate is
    /// replayed.
    #[default]
    Lazy,
    /// Compare-and-append. A batch whose expected versions do not continue
    /// the stored streams is rejected and nothing from it is stored.
    Eager,
}

/// Settings for a [`Ledger`](crate::Ledger).
///
/// Every field has a default, so an empty document is a valid configuration:
///
/// ```toml
/// conflict_detection = "eager"
/// allow_overdraft = false
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// How the event store detects concurrent writers.
    pub conflict_detection: ConflictDetection,
    /// Whether debits may take a balance below zero.
    pub allow_overdraft: bool,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            conflict_detection: ConflictDetection::Lazy,
            allow_overdraft: true,
        }
    }
}

impl LedgerConfig {
    /// Parses a configuration from a TOML document.
    pub fn from_toml_str(source: &str) -> Result<Self> {
        toml::from_str(source).map_err(|e| Error::Config(e.to_string()))
    }
}
