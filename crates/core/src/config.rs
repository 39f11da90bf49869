//! Tracker creation configuration.

use serde::{Deserialize, Serialize};

/// Configuration accepted when creating a Leaf Tracker.
///
/// `unit` and `total_bytes` are carried through to snapshots for display
/// and never affect control logic.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Display title
    pub title: String,

    /// Total units of work (None for indeterminate)
    pub total: Option<f64>,

    /// Display unit, e.g. "files" or "B"
    pub unit: Option<String>,

    /// Size of a transfer in bytes
    pub total_bytes: Option<u64>,
}

impl TrackerConfig {
    /// Create a config with just a title.
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Default::default()
        }
    }

    /// Set the total.
    pub fn with_total(mut self, total: f64) -> Self {
        self.total = Some(total);
        self
    }

    /// Set the display unit.
    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    /// Set the transfer size in bytes.
    pub fn with_total_bytes(mut self, bytes: u64) -> Self {
        self.total_bytes = Some(bytes);
        self
    }

    /// The total if it is usable as a denominator.
    ///
    /// Non-finite and non-positive totals are treated as unknown.
    pub fn effective_total(&self) -> Option<f64> {
        self.total.filter(|t| t.is_finite() && *t > 0.0)
    }
}

impl From<&str> for TrackerConfig {
    fn from(title: &str) -> Self {
        Self::new(title)
    }
}

impl From<String> for TrackerConfig {
    fn from(title: String) -> Self {
        Self::new(title)
    }
}
