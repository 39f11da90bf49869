//! Tracker lifecycle state.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of a Leaf Tracker.
///
/// `Pending` is initial. Ordinary mutation moves a tracker to `Active`;
/// only an explicit completion or failure enters a terminal state, and only
/// a reset leaves one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackerState {
    /// Created, no progress reported yet
    #[default]
    Pending,
    /// Progress has been reported
    Active,
    /// Explicitly completed
    Complete,
    /// Explicitly failed
    Failed,
}

impl TrackerState {
    /// Whether this is `Complete` or `Failed`.
    pub fn is_terminal(&self) -> bool {
        match self {
            TrackerState::Complete | TrackerState::Failed => true,
            TrackerState::Pending | TrackerState::Active => false,
        }
    }

    /// Get string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            TrackerState::Pending => "pending",
            TrackerState::Active => "active",
            TrackerState::Complete => "complete",
            TrackerState::Failed => "failed",
        }
    }
}

impl fmt::Display for TrackerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
