//! Point-in-time views of trackers and containers.
//!
//! Snapshots are plain values: once taken they never change, so consumers
//! can hold, compare and serialize them freely.

use serde::Serialize;
use std::fmt;
use std::time::Duration;

use tally_core::{Time, TrackerId, TrackerState};

/// A consistent read of one Leaf Tracker.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackerSnapshot {
    /// Tracker identifier
    pub id: TrackerId,

    /// Display title
    pub title: String,

    /// Completed units
    pub completed: f64,

    /// Total units (None when indeterminate)
    pub total: Option<f64>,

    /// Completion ratio in `[0, 1]` (None when indeterminate)
    pub percentage: Option<f64>,

    /// Lifecycle state
    pub state: TrackerState,

    /// Time since the tracker started, frozen once it stops
    pub elapsed: Option<Duration>,

    /// Units left (None when indeterminate)
    pub remaining: Option<f64>,

    /// Units per second
    pub speed: f64,

    /// Estimated time to completion
    pub time_remaining: Option<Duration>,

    /// Whether the tracker is complete or failed
    pub finished: bool,

    /// Whether the total is unknown
    pub indeterminate: bool,

    /// When progress was first reported
    pub start_time: Option<Time>,

    /// When progress was last reported
    pub last_updated: Option<Time>,

    /// Display unit
    pub unit: Option<String>,

    /// Transfer size in bytes
    pub total_bytes: Option<u64>,

    /// Reason given when the tracker failed
    pub failure_reason: Option<String>,
}

/// A consistent read of an Aggregation Container.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContainerSnapshot {
    /// Container title
    pub title: String,

    /// Sum of child completed units
    pub completed: f64,

    /// Sum of child totals (None when indeterminate)
    pub total: Option<f64>,

    /// Completion ratio in `[0, 1]` (None when indeterminate)
    pub percentage: Option<f64>,

    /// Sum of child speeds
    pub speed: f64,

    /// Time since the earliest child started
    pub elapsed: Option<Duration>,

    /// Units left (None when indeterminate)
    pub remaining: Option<f64>,

    /// Estimated time to completion
    pub time_remaining: Option<Duration>,

    /// Whether every child is finished (false when empty)
    pub finished: bool,

    /// Whether the container is empty or any child is indeterminate
    pub indeterminate: bool,

    /// Title of the most recently active child, or the container title
    pub current_task_title: String,

    /// Number of children
    pub children: usize,
}

impl ContainerSnapshot {
    /// The aggregate of a container with no children.
    pub fn empty(title: impl Into<String>) -> Self {
        let title = title.into();
        Self {
            current_task_title: title.clone(),
            title,
            completed: 0.0,
            total: None,
            percentage: None,
            speed: 0.0,
            elapsed: None,
            remaining: None,
            time_remaining: None,
            finished: false,
            indeterminate: true,
            children: 0,
        }
    }
}

/// `remaining / speed` as a duration, when the estimate is meaningful.
pub(crate) fn eta(remaining: Option<f64>, speed: f64) -> Option<Duration> {
    let remaining = remaining?;
    if speed > 0.0 {
        Duration::try_from_secs_f64(remaining / speed).ok()
    } else {
        None
    }
}

fn write_amount(
    f: &mut fmt::Formatter<'_>,
    completed: f64,
    total: Option<f64>,
    percentage: Option<f64>,
    unit: Option<&str>,
) -> fmt::Result {
    match total {
        Some(total) => write!(f, "{completed}/{total}")?,
        None => write!(f, "{completed}")?,
    }
    if let Some(unit) = unit {
        write!(f, " {unit}")?;
    }
    match percentage {
        Some(pct) => write!(f, " ({:.1}%)", pct * 100.0),
        None => f.write_str(" (indeterminate)"),
    }
}

impl fmt::Display for TrackerSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: ", self.title)?;
        write_amount(f, self.completed, self.total, self.percentage, self.unit.as_deref())?;
        write!(f, " {}", self.state)?;
        if let Some(reason) = &self.failure_reason {
            write!(f, " ({reason})")?;
        }
        Ok(())
    }
}

impl fmt::Display for ContainerSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: ", self.title)?;
        write_amount(f, self.completed, self.total, self.percentage, None)?;
        write!(f, " {:.1}/s", self.speed)?;
        if let Some(eta) = self.time_remaining {
            write!(f, " eta {}s", eta.as_secs())?;
        }
        if self.finished {
            f.write_str(" finished")?;
        } else if self.current_task_title != self.title {
            write!(f, " [{}]", self.current_task_title)?;
        }
        Ok(())
    }
}
