//! Progress Tracking
//!
//! Leaf trackers, a throughput estimator and an aggregation container that
//! keeps a consistent summary while trackers are mutated concurrently.

#![warn(missing_docs)]

pub mod container;
pub mod estimator;
pub mod snapshot;
pub mod tracker;

pub use container::Container;
pub use estimator::{Sample, SampleWindow};
pub use snapshot::{ContainerSnapshot, TrackerSnapshot};
pub use tracker::LeafTracker;

pub use tally_core::{
    Clock, ManualClock, ProgressError, Result, SharedClock, SystemClock, TrackerConfig, TrackerId,
    TrackerState,
};
