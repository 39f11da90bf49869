//! Tally core vocabulary.
//!
//! Identifiers, lifecycle state, errors, clocks and creation config shared by
//! the progress engine and its consumers.

#![warn(missing_docs)]

mod clock;
mod config;
mod error;
mod id;
mod state;

pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use config::TrackerConfig;
pub use error::{ProgressError, Result};
pub use id::TrackerId;
pub use state::TrackerState;

/// Timestamp type
pub type Time = chrono::DateTime<chrono::Utc>;

/// Maximum number of samples retained per tracker.
pub const SAMPLE_CAPACITY: usize = 1000;

/// Horizon used by the throughput estimate, in seconds.
pub const RATE_WINDOW: f64 = 1.0;

/// Seconds elapsed from `earlier` to `later`, negative if `later` is before `earlier`.
pub fn seconds_between(earlier: Time, later: Time) -> f64 {
    let delta = later - earlier;
    match delta.num_microseconds() {
        Some(us) => us as f64 / 1_000_000.0,
        None => delta.num_milliseconds() as f64 / 1_000.0,
    }
}

/// Non-negative span from `earlier` to `later`.
pub fn span_between(earlier: Time, later: Time) -> std::time::Duration {
    (later - earlier).to_std().unwrap_or_default()
}
