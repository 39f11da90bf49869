//! Throughput estimation over a bounded sample history.

use std::collections::VecDeque;

use tally_core::{seconds_between, Time, RATE_WINDOW, SAMPLE_CAPACITY};

/// One progress observation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    /// When the observation was taken
    pub timestamp: Time,
    /// Completed amount at that time
    pub completed: f64,
}

/// Bounded FIFO of progress observations.
///
/// Newest samples are appended at the back; once the window is full the
/// oldest sample is evicted.
#[derive(Debug, Clone)]
pub struct SampleWindow {
    samples: VecDeque<Sample>,
    capacity: usize,
}

impl SampleWindow {
    /// Create a window seeded with `(now, 0)`.
    pub fn new(now: Time) -> Self {
        Self::with_capacity(SAMPLE_CAPACITY, now)
    }

    /// Create a window with a custom capacity, seeded with `(now, 0)`.
    pub fn with_capacity(capacity: usize, now: Time) -> Self {
        let capacity = capacity.max(1);
        let mut window = Self {
            samples: VecDeque::with_capacity(capacity.min(SAMPLE_CAPACITY)),
            capacity,
        };
        window.push(now, 0.0);
        window
    }

    /// Append an observation, evicting the oldest beyond capacity.
    pub fn push(&mut self, timestamp: Time, completed: f64) {
        while self.samples.len() >= self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(Sample {
            timestamp,
            completed,
        });
    }

    /// Drop all history and reseed with `(now, 0)`.
    pub fn reset(&mut self, now: Time) {
        self.samples.clear();
        self.push(now, 0.0);
    }

    /// Number of retained samples.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Whether the window holds no samples.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Maximum number of retained samples.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Most recent observation.
    pub fn latest(&self) -> Option<&Sample> {
        self.samples.back()
    }

    /// Iterate oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = &Sample> {
        self.samples.iter()
    }

    /// Units per second.
    ///
    /// Uses the samples within [`RATE_WINDOW`] seconds of the newest one,
    /// falling back to the whole window when that suffix has fewer than two
    /// samples.
    pub fn rate(&self) -> f64 {
        let Some(newest) = self.samples.back() else {
            return 0.0;
        };

        let recent = self
            .samples
            .iter()
            .rev()
            .take_while(|s| seconds_between(s.timestamp, newest.timestamp) <= RATE_WINDOW)
            .count();

        let span = if recent >= 2 { recent } else { self.samples.len() };
        if span < 2 {
            return 0.0;
        }

        let first = &self.samples[self.samples.len() - span];
        let dt = seconds_between(first.timestamp, newest.timestamp);
        if dt <= 0.0 {
            return 0.0;
        }

        (newest.completed - first.completed) / dt
    }
}
