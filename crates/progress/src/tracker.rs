//! Leaf progress tracker.
//!
//! A [`LeafTracker`] is a cheap, cloneable handle. All clones share one
//! tracker guarded by its own lock. Every mutation releases that lock before
//! notifying the owning container, so a tracker lock is never held while the
//! container lock is acquired.

use parking_lot::Mutex;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Weak};
use tracing::{debug, warn};

use tally_core::{
    span_between, ProgressError, Result, SharedClock, SystemClock, Time, TrackerConfig, TrackerId,
    TrackerState,
};

use crate::estimator::SampleWindow;
use crate::snapshot::{eta, TrackerSnapshot};

/// Receiver of change notifications from a tracker.
///
/// Implemented by the owning container to trigger a recompute.
pub(crate) trait ChangeListener: Send + Sync {
    /// Called after a tracker mutation, with no tracker lock held.
    fn child_changed(&self);
}

/// Progress of one unit of work.
#[derive(Clone)]
pub struct LeafTracker {
    shared: Arc<TrackerShared>,
}

struct TrackerShared {
    id: TrackerId,
    clock: SharedClock,
    unit: Option<String>,
    total_bytes: Option<u64>,
    inner: Mutex<TrackerInner>,
}

struct TrackerInner {
    title: String,
    completed: f64,
    total: Option<f64>,
    state: TrackerState,
    start_time: Option<Time>,
    last_updated: Option<Time>,
    stop_time: Option<Time>,
    finished_time: Option<Time>,
    samples: SampleWindow,
    failure_reason: Option<String>,
    parent: Option<Weak<dyn ChangeListener>>,
}

impl TrackerInner {
    /// Record a new completed value and its observation.
    ///
    /// `had_total` is whether a total was known before this mutation; a
    /// `Pending` tracker activates on progress or on a total appearing.
    fn record(&mut self, now: Time, completed: f64, had_total: bool) {
        self.completed = completed;
        self.samples.push(now, completed);
        self.last_updated = Some(now);
        self.start_time.get_or_insert(now);
        if self.state == TrackerState::Pending
            && (completed > 0.0 || (self.total.is_some() && !had_total))
        {
            self.state = TrackerState::Active;
        }
    }

    fn percentage(&self) -> Option<f64> {
        self.total
            .map(|total| (self.completed / total).clamp(0.0, 1.0))
    }

    fn snapshot(&self, shared: &TrackerShared, now: Time) -> TrackerSnapshot {
        let remaining = self.total.map(|total| (total - self.completed).max(0.0));
        let speed = self.samples.rate();
        TrackerSnapshot {
            id: shared.id,
            title: self.title.clone(),
            completed: self.completed,
            total: self.total,
            percentage: self.percentage(),
            state: self.state,
            elapsed: self
                .start_time
                .map(|start| span_between(start, self.stop_time.unwrap_or(now))),
            remaining,
            speed,
            time_remaining: eta(remaining, speed),
            finished: self.state.is_terminal(),
            indeterminate: self.total.is_none(),
            start_time: self.start_time,
            last_updated: self.last_updated,
            unit: shared.unit.clone(),
            total_bytes: shared.total_bytes,
            failure_reason: self.failure_reason.clone(),
        }
    }
}

fn check_amount(what: &str, value: f64) -> Result<()> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(ProgressError::invalid(format!(
            "{what} must be finite and non-negative, got {value}"
        )))
    }
}

fn check_total(total: Option<f64>) -> Result<()> {
    match total {
        Some(t) if !(t.is_finite() && t > 0.0) => Err(ProgressError::invalid(format!(
            "total must be finite and positive, got {t}"
        ))),
        _ => Ok(()),
    }
}

impl LeafTracker {
    /// Create a standalone tracker using the system clock.
    pub fn new(config: impl Into<TrackerConfig>) -> Self {
        Self::with_clock(config, SystemClock::shared())
    }

    /// Create a standalone tracker driven by `clock`.
    ///
    /// Totals that are not finite and positive are treated as unknown.
    pub fn with_clock(config: impl Into<TrackerConfig>, clock: SharedClock) -> Self {
        let config = config.into();
        let total = config.effective_total();
        if config.total.is_some() && total.is_none() {
            warn!(
                "Ignoring unusable total {:?} for tracker '{}'",
                config.total, config.title
            );
        }

        let now = clock.now();
        let inner = TrackerInner {
            title: config.title,
            completed: 0.0,
            total,
            state: TrackerState::Pending,
            start_time: None,
            last_updated: None,
            stop_time: None,
            finished_time: None,
            samples: SampleWindow::new(now),
            failure_reason: None,
            parent: None,
        };

        Self {
            shared: Arc::new(TrackerShared {
                id: TrackerId::new(),
                clock,
                unit: config.unit,
                total_bytes: config.total_bytes,
                inner: Mutex::new(inner),
            }),
        }
    }

    /// Apply `f` under the tracker lock, then notify the owner if it reports a change.
    ///
    /// An error from `f` leaves the tracker untouched and notifies nobody.
    fn try_mutate(&self, f: impl FnOnce(&mut TrackerInner, Time) -> Result<bool>) -> Result<bool> {
        let now = self.shared.clock.now();
        let (changed, parent) = {
            let mut inner = self.shared.inner.lock();
            let changed = f(&mut *inner, now)?;
            (changed, inner.parent.clone())
        };
        Self::notify(changed, parent);
        Ok(changed)
    }

    /// Infallible counterpart of [`LeafTracker::try_mutate`].
    fn mutate(&self, f: impl FnOnce(&mut TrackerInner, Time) -> bool) -> bool {
        let now = self.shared.clock.now();
        let (changed, parent) = {
            let mut inner = self.shared.inner.lock();
            let changed = f(&mut *inner, now);
            (changed, inner.parent.clone())
        };
        Self::notify(changed, parent);
        changed
    }

    /// Runs with no tracker lock held.
    fn notify(changed: bool, parent: Option<Weak<dyn ChangeListener>>) {
        if !changed {
            return;
        }
        if let Some(parent) = parent.and_then(|weak| weak.upgrade()) {
            parent.child_changed();
        }
    }

    /// Add `amount` to the completed count.
    pub fn advance(&self, amount: f64) -> Result<()> {
        check_amount("amount", amount)?;
        self.try_mutate(|inner, now| {
            let completed = inner.completed + amount;
            if !completed.is_finite() {
                return Err(ProgressError::invalid(format!(
                    "advancing {} by {amount} overflows",
                    inner.completed
                )));
            }
            let had_total = inner.total.is_some();
            inner.record(now, completed, had_total);
            Ok(true)
        })?;
        Ok(())
    }

    /// Set the completed count and total explicitly.
    ///
    /// A `None` total makes the tracker indeterminate.
    pub fn set_progress(&self, completed: f64, total: Option<f64>) -> Result<()> {
        check_amount("completed", completed)?;
        check_total(total)?;
        self.mutate(|inner, now| {
            let had_total = inner.total.is_some();
            inner.total = total;
            inner.record(now, completed, had_total);
            true
        });
        Ok(())
    }

    /// Change the total, keeping the completed count.
    pub fn set_total(&self, total: Option<f64>) -> Result<()> {
        check_total(total)?;
        self.mutate(|inner, now| {
            let had_total = inner.total.is_some();
            inner.total = total;
            let completed = inner.completed;
            inner.record(now, completed, had_total);
            true
        });
        Ok(())
    }

    /// Rename the tracker.
    pub fn set_title(&self, title: impl Into<String>) {
        let title = title.into();
        self.mutate(|inner, _| {
            inner.title = title;
            true
        });
    }

    /// Mark the tracker as running without reporting progress.
    ///
    /// Only moves a `Pending` tracker; returns whether anything changed.
    pub fn start(&self) -> bool {
        self.mutate(|inner, now| {
            if inner.state != TrackerState::Pending {
                return false;
            }
            inner.state = TrackerState::Active;
            inner.start_time.get_or_insert(now);
            true
        })
    }

    /// Mark the tracker complete, filling it to its total if one is known.
    ///
    /// Returns `false` if the tracker was already finished.
    pub fn complete(&self) -> bool {
        let id = self.shared.id;
        self.mutate(|inner, now| {
            if inner.state.is_terminal() {
                debug!("Tracker {} already {}, ignoring complete", id, inner.state);
                return false;
            }
            if let Some(total) = inner.total {
                if inner.completed != total {
                    inner.record(now, total, true);
                }
            }
            inner.state = TrackerState::Complete;
            inner.finished_time = Some(now);
            inner.stop_time.get_or_insert(now);
            debug!("Tracker {} ('{}') complete", id, inner.title);
            true
        })
    }

    /// Mark the tracker failed. The completed count is left untouched.
    ///
    /// Safe to call from any thread at any time; returns `false` if the
    /// tracker was already finished.
    pub fn fail(&self, reason: impl Into<String>) -> bool {
        let id = self.shared.id;
        let reason = reason.into();
        self.mutate(|inner, now| {
            if inner.state.is_terminal() {
                debug!("Tracker {} already {}, ignoring fail", id, inner.state);
                return false;
            }
            warn!("Tracker {} ('{}') failed: {}", id, inner.title, reason);
            inner.state = TrackerState::Failed;
            inner.stop_time.get_or_insert(now);
            inner.failure_reason = Some(reason);
            true
        })
    }

    /// Return the tracker to `Pending` with no progress and no timing.
    pub fn reset(&self) {
        self.mutate(|inner, now| {
            inner.completed = 0.0;
            inner.start_time = None;
            inner.last_updated = None;
            inner.stop_time = None;
            inner.finished_time = None;
            inner.failure_reason = None;
            inner.samples.reset(now);
            inner.state = TrackerState::Pending;
            true
        });
    }

    /// Run `f` as this tracker's unit of work.
    ///
    /// Starts the tracker, then completes it on `Ok` or fails it with the
    /// error's message on `Err`. The result is returned unchanged.
    pub fn scope<T, E, F>(&self, f: F) -> std::result::Result<T, E>
    where
        F: FnOnce(&LeafTracker) -> std::result::Result<T, E>,
        E: fmt::Display,
    {
        self.start();
        let result = f(self);
        self.settle(&result);
        result
    }

    /// Async counterpart of [`LeafTracker::scope`].
    pub async fn scope_async<T, E, F, Fut>(&self, f: F) -> std::result::Result<T, E>
    where
        F: FnOnce(LeafTracker) -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: fmt::Display,
    {
        self.start();
        let result = f(self.clone()).await;
        self.settle(&result);
        result
    }

    fn settle<T, E: fmt::Display>(&self, result: &std::result::Result<T, E>) {
        match result {
            Ok(_) => {
                self.complete();
            }
            Err(err) => {
                self.fail(err.to_string());
            }
        }
    }

    /// Consistent read of all fields and derived metrics.
    pub fn snapshot(&self) -> TrackerSnapshot {
        self.snapshot_at(self.shared.clock.now())
    }

    pub(crate) fn snapshot_at(&self, now: Time) -> TrackerSnapshot {
        self.shared.inner.lock().snapshot(&self.shared, now)
    }

    pub(crate) fn attach(&self, parent: Weak<dyn ChangeListener>) {
        self.shared.inner.lock().parent = Some(parent);
    }

    pub(crate) fn detach(&self) {
        self.shared.inner.lock().parent = None;
    }

    /// Whether the tracker currently reports to a container.
    pub fn is_attached(&self) -> bool {
        self.shared
            .inner
            .lock()
            .parent
            .as_ref()
            .is_some_and(|weak| weak.strong_count() > 0)
    }

    /// Tracker identifier.
    pub fn id(&self) -> TrackerId {
        self.shared.id
    }

    /// Display title.
    pub fn title(&self) -> String {
        self.shared.inner.lock().title.clone()
    }

    /// Lifecycle state.
    pub fn state(&self) -> TrackerState {
        self.shared.inner.lock().state
    }

    /// Completed units.
    pub fn completed(&self) -> f64 {
        self.shared.inner.lock().completed
    }

    /// Total units, if known.
    pub fn total(&self) -> Option<f64> {
        self.shared.inner.lock().total
    }

    /// Completion ratio in `[0, 1]`, if the total is known.
    pub fn percentage(&self) -> Option<f64> {
        self.shared.inner.lock().percentage()
    }

    /// Whether the total is unknown.
    pub fn is_indeterminate(&self) -> bool {
        self.shared.inner.lock().total.is_none()
    }

    /// Whether the tracker is complete or failed.
    pub fn is_finished(&self) -> bool {
        self.shared.inner.lock().state.is_terminal()
    }

    /// Units per second over the recent sample window.
    pub fn speed(&self) -> f64 {
        self.shared.inner.lock().samples.rate()
    }

    /// When progress was first reported.
    pub fn start_time(&self) -> Option<Time> {
        self.shared.inner.lock().start_time
    }

    /// When progress was last reported.
    pub fn last_updated(&self) -> Option<Time> {
        self.shared.inner.lock().last_updated
    }

    /// When the tracker stopped (completed or failed).
    pub fn stop_time(&self) -> Option<Time> {
        self.shared.inner.lock().stop_time
    }

    /// When the tracker was completed.
    pub fn finished_time(&self) -> Option<Time> {
        self.shared.inner.lock().finished_time
    }

    /// Reason given to [`LeafTracker::fail`].
    pub fn failure_reason(&self) -> Option<String> {
        self.shared.inner.lock().failure_reason.clone()
    }

    /// Number of retained speed samples.
    pub fn samples_len(&self) -> usize {
        self.shared.inner.lock().samples.len()
    }

    /// Display unit.
    pub fn unit(&self) -> Option<&str> {
        self.shared.unit.as_deref()
    }

    /// Transfer size in bytes.
    pub fn total_bytes(&self) -> Option<u64> {
        self.shared.total_bytes
    }
}

impl fmt::Debug for LeafTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.shared.inner.lock();
        f.debug_struct("LeafTracker")
            .field("id", &self.shared.id)
            .field("title", &inner.title)
            .field("completed", &inner.completed)
            .field("total", &inner.total)
            .field("state", &inner.state)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use std::time::Duration;
    use tally_core::{Clock, ManualClock};

    fn clock() -> ManualClock {
        ManualClock::new(Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap())
    }

    fn tracker(clock: &ManualClock, total: Option<f64>) -> LeafTracker {
        let mut config = TrackerConfig::new("copy");
        config.total = total;
        LeafTracker::with_clock(config, clock.shared())
    }

    #[test]
    fn test_new_tracker_is_pending_and_seeded() {
        let clock = clock();
        let t = tracker(&clock, Some(10.0));
        assert_eq!(t.state(), TrackerState::Pending);
        assert_eq!(t.completed(), 0.0);
        assert_eq!(t.samples_len(), 1);
        assert_eq!(t.start_time(), None);

        let snapshot = t.snapshot();
        assert_eq!(snapshot.elapsed, None);
        assert_eq!(snapshot.remaining, Some(10.0));
        assert_eq!(snapshot.percentage, Some(0.0));
        assert!(!snapshot.finished);
    }

    #[test]
    fn test_advance_activates_and_stamps() {
        let clock = clock();
        let t = tracker(&clock, None);
        clock.advance(Duration::from_millis(200));
        let now = clock.now();

        t.advance(3.0).unwrap();
        assert_eq!(t.state(), TrackerState::Active);
        assert_eq!(t.completed(), 3.0);
        assert_eq!(t.start_time(), Some(now));
        assert_eq!(t.last_updated(), Some(now));
        assert_eq!(t.samples_len(), 2);
        assert!(t.is_indeterminate());
        assert_eq!(t.percentage(), None);
    }

    #[test]
    fn test_advance_zero_keeps_pending_without_total() {
        let clock = clock();
        let t = tracker(&clock, None);
        t.advance(0.0).unwrap();
        assert_eq!(t.state(), TrackerState::Pending);
    }

    #[test]
    fn test_zero_progress_with_known_total_stays_pending() {
        let clock = clock();
        let t = tracker(&clock, Some(10.0));

        t.advance(0.0).unwrap();
        assert_eq!(t.state(), TrackerState::Pending);
        t.set_total(Some(10.0)).unwrap();
        assert_eq!(t.state(), TrackerState::Pending);
        t.set_progress(0.0, Some(12.0)).unwrap();
        assert_eq!(t.state(), TrackerState::Pending);

        t.advance(1.0).unwrap();
        assert_eq!(t.state(), TrackerState::Active);
    }

    #[test]
    fn test_total_appearing_activates() {
        let clock = clock();
        let t = tracker(&clock, None);
        t.set_total(Some(4.0)).unwrap();
        assert_eq!(t.state(), TrackerState::Active);
        assert_eq!(t.completed(), 0.0);
    }

    #[test]
    fn test_advance_rejects_overflow() {
        let clock = clock();
        let t = tracker(&clock, None);
        t.advance(f64::MAX).unwrap();

        assert!(matches!(
            t.advance(f64::MAX),
            Err(ProgressError::InvalidArgument(_))
        ));
        assert_eq!(t.completed(), f64::MAX);
        assert_eq!(t.samples_len(), 2);
        assert!(t.speed().is_finite());

        t.advance(0.0).unwrap();
        assert_eq!(t.completed(), f64::MAX);
    }

    #[test]
    fn test_advance_rejects_invalid_amounts() {
        let clock = clock();
        let t = tracker(&clock, Some(10.0));
        for bad in [-1.0, f64::NAN, f64::INFINITY] {
            assert!(matches!(t.advance(bad), Err(ProgressError::InvalidArgument(_))));
        }
        assert_eq!(t.completed(), 0.0);
        assert_eq!(t.samples_len(), 1);

        t.advance(2.0).unwrap();
        assert_eq!(t.completed(), 2.0);
    }

    #[test]
    fn test_advance_is_monotonic() {
        let clock = clock();
        let t = tracker(&clock, Some(5.0));
        let mut last = 0.0;
        for amount in [0.0, 1.5, 0.0, 2.25, 7.0] {
            t.advance(amount).unwrap();
            assert!(t.completed() >= last);
            last = t.completed();
        }
    }

    #[test]
    fn test_percentage_is_clamped() {
        let clock = clock();
        let t = tracker(&clock, Some(4.0));
        t.advance(10.0).unwrap();
        assert_eq!(t.percentage(), Some(1.0));
        assert_eq!(t.snapshot().remaining, Some(0.0));
        // Reaching the total does not complete the tracker.
        assert_eq!(t.state(), TrackerState::Active);
    }

    #[test]
    fn test_set_progress() {
        let clock = clock();
        let t = tracker(&clock, None);

        t.set_progress(0.0, Some(8.0)).unwrap();
        assert_eq!(t.state(), TrackerState::Active);
        assert_eq!(t.total(), Some(8.0));

        t.set_progress(6.0, Some(8.0)).unwrap();
        assert_eq!(t.percentage(), Some(0.75));

        t.set_progress(6.0, None).unwrap();
        assert!(t.is_indeterminate());
        assert_eq!(t.snapshot().remaining, None);
    }

    #[test]
    fn test_set_progress_rejects_bad_total() {
        let clock = clock();
        let t = tracker(&clock, Some(8.0));
        assert!(matches!(
            t.set_progress(1.0, Some(0.0)),
            Err(ProgressError::InvalidArgument(_))
        ));
        assert!(matches!(
            t.set_progress(1.0, Some(-2.0)),
            Err(ProgressError::InvalidArgument(_))
        ));
        assert!(matches!(
            t.set_progress(-1.0, Some(8.0)),
            Err(ProgressError::InvalidArgument(_))
        ));
        assert!(t.set_total(Some(f64::NAN)).is_err());
        assert_eq!(t.total(), Some(8.0));
        assert_eq!(t.completed(), 0.0);
    }

    #[test]
    fn test_unusable_config_total_is_indeterminate() {
        let clock = clock();
        let t = tracker(&clock, Some(0.0));
        assert!(t.is_indeterminate());
    }

    #[test]
    fn test_complete_fills_to_total() {
        let clock = clock();
        let t = tracker(&clock, Some(50.0));
        t.advance(20.0).unwrap();
        clock.advance(Duration::from_secs(2));
        let done_at = clock.now();

        assert!(t.complete());
        assert_eq!(t.state(), TrackerState::Complete);
        assert_eq!(t.completed(), 50.0);
        assert_eq!(t.finished_time(), Some(done_at));
        assert_eq!(t.stop_time(), Some(done_at));
        assert!(t.is_finished());

        clock.advance(Duration::from_secs(5));
        assert!(!t.complete());
        assert_eq!(t.finished_time(), Some(done_at));
        assert_eq!(t.snapshot().elapsed, Some(Duration::from_secs(2)));
    }

    #[test]
    fn test_complete_indeterminate_keeps_completed() {
        let clock = clock();
        let t = tracker(&clock, None);
        t.advance(7.0).unwrap();
        t.complete();
        assert_eq!(t.completed(), 7.0);
        assert_eq!(t.state(), TrackerState::Complete);
    }

    #[test]
    fn test_fail_from_active_then_advance() {
        let clock = clock();
        let t = tracker(&clock, Some(100.0));
        t.advance(30.0).unwrap();

        assert!(t.fail("disk full"));
        assert_eq!(t.state(), TrackerState::Failed);
        assert!(t.snapshot().finished);
        assert_eq!(t.completed(), 30.0);
        assert_eq!(t.failure_reason().as_deref(), Some("disk full"));
        assert!(t.stop_time().is_some());

        t.advance(5.0).unwrap();
        assert_eq!(t.completed(), 35.0);
        assert_eq!(t.state(), TrackerState::Failed);

        assert!(!t.fail("again"));
        assert_eq!(t.failure_reason().as_deref(), Some("disk full"));
    }

    #[test]
    fn test_updates_after_complete_keep_state() {
        let clock = clock();
        let t = tracker(&clock, Some(10.0));
        t.advance(4.0).unwrap();
        t.complete();
        let finished_at = t.finished_time();

        t.advance(3.0).unwrap();
        assert_eq!(t.completed(), 13.0);
        assert_eq!(t.state(), TrackerState::Complete);

        t.set_progress(2.0, Some(20.0)).unwrap();
        assert_eq!(t.completed(), 2.0);
        assert_eq!(t.total(), Some(20.0));
        assert_eq!(t.state(), TrackerState::Complete);
        assert_eq!(t.finished_time(), finished_at);
        assert!(t.is_finished());
    }

    #[test]
    fn test_terminal_states_are_sticky() {
        let clock = clock();
        let t = tracker(&clock, Some(10.0));
        t.fail("cancelled");
        assert!(!t.complete());
        assert_eq!(t.state(), TrackerState::Failed);

        let t = tracker(&clock, Some(10.0));
        t.complete();
        assert!(!t.fail("late"));
        assert_eq!(t.state(), TrackerState::Complete);
        assert_eq!(t.failure_reason(), None);
    }

    #[test]
    fn test_reset_after_complete() {
        let clock = clock();
        let t = tracker(&clock, Some(50.0));
        t.advance(10.0).unwrap();
        t.complete();

        t.reset();
        assert_eq!(t.completed(), 0.0);
        assert_eq!(t.state(), TrackerState::Pending);
        assert_eq!(t.start_time(), None);
        assert_eq!(t.last_updated(), None);
        assert_eq!(t.stop_time(), None);
        assert_eq!(t.finished_time(), None);
        assert_eq!(t.samples_len(), 1);
        assert_eq!(t.total(), Some(50.0));
    }

    #[test]
    fn test_speed_from_regular_advances() {
        let clock = clock();
        let t = tracker(&clock, Some(100.0));
        for _ in 0..10 {
            clock.advance(Duration::from_millis(100));
            t.advance(10.0).unwrap();
        }

        assert!((t.speed() - 100.0).abs() < 1e-6);
        let snapshot = t.snapshot();
        assert_eq!(snapshot.remaining, Some(0.0));
        assert_eq!(snapshot.time_remaining, Some(Duration::ZERO));
    }

    #[test]
    fn test_time_remaining() {
        let clock = clock();
        let t = tracker(&clock, Some(100.0));
        clock.advance(Duration::from_secs(1));
        t.advance(25.0).unwrap();

        let snapshot = t.snapshot();
        assert!((snapshot.speed - 25.0).abs() < 1e-9);
        assert_eq!(snapshot.time_remaining, Some(Duration::from_secs(3)));
    }

    #[test]
    fn test_elapsed_runs_until_stopped() {
        let clock = clock();
        let t = tracker(&clock, Some(10.0));
        t.advance(1.0).unwrap();
        clock.advance(Duration::from_secs(3));
        assert_eq!(t.snapshot().elapsed, Some(Duration::from_secs(3)));

        t.fail("timeout");
        clock.advance(Duration::from_secs(10));
        assert_eq!(t.snapshot().elapsed, Some(Duration::from_secs(3)));
    }

    #[test]
    fn test_start_marks_active() {
        let clock = clock();
        let t = tracker(&clock, None);
        assert!(t.start());
        assert_eq!(t.state(), TrackerState::Active);
        assert_eq!(t.start_time(), Some(clock.now()));
        assert!(!t.start());
    }

    #[test]
    fn test_scope_completes_on_ok() {
        let clock = clock();
        let t = tracker(&clock, Some(3.0));
        let out: std::result::Result<u32, String> = t.scope(|t| {
            assert_eq!(t.state(), TrackerState::Active);
            t.advance(1.0).map_err(|e| e.to_string())?;
            Ok(42)
        });
        assert_eq!(out, Ok(42));
        assert_eq!(t.state(), TrackerState::Complete);
        assert_eq!(t.completed(), 3.0);
    }

    #[test]
    fn test_scope_fails_on_err() {
        let clock = clock();
        let t = tracker(&clock, Some(3.0));
        let out: std::result::Result<(), String> = t.scope(|t| {
            t.advance(1.0).map_err(|e| e.to_string())?;
            Err("checksum mismatch".to_string())
        });
        assert!(out.is_err());
        assert_eq!(t.state(), TrackerState::Failed);
        assert_eq!(t.completed(), 1.0);
        assert_eq!(t.failure_reason().as_deref(), Some("checksum mismatch"));
    }

    #[tokio::test]
    async fn test_scope_async() {
        let clock = clock();
        let t = tracker(&clock, Some(2.0));
        let out = t
            .scope_async(|t| async move {
                t.advance(2.0)?;
                Ok::<_, ProgressError>("done")
            })
            .await;
        assert_eq!(out, Ok("done"));
        assert_eq!(t.state(), TrackerState::Complete);
    }

    #[test]
    fn test_transfer_metadata_is_carried() {
        let clock = clock();
        let config = TrackerConfig::new("image.iso")
            .with_total(2048.0)
            .with_unit("B")
            .with_total_bytes(2048);
        let t = LeafTracker::with_clock(config, clock.shared());
        assert_eq!(t.unit(), Some("B"));
        assert_eq!(t.total_bytes(), Some(2048));

        let snapshot = t.snapshot();
        assert_eq!(snapshot.unit.as_deref(), Some("B"));
        assert_eq!(snapshot.to_string(), "image.iso: 0/2048 B (0.0%) pending");
    }

    #[test]
    fn test_snapshot_is_idempotent() {
        let clock = clock();
        let t = tracker(&clock, Some(10.0));
        t.advance(4.0).unwrap();
        assert_eq!(t.snapshot(), t.snapshot());
    }

    #[test]
    fn test_container_reads_while_child_is_locked() {
        use crate::container::Container;
        use std::sync::mpsc;

        let c = Container::new("Locks");
        let held = c.create_child("held", TrackerConfig::new("Held").with_total(10.0));
        let other = c.create_child("other", TrackerConfig::new("Other").with_total(10.0));

        let guard = held.shared.inner.lock();

        // Recomputes behind this advance wait on `held` without the container lock.
        let producer = std::thread::spawn(move || other.advance(1.0));
        std::thread::sleep(Duration::from_millis(50));

        let (tx, rx) = mpsc::channel();
        let reader = c.clone();
        let watcher = std::thread::spawn(move || {
            let keys = reader.keys();
            let snapshot = reader.snapshot();
            tx.send((keys, snapshot.children)).unwrap();
        });

        let seen = rx.recv_timeout(Duration::from_secs(5));
        drop(guard);
        producer.join().unwrap().unwrap();
        watcher.join().unwrap();

        let (keys, children) = seen.expect("container blocked on a child lock");
        assert_eq!(keys, vec!["held".to_string(), "other".to_string()]);
        assert_eq!(children, 2);
        assert_eq!(c.snapshot().completed, 1.0);
    }
}
