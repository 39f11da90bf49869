//! Aggregation container.
//!
//! A [`Container`] owns a keyed, insertion-ordered set of leaf trackers and
//! caches an aggregate view that is recomputed in full on every child or
//! structural change.
//!
//! The container lock and a tracker lock are never held at the same time.
//! A recompute takes a ticket and clones the child handles under the
//! container lock, reads the children with no container lock held, then
//! publishes only if no newer recompute has published already. Every
//! change issues its ticket after the change lands, so the newest ticket
//! always reads the latest state.

use indexmap::IndexMap;
use parking_lot::Mutex;
use std::fmt;
use std::sync::{Arc, Weak};
use tokio::sync::watch;
use tracing::{debug, trace};

use tally_core::{
    span_between, ProgressError, Result, SharedClock, SystemClock, Time, TrackerConfig,
};

use crate::snapshot::{eta, ContainerSnapshot, TrackerSnapshot};
use crate::tracker::{ChangeListener, LeafTracker};

/// Summary of many leaf trackers.
///
/// Cloning yields another handle to the same container. Children keep only
/// a weak reference back, so they never keep a container alive.
#[derive(Clone)]
pub struct Container {
    shared: Arc<ContainerShared>,
}

struct ContainerShared {
    title: String,
    clock: SharedClock,
    state: Mutex<ContainerState>,
    updates: watch::Sender<ContainerSnapshot>,
}

struct ContainerState {
    children: IndexMap<String, LeafTracker>,
    aggregate: ContainerSnapshot,
    /// Last ticket handed to a recompute
    issued: u64,
    /// Ticket of the recompute behind `aggregate`
    published: u64,
}

impl ContainerShared {
    /// Child handles in insertion order, and a ticket for this pass.
    fn begin_recompute(&self) -> (u64, Vec<LeafTracker>) {
        let mut state = self.state.lock();
        state.issued += 1;
        (state.issued, state.children.values().cloned().collect())
    }

    fn recompute(&self) -> ContainerSnapshot {
        let (ticket, children) = self.begin_recompute();

        let now = self.clock.now();
        let snapshots: Vec<TrackerSnapshot> =
            children.iter().map(|child| child.snapshot_at(now)).collect();
        let aggregate = aggregate(&self.title, &snapshots, now);

        let mut state = self.state.lock();
        if ticket > state.published {
            trace!(
                "Recomputed '{}' (ticket {}): {} children, completed {}",
                self.title,
                ticket,
                aggregate.children,
                aggregate.completed
            );
            state.published = ticket;
            state.aggregate = aggregate.clone();
            self.updates.send_replace(aggregate);
        } else {
            trace!(
                "Dropping stale recompute of '{}' (ticket {} <= {})",
                self.title,
                ticket,
                state.published
            );
        }
        state.aggregate.clone()
    }
}

impl ChangeListener for ContainerShared {
    fn child_changed(&self) {
        self.recompute();
    }
}

/// Compute the aggregate view of `children` at `now`.
///
/// `children` must be in insertion order; it decides ties for the current
/// task title.
pub fn aggregate(title: &str, children: &[TrackerSnapshot], now: Time) -> ContainerSnapshot {
    if children.is_empty() {
        return ContainerSnapshot::empty(title);
    }

    let completed: f64 = children.iter().map(|c| c.completed).sum();
    let speed: f64 = children.iter().map(|c| c.speed).sum();

    let total: Option<f64> = children.iter().map(|c| c.total).sum();
    let indeterminate = total.is_none();
    let percentage = total.map(|total| {
        if total > 0.0 {
            (completed / total).clamp(0.0, 1.0)
        } else {
            1.0
        }
    });
    let remaining = total.map(|total| (total - completed).max(0.0));

    let elapsed = children
        .iter()
        .filter_map(|c| c.start_time)
        .min()
        .map(|start| span_between(start, now));

    let finished = children.iter().all(|c| c.finished);

    ContainerSnapshot {
        title: title.to_string(),
        completed,
        total,
        percentage,
        speed,
        elapsed,
        remaining,
        time_remaining: eta(remaining, speed),
        finished,
        indeterminate,
        current_task_title: current_task_title(title, children),
        children: children.len(),
    }
}

/// Title of the most recently updated child that has made progress.
///
/// Ties go to the earliest inserted child; with no candidate the container
/// title is used.
fn current_task_title(title: &str, children: &[TrackerSnapshot]) -> String {
    let mut best: Option<(&TrackerSnapshot, Time)> = None;
    for child in children {
        let Some(updated) = child.last_updated else {
            continue;
        };
        if child.completed <= 0.0 {
            continue;
        }
        match best {
            Some((_, latest)) if updated <= latest => {}
            _ => best = Some((child, updated)),
        }
    }

    best.map(|(child, _)| child.title.clone())
        .unwrap_or_else(|| title.to_string())
}

impl Container {
    /// Create an empty container using the system clock.
    pub fn new(title: impl Into<String>) -> Self {
        Self::with_clock(title, SystemClock::shared())
    }

    /// Create an empty container driven by `clock`.
    ///
    /// The clock is shared with every child the container creates.
    pub fn with_clock(title: impl Into<String>, clock: SharedClock) -> Self {
        let title = title.into();
        let empty = ContainerSnapshot::empty(title.clone());
        let (updates, _) = watch::channel(empty.clone());
        Self {
            shared: Arc::new(ContainerShared {
                title,
                clock,
                state: Mutex::new(ContainerState {
                    children: IndexMap::new(),
                    aggregate: empty,
                    issued: 0,
                    published: 0,
                }),
                updates,
            }),
        }
    }

    fn new_child(&self, config: TrackerConfig) -> LeafTracker {
        let tracker = LeafTracker::with_clock(config, self.shared.clock.clone());
        let weak: Weak<ContainerShared> = Arc::downgrade(&self.shared);
        tracker.attach(weak);
        tracker
    }

    /// Store `tracker` under `key`, returning whatever it displaced.
    ///
    /// The caller detaches the displaced tracker once the lock is released.
    fn insert_locked(
        &self,
        state: &mut ContainerState,
        key: String,
        tracker: LeafTracker,
    ) -> Option<LeafTracker> {
        let previous = state.children.shift_remove(&key);
        if let Some(previous) = &previous {
            debug!("Replacing tracker {} for key '{}'", previous.id(), key);
        }
        debug!(
            "Container '{}' added tracker {} as '{}'",
            self.shared.title,
            tracker.id(),
            key
        );
        state.children.insert(key, tracker);
        previous
    }

    /// Create a child tracker under `key`.
    ///
    /// Any tracker already stored under `key` is detached and replaced; the
    /// new tracker counts as the most recently inserted child.
    pub fn create_child(
        &self,
        key: impl Into<String>,
        config: impl Into<TrackerConfig>,
    ) -> LeafTracker {
        let tracker = self.new_child(config.into());
        let previous = {
            let mut state = self.shared.state.lock();
            self.insert_locked(&mut state, key.into(), tracker.clone())
        };
        if let Some(previous) = previous {
            previous.detach();
        }
        self.shared.recompute();
        tracker
    }

    /// Get the child under `key`, creating it titled `key` if missing.
    ///
    /// An existing child is returned as is, whatever its total.
    pub fn subtask(&self, key: impl Into<String>, total: Option<f64>) -> LeafTracker {
        let key = key.into();
        let mut config = TrackerConfig::new(key.clone());
        config.total = total;

        let tracker = {
            let mut state = self.shared.state.lock();
            if let Some(existing) = state.children.get(&key) {
                return existing.clone();
            }
            let tracker = self.new_child(config);
            self.insert_locked(&mut state, key, tracker.clone());
            tracker
        };
        self.shared.recompute();
        tracker
    }

    /// Detach and drop the child under `key`.
    pub fn remove_child(&self, key: &str) -> Result<()> {
        let removed = self
            .shared
            .state
            .lock()
            .children
            .shift_remove(key)
            .ok_or_else(|| ProgressError::not_found(key))?;
        removed.detach();
        debug!(
            "Container '{}' removed tracker {} ('{}')",
            self.shared.title,
            removed.id(),
            key
        );
        self.shared.recompute();
        Ok(())
    }

    /// The child under `key`.
    pub fn get(&self, key: &str) -> Result<LeafTracker> {
        self.shared
            .state
            .lock()
            .children
            .get(key)
            .cloned()
            .ok_or_else(|| ProgressError::not_found(key))
    }

    /// Whether a child exists under `key`.
    pub fn contains(&self, key: &str) -> bool {
        self.shared.state.lock().children.contains_key(key)
    }

    /// Child keys in insertion order.
    pub fn keys(&self) -> Vec<String> {
        self.shared.state.lock().children.keys().cloned().collect()
    }

    /// Number of children.
    pub fn len(&self) -> usize {
        self.shared.state.lock().children.len()
    }

    /// Whether the container has no children.
    pub fn is_empty(&self) -> bool {
        self.shared.state.lock().children.is_empty()
    }

    /// Container title.
    pub fn title(&self) -> &str {
        &self.shared.title
    }

    /// Snapshots of every child, in insertion order.
    pub fn children(&self) -> Vec<(String, TrackerSnapshot)> {
        let children: Vec<(String, LeafTracker)> = self
            .shared
            .state
            .lock()
            .children
            .iter()
            .map(|(key, child)| (key.clone(), child.clone()))
            .collect();

        let now = self.shared.clock.now();
        children
            .into_iter()
            .map(|(key, child)| (key, child.snapshot_at(now)))
            .collect()
    }

    /// The cached aggregate from the latest recompute.
    pub fn snapshot(&self) -> ContainerSnapshot {
        self.shared.state.lock().aggregate.clone()
    }

    /// Recompute the aggregate now, e.g. to refresh `elapsed` while idle.
    ///
    /// Returns the published aggregate, which may come from a newer
    /// concurrent recompute.
    pub fn recompute(&self) -> ContainerSnapshot {
        self.shared.recompute()
    }

    /// Observe every recomputed aggregate.
    ///
    /// The receiver starts at the current aggregate. Do not hold a borrow of
    /// the receiver across calls into the container.
    pub fn subscribe(&self) -> watch::Receiver<ContainerSnapshot> {
        self.shared.updates.subscribe()
    }
}

impl fmt::Debug for Container {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Container")
            .field("title", &self.shared.title)
            .field("children", &self.keys())
            .finish()
    }
}
