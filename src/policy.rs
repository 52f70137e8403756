//! Reservation and visibility policy.
//!
//! Pure functions that turn queue intents into store filters and updates,
//! plus the clock they read "now" from. Nothing here touches the store.
//!
//! Task states and the operations moving between them:
//! - available → reserved: [`reserve`]
//! - reserved → available: [`reschedule`] or [`timeout`]
//! - any → gone: [`remove`]

use std::sync::atomic::{AtomicI64, Ordering};

use crate::error::{Error, Result};
use crate::model::{Direction, Sort, SortKey, Task, TaskId};
use crate::store::{Filter, Update};

/// Default reservation timeout for `apply_timeout`, in seconds.
pub const DEFAULT_TIMEOUT_SECS: i64 = 120;

// ---------------------------------------------------------------------------
// Clock
// ---------------------------------------------------------------------------

/// Source of "now".
///
/// Priorities and the visibility horizon use epoch seconds. Reservations
/// are stamped in epoch milliseconds, and successive `now_millis` readings
/// from one clock strictly increase, so a sweep always runs strictly after
/// any reservation that finished before it started.
pub trait Clock: Send + Sync {
    /// Epoch seconds.
    fn now(&self) -> i64 {
        self.now_millis().div_euclid(1_000)
    }

    /// Epoch milliseconds, strictly increasing across calls.
    fn now_millis(&self) -> i64;
}

/// Last reading handed out by any [`SystemClock`] in this process.
static LAST_MILLIS: AtomicI64 = AtomicI64::new(i64::MIN);

/// Wall clock. Readings that would repeat within one millisecond are
/// nudged forward by one.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> i64 {
        chrono::Utc::now().timestamp()
    }

    fn now_millis(&self) -> i64 {
        let wall = chrono::Utc::now().timestamp_millis();
        let next = |prev: i64| wall.max(prev.saturating_add(1));
        match LAST_MILLIS.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |prev| Some(next(prev))) {
            Ok(prev) | Err(prev) => next(prev),
        }
    }
}

/// Settable clock for tests and simulations.
///
/// Time only moves when told to, except that every `now_millis` reading
/// ticks one millisecond, the way a real clock moves between two calls.
#[derive(Debug, Default)]
pub struct ManualClock {
    millis: AtomicI64,
}

impl ManualClock {
    /// Start at `now` epoch seconds.
    pub fn new(now: i64) -> Self {
        Self {
            millis: AtomicI64::new(now.saturating_mul(1_000)),
        }
    }

    pub fn set(&self, now: i64) {
        self.set_millis(now.saturating_mul(1_000));
    }

    pub fn set_millis(&self, millis: i64) {
        self.millis.store(millis, Ordering::SeqCst);
    }

    pub fn advance(&self, secs: i64) {
        self.advance_millis(secs.saturating_mul(1_000));
    }

    pub fn advance_millis(&self, millis: i64) {
        self.millis.fetch_add(millis, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> i64 {
        self.millis.load(Ordering::SeqCst).div_euclid(1_000)
    }

    fn now_millis(&self) -> i64 {
        self.millis.fetch_add(1, Ordering::SeqCst)
    }
}

// ---------------------------------------------------------------------------
// Transitions
// ---------------------------------------------------------------------------

/// Store request for one reservation attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct ReserveRequest {
    pub filter: Filter,
    pub update: Update,
    pub sort: Sort,
}

/// Reserve the lowest-priority available task at or below the horizon.
/// `now` is epoch seconds, `at` the reservation stamp in milliseconds.
///
/// The update sets reserved-at, which takes the document out of the
/// filter's match set; that is what lets a single atomic find-and-update
/// hand each task to at most one caller.
pub fn reserve(now: i64, at: i64, max_priority: Option<i64>) -> ReserveRequest {
    ReserveRequest {
        filter: Filter {
            max_priority: Some(max_priority.unwrap_or(now)),
            reserved: Some(false),
            ..Filter::default()
        },
        update: Update::Reserve { at },
        sort: Sort::by(SortKey::Priority, Direction::Ascending),
    }
}

/// Release a task by identity. Without an explicit priority the task's
/// last known priority is written back.
pub fn reschedule(task: &Task, priority: Option<i64>) -> (Filter, Update) {
    (
        Filter::id(task.id),
        Update::Release {
            priority: Some(priority.unwrap_or(task.priority)),
        },
    )
}

/// Release every reservation stamped strictly before `now_millis - secs`.
/// Priority is left alone.
pub fn timeout(now_millis: i64, secs: i64) -> Result<(Filter, Update)> {
    if secs < 0 {
        return Err(Error::InvalidArgument(format!(
            "timeout must be non-negative, got {secs}"
        )));
    }
    let cutoff = now_millis.saturating_sub(secs.saturating_mul(1_000));
    Ok((
        Filter {
            reserved_before: Some(cutoff),
            ..Filter::default()
        },
        Update::Release { priority: None },
    ))
}

pub fn remove(id: TaskId) -> Filter {
    Filter::id(id)
}

/// Filter for `search`'s `reserved` convenience flag.
pub fn visibility(reserved: Option<bool>) -> Filter {
    Filter {
        reserved,
        ..Filter::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TaskFields;

    fn task(priority: i64) -> Task {
        Task {
            id: TaskId::new(),
            priority,
            reserved_at: Some(50),
            fields: TaskFields::new(),
        }
    }

    #[test]
    fn reserve_defaults_horizon_to_now() {
        let req = reserve(1_000, 1_000_250, None);
        assert_eq!(req.filter.max_priority, Some(1_000));
        assert_eq!(req.filter.reserved, Some(false));
        assert_eq!(req.update, Update::Reserve { at: 1_000_250 });
        assert_eq!(req.sort, Sort::by(SortKey::Priority, Direction::Ascending));
    }

    #[test]
    fn reserve_honours_explicit_horizon() {
        assert_eq!(reserve(1_000, 1_000_000, Some(5_000)).filter.max_priority, Some(5_000));
    }

    #[test]
    fn reserved_task_leaves_the_reserve_filter() {
        let req = reserve(100, 100_000, None);
        let mut t = task(10);
        t.reserved_at = None;
        assert!(req.filter.matches(&t));
        req.update.apply(&mut t);
        assert!(!req.filter.matches(&t));
    }

    #[test]
    fn reschedule_preserves_last_known_priority() {
        let t = task(7);
        let (filter, update) = reschedule(&t, None);
        assert_eq!(filter, Filter::id(t.id));
        assert_eq!(update, Update::Release { priority: Some(7) });

        let (_, update) = reschedule(&t, Some(99));
        assert_eq!(update, Update::Release { priority: Some(99) });
    }

    #[test]
    fn timeout_cutoff_and_validation() {
        let (filter, update) = timeout(1_000_000, 120).unwrap();
        assert_eq!(filter.reserved_before, Some(880_000));
        assert_eq!(update, Update::Release { priority: None });
        assert!(timeout(1_000_000, -1).unwrap_err().is_validation());
    }

    #[test]
    fn zero_timeout_releases_a_reservation_from_the_previous_tick() {
        let clock = ManualClock::new(1_000);
        let req = reserve(clock.now(), clock.now_millis(), None);
        let mut t = task(1);
        t.reserved_at = None;
        req.update.apply(&mut t);

        let (filter, _) = timeout(clock.now_millis(), 0).unwrap();
        assert!(filter.matches(&t));
    }

    #[test]
    fn manual_clock_moves() {
        let clock = ManualClock::new(10);
        clock.advance(5);
        assert_eq!(clock.now(), 15);
        clock.set(3);
        assert_eq!(clock.now(), 3);
        clock.advance_millis(1_500);
        assert_eq!(clock.now(), 4);
    }

    #[test]
    fn manual_clock_ticks_per_millisecond_reading() {
        let clock = ManualClock::new(10);
        assert_eq!(clock.now_millis(), 10_000);
        assert_eq!(clock.now_millis(), 10_001);
        assert_eq!(clock.now(), 10);
    }

    #[test]
    fn system_clock_readings_strictly_increase() {
        let clock = SystemClock;
        let mut prev = clock.now_millis();
        for _ in 0..1_000 {
            let next = clock.now_millis();
            assert!(next > prev);
            prev = next;
        }
    }
}
