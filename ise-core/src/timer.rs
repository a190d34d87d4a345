//! Timer queue: an ordered set of timers keyed by expiration, with
//! add/cancel/expire operations.
//!
//! Grounded in `ise_timer.h`/`ise_timer.cpp`'s `Timer`/`TimerQueue`: a
//! `BTreeSet<(Instant, TimerId)>` plays the role of the original's
//! `std::set<pair<Timestamp, Timer*>>`, and a `HashMap<TimerId, TimerRecord>`
//! plays the role of its `TimerIdMap`. All operations are meant to be
//! invoked only from the owning event loop's thread; nothing here is
//! `Sync` by itself (the event loop is the synchronization boundary).

use hashbrown::{HashMap, HashSet};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Uniquely identifies a timer for the lifetime of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimerId(u64);

static NEXT_TIMER_ID: AtomicU64 = AtomicU64::new(1);

/// Allocate a fresh, process-unique [`TimerId`] without registering a
/// timer under it yet. Lets a caller that can't mutate the queue
/// synchronously (e.g. `EventLoop::schedule_timer`, which must delegate
/// the actual insertion onto its owning thread) hand the id back to the
/// caller immediately instead of only learning it from inside the fired
/// callback.
#[must_use]
pub fn alloc_timer_id() -> TimerId {
    TimerId(NEXT_TIMER_ID.fetch_add(1, Ordering::Relaxed))
}

/// A callback invoked when a timer fires. Receives the owning queue so it
/// can cancel itself or a sibling timer before returning, mirroring
/// `ise_timer.cpp`'s callbacks calling back into `TimerManager::cancelTimer`.
pub type TimerCallback = Box<dyn FnMut(&mut TimerQueue) + Send>;

struct TimerRecord {
    expiration: Instant,
    /// Zero means one-shot.
    interval: Duration,
    callback: TimerCallback,
}

/// An ordered collection of timers supporting add/cancel/expire, with
/// re-entrant-safe cancellation from inside a firing callback.
#[derive(Default)]
pub struct TimerQueue {
    // Ties in expiration are broken by TimerId, matching spec ordering.
    order: BTreeSet<(Instant, TimerId)>,
    timers: HashMap<TimerId, TimerRecord>,
    /// `Some` only while `process_expired` is draining; records ids
    /// canceled during the current firing batch so they are not
    /// reinserted even though their `TimerRecord` was already pulled out
    /// of `timers` for the callback invocation.
    canceled_while_firing: Option<HashSet<TimerId>>,
}

impl TimerQueue {
    /// Create an empty timer queue.
    #[must_use]
    pub fn new() -> Self {
        Self {
            order: BTreeSet::new(),
            timers: HashMap::new(),
            canceled_while_firing: None,
        }
    }

    /// Register a new timer. `interval` of `Duration::ZERO` means one-shot.
    pub fn add_timer(
        &mut self,
        expiration: Instant,
        interval: Duration,
        callback: TimerCallback,
    ) -> TimerId {
        let id = alloc_timer_id();
        self.add_timer_with_id(id, expiration, interval, callback);
        id
    }

    /// Register a new timer under an id obtained earlier from
    /// [`alloc_timer_id`]. Lets a caller learn the id before the timer is
    /// actually inserted, e.g. across a thread hop.
    pub fn add_timer_with_id(
        &mut self,
        id: TimerId,
        expiration: Instant,
        interval: Duration,
        callback: TimerCallback,
    ) {
        self.order.insert((expiration, id));
        self.timers.insert(
            id,
            TimerRecord {
                expiration,
                interval,
                callback,
            },
        );
    }

    /// Cancel a timer. Safe to call from inside another timer's callback
    /// during `process_expired`: if `timer_id` has already been pulled out
    /// for firing this batch, it is marked so it will not be reinserted
    /// once its callback returns.
    pub fn cancel_timer(&mut self, timer_id: TimerId) {
        if let Some(record) = self.timers.remove(&timer_id) {
            self.order.remove(&(record.expiration, timer_id));
        }
        if let Some(canceled) = &mut self.canceled_while_firing {
            canceled.insert(timer_id);
        }
    }

    /// The nearest expiration among pending timers, if any.
    #[must_use]
    pub fn next_expiration(&self) -> Option<Instant> {
        self.order.iter().next().map(|(when, _)| *when)
    }

    /// Whether any timer is currently registered (pending, not counting
    /// ones mid-fire in the current `process_expired` batch).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.timers.is_empty()
    }

    /// Fire every timer whose expiration is `<= now`. Repeating timers
    /// that were not canceled during their own (or a sibling's) callback
    /// are re-inserted with `expiration = now + interval`. Callback panics
    /// propagate to the caller, same as the event loop's other delegated
    /// work (see `ise-reactor::event_loop`).
    pub fn process_expired(&mut self, now: Instant) {
        let mut expired = Vec::new();
        while let Some(&(when, id)) = self.order.iter().next() {
            if when > now {
                break;
            }
            self.order.remove(&(when, id));
            if let Some(record) = self.timers.remove(&id) {
                expired.push((id, record));
            }
        }

        for (id, mut record) in expired {
            self.canceled_while_firing.get_or_insert_with(HashSet::new);
            (record.callback)(self);
            let canceled = self
                .canceled_while_firing
                .as_ref()
                .is_some_and(|c| c.contains(&id));

            if !record.interval.is_zero() && !canceled {
                record.expiration = now + record.interval;
                self.order.insert((record.expiration, id));
                self.timers.insert(id, record);
            }
        }
        self.canceled_while_firing = None;
    }
}
