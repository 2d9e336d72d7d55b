//! Monotonic timer wheel.
//!
//! An ordered set of timers keyed by absolute deadline. [`TimerManager`] only
//! answers two questions for its callers (the I/O reactor's idle fiber, in
//! practice): "how long until the next one fires" and "give me everything
//! that's due". It does not run callbacks itself — the caller schedules
//! whatever `drain_expired` returns onto the scheduler.

use crate::clock;
use std::cell::{Cell, RefCell};
use std::collections::BTreeSet;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// A clock that appears to have jumped backwards by more than this is
/// treated as an operator correction: every pending timer is drained on the
/// next tick rather than left to stall.
const ROLLBACK_THRESHOLD: Duration = Duration::from_secs(3600);

pub type Callback = Box<dyn FnOnce() + 'static>;

struct TimerState {
    id: u64,
    period: Cell<Duration>,
    recurring: bool,
    last_deadline: Cell<Duration>,
    /// `Rc<dyn Fn()>` rather than `Box<dyn FnOnce()>` so a recurring timer's
    /// callback can be re-armed after firing. `cancel` and one-shot firing
    /// both just drop the last reference.
    callback: RefCell<Option<Rc<dyn Fn()>>>,
}

/// A handle to a scheduled timer. A cancelled timer is indistinguishable
/// from an absent one: [`Timer::cancel`] just drops the callback, leaving
/// the (now inert) entry to be swept out on the next `drain_expired`.
#[derive(Clone)]
pub struct Timer {
    state: Rc<TimerState>,
}

/// How [`TimerManager::reset`] recomputes a timer's next deadline.
pub enum Reset {
    /// `now + period`.
    FromNow,
    /// `last_deadline + period` — keeps the timer on its original cadence
    /// instead of restarting the count from the moment of the reset.
    FromScheduled,
}

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct Key {
    next: Duration,
    id: u64,
}

#[derive(Clone)]
struct Entry {
    key: Key,
    state: Rc<TimerState>,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}
impl Eq for Entry {}
impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for Entry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.key.cmp(&other.key)
    }
}

impl Timer {
    pub fn cancel(&self) {
        self.state.callback.borrow_mut().take();
    }

    pub fn id(&self) -> u64 {
        self.state.id
    }
}

pub struct TimerManager {
    entries: RefCell<BTreeSet<Entry>>,
    next_id: AtomicU64,
    last_now: RefCell<Duration>,
}

impl TimerManager {
    pub fn new() -> Self {
        Self {
            entries: RefCell::new(BTreeSet::new()),
            next_id: AtomicU64::new(1),
            last_now: RefCell::new(clock::now()),
        }
    }

    /// Schedules `callback` to run once after `period`, or every `period`
    /// if `recurring`.
    pub fn add_timer(
        &self,
        period: Duration,
        callback: impl Fn() + 'static,
        recurring: bool,
    ) -> Timer {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let state = Rc::new(TimerState {
            id,
            period: Cell::new(period),
            recurring,
            last_deadline: Cell::new(clock::now() + period),
            callback: RefCell::new(Some(Rc::new(callback))),
        });
        self.insert(state.clone(), clock::now() + period);
        Timer { state }
    }

    /// Changes `timer`'s period and recomputes its next deadline according
    /// to `mode`, without disturbing its identity (a handle obtained before
    /// `reset` still refers to the same, now-rescheduled, timer).
    pub fn reset(&self, timer: &Timer, period: Duration, mode: Reset) {
        let state = &timer.state;
        self.remove_by_id(state.id);
        state.period.set(period);
        let base = match mode {
            Reset::FromNow => clock::now(),
            Reset::FromScheduled => state.last_deadline.get(),
        };
        self.insert(state.clone(), base + period);
    }

    fn remove_by_id(&self, id: u64) {
        let mut entries = self.entries.borrow_mut();
        if let Some(found) = entries.iter().find(|e| e.state.id == id).cloned() {
            entries.remove(&found);
        }
    }

    /// Wraps `callback` so it only runs if `weak` still resolves to a live
    /// object at fire time, tying the timer's effect to that object's
    /// lifetime without the timer itself owning it.
    pub fn add_condition_timer<U: 'static>(
        &self,
        period: Duration,
        weak: Weak<U>,
        callback: impl Fn(Rc<U>) + 'static,
        recurring: bool,
    ) -> Timer {
        self.add_timer(
            period,
            move || {
                if let Some(strong) = weak.upgrade() {
                    callback(strong);
                }
            },
            recurring,
        )
    }

    fn insert(&self, state: Rc<TimerState>, next: Duration) {
        let key = Key {
            next,
            id: state.id,
        };
        state.last_deadline.set(next);
        self.entries.borrow_mut().insert(Entry { key, state });
    }

    /// Delay until the earliest timer fires; `Duration::ZERO` if one is
    /// already due, or [`clock::INFINITY`] if the set is empty.
    pub fn next_timeout(&self) -> Duration {
        let now = clock::now();
        match self.entries.borrow().iter().next() {
            None => clock::INFINITY,
            Some(e) if e.key.next <= now => Duration::ZERO,
            Some(e) => e.key.next - now,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }

    /// Removes every timer whose deadline has passed and returns their
    /// callbacks in ascending deadline order; recurring timers are
    /// re-inserted with `next = now + period` before this returns. Detects
    /// clock rollback: if `now` is more than an hour behind the previously
    /// observed `now`, every scheduled timer is treated as expired this
    /// tick, recurring ones included.
    pub fn drain_expired(&self) -> Vec<Callback> {
        let now = clock::now();
        let rolled_back = {
            let mut last_now = self.last_now.borrow_mut();
            let rolled_back = *last_now > now && (*last_now - now) > ROLLBACK_THRESHOLD;
            *last_now = now;
            rolled_back
        };

        let due = {
            let mut entries = self.entries.borrow_mut();
            let mut due = Vec::new();
            let mut remaining = BTreeSet::new();
            for entry in std::mem::take(&mut *entries) {
                if rolled_back || entry.key.next <= now {
                    due.push(entry);
                } else {
                    remaining.insert(entry);
                }
            }
            *entries = remaining;
            due
        };

        let mut callbacks = Vec::with_capacity(due.len());
        for entry in due {
            let cb = entry.state.callback.borrow_mut().take();
            let Some(cb) = cb else { continue };
            if entry.state.recurring {
                *entry.state.callback.borrow_mut() = Some(cb.clone());
                self.insert(entry.state.clone(), now + entry.state.period.get());
            }
            callbacks.push(Box::new(move || cb()) as Callback);
        }
        callbacks
    }
}

impl Default for TimerManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell as StdRefCell;
    use std::rc::Rc as StdRc;

    #[test]
    fn timers_fire_in_deadline_order() {
        let mgr = TimerManager::new();
        let order = StdRc::new(StdRefCell::new(Vec::new()));
        let o1 = order.clone();
        let o2 = order.clone();
        mgr.add_timer(Duration::from_millis(0), move || o1.borrow_mut().push(1), false);
        mgr.add_timer(Duration::from_millis(0), move || o2.borrow_mut().push(2), false);
        std::thread::sleep(Duration::from_millis(5));
        let callbacks = mgr.drain_expired();
        for cb in callbacks {
            cb();
        }
        assert_eq!(*order.borrow(), vec![1, 2]);
    }

    #[test]
    fn cancelled_timer_does_not_fire() {
        let mgr = TimerManager::new();
        let fired = StdRc::new(StdRefCell::new(false));
        let f = fired.clone();
        let timer = mgr.add_timer(Duration::from_millis(0), move || *f.borrow_mut() = true, false);
        timer.cancel();
        std::thread::sleep(Duration::from_millis(2));
        for cb in mgr.drain_expired() {
            cb();
        }
        assert!(!*fired.borrow());
    }

    #[test]
    fn next_timeout_is_infinite_when_empty() {
        let mgr = TimerManager::new();
        assert_eq!(mgr.next_timeout(), clock::INFINITY);
    }

    #[test]
    fn recurring_timer_is_rearmed_after_firing() {
        let mgr = TimerManager::new();
        let hits = StdRc::new(StdRefCell::new(0));
        let h = hits.clone();
        mgr.add_timer(Duration::from_millis(0), move || *h.borrow_mut() += 1, true);

        std::thread::sleep(Duration::from_millis(2));
        for cb in mgr.drain_expired() {
            cb();
        }
        assert_eq!(*hits.borrow(), 1);
        assert!(!mgr.is_empty(), "recurring timer should be re-inserted");

        std::thread::sleep(Duration::from_millis(2));
        for cb in mgr.drain_expired() {
            cb();
        }
        assert_eq!(*hits.borrow(), 2);
    }

    #[test]
    fn reset_from_now_postpones_a_pending_timer() {
        let mgr = TimerManager::new();
        let fired = StdRc::new(StdRefCell::new(false));
        let f = fired.clone();
        let timer = mgr.add_timer(Duration::from_millis(0), move || *f.borrow_mut() = true, false);

        mgr.reset(&timer, Duration::from_secs(60), Reset::FromNow);
        for cb in mgr.drain_expired() {
            cb();
        }
        assert!(!*fired.borrow(), "timer rescheduled 60s out should not be due yet");
        assert!(!mgr.is_empty());
    }
}
