//! The M:N dispatch loop.
//!
//! A [`Scheduler`] owns a pool of worker threads and a single shared task
//! queue. Each worker repeatedly dequeues a task it is allowed to run (no
//! affinity, or affinity pinned to that worker) and resumes it; when the
//! queue has nothing for it, it resumes a per-worker *idle fiber* instead.
//! The idle fiber's body is swappable (see [`SchedulerHooks`]) — by default
//! it just yields in a loop until told to stop, but [`crate::io::IoManager`]
//! installs one that drives the event reactor.
//!
//! This scheduler is not work-stealing: a task pinned to thread `t` is only
//! ever picked up by the worker whose kernel thread id is `t`.

use crate::fiber::{Fiber, FiberState, DEFAULT_STACK_SIZE};
use crate::thread::{Thread, ThreadId};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Affinity {
    Any,
    Thread(ThreadId),
}

pub enum Work {
    Fiber(Fiber),
    Callable(Box<dyn FnOnce() + Send + 'static>),
}

// SAFETY: a `Fiber` is only ever resumed by one call path at a time, gated
// by its READY/RUNNING/TERM state machine, and the only way one crosses a
// thread boundary in this crate is by sitting in `Scheduler`'s queue behind
// a `Mutex` — which establishes a happens-before edge between the thread
// that enqueued it and the thread that dequeues it. The context switch
// itself (`fiber::context::Context::switch`) operates purely on memory and
// registers and has no thread affinity of its own.
unsafe impl Send for Fiber {}

struct TaskRecord {
    work: Work,
    affinity: Affinity,
}

/// Overridable pieces of the dispatch loop. The I/O manager installs an
/// implementation that turns the idle fiber into the event-reactor loop;
/// without one, a [`Scheduler`] just busy-yields when it has nothing to do.
pub trait SchedulerHooks: Send + Sync {
    /// Wakes a single parked worker. The base implementation is a no-op
    /// because a bare `Scheduler` has nothing for a parked worker to wait
    /// *on* beyond the queue itself.
    fn tickle(&self) {}

    /// Runs one iteration of idle work; returns `false` to let the idle
    /// fiber terminate (ending this worker's dispatch loop for good).
    fn idle_tick(&self) -> bool;
}

struct NullHooks {
    scheduler: Weak<Scheduler>,
}

impl SchedulerHooks for NullHooks {
    fn idle_tick(&self) -> bool {
        match self.scheduler.upgrade() {
            Some(s) => !s.stopping(),
            None => false,
        }
    }
}

pub struct Scheduler {
    queue: Mutex<VecDeque<TaskRecord>>,
    active: AtomicUsize,
    idle: AtomicUsize,
    stopping: AtomicBool,
    hooks: RwLock<Arc<dyn SchedulerHooks>>,
    workers: Mutex<Vec<Thread>>,
    num_threads: usize,
    /// Lets `&self` methods (`start`, `stop`) hand an owned `Arc<Self>` to
    /// spawned worker closures without requiring callers to hold the
    /// original `Arc` by value across the call.
    weak_self: Weak<Scheduler>,
}

thread_local! {
    static CALLABLE_SLOT: RefCell<Option<Fiber>> = RefCell::new(None);
    static IDLE_SLOT: RefCell<Option<Fiber>> = RefCell::new(None);
}

impl Scheduler {
    /// Creates a scheduler configured for `num_threads` workers (at least
    /// one). Hooks default to a no-op `tickle` and a plain yield-loop idle
    /// fiber; call [`Scheduler::set_hooks`] before [`Scheduler::start`] to
    /// install different ones.
    pub fn new(num_threads: usize) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            queue: Mutex::new(VecDeque::new()),
            active: AtomicUsize::new(0),
            idle: AtomicUsize::new(0),
            stopping: AtomicBool::new(false),
            hooks: RwLock::new(Arc::new(NullHooks {
                scheduler: weak.clone(),
            })),
            workers: Mutex::new(Vec::new()),
            num_threads: num_threads.max(1),
            weak_self: weak.clone(),
        })
    }

    pub fn set_hooks(&self, hooks: Arc<dyn SchedulerHooks>) {
        *self.hooks.write().unwrap() = hooks;
    }

    fn hooks(&self) -> Arc<dyn SchedulerHooks> {
        self.hooks.read().unwrap().clone()
    }

    /// Recovers an owned `Arc<Self>` from `&self`, for handing off to
    /// spawned threads. Only fails if called while the last `Arc` is being
    /// dropped, which can't happen here since that `Arc` is what's calling
    /// this method.
    fn arc_self(&self) -> Arc<Self> {
        self.weak_self.upgrade().expect("scheduler has no owning Arc")
    }

    /// Enqueues `work` with the given affinity. If the queue was empty
    /// before this insertion, wakes one idle worker.
    ///
    /// # Panics
    /// Panics if `work` is a fiber that is not READY — enqueuing a
    /// non-READY fiber is a programmer error.
    pub fn schedule(&self, work: Work, affinity: Affinity) {
        if let Work::Fiber(f) = &work {
            assert_eq!(
                f.state(),
                FiberState::Ready,
                "fiber {} must be READY to be scheduled",
                f.id()
            );
        }
        let was_empty = {
            let mut q = self.queue.lock().unwrap();
            let was_empty = q.is_empty();
            q.push_back(TaskRecord { work, affinity });
            was_empty
        };
        if was_empty {
            self.hooks().tickle();
        }
    }

    pub fn schedule_any(&self, work: Work) {
        self.schedule(work, Affinity::Any)
    }

    pub fn active_count(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    pub fn idle_count(&self) -> usize {
        self.idle.load(Ordering::Acquire)
    }

    pub fn queue_len(&self) -> usize {
        self.queue.lock().unwrap().len()
    }

    /// Base stopping predicate: stopping has been requested, the queue is
    /// empty, and no worker is mid-task. [`crate::io::IoManager`] layers
    /// "no outstanding events, no pending timers" on top of this.
    pub fn stopping(&self) -> bool {
        self.stopping.load(Ordering::Acquire)
            && self.active_count() == 0
            && self.queue.lock().unwrap().is_empty()
    }

    /// Spins up the worker pool and runs each worker's dispatch loop. If
    /// `use_caller` is set, one fewer thread is spawned and the calling
    /// thread runs a dispatch loop itself (blocking until [`Scheduler::stop`]
    /// is called from elsewhere); otherwise `start` spawns `num_threads`
    /// threads and returns immediately.
    pub fn start(&self, use_caller: bool) {
        let spawn_count = if use_caller {
            self.num_threads.saturating_sub(1)
        } else {
            self.num_threads
        };
        let mut workers = Vec::with_capacity(spawn_count);
        for i in 0..spawn_count {
            let sched = self.arc_self();
            let name = format!("fibermesh-worker-{i}");
            let handle = Thread::new(name, move || sched.dispatch_loop())
                .expect("failed to spawn scheduler worker thread");
            workers.push(handle);
        }
        *self.workers.lock().unwrap() = workers;

        if use_caller {
            self.arc_self().dispatch_loop();
        }
    }

    /// Marks the scheduler as stopping, wakes every worker that might be
    /// parked, and joins them all.
    pub fn stop(&self) {
        self.stopping.store(true, Ordering::Release);
        let hooks = self.hooks();
        for _ in 0..self.num_threads {
            hooks.tickle();
        }
        let workers = std::mem::take(&mut *self.workers.lock().unwrap());
        for w in workers {
            let _ = w.join();
        }
    }

    fn dequeue_for(&self, tid: ThreadId) -> (Option<Work>, bool) {
        let mut q = self.queue.lock().unwrap();
        let mut skipped_other_affinity = false;
        let mut found = None;
        for i in 0..q.len() {
            let matches = match q[i].affinity {
                Affinity::Any => true,
                Affinity::Thread(t) => t == tid,
            };
            if matches {
                found = Some(i);
                break;
            }
            skipped_other_affinity = true;
        }
        let work = found.map(|i| q.remove(i).unwrap().work);
        if work.is_some() {
            self.active.fetch_add(1, Ordering::AcqRel);
        }
        let should_tickle = skipped_other_affinity || !q.is_empty();
        (work, should_tickle)
    }

    fn dispatch_loop(self: Arc<Self>) {
        let tid = crate::thread::current_id();
        loop {
            let (work, should_tickle) = self.dequeue_for(tid);
            if should_tickle {
                self.hooks().tickle();
            }
            match work {
                Some(Work::Fiber(f)) => {
                    f.resume();
                    self.active.fetch_sub(1, Ordering::AcqRel);
                }
                Some(Work::Callable(c)) => {
                    let fiber = self.callable_fiber(c);
                    fiber.resume();
                    self.active.fetch_sub(1, Ordering::AcqRel);
                }
                None => {
                    let idle = self.idle_fiber();
                    if idle.state() == FiberState::Term {
                        break;
                    }
                    self.idle.fetch_add(1, Ordering::AcqRel);
                    idle.resume();
                    self.idle.fetch_sub(1, Ordering::AcqRel);
                }
            }
        }
    }

    fn callable_fiber(&self, task: Box<dyn FnOnce() + Send + 'static>) -> Fiber {
        CALLABLE_SLOT.with(|slot| {
            let mut slot = slot.borrow_mut();
            if let Some(f) = slot.as_ref() {
                if f.state() == FiberState::Term {
                    f.reset(move || task());
                    return f.clone();
                }
            }
            let f = Fiber::new(move || task(), DEFAULT_STACK_SIZE, true)
                .expect("failed to allocate worker callable fiber");
            *slot = Some(f.clone());
            f
        })
    }

    fn idle_fiber(&self) -> Fiber {
        IDLE_SLOT.with(|slot| {
            let mut slot = slot.borrow_mut();
            if let Some(f) = slot.as_ref() {
                return f.clone();
            }
            let hooks = self.hooks();
            let f = Fiber::new(
                move || loop {
                    if !hooks.idle_tick() {
                        break;
                    }
                    crate::fiber::yield_now();
                },
                DEFAULT_STACK_SIZE,
                true,
            )
            .expect("failed to allocate idle fiber");
            *slot = Some(f.clone());
            f
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize as StdAtomicUsize, Ordering as StdOrdering};

    #[test]
    fn fifo_under_no_affinity() {
        let sched = Scheduler::new(1);
        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..10 {
            let order = order.clone();
            sched.schedule_any(Work::Callable(Box::new(move || order.lock().unwrap().push(i))));
        }
        sched.start(true);
        sched.stop();
        assert_eq!(*order.lock().unwrap(), (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn stop_drains_every_scheduled_task() {
        let sched = Scheduler::new(4);
        let done = Arc::new(StdAtomicUsize::new(0));
        for _ in 0..1000 {
            let done = done.clone();
            sched.schedule_any(Work::Callable(Box::new(move || {
                done.fetch_add(1, StdOrdering::SeqCst);
            })));
        }
        sched.start(false);
        sched.stop();
        assert_eq!(done.load(StdOrdering::SeqCst), 1000);
        assert_eq!(sched.active_count(), 0);
        assert_eq!(sched.queue_len(), 0);
    }

    #[test]
    fn affinity_pins_to_one_thread() {
        let sched = Scheduler::new(3);
        sched.start(false);
        let target = {
            // Schedule a probe to learn a worker's thread id, then pin the
            // real workload to it.
            let (tx, rx) = std::sync::mpsc::channel();
            sched.schedule_any(Work::Callable(Box::new(move || {
                let _ = tx.send(crate::thread::current_id());
            })));
            rx.recv().unwrap()
        };

        let seen = Arc::new(Mutex::new(Vec::new()));
        for _ in 0..100 {
            let seen = seen.clone();
            sched.schedule(
                Work::Callable(Box::new(move || {
                    seen.lock().unwrap().push(crate::thread::current_id());
                })),
                Affinity::Thread(target),
            );
        }
        sched.stop();
        assert!(seen.lock().unwrap().iter().all(|&t| t == target));
        assert_eq!(seen.lock().unwrap().len(), 100);
    }
}
