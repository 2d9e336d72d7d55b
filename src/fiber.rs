//! Cooperative multitasking module.
//!
//! A [`Fiber`] is a user-space execution context with its own stack: calling
//! [`Fiber::resume`] switches the calling thread's machine state onto that
//! stack, and the fiber runs until it calls [`fiber::yield_now`](yield_now)
//! or its entry closure returns. Fibers never run in parallel with each
//! other on the same thread — they are scheduled the way [`scheduler`](crate::scheduler)
//! arranges, never preempted.
//!
//! See also:
//! - [`mutex`] and [`channel`] — synchronization primitives built for
//!   fibers rather than OS threads: contention is resolved by yielding,
//!   never by blocking the underlying worker.

mod context;
pub mod channel;
pub mod mutex;
mod stack;

pub use channel::{Channel, RecvError, SendError, TryRecvError, TrySendError};
pub use mutex::Mutex;
pub use stack::{FiberStack, DEFAULT_STACK_SIZE};

use context::Context;
use std::cell::{Cell, RefCell, UnsafeCell};
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

/// State machine described in the data model: a fiber with a stack is
/// created READY, becomes RUNNING while it holds the CPU, and becomes TERM
/// once its entry closure returns. The bootstrap fiber skips READY and
/// starts RUNNING, and never reaches TERM.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FiberState {
    Ready,
    Running,
    Term,
}

type Entry = Box<dyn FnOnce() + 'static>;

struct FiberInner {
    id: u64,
    stack: Option<FiberStack>,
    ctx: UnsafeCell<Context>,
    state: Cell<FiberState>,
    entry: RefCell<Option<Entry>>,
    run_in_scheduler: bool,
    /// The fiber whose `resume()` call switched into this one; restored as
    /// the new current fiber when this one yields or terminates.
    resumer: RefCell<Option<Rc<FiberInner>>>,
}

impl std::fmt::Debug for FiberInner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FiberInner")
            .field("id", &self.id)
            .field("state", &self.state.get())
            .finish_non_exhaustive()
    }
}

impl Drop for FiberInner {
    /// A fiber with a stack must run to TERM before it is dropped: tearing
    /// down a suspended stack mid-frame leaves whatever it was holding
    /// (locks, destructors further up its call stack) never run. Per the
    /// crate's "programmer errors abort" convention (see `resume`/`reset`),
    /// this is fatal, not recoverable.
    fn drop(&mut self) {
        if self.stack.is_some() && self.state.get() != FiberState::Term {
            panic!(
                "fiber {} dropped while still {:?}; a fiber must reach TERM before its stack is freed",
                self.id,
                self.state.get()
            );
        }
    }
}

/// A user-space execution context with its own stack, switched cooperatively.
///
/// Cloning a `Fiber` clones the handle, not the execution context: all
/// clones refer to the same underlying stack and state.
#[derive(Clone, Debug)]
pub struct Fiber(Rc<FiberInner>);

static NEXT_FIBER_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static CURRENT: RefCell<Option<Rc<FiberInner>>> = RefCell::new(None);
    static BOOTSTRAP: RefCell<Option<Rc<FiberInner>>> = RefCell::new(None);
}

fn bootstrap() -> Rc<FiberInner> {
    BOOTSTRAP.with(|b| {
        let mut b = b.borrow_mut();
        if let Some(f) = b.as_ref() {
            return f.clone();
        }
        let inner = Rc::new(FiberInner {
            id: 0,
            stack: None,
            ctx: UnsafeCell::new(Context::uninit()),
            state: Cell::new(FiberState::Running),
            entry: RefCell::new(None),
            run_in_scheduler: false,
            resumer: RefCell::new(None),
        });
        *b = Some(inner.clone());
        CURRENT.with(|c| {
            if c.borrow().is_none() {
                *c.borrow_mut() = Some(inner.clone());
            }
        });
        inner
    })
}

fn current_inner() -> Rc<FiberInner> {
    CURRENT.with(|c| {
        if let Some(f) = c.borrow().as_ref() {
            return f.clone();
        }
        bootstrap()
    })
}

/// Returns a handle to the fiber currently running on this thread (the
/// bootstrap fiber if none has been resumed yet). Used by [`crate::io`] to
/// adopt the caller as the target of a suspended event registration.
pub fn current() -> Fiber {
    Fiber(current_inner())
}

impl Fiber {
    /// Creates a new READY fiber with its own `stack_size`-byte stack
    /// (rounded up to at least one page). `run_in_scheduler` records whether
    /// this fiber participates in the scheduler's own dispatch loop (see
    /// [`crate::scheduler`]) or is a plain, independently-resumed task.
    pub fn new<F>(entry: F, stack_size: usize, run_in_scheduler: bool) -> std::io::Result<Self>
    where
        F: FnOnce() + 'static,
    {
        let stack = FiberStack::new(stack_size)?;
        let id = NEXT_FIBER_ID.fetch_add(1, Ordering::Relaxed);
        let inner = Rc::new(FiberInner {
            id,
            stack: Some(stack),
            ctx: UnsafeCell::new(Context::uninit()),
            state: Cell::new(FiberState::Ready),
            entry: RefCell::new(Some(Box::new(entry))),
            run_in_scheduler,
            resumer: RefCell::new(None),
        });
        arm_context(&inner);
        Ok(Self(inner))
    }

    pub fn id(&self) -> u64 {
        self.0.id
    }

    pub fn state(&self) -> FiberState {
        self.0.state.get()
    }

    pub fn run_in_scheduler(&self) -> bool {
        self.0.run_in_scheduler
    }

    /// Switches from the fiber currently running on this thread into `self`.
    /// Returns once `self` yields or terminates.
    ///
    /// # Panics
    /// Panics (a programmer error per the error taxonomy) if `self` is not
    /// READY.
    pub fn resume(&self) {
        assert_eq!(
            self.0.state.get(),
            FiberState::Ready,
            "fiber {} is not READY, cannot resume it",
            self.0.id
        );
        let caller = current_inner();
        assert!(
            !Rc::ptr_eq(&caller, &self.0),
            "fiber {} attempted to resume itself",
            self.0.id
        );
        *self.0.resumer.borrow_mut() = Some(caller.clone());
        caller.state.set(FiberState::Ready);
        self.0.state.set(FiberState::Running);
        CURRENT.with(|c| *c.borrow_mut() = Some(self.0.clone()));

        // SAFETY: `caller` is the fiber currently executing on this thread
        // (by construction of `current()`), and `self.0` was either just
        // initialized by `Fiber::new`/`reset` or previously switched out of
        // by a prior `yield_now`/termination; neither is concurrently
        // resumed from anywhere else since fibers are thread-confined.
        unsafe {
            let caller_ctx = &mut *caller.ctx.get();
            let target_ctx = &*self.0.ctx.get();
            caller_ctx.switch(target_ctx);
        }
    }

    /// Reuses the stack of a TERM fiber, returning it to READY with a new
    /// entry closure.
    ///
    /// # Panics
    /// Panics if `self` is not TERM, or if `self` is the bootstrap fiber
    /// (which has no stack to reuse).
    pub fn reset<F>(&self, entry: F)
    where
        F: FnOnce() + 'static,
    {
        assert!(self.0.stack.is_some(), "cannot reset the bootstrap fiber");
        assert_eq!(
            self.0.state.get(),
            FiberState::Term,
            "cannot reset fiber {} before it has terminated",
            self.0.id
        );
        *self.0.entry.borrow_mut() = Some(Box::new(entry));
        arm_context(&self.0);
        self.0.state.set(FiberState::Ready);
    }
}

fn arm_context(inner: &Rc<FiberInner>) {
    let stack = inner.stack.as_ref().expect("bootstrap fiber has no stack");
    let arg = Rc::into_raw(inner.clone()) as *mut u8;
    unsafe {
        *inner.ctx.get() = Context::init_stack(stack.top(), arg);
    }
}

/// Suspends the currently running fiber, switching back to whichever fiber
/// called [`Fiber::resume`] on it. Returns once this fiber is resumed again.
///
/// # Panics
/// Panics if called from the bootstrap fiber of a thread that never had a
/// fiber resumed onto it (there is nowhere to yield back to).
pub fn yield_now() {
    let cur = current_inner();
    let target = cur
        .resumer
        .borrow_mut()
        .take()
        .expect("yield_now called with no resumer to yield back to");
    if cur.state.get() != FiberState::Term {
        cur.state.set(FiberState::Ready);
    }
    target.state.set(FiberState::Running);
    CURRENT.with(|c| *c.borrow_mut() = Some(target.clone()));

    // SAFETY: see `Fiber::resume`; the roles are simply reversed here.
    unsafe {
        let cur_ctx = &mut *cur.ctx.get();
        let target_ctx = &*target.ctx.get();
        cur_ctx.switch(target_ctx);
    }
}

pub fn current_id() -> u64 {
    current_inner().id
}

/// Runs the entry closure of the fiber pointed to by `arg`, then marks it
/// TERM and performs a final yield. Never returns: the final `yield_now`
/// always switches away before this function's frame would unwind, since a
/// TERM fiber is never resumed again.
unsafe fn run_entry_trampoline(arg: *mut u8) -> ! {
    let inner = Rc::from_raw(arg as *const FiberInner);
    let entry = inner
        .entry
        .borrow_mut()
        .take()
        .expect("fiber resumed with no entry closure set");
    entry();
    inner.state.set(FiberState::Term);
    drop(inner);
    yield_now();
    unreachable!("a TERM fiber was resumed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn fiber_runs_to_completion() {
        let ran = Rc::new(RefCell::new(false));
        let ran2 = ran.clone();
        let fiber = Fiber::new(move || *ran2.borrow_mut() = true, DEFAULT_STACK_SIZE, false).unwrap();
        assert_eq!(fiber.state(), FiberState::Ready);
        fiber.resume();
        assert_eq!(fiber.state(), FiberState::Term);
        assert!(*ran.borrow());
    }

    #[test]
    fn fiber_round_trip_counts_yields() {
        let yields = Rc::new(RefCell::new(0));
        let yields2 = yields.clone();
        let fiber = Fiber::new(
            move || {
                for _ in 0..3 {
                    *yields2.borrow_mut() += 1;
                    yield_now();
                }
            },
            DEFAULT_STACK_SIZE,
            false,
        )
        .unwrap();

        for _ in 0..3 {
            assert_eq!(fiber.state(), FiberState::Ready);
            fiber.resume();
        }
        assert_eq!(fiber.state(), FiberState::Term);
        assert_eq!(*yields.borrow(), 3);
    }

    #[test]
    fn reset_reuses_a_terminated_fiber() {
        let hits = Rc::new(RefCell::new(0));
        let h1 = hits.clone();
        let fiber = Fiber::new(move || *h1.borrow_mut() += 1, DEFAULT_STACK_SIZE, false).unwrap();
        fiber.resume();
        assert_eq!(fiber.state(), FiberState::Term);

        let h2 = hits.clone();
        fiber.reset(move || *h2.borrow_mut() += 1);
        assert_eq!(fiber.state(), FiberState::Ready);
        fiber.resume();
        assert_eq!(*hits.borrow(), 2);
    }

    #[test]
    #[should_panic(expected = "not READY")]
    fn resuming_a_term_fiber_is_fatal() {
        let fiber = Fiber::new(|| {}, DEFAULT_STACK_SIZE, false).unwrap();
        fiber.resume();
        fiber.resume();
    }
}
