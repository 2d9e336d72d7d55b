//! Edge-triggered I/O reactor layered on top of the scheduler.
//!
//! [`IoManager`] composes a [`Scheduler`] with a per-worker timer manager and
//! an `epoll`-based multiplexor, and installs itself as the scheduler's idle
//! hook: a worker with nothing queued parks in `epoll_wait` instead of
//! spinning, woken by readiness, a timer deadline, or a tickle.
//!
//! Each worker thread owns its *own* `epoll` instance, self-pipe, and timer
//! manager rather than sharing one process-wide multiplexor. This sidesteps
//! the question of what happens when two workers call `epoll_wait` on the
//! same descriptor concurrently — there is always exactly one waiter per
//! `epoll` instance — at the cost of a fiber's wakeup always landing back on
//! whichever worker happened to register the wait. Since scheduling a woken
//! fiber goes back through the (affinity-less) scheduler queue, nothing
//! downstream depends on that worker being any particular one.

use crate::fiber::{self, Fiber};
use crate::scheduler::{Affinity, Scheduler, SchedulerHooks, Work};
use crate::timer::{Timer, TimerManager};
use bitflags::bitflags;
use std::cell::RefCell;
use std::io;
use std::os::unix::io::RawFd;
use std::rc::Rc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::Duration;

bitflags! {
    pub struct Events: u8 {
        const READ = 0b01;
        const WRITE = 0b10;
    }
}

const IDLE_CEILING: Duration = Duration::from_secs(5);
const MAX_EVENTS: usize = 256;
const TICKLE_TOKEN: u64 = u64::MAX;

enum EventTarget {
    Fiber(Fiber),
    Callable(Box<dyn FnOnce() + Send + 'static>),
}

struct EventRecord {
    scheduler: Arc<Scheduler>,
    target: EventTarget,
}

struct FdContext {
    fd: RawFd,
    armed: Events,
    epoll_owner: RawFd,
    read: Option<EventRecord>,
    write: Option<EventRecord>,
}

impl FdContext {
    fn new(fd: RawFd) -> Self {
        Self {
            fd,
            armed: Events::empty(),
            epoll_owner: -1,
            read: None,
            write: None,
        }
    }
}

/// Composes a [`Scheduler`] with per-worker `epoll` reactors and timer
/// managers. Construct with [`IoManager::new`], install it as the idle loop
/// via the scheduler it returns, then call [`IoManager::start`].
pub struct IoManager {
    scheduler: Arc<Scheduler>,
    fds: RwLock<Vec<Option<Mutex<FdContext>>>>,
    outstanding: AtomicUsize,
    tickle_pipes: Mutex<Vec<RawFd>>,
}

struct WorkerReactor {
    epfd: RawFd,
    tickle_r: RawFd,
    tickle_w: RawFd,
    timers: TimerManager,
}

impl WorkerReactor {
    fn create() -> io::Result<Self> {
        let epfd = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };
        if epfd < 0 {
            return Err(io::Error::last_os_error());
        }
        let mut pipe_fds = [0i32; 2];
        if unsafe { libc::pipe2(pipe_fds.as_mut_ptr(), libc::O_NONBLOCK | libc::O_CLOEXEC) } != 0 {
            let err = io::Error::last_os_error();
            unsafe { libc::close(epfd) };
            return Err(err);
        }
        let (tickle_r, tickle_w) = (pipe_fds[0], pipe_fds[1]);
        let mut ev = libc::epoll_event {
            events: libc::EPOLLIN as u32,
            u64: TICKLE_TOKEN,
        };
        if unsafe { libc::epoll_ctl(epfd, libc::EPOLL_CTL_ADD, tickle_r, &mut ev) } != 0 {
            let err = io::Error::last_os_error();
            unsafe {
                libc::close(epfd);
                libc::close(tickle_r);
                libc::close(tickle_w);
            }
            return Err(err);
        }
        Ok(Self {
            epfd,
            tickle_r,
            tickle_w,
            timers: TimerManager::new(),
        })
    }
}

impl Drop for WorkerReactor {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.epfd);
            libc::close(self.tickle_r);
            libc::close(self.tickle_w);
        }
    }
}

thread_local! {
    static REACTOR: RefCell<Option<Rc<WorkerReactor>>> = RefCell::new(None);
}

struct IoHooks {
    io: Weak<IoManager>,
}

impl SchedulerHooks for IoHooks {
    fn tickle(&self) {
        if let Some(io) = self.io.upgrade() {
            io.tickle();
        }
    }

    fn idle_tick(&self) -> bool {
        match self.io.upgrade() {
            Some(io) => io.idle_tick(),
            None => false,
        }
    }
}

impl IoManager {
    /// Builds a scheduler with `num_threads` workers and installs this
    /// manager's reactor as its idle loop.
    pub fn new(num_threads: usize) -> Arc<Self> {
        let scheduler = Scheduler::new(num_threads);
        let io = Arc::new(Self {
            scheduler: scheduler.clone(),
            fds: RwLock::new(Vec::new()),
            outstanding: AtomicUsize::new(0),
            tickle_pipes: Mutex::new(Vec::new()),
        });
        scheduler.set_hooks(Arc::new(IoHooks {
            io: Arc::downgrade(&io),
        }));
        io
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    pub fn start(&self, use_caller: bool) {
        self.scheduler.start(use_caller);
    }

    pub fn stop(&self) {
        self.scheduler.stop();
    }

    pub fn outstanding_events(&self) -> usize {
        self.outstanding.load(Ordering::Acquire)
    }

    // -- timers, delegated to the calling thread's reactor -----------------

    pub fn add_timer(&self, period: Duration, callback: impl Fn() + 'static, recurring: bool) -> Timer {
        self.reactor().timers.add_timer(period, callback, recurring)
    }

    pub fn add_condition_timer<U: 'static>(
        &self,
        period: Duration,
        weak: std::rc::Weak<U>,
        callback: impl Fn(Rc<U>) + 'static,
        recurring: bool,
    ) -> Timer {
        self.reactor()
            .timers
            .add_condition_timer(period, weak, callback, recurring)
    }

    pub fn reset_timer(&self, timer: &Timer, period: Duration, mode: crate::timer::Reset) {
        self.reactor().timers.reset(timer, period, mode)
    }

    // -- event registration --------------------------------------------

    /// Suspends the current fiber until `fd` is ready for `event`, which
    /// must be exactly one of [`Events::READ`] or [`Events::WRITE`].
    pub fn wait_event(&self, fd: RawFd, event: Events) -> io::Result<()> {
        self.add_event(fd, event, None)?;
        fiber::yield_now();
        Ok(())
    }

    /// Arms `event` on `fd`. If `callback` is `None`, the currently running
    /// fiber is adopted as the wake target (pair with a `yield_now()`
    /// immediately after, as [`IoManager::wait_event`] does).
    ///
    /// # Panics
    /// Panics if `event` is not exactly one of READ or WRITE, or if that
    /// direction is already armed on `fd` — re-arming an armed event is a
    /// programmer error.
    pub fn add_event(
        &self,
        fd: RawFd,
        event: Events,
        callback: Option<Box<dyn FnOnce() + Send + 'static>>,
    ) -> io::Result<()> {
        assert!(
            event == Events::READ || event == Events::WRITE,
            "add_event takes exactly one direction, got {:?}",
            event
        );
        self.ensure_capacity(fd);
        let fds = self.fds.read().unwrap();
        let slot = fds[fd as usize].as_ref().unwrap();
        let mut ctx = slot.lock().unwrap();
        assert!(
            !ctx.armed.contains(event),
            "fd {} already has {:?} armed",
            fd,
            event
        );

        let epfd = self.reactor().epfd;
        let op = if ctx.armed.is_empty() {
            libc::EPOLL_CTL_ADD
        } else {
            libc::EPOLL_CTL_MOD
        };
        let new_mask = ctx.armed | event;
        let mut ev = libc::epoll_event {
            events: to_raw_events(new_mask),
            u64: fd as u64,
        };
        if unsafe { libc::epoll_ctl(epfd, op, fd, &mut ev) } != 0 {
            return Err(io::Error::last_os_error());
        }
        ctx.epoll_owner = epfd;
        ctx.armed = new_mask;

        let target = match callback {
            Some(cb) => EventTarget::Callable(cb),
            None => EventTarget::Fiber(fiber::current()),
        };
        let record = EventRecord {
            scheduler: self.scheduler.clone(),
            target,
        };
        match event {
            Events::READ => ctx.read = Some(record),
            Events::WRITE => ctx.write = Some(record),
            _ => unreachable!(),
        }
        self.outstanding.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    /// Detaches `event` from `fd` without invoking its callback. A no-op if
    /// `event` was not armed.
    pub fn del_event(&self, fd: RawFd, event: Events) {
        self.detach(fd, event, false);
    }

    /// Detaches `event` from `fd` and invokes its callback exactly once, to
    /// wake a fiber waiting on it (e.g. for cancellation or a timeout).
    pub fn cancel_event(&self, fd: RawFd, event: Events) {
        self.detach(fd, event, true);
    }

    /// Cancels every armed direction on `fd`, READ before WRITE.
    pub fn cancel_all(&self, fd: RawFd) {
        self.cancel_event(fd, Events::READ);
        self.cancel_event(fd, Events::WRITE);
    }

    fn detach(&self, fd: RawFd, event: Events, fire: bool) {
        let fired = {
            let fds = self.fds.read().unwrap();
            let Some(Some(slot)) = fds.get(fd as usize) else {
                return;
            };
            let mut ctx = slot.lock().unwrap();
            if !ctx.armed.contains(event) {
                return;
            }
            let record = match event {
                Events::READ => ctx.read.take(),
                Events::WRITE => ctx.write.take(),
                _ => unreachable!(),
            };
            let new_mask = ctx.armed & !event;
            let _ = self.apply_mask(&ctx, new_mask);
            ctx.armed = new_mask;
            record
        };
        if let Some(record) = fired {
            self.outstanding.fetch_sub(1, Ordering::AcqRel);
            if fire {
                submit(record);
            }
        }
    }

    fn apply_mask(&self, ctx: &FdContext, mask: Events) -> io::Result<()> {
        if ctx.epoll_owner < 0 {
            return Ok(());
        }
        if mask.is_empty() {
            unsafe { libc::epoll_ctl(ctx.epoll_owner, libc::EPOLL_CTL_DEL, ctx.fd, std::ptr::null_mut()) };
        } else {
            let mut ev = libc::epoll_event {
                events: to_raw_events(mask),
                u64: ctx.fd as u64,
            };
            unsafe { libc::epoll_ctl(ctx.epoll_owner, libc::EPOLL_CTL_MOD, ctx.fd, &mut ev) };
        }
        Ok(())
    }

    fn ensure_capacity(&self, fd: RawFd) {
        let idx = fd as usize;
        let needs_slot = {
            let fds = self.fds.read().unwrap();
            idx >= fds.len() || fds[idx].is_none()
        };
        if !needs_slot {
            return;
        }
        let mut fds = self.fds.write().unwrap();
        if idx >= fds.len() {
            let grown = ((idx as f64) * 1.5).ceil() as usize + 1;
            fds.resize_with(grown.max(idx + 1), || None);
        }
        if fds[idx].is_none() {
            fds[idx] = Some(Mutex::new(FdContext::new(fd)));
        }
    }

    fn reactor(&self) -> Rc<WorkerReactor> {
        REACTOR.with(|cell| {
            if let Some(r) = cell.borrow().as_ref() {
                return r.clone();
            }
            let reactor = Rc::new(WorkerReactor::create().expect("failed to create worker reactor"));
            self.tickle_pipes.lock().unwrap().push(reactor.tickle_w);
            *cell.borrow_mut() = Some(reactor.clone());
            reactor
        })
    }

    fn tickle(&self) {
        if self.scheduler.idle_count() == 0 {
            return;
        }
        let pipes = self.tickle_pipes.lock().unwrap();
        for &w in pipes.iter() {
            unsafe {
                libc::write(w, [1u8].as_ptr() as *const libc::c_void, 1);
            }
        }
    }

    fn idle_tick(&self) -> bool {
        let reactor = self.reactor();
        let pending_timers = !reactor.timers.is_empty();
        if self.scheduler.stopping() && self.outstanding_events() == 0 && !pending_timers {
            return false;
        }

        let timeout = reactor.timers.next_timeout().min(IDLE_CEILING);
        let mut events: [libc::epoll_event; MAX_EVENTS] = unsafe { std::mem::zeroed() };
        let n = loop {
            let rc = unsafe {
                libc::epoll_wait(
                    reactor.epfd,
                    events.as_mut_ptr(),
                    MAX_EVENTS as i32,
                    timeout_ms(timeout),
                )
            };
            if rc >= 0 {
                break rc as usize;
            }
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            panic!("epoll_wait failed: {err}");
        };

        for cb in reactor.timers.drain_expired() {
            self.scheduler.schedule_any(Work::Callable(cb));
        }

        for ev in events.iter().take(n) {
            if ev.u64 == TICKLE_TOKEN {
                drain_pipe(reactor.tickle_r);
                continue;
            }
            self.handle_ready(ev.u64 as RawFd, ev.events);
        }

        fiber::yield_now();
        true
    }

    fn handle_ready(&self, fd: RawFd, raw: u32) {
        let fired = {
            let fds = self.fds.read().unwrap();
            let Some(Some(slot)) = fds.get(fd as usize) else {
                return;
            };
            let mut ctx = slot.lock().unwrap();

            let mut real = Events::empty();
            if raw & libc::EPOLLIN as u32 != 0 {
                real |= Events::READ;
            }
            if raw & libc::EPOLLOUT as u32 != 0 {
                real |= Events::WRITE;
            }
            if raw & (libc::EPOLLERR as u32 | libc::EPOLLHUP as u32) != 0 {
                real |= ctx.armed;
            }
            real &= ctx.armed;

            let residual = ctx.armed & !real;
            let _ = self.apply_mask(&ctx, residual);
            ctx.armed = residual;

            let mut fired = Vec::with_capacity(2);
            if real.contains(Events::READ) {
                if let Some(r) = ctx.read.take() {
                    fired.push(r);
                }
            }
            if real.contains(Events::WRITE) {
                if let Some(r) = ctx.write.take() {
                    fired.push(r);
                }
            }
            fired
        };
        for record in fired {
            self.outstanding.fetch_sub(1, Ordering::AcqRel);
            submit(record);
        }
    }
}

fn submit(record: EventRecord) {
    match record.target {
        EventTarget::Fiber(f) => record.scheduler.schedule(Work::Fiber(f), Affinity::Any),
        EventTarget::Callable(c) => record.scheduler.schedule(Work::Callable(c), Affinity::Any),
    }
}

fn to_raw_events(mask: Events) -> u32 {
    let mut raw = libc::EPOLLET as u32;
    if mask.contains(Events::READ) {
        raw |= libc::EPOLLIN as u32;
    }
    if mask.contains(Events::WRITE) {
        raw |= libc::EPOLLOUT as u32;
    }
    raw
}

fn timeout_ms(d: Duration) -> i32 {
    d.as_millis().min(i32::MAX as u128) as i32
}

fn drain_pipe(fd: RawFd) {
    let mut buf = [0u8; 64];
    loop {
        let n = unsafe { libc::read(fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len()) };
        if n <= 0 {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering as StdOrdering};

    fn make_pipe() -> (RawFd, RawFd) {
        let mut fds = [0i32; 2];
        assert_eq!(unsafe { libc::pipe(fds.as_mut_ptr()) }, 0);
        (fds[0], fds[1])
    }

    #[test]
    fn timer_then_event_wakes_waiting_fiber() {
        let io = IoManager::new(1);
        let (r, w) = make_pipe();
        let byte_seen = Arc::new(AtomicBool::new(false));
        let seen = byte_seen.clone();
        let io_for_fiber = io.clone();

        io.scheduler().schedule_any(Work::Callable(Box::new(move || {
            io_for_fiber.wait_event(r, Events::READ).unwrap();
            let mut buf = [0u8; 1];
            let n = unsafe { libc::read(r, buf.as_mut_ptr() as *mut libc::c_void, 1) };
            seen.store(n == 1 && buf[0] == 0x42, StdOrdering::SeqCst);
        })));

        let io_for_timer = io.clone();
        io.scheduler().schedule_any(Work::Callable(Box::new(move || {
            io_for_timer.add_timer(Duration::from_millis(50), move || {
                let byte = [0x42u8];
                unsafe { libc::write(w, byte.as_ptr() as *const libc::c_void, 1) };
            }, false);
        })));

        std::thread::spawn({
            let io = io.clone();
            move || {
                std::thread::sleep(Duration::from_millis(250));
                io.stop();
            }
        });
        io.start(true);
        assert!(byte_seen.load(StdOrdering::SeqCst));
    }

    #[test]
    fn cancel_event_wakes_waiter_without_data() {
        let io = IoManager::new(1);
        let (r, _w) = make_pipe();
        let woke = Arc::new(AtomicBool::new(false));
        let woke2 = woke.clone();
        let io_for_fiber = io.clone();

        io.scheduler().schedule_any(Work::Callable(Box::new(move || {
            io_for_fiber.wait_event(r, Events::READ).unwrap();
            woke2.store(true, StdOrdering::SeqCst);
        })));

        let io_for_cancel = io.clone();
        io.scheduler().schedule_any(Work::Callable(Box::new(move || {
            io_for_cancel.cancel_event(r, Events::READ);
        })));

        std::thread::spawn({
            let io = io.clone();
            move || {
                std::thread::sleep(Duration::from_millis(200));
                io.stop();
            }
        });
        io.start(true);
        assert!(woke.load(StdOrdering::SeqCst));
    }
}
