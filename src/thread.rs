//! OS thread primitive used by the scheduler's worker pool.
//!
//! A worker thread needs three things beyond what [`std::thread`] already
//! gives us: a human-readable name available before the thread has actually
//! started running anything, a kernel thread id usable as an affinity key
//! (see [`crate::scheduler`]), and a guarantee that the spawning thread can
//! observe both before it returns from `spawn`.

use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

/// Kernel thread id, used as the affinity key in `scheduler::Task`.
pub type ThreadId = i32;

#[cfg(target_os = "linux")]
fn kernel_tid() -> ThreadId {
    unsafe { libc::syscall(libc::SYS_gettid) as ThreadId }
}

#[cfg(not(target_os = "linux"))]
fn kernel_tid() -> ThreadId {
    // No portable equivalent; fall back to a value derived from the
    // `std::thread::Thread` id so affinity comparisons are still consistent
    // within a single process.
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};
    let mut hasher = DefaultHasher::new();
    std::thread::current().id().hash(&mut hasher);
    hasher.finish() as ThreadId
}

struct Start {
    tid: Mutex<Option<ThreadId>>,
    ready: Condvar,
}

/// A named OS thread whose kernel thread id is known to the spawner as soon
/// as `new` returns.
pub struct Thread {
    name: String,
    tid: ThreadId,
    handle: Option<JoinHandle<()>>,
}

impl Thread {
    /// Spawns `f` on a new OS thread named `name`, blocking until the new
    /// thread has recorded its kernel thread id.
    pub fn new<F>(name: impl Into<String>, f: F) -> std::io::Result<Self>
    where
        F: FnOnce() + Send + 'static,
    {
        let name = name.into();
        let start = Arc::new(Start {
            tid: Mutex::new(None),
            ready: Condvar::new(),
        });
        let start2 = start.clone();
        let handle = std::thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                {
                    let mut tid = start2.tid.lock().unwrap();
                    *tid = Some(kernel_tid());
                    start2.ready.notify_one();
                }
                f();
            })?;

        let mut tid = start.tid.lock().unwrap();
        while tid.is_none() {
            tid = start.ready.wait(tid).unwrap();
        }
        let tid = tid.expect("condvar only wakes after tid is set");

        Ok(Self {
            name,
            tid,
            handle: Some(handle),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn id(&self) -> ThreadId {
        self.tid
    }

    pub fn join(mut self) -> std::thread::Result<()> {
        self.handle.take().expect("join called twice").join()
    }
}

/// Returns the calling thread's kernel thread id, for use as an affinity
/// key when scheduling a task onto "this" thread.
pub fn current_id() -> ThreadId {
    kernel_tid()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[test]
    fn spawned_thread_reports_a_stable_tid() {
        let ran = std::sync::Arc::new(AtomicBool::new(false));
        let ran2 = ran.clone();
        let observed = std::sync::Arc::new(Mutex::new(None));
        let observed2 = observed.clone();
        let thread = Thread::new("fibermesh-test", move || {
            *observed2.lock().unwrap() = Some(current_id());
            ran2.store(true, Ordering::SeqCst);
        })
        .unwrap();
        let spawner_tid = thread.id();
        thread.join().unwrap();
        assert!(ran.load(Ordering::SeqCst));
        assert_eq!(*observed.lock().unwrap(), Some(spawner_tid));
    }
}
