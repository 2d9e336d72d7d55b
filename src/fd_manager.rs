//! Process-wide per-descriptor bookkeeping.
//!
//! A single [`FdManager`] singleton ([`instance`]) tracks, for every file
//! descriptor the process has ever touched through this crate, whether it is
//! a socket, whether it has been forced non-blocking at the kernel level,
//! and what the caller's *intended* blocking mode was — the latter lets a
//! semantically blocking read on a kernel-nonblocking socket be emulated by
//! suspending the calling fiber on a readable event instead.

use once_cell::sync::Lazy;
use std::sync::RwLock;
use std::time::Duration;

/// Whether a probed descriptor turned out to be a socket. `Unknown` only
/// appears before the first probe; after `FdCtx::init` runs it is always
/// `Yes` or `No`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsSocket {
    Unknown,
    Yes,
    No,
}

#[derive(Debug, Clone)]
pub struct FdCtx {
    fd: i32,
    initialized: bool,
    is_socket: IsSocket,
    system_nonblocking: bool,
    user_nonblocking: bool,
    closed: bool,
    recv_timeout: Option<Duration>,
    send_timeout: Option<Duration>,
}

impl FdCtx {
    fn new(fd: i32) -> Self {
        Self {
            fd,
            initialized: false,
            is_socket: IsSocket::Unknown,
            system_nonblocking: false,
            user_nonblocking: false,
            closed: false,
            recv_timeout: None,
            send_timeout: None,
        }
    }

    /// Probes the descriptor once: if it is a socket, forces it
    /// system-level non-blocking and records the fact, while leaving
    /// `user_nonblocking` at its default (blocking) until the caller says
    /// otherwise via [`FdCtx::set_user_nonblocking`].
    fn init(&mut self) {
        if self.initialized {
            return;
        }
        self.is_socket = probe_is_socket(self.fd);
        if matches!(self.is_socket, IsSocket::Yes) {
            if force_nonblocking(self.fd).is_ok() {
                self.system_nonblocking = true;
            }
        }
        self.initialized = true;
    }

    pub fn fd(&self) -> i32 {
        self.fd
    }

    pub fn is_socket(&self) -> IsSocket {
        self.is_socket
    }

    pub fn is_user_blocking(&self) -> bool {
        !self.user_nonblocking
    }

    pub fn set_user_nonblocking(&mut self, nonblocking: bool) {
        self.user_nonblocking = nonblocking;
    }

    pub fn recv_timeout(&self) -> Option<Duration> {
        self.recv_timeout
    }

    pub fn set_recv_timeout(&mut self, timeout: Option<Duration>) {
        self.recv_timeout = timeout;
    }

    pub fn send_timeout(&self) -> Option<Duration> {
        self.send_timeout
    }

    pub fn set_send_timeout(&mut self, timeout: Option<Duration>) {
        self.send_timeout = timeout;
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

/// Index-addressable registry of [`FdCtx`] keyed by raw fd value, grown
/// lazily as higher fds are seen.
pub struct FdManager {
    slots: RwLock<Vec<Option<FdCtx>>>,
}

impl FdManager {
    fn new() -> Self {
        Self {
            slots: RwLock::new(Vec::new()),
        }
    }

    /// Returns a copy of the `FdCtx` for `fd`, creating and probing it first
    /// if `auto_create` is set and no entry exists yet.
    pub fn get(&self, fd: i32, auto_create: bool) -> Option<FdCtx> {
        debug_assert!(fd >= 0);
        let idx = fd as usize;
        {
            let slots = self.slots.read().unwrap();
            if let Some(Some(ctx)) = slots.get(idx) {
                return Some(ctx.clone());
            }
            if !auto_create {
                return None;
            }
        }
        let mut slots = self.slots.write().unwrap();
        if idx >= slots.len() {
            slots.resize_with(idx + 1, || None);
        }
        let ctx = slots[idx].get_or_insert_with(|| FdCtx::new(fd));
        ctx.init();
        Some(ctx.clone())
    }

    /// Applies `f` to the live entry for `fd`, creating it first if needed.
    pub fn with_mut<R>(&self, fd: i32, auto_create: bool, f: impl FnOnce(&mut FdCtx) -> R) -> Option<R> {
        let idx = fd as usize;
        let mut slots = self.slots.write().unwrap();
        if idx >= slots.len() {
            if !auto_create {
                return None;
            }
            slots.resize_with(idx + 1, || None);
        }
        if slots[idx].is_none() {
            if !auto_create {
                return None;
            }
            slots[idx] = Some(FdCtx::new(fd));
        }
        let ctx = slots[idx].as_mut().unwrap();
        ctx.init();
        Some(f(ctx))
    }

    pub fn del(&self, fd: i32) {
        let idx = fd as usize;
        let mut slots = self.slots.write().unwrap();
        if let Some(slot) = slots.get_mut(idx) {
            *slot = None;
        }
    }
}

static INSTANCE: Lazy<FdManager> = Lazy::new(FdManager::new);

/// The process-wide singleton. Lifetime = program lifetime, per the
/// concurrency model: there is exactly one of these per process.
pub fn instance() -> &'static FdManager {
    &INSTANCE
}

fn probe_is_socket(fd: i32) -> IsSocket {
    let mut stat: libc::stat = unsafe { std::mem::zeroed() };
    let rc = unsafe { libc::fstat(fd, &mut stat) };
    if rc != 0 {
        return IsSocket::Unknown;
    }
    if stat.st_mode & libc::S_IFMT == libc::S_IFSOCK {
        IsSocket::Yes
    } else {
        IsSocket::No
    }
}

fn force_nonblocking(fd: i32) -> std::io::Result<()> {
    unsafe {
        let flags = libc::fcntl(fd, libc::F_GETFL);
        if flags < 0 {
            return Err(std::io::Error::last_os_error());
        }
        if libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) < 0 {
            return Err(std::io::Error::last_os_error());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_with_auto_create_initializes_once() {
        let mgr = FdManager::new();
        let (r, _w) = unsafe {
            let mut fds = [0i32; 2];
            assert_eq!(libc::pipe(fds.as_mut_ptr()), 0);
            (fds[0], fds[1])
        };
        let ctx = mgr.get(r, true).unwrap();
        assert_eq!(ctx.is_socket(), IsSocket::No);
        assert!(mgr.get(r, false).is_some());
        mgr.del(r);
        assert!(mgr.get(r, false).is_none());
        unsafe {
            libc::close(r);
            libc::close(_w);
        }
    }
}
