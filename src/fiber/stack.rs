//! Guarded stack allocation for fibers.
//!
//! A fiber's stack is a raw `mmap` region with a single unmapped guard page
//! at the low address (the stack grows down on every architecture this crate
//! supports). Touching the guard page turns a stack overflow into a `SIGSEGV`
//! instead of silent corruption of whatever happens to live past the stack.

use std::io;
use std::ptr::NonNull;

/// Default stack size for a fiber that doesn't ask for one explicitly.
pub const DEFAULT_STACK_SIZE: usize = 128 * 1024;

pub struct FiberStack {
    base: NonNull<u8>,
    len: usize,
    guard_len: usize,
}

// SAFETY: the mapping is exclusively owned by the `FiberStack` and never
// aliased; the raw pointer it carries has no thread-affinity of its own.
unsafe impl Send for FiberStack {}

impl FiberStack {
    pub fn new(size: usize) -> io::Result<Self> {
        let page_size = page_size();
        let guard_len = page_size;
        let usable = round_up(size.max(page_size), page_size);
        let len = usable + guard_len;

        unsafe {
            let base = libc::mmap(
                std::ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            );
            if base == libc::MAP_FAILED {
                return Err(io::Error::last_os_error());
            }
            if libc::mprotect(base, guard_len, libc::PROT_NONE) != 0 {
                let err = io::Error::last_os_error();
                libc::munmap(base, len);
                return Err(err);
            }
            Ok(Self {
                base: NonNull::new_unchecked(base.cast()),
                len,
                guard_len,
            })
        }
    }

    /// Highest addressable byte plus one; this is the value a fresh stack
    /// pointer is initialized to, since the stack grows downward from here.
    pub fn top(&self) -> *mut u8 {
        unsafe { self.base.as_ptr().add(self.len) }
    }

    pub fn guard_range(&self) -> std::ops::Range<*mut u8> {
        let start = self.base.as_ptr();
        unsafe { start..start.add(self.guard_len) }
    }
}

impl Drop for FiberStack {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.base.as_ptr().cast(), self.len);
        }
    }
}

fn page_size() -> usize {
    unsafe { libc::sysconf(libc::_SC_PAGESIZE) as usize }
}

fn round_up(n: usize, to: usize) -> usize {
    (n + to - 1) / to * to
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stack_top_is_past_guard_page() {
        let stack = FiberStack::new(DEFAULT_STACK_SIZE).unwrap();
        let guard = stack.guard_range();
        assert!(stack.top() as usize > guard.end as usize);
    }
}
