//! Shared harness for the scenario tests: a loopback pipe pair and a bounded
//! watchdog that stops an `IoManager` if a scenario doesn't wind itself down.

#![allow(dead_code)]

use fibermesh::io::IoManager;
use std::os::unix::io::RawFd;
use std::sync::Arc;
use std::time::Duration;

/// A non-blocking anonymous pipe, returned as `(read_fd, write_fd)`.
pub fn pipe_pair() -> (RawFd, RawFd) {
    let mut fds = [0i32; 2];
    assert_eq!(unsafe { libc::pipe(fds.as_mut_ptr()) }, 0);
    (fds[0], fds[1])
}

pub fn close_fd(fd: RawFd) {
    unsafe {
        libc::close(fd);
    }
}

/// Spawns a background thread that force-stops `io` after `timeout` as a
/// safety net, in case a scenario's own termination logic doesn't fire.
pub fn watchdog(io: Arc<IoManager>, timeout: Duration) {
    std::thread::spawn(move || {
        std::thread::sleep(timeout);
        io.stop();
    });
}
