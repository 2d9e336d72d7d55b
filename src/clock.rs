//! Monotonic clock used by the timer manager and the I/O reactor.
//!
//! The scheduler and timer manager only ever need a cheap, monotonically
//! non-decreasing millisecond counter to compute deadlines and timeouts;
//! everything in this module is built on [`std::time::Instant`] rather than
//! a raw `clock_gettime` call, since `Instant` already guarantees monotonicity
//! on every platform Rust supports.
//!
//! - [`now_ms()`] - monotonic milliseconds since an arbitrary, process-local
//!   epoch. Only meaningful relative to other calls of this function.
//! - [`INFINITY`] - a timeout value large enough to be treated as "never".

use once_cell::sync::Lazy;
use std::time::{Duration, Instant};

/// Sentinel used by [`crate::timer::TimerManager::next_timeout`] and the I/O
/// manager's idle loop to mean "no deadline is pending".
pub const INFINITY: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

static EPOCH: Lazy<Instant> = Lazy::new(Instant::now);

/// Monotonic milliseconds elapsed since the process started observing the
/// clock (the exact epoch is arbitrary and only comparisons between two
/// calls to this function are meaningful).
#[inline]
pub fn now_ms() -> u64 {
    EPOCH.elapsed().as_millis() as u64
}

/// Same clock as [`now_ms`], but returned as a [`Duration`] since the
/// process-local epoch. Useful when computing a deadline as `now() + period`.
#[inline]
pub fn now() -> Duration {
    EPOCH.elapsed()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn now_ms_is_monotonic() {
        let a = now_ms();
        std::thread::sleep(Duration::from_millis(5));
        let b = now_ms();
        assert!(b >= a);
    }
}
