//! Per-call result carrier for the client side of the dispatcher.
//!
//! A fiber that calls [`crate::rpc::RpcChannel::call_method`] cannot have an
//! error thrown back at it across the suspension points a network round trip
//! involves — the same reason a condition timer reports expiry through a
//! flag rather than a return value. `RpcController` plays that role for RPC:
//! the channel never returns `Result`, it writes the outcome here instead.

/// Carries the outcome of one RPC call. Reusable across calls via
/// [`RpcController::reset`].
#[derive(Debug, Default)]
pub struct RpcController {
    failed: bool,
    error_text: String,
}

impl RpcController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clears any previous failure, readying this controller for reuse.
    pub fn reset(&mut self) {
        self.failed = false;
        self.error_text.clear();
    }

    pub fn failed(&self) -> bool {
        self.failed
    }

    pub fn error_text(&self) -> &str {
        &self.error_text
    }

    pub fn set_failed(&mut self, reason: impl Into<String>) {
        self.failed = true;
        self.error_text = reason.into();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reset_clears_a_prior_failure() {
        let mut ctl = RpcController::new();
        ctl.set_failed("connection refused");
        assert!(ctl.failed());
        ctl.reset();
        assert!(!ctl.failed());
        assert_eq!(ctl.error_text(), "");
    }
}
