//! Logging utils. See the ["log" crate documentation](https://docs.rs/log/)
//! for details — this crate never constructs its own `Record`s, it only
//! calls `log::{trace,debug,info,warn,error}!` from the scheduler, reactor
//! and RPC dispatcher and leaves the choice of sink to the binary that
//! embeds it.
//!
//! The logging façade itself is treated as an external collaborator,
//! specified only by its interface (a level-tagged text sink). That
//! interface is the `log` crate itself; this module just provides a
//! convenient default sink (`env_logger`) for the RPC demo binaries and
//! tests, which is the standard pairing for crates that log through `log`.
//!
//! Example:
//! ```no_run
//! fibermesh::logging::init();
//! log::info!("scheduler starting");
//! ```
use std::sync::Once;

static INIT: Once = Once::new();

/// Install an [`env_logger`] subscriber if one hasn't been installed yet.
///
/// Safe to call multiple times (e.g. once per test); only the first call
/// has an effect. Respects `RUST_LOG`, defaulting to `info`.
pub fn init() {
    INIT.call_once(|| {
        let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
            .format_timestamp_millis()
            .try_init();
    });
}

#[cfg(test)]
mod tests {
    #[test]
    fn init_is_idempotent() {
        super::init();
        super::init();
    }
}
