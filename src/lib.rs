//! `fibermesh` is an M:N cooperative fiber scheduler: a small number of OS
//! worker threads run an arbitrarily large number of stackful fibers, each
//! fiber yielding back to its worker instead of being preempted. A timer
//! manager and an edge-triggered I/O reactor are layered on top of the same
//! scheduler, so a fiber can block on a socket or a deadline without
//! blocking the worker thread underneath it. A small RPC dispatcher —
//! length-prefixed frames over TCP, with a protobuf header and a pluggable
//! coordination service for endpoint discovery — is built on top of all of
//! the above.
//!
//! ### Module map
//!
//! - [Fibers: stackful coroutines, the cooperative `Mutex` and `Channel`](fiber)
//! - [The M:N scheduler: worker threads, task queues, thread affinity](scheduler)
//! - [Timers: one-shot, recurring and condition timers](timer)
//! - [The I/O reactor: edge-triggered readiness, one fiber suspended per event](io)
//! - [Per-descriptor bookkeeping shared by the reactor](fd_manager)
//! - [The RPC dispatcher: wire codec, services, client, coordination](rpc)
//! - [Config file and CLI flags for the demo binaries](config)
//! - [The monotonic clock timers measure deadlines against](clock)
//! - [Error handling](error)
//! - [Logging](logging) (see <https://docs.rs/log/>)
//!
//! ### Prerequisites
//!
//! - rustc 1.71 or newer
//! - Linux (the reactor uses epoll directly through `libc`)

pub mod clock;
pub mod config;
pub mod error;
pub mod fd_manager;
pub mod fiber;
pub mod io;
pub mod logging;
pub mod rpc;
pub mod scheduler;
pub mod thread;
pub mod timer;

pub use error::Result;
pub type StdResult<T, E> = std::result::Result<T, E>;
