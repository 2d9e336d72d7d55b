//! RPC dispatcher: a length-prefixed protobuf frame over TCP, a service
//! registry and per-connection dispatch fiber, a client channel, and a
//! pluggable coordination client for endpoint discovery.
//!
//! Frame layout (see [`codec`]): `[u32 total_size][u32 header_size]
//! [header_bytes][args_bytes]`, `header_bytes` decoding to [`RequestHeader`].
//! A server publishes `/<service>` (durable) and `/<service>/<method>`
//! (ephemeral, value `host:port`) to its [`CoordinationClient`] at startup;
//! a client resolves the latter before connecting.

mod client;
mod codec;
mod controller;
mod coordination;
mod net;
mod proto;
mod server;
mod service;

pub use client::RpcChannel;
pub use controller::RpcController;
pub use coordination::{CoordinationClient, InMemoryCoordinationClient};
pub use net::{FiberListener, FiberStream};
pub use proto::{PingArgs, PingReply, RequestHeader};
pub use server::RpcServer;
pub use service::{RpcService, ServiceRegistry};
