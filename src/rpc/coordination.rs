//! Endpoint discovery.
//!
//! The wire protocol and dispatch loop only need three operations out of a
//! coordination service: register a durable node, register an ephemeral one,
//! and look a node's value up. [`CoordinationClient`] is that boundary,
//! specified only by interface; a real deployment would back it with a
//! ZooKeeper (or etcd) client, which is out of scope here.
//! [`InMemoryCoordinationClient`] is a process-local stand-in used by the
//! demo binaries and the test suite.

use crate::error::Result;
use std::collections::HashMap;
use std::sync::RwLock;

/// Endpoint registry consulted by [`crate::rpc::RpcServer`] (to publish
/// `/<service>` and `/<service>/<method>`) and [`crate::rpc::RpcChannel`]
/// (to resolve `/<service>/<method>` before connecting).
pub trait CoordinationClient: Send + Sync {
    /// Registers a durable node. Value is typically empty (used for
    /// `/<service>`, which exists only to namespace its methods).
    fn create_persistent(&self, path: &str, value: &[u8]) -> Result<()>;

    /// Registers a node that disappears with the registering process. Used
    /// for `/<service>/<method>`, whose value is the literal `host:port` of
    /// the server currently serving it.
    fn create_ephemeral(&self, path: &str, value: &[u8]) -> Result<()>;

    /// Looks a node's value up, or `None` if it does not exist.
    fn get(&self, path: &str) -> Result<Option<Vec<u8>>>;
}

/// A single process's view of the coordination tree, held in memory.
/// Ephemeral and persistent nodes are indistinguishable once stored — there
/// is no separate process whose disconnection would clean the ephemeral ones
/// up, so callers that care about that distinction must remove them
/// themselves.
#[derive(Default)]
pub struct InMemoryCoordinationClient {
    nodes: RwLock<HashMap<String, Vec<u8>>>,
}

impl InMemoryCoordinationClient {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CoordinationClient for InMemoryCoordinationClient {
    fn create_persistent(&self, path: &str, value: &[u8]) -> Result<()> {
        self.nodes.write().unwrap().insert(path.to_string(), value.to_vec());
        Ok(())
    }

    fn create_ephemeral(&self, path: &str, value: &[u8]) -> Result<()> {
        self.nodes.write().unwrap().insert(path.to_string(), value.to_vec());
        Ok(())
    }

    fn get(&self, path: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.nodes.read().unwrap().get(path).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unregistered_path_resolves_to_none() {
        let client = InMemoryCoordinationClient::new();
        assert!(client.get("/Echo/Ping").unwrap().is_none());
    }

    #[test]
    fn registered_path_round_trips() {
        let client = InMemoryCoordinationClient::new();
        client.create_ephemeral("/Echo/Ping", b"127.0.0.1:12345").unwrap();
        assert_eq!(
            client.get("/Echo/Ping").unwrap().as_deref(),
            Some(&b"127.0.0.1:12345"[..])
        );
    }
}
