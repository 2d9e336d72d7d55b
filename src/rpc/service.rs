//! Service registration and method dispatch.
//!
//! The source indexes methods through generated protobuf descriptors (a
//! service-name → method-name → descriptor map of maps, each descriptor
//! carrying enough reflection data to decode args and invoke the right
//! virtual method). Without descriptor reflection, [`RpcService::call`]
//! plays the descriptor's role directly: a service matches `method` against
//! its own method names and does the decode/invoke/encode itself.
//! [`ServiceRegistry`] is the outer map, keyed by service name.

use crate::error::{Error, Result};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// One registered RPC service. Implementors decode `args` (the raw
/// `args_bytes` of an incoming frame) according to `method`, run the call,
/// and return the encoded response bytes.
pub trait RpcService: Send + Sync {
    fn name(&self) -> &str;

    /// The methods this service exposes, used to publish `/<service>/<method>`
    /// nodes in the coordination service at startup.
    fn method_names(&self) -> &'static [&'static str];

    fn call(&self, method: &str, args: &[u8]) -> Result<Vec<u8>>;
}

/// `service_name → RpcService`, guarded by a single lock since registration
/// only happens at startup and lookups are cheap.
#[derive(Default)]
pub struct ServiceRegistry {
    services: RwLock<HashMap<String, Arc<dyn RpcService>>>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, service: Arc<dyn RpcService>) {
        let name = service.name().to_string();
        self.services.write().unwrap().insert(name, service);
    }

    pub fn service_names(&self) -> Vec<String> {
        self.services.read().unwrap().keys().cloned().collect()
    }

    /// Returns the registered service by name, for callers (endpoint
    /// publication at startup) that need its method list rather than just
    /// its name.
    pub fn get(&self, service_name: &str) -> Option<Arc<dyn RpcService>> {
        self.services.read().unwrap().get(service_name).cloned()
    }

    /// Looks `service_name`/`method_name` up and invokes it. Used by the
    /// per-connection dispatch loop; lookup failures are ordinary `Error`
    /// values the caller logs and moves past, per the processing-loop
    /// policy of continuing after a malformed or unknown request.
    pub fn call(&self, service_name: &str, method_name: &str, args: &[u8]) -> Result<Vec<u8>> {
        let services = self.services.read().unwrap();
        let service = services
            .get(service_name)
            .ok_or_else(|| Error::NoSuchService(service_name.to_string()))?;
        service.call(method_name, args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop;
    impl RpcService for Noop {
        fn name(&self) -> &str {
            "Noop"
        }
        fn method_names(&self) -> &'static [&'static str] {
            &["Ping"]
        }
        fn call(&self, method: &str, args: &[u8]) -> Result<Vec<u8>> {
            match method {
                "Ping" => Ok(args.to_vec()),
                other => Err(Error::NoSuchMethod {
                    service: "Noop".to_string(),
                    method: other.to_string(),
                }),
            }
        }
    }

    #[test]
    fn call_dispatches_to_the_named_service_and_method() {
        let registry = ServiceRegistry::new();
        registry.register(Arc::new(Noop));
        let response = registry.call("Noop", "Ping", b"abc").unwrap();
        assert_eq!(response, b"abc");
    }

    #[test]
    fn unknown_service_is_a_lookup_error() {
        let registry = ServiceRegistry::new();
        assert!(matches!(
            registry.call("Ghost", "Ping", b""),
            Err(Error::NoSuchService(_))
        ));
    }

    #[test]
    fn unknown_method_is_a_lookup_error() {
        let registry = ServiceRegistry::new();
        registry.register(Arc::new(Noop));
        assert!(matches!(
            registry.call("Noop", "Pong", b""),
            Err(Error::NoSuchMethod { .. })
        ));
    }
}
