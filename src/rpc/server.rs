//! TCP acceptor and per-connection dispatch loop.

use super::codec;
use super::coordination::CoordinationClient;
use super::net::{FiberListener, FiberStream};
use super::service::ServiceRegistry;
use crate::error::Result;
use crate::io::IoManager;
use crate::scheduler::Work;
use std::net::SocketAddr;
use std::sync::Arc;

/// Binds a listener, publishes this service's endpoints, and accepts
/// connections forever, handing each one to its own fiber.
pub struct RpcServer {
    io: Arc<IoManager>,
    registry: Arc<ServiceRegistry>,
    coordination: Arc<dyn CoordinationClient>,
    bind_addr: SocketAddr,
}

impl RpcServer {
    pub fn new(
        io: Arc<IoManager>,
        registry: Arc<ServiceRegistry>,
        coordination: Arc<dyn CoordinationClient>,
        bind_addr: SocketAddr,
    ) -> Self {
        Self {
            io,
            registry,
            coordination,
            bind_addr,
        }
    }

    /// Runs the accept loop. Intended to be invoked from inside a fiber —
    /// it blocks (cooperatively) for as long as the server is up.
    pub fn run(&self) -> Result<()> {
        let listener = FiberListener::bind(&self.io, self.bind_addr)?;
        let local_addr = listener.local_addr()?;
        self.publish_endpoints(local_addr)?;
        log::info!("rpc server listening on {local_addr}");

        loop {
            let stream = listener.accept()?;
            let registry = self.registry.clone();
            self.io.scheduler().schedule_any(Work::Callable(Box::new(move || {
                if let Err(err) = handle_connection(stream, &registry) {
                    log::warn!("connection terminated: {err}");
                }
            })));
        }
    }

    fn publish_endpoints(&self, local_addr: SocketAddr) -> Result<()> {
        let endpoint = local_addr.to_string();
        for service_name in self.registry.service_names() {
            self.coordination
                .create_persistent(&format!("/{service_name}"), b"")?;
            let Some(service) = self.registry.get(&service_name) else {
                continue;
            };
            for method_name in service.method_names() {
                self.coordination.create_ephemeral(
                    &format!("/{service_name}/{method_name}"),
                    endpoint.as_bytes(),
                )?;
            }
        }
        Ok(())
    }
}

/// Reads and dispatches frames off `stream` until it closes or errors.
/// Malformed or unresolvable frames are logged and the loop continues;
/// socket-level errors propagate and end the connection.
fn handle_connection(mut stream: FiberStream, registry: &ServiceRegistry) -> Result<()> {
    loop {
        let body = match codec::read_raw_frame(&mut stream) {
            Ok(Some(body)) => body,
            Ok(None) => return Ok(()),
            Err(e) => return Err(e),
        };

        let (header, args) = match codec::decode_frame(&body) {
            Ok(parsed) => parsed,
            Err(e) => {
                log::warn!("failed to decode rpc frame: {e}");
                continue;
            }
        };

        match registry.call(&header.service_name, &header.method_name, &args) {
            Ok(response) => {
                codec::write_response_frame(&mut stream, &response)?;
            }
            Err(e) => {
                log::warn!(
                    "{}.{} failed: {e}",
                    header.service_name,
                    header.method_name
                );
            }
        }
    }
}
