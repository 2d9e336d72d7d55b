//! Client-side call path: resolve, connect, frame, send, wait for a reply.

use super::codec;
use super::controller::RpcController;
use super::coordination::CoordinationClient;
use super::net::FiberStream;
use super::proto::RequestHeader;
use crate::error::{Error, Result};
use crate::io::IoManager;
use std::net::SocketAddr;
use std::sync::Arc;

/// Resolves `/<service>/<method>` through a [`CoordinationClient`], opens a
/// fresh connection per call, and reports the outcome through an
/// [`RpcController`] instead of returning `Result` — symmetric with how the
/// server reports per-request failures by logging rather than tearing down
/// the connection.
pub struct RpcChannel {
    io: Arc<IoManager>,
    coordination: Arc<dyn CoordinationClient>,
}

impl RpcChannel {
    pub fn new(io: Arc<IoManager>, coordination: Arc<dyn CoordinationClient>) -> Self {
        Self { io, coordination }
    }

    /// Calls `service_name.method_name(args)`, returning the raw response
    /// bytes on success. On failure, `controller` carries the reason and an
    /// empty `Vec` is returned. Must be called from inside a fiber — it
    /// suspends on both connection establishment and the response.
    pub fn call_method(
        &self,
        service_name: &str,
        method_name: &str,
        args: &[u8],
        controller: &mut RpcController,
    ) -> Vec<u8> {
        controller.reset();
        match self.try_call(service_name, method_name, args) {
            Ok(response) => response,
            Err(e) => {
                controller.set_failed(e.to_string());
                Vec::new()
            }
        }
    }

    fn try_call(&self, service_name: &str, method_name: &str, args: &[u8]) -> Result<Vec<u8>> {
        let path = format!("/{service_name}/{method_name}");
        let endpoint = self
            .coordination
            .get(&path)?
            .ok_or_else(|| Error::CoordinationPathMissing { path: path.clone() })?;
        let addr_str = String::from_utf8(endpoint).map_err(Error::other)?;
        let addr: SocketAddr = addr_str.parse().map_err(Error::other)?;

        let mut stream = FiberStream::connect(&self.io, addr)?;
        let header = RequestHeader {
            service_name: service_name.to_string(),
            method_name: method_name.to_string(),
            args_size: args.len() as u32,
        };
        codec::write_frame(&mut stream, &header, args)?;
        codec::read_response_frame(&mut stream)
    }
}
