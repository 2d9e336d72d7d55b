//! Registers an `Echo` service with a single `Ping(str) -> str` method and
//! serves it over TCP, bootstrapped from a `-i <config-file>` config file.

use fibermesh::config::Cli;
use fibermesh::error::{Error, Result};
use fibermesh::io::IoManager;
use fibermesh::rpc::{InMemoryCoordinationClient, PingArgs, PingReply, RpcServer, RpcService, ServiceRegistry};
use fibermesh::scheduler::Work;
use prost::Message;
use std::sync::Arc;

struct EchoService;

impl RpcService for EchoService {
    fn name(&self) -> &str {
        "Echo"
    }

    fn method_names(&self) -> &'static [&'static str] {
        &["Ping"]
    }

    fn call(&self, method: &str, args: &[u8]) -> Result<Vec<u8>> {
        match method {
            "Ping" => {
                let request = PingArgs::decode(args)?;
                let reply = PingReply { value: request.value };
                let mut out = Vec::new();
                reply.encode(&mut out)?;
                Ok(out)
            }
            other => Err(Error::NoSuchMethod {
                service: "Echo".to_string(),
                method: other.to_string(),
            }),
        }
    }
}

fn main() -> Result<()> {
    fibermesh::logging::init();
    let config = Cli::load_config()?;

    let registry = Arc::new(ServiceRegistry::new());
    registry.register(Arc::new(EchoService));
    let coordination = Arc::new(InMemoryCoordinationClient::new());

    let io = IoManager::new(4);
    let server = Arc::new(RpcServer::new(
        io.clone(),
        registry,
        coordination,
        config.rpc_server_addr(),
    ));

    io.scheduler().schedule_any(Work::Callable(Box::new(move || {
        if let Err(err) = server.run() {
            log::error!("rpc server stopped: {err}");
        }
    })));

    // `start(true)` runs one dispatch loop on this thread and blocks here
    // for as long as the server (and whatever else is scheduled) keeps it
    // busy.
    io.start(true);
    Ok(())
}
