//! Calls `Echo.Ping` once against a running `rpc-echo-server` and prints the
//! reply, bootstrapped from the same `-i <config-file>` config format.
//!
//! The coordination client here is process-local ([`InMemoryCoordinationClient`]
//! can't actually see what the server process registered), so this demo
//! seeds its own copy with the server's advertised address read from the
//! config file rather than performing real discovery. A deployment with a
//! real coordination service wouldn't need this — the client would resolve
//! `/Echo/Ping` from the same service the server published to.

use fibermesh::config::Cli;
use fibermesh::error::Result;
use fibermesh::io::IoManager;
use fibermesh::rpc::{CoordinationClient, InMemoryCoordinationClient, PingArgs, PingReply, RpcChannel, RpcController};
use fibermesh::scheduler::Work;
use prost::Message;
use std::sync::Arc;

fn main() -> Result<()> {
    fibermesh::logging::init();
    let config = Cli::load_config()?;

    let coordination = Arc::new(InMemoryCoordinationClient::new());
    coordination.create_persistent("/Echo", b"")?;
    coordination.create_ephemeral(
        "/Echo/Ping",
        config.rpc_server_addr().to_string().as_bytes(),
    )?;

    let io = IoManager::new(1);
    let channel = RpcChannel::new(io.clone(), coordination);

    let stopper = io.clone();
    io.scheduler().schedule_any(Work::Callable(Box::new(move || {
        let mut controller = RpcController::new();
        let request = PingArgs { value: "abc".to_string() };
        let mut args = Vec::new();
        request.encode(&mut args).expect("encoding PingArgs cannot fail");

        let response = channel.call_method("Echo", "Ping", &args, &mut controller);
        if controller.failed() {
            log::error!("Echo.Ping failed: {}", controller.error_text());
        } else {
            let reply = PingReply::decode(response.as_slice()).expect("server sent a malformed PingReply");
            println!("Echo.Ping(\"abc\") -> {:?}", reply.value);
        }
        stopper.stop();
    })));

    io.start(true);
    Ok(())
}
