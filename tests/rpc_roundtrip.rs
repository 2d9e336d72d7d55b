//! Exercises the full RPC dispatcher: a server registers `Echo.Ping` and
//! publishes it through a coordination client; a client on a separate
//! `IoManager` resolves the endpoint and calls it.

use fibermesh::error::{Error, Result};
use fibermesh::io::IoManager;
use fibermesh::rpc::{
    InMemoryCoordinationClient, PingArgs, PingReply, RpcChannel, RpcController, RpcServer,
    RpcService, ServiceRegistry,
};
use fibermesh::scheduler::Work;
use prost::Message;
use std::net::TcpStream;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

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

/// Blocks (on this, non-fiber thread) until something is listening on
/// `addr`, or panics after `timeout`. Each successful probe connection is
/// dropped immediately, which the server sees as a connection that closed
/// before sending a frame — a harmless no-op for its accept loop.
fn wait_until_listening(addr: std::net::SocketAddr, timeout: Duration) {
    let start = Instant::now();
    loop {
        if TcpStream::connect(addr).is_ok() {
            return;
        }
        assert!(start.elapsed() < timeout, "server never started listening on {addr}");
        std::thread::sleep(Duration::from_millis(10));
    }
}

#[test]
fn client_resolves_and_calls_a_published_service() {
    fibermesh::logging::init();
    let bind_addr: std::net::SocketAddr = "127.0.0.1:18732".parse().unwrap();

    let registry = Arc::new(ServiceRegistry::new());
    registry.register(Arc::new(EchoService));
    let coordination = Arc::new(InMemoryCoordinationClient::new());

    let server_io = IoManager::new(1);
    let server = Arc::new(RpcServer::new(
        server_io.clone(),
        registry,
        coordination.clone(),
        bind_addr,
    ));
    server_io.scheduler().schedule_any(Work::Callable(Box::new(move || {
        let _ = server.run();
    })));
    // Runs on its own worker thread for the rest of the test process; never
    // explicitly stopped, same as a long-lived server binary.
    server_io.start(false);

    wait_until_listening(bind_addr, Duration::from_secs(5));

    let client_io = IoManager::new(1);
    let channel = RpcChannel::new(client_io.clone(), coordination);

    let result = Arc::new(Mutex::new(None));
    let result_for_client = result.clone();
    let stopper = client_io.clone();
    client_io.scheduler().schedule_any(Work::Callable(Box::new(move || {
        let mut controller = RpcController::new();
        let request = PingArgs { value: "abc".to_string() };
        let mut args = Vec::new();
        request.encode(&mut args).unwrap();

        let response = channel.call_method("Echo", "Ping", &args, &mut controller);
        *result_for_client.lock().unwrap() = Some(if controller.failed() {
            Err(controller.error_text().to_string())
        } else {
            Ok(PingReply::decode(response.as_slice()).unwrap().value)
        });
        stopper.stop();
    })));

    client_io.start(true);

    let outcome = result.lock().unwrap().take().expect("client task never ran");
    assert_eq!(outcome, Ok("abc".to_string()));
}
