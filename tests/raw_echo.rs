//! A plain TCP echo exchange over `FiberListener`/`FiberStream`, with no RPC
//! framing involved — exercises the cooperative socket I/O path on its own.

mod common;

use fibermesh::io::IoManager;
use fibermesh::rpc::{FiberListener, FiberStream};
use fibermesh::scheduler::Work;
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[test]
fn echoed_bytes_round_trip_over_a_loopback_connection() {
    fibermesh::logging::init();
    let io = IoManager::new(1);
    common::watchdog(io.clone(), Duration::from_secs(5));

    let listener = FiberListener::bind(&io, "127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();

    io.scheduler().schedule_any(Work::Callable(Box::new(move || {
        let mut conn = listener.accept().unwrap();
        let mut buf = [0u8; 4];
        conn.read_exact(&mut buf).unwrap();
        conn.write_all(&buf).unwrap();
    })));

    let received = Arc::new(Mutex::new(None));
    let received_for_client = received.clone();
    let io_for_client = io.clone();
    let stopper = io.clone();
    io.scheduler().schedule_any(Work::Callable(Box::new(move || {
        let mut conn = FiberStream::connect(&io_for_client, addr).unwrap();
        conn.write_all(b"ping").unwrap();
        let mut buf = [0u8; 4];
        conn.read_exact(&mut buf).unwrap();
        *received_for_client.lock().unwrap() = Some(buf);
        stopper.stop();
    })));

    io.start(true);
    assert_eq!(received.lock().unwrap().as_ref(), Some(b"ping"));
}
