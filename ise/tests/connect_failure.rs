//! spec.md §8: "Connect failure" — connecting to a port nothing is
//! listening on completes with an error and registers no connection,
//! driven through the public `ise::connector` facade rather than the
//! crate-internal unit test in `ise_reactor::connector`.

use std::net::SocketAddr;
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

use ise::{connector, EventLoop, TcpHandler};

struct NoopHandler;
impl TcpHandler for NoopHandler {}

#[test]
fn connect_to_closed_port_fails_and_registers_nothing() {
    let port = portpicker::pick_unused_port().expect("no free port");
    let addr: SocketAddr = ([127, 0, 0, 1], port).into();
    let target_loop = Arc::new(EventLoop::start("connect-failure-test"));

    let (tx, rx) = mpsc::channel();
    connector::connect(addr, target_loop.clone(), Arc::new(NoopHandler), 1 << 16, Some(Duration::from_secs(2)), move |res| {
        tx.send(res).unwrap();
    });

    let result = rx.recv_timeout(Duration::from_secs(5)).expect("connect completion callback never fired");
    assert!(result.is_err(), "connecting to a port nothing listens on should fail");
    assert_eq!(target_loop.connection_count(), 0, "a failed connect must not register a connection");

    Arc::try_unwrap(target_loop).unwrap_or_else(|_| panic!("loop still shared")).stop(false);
}
