//! Outbound TCP connections: async `connect()` with a deadline, dispatched
//! to a caller-chosen event loop on success.
//!
//! Grounded in `original_source/include/ise_server_tcp.h`'s `TcpConnector`:
//! the original queues connect attempts and polls their socket state from a
//! dedicated worker thread because BSD/Winsock nonblocking `connect()` has
//! no async completion notification of its own. `compio::net::TcpStream`
//! already resolves to a completion future, so the worker-thread polling
//! loop collapses to one `compio::time::timeout`-wrapped `.connect().await`
//! per attempt; the `CompleteCallback` signature survives unchanged.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use compio::net::TcpStream;
use tracing::warn;

use ise_core::error::ReactorError;

use crate::callbacks::TcpHandler;
use crate::connection::{new_connection, TcpConnectionHandle};
use crate::event_loop::EventLoop;

/// Default connect timeout if the caller doesn't supply one, matching
/// `original_source`'s `TcpConnector` default of a few seconds.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Attempt an outbound connection to `peer_addr`, and on success register
/// it with `target_loop` exactly as an accepted connection would be. Fires
/// `on_complete` exactly once, on whichever thread the attempt settles on
/// (never the caller's thread, matching the original's asynchronous
/// `TcpConnector::connect`).
pub fn connect<H: TcpHandler>(
    peer_addr: SocketAddr,
    target_loop: Arc<EventLoop>,
    handler: Arc<H>,
    max_recv_buffer_size: usize,
    timeout: Option<Duration>,
    on_complete: impl FnOnce(Result<TcpConnectionHandle, ReactorError>) + Send + 'static,
) {
    let timeout = timeout.unwrap_or(DEFAULT_CONNECT_TIMEOUT);
    std::thread::Builder::new()
        .name(format!("ise-connect-{peer_addr}"))
        .spawn(move || {
            let runtime = compio::runtime::Runtime::new().expect("failed to start connector runtime");
            runtime.block_on(async move {
                let attempt = compio::time::timeout(timeout, TcpStream::connect(peer_addr)).await;
                let result = match attempt {
                    Ok(Ok(stream)) => match stream.local_addr() {
                        Ok(local_addr) => {
                            let (handle, pump) =
                                new_connection(stream, local_addr, peer_addr, handler, max_recv_buffer_size);
                            target_loop.register_connection(handle.clone(), pump);
                            Ok(handle)
                        }
                        Err(source) => Err(ReactorError::ConnectFailed { peer: peer_addr.to_string(), source }),
                    },
                    Ok(Err(source)) => Err(ReactorError::ConnectFailed { peer: peer_addr.to_string(), source }),
                    Err(_elapsed) => Err(ReactorError::ConnectFailed {
                        peer: peer_addr.to_string(),
                        source: std::io::Error::new(std::io::ErrorKind::TimedOut, "connect timed out"),
                    }),
                };
                if let Err(ref e) = result {
                    warn!(peer = %peer_addr, error = %e, "outbound connect failed");
                }
                on_complete(result);
            });
        })
        .expect("failed to spawn connector thread");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    struct NoopHandler;
    impl TcpHandler for NoopHandler {}

    #[test]
    fn connect_to_closed_port_reports_failure() {
        // A port nothing is listening on; the OS should refuse the
        // connection quickly rather than us waiting out the timeout.
        let port = portpicker::pick_unused_port().expect("no free port");
        let addr: SocketAddr = ([127, 0, 0, 1], port).into();
        let target_loop = Arc::new(EventLoop::start("test-connector"));
        let (tx, rx) = mpsc::channel();
        connect(addr, target_loop.clone(), Arc::new(NoopHandler), 1 << 16, Some(Duration::from_secs(2)), move |res| {
            tx.send(res.is_err()).unwrap();
        });
        let failed = rx.recv_timeout(Duration::from_secs(5)).expect("completion callback never fired");
        assert!(failed, "connecting to a closed port should fail");
        Arc::try_unwrap(target_loop).unwrap_or_else(|_| panic!("loop still shared")).stop(false);
    }
}
