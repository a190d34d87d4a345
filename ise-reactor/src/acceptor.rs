//! TCP acceptor: binds one listening port and hands accepted sockets off to
//! an [`EventLoopList`], round-robin.
//!
//! Grounded in `original_source/include/ise_server_tcp.h`'s `TcpServer`
//! (`createConnection`, connection-count bookkeeping) and `MainTcpServer`,
//! which owns one listener per configured port. The original's accept loop
//! blocks in platform-specific `accept()`/IOCP completion; here
//! `compio::net::TcpListener::accept` plays that role directly.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use compio::net::TcpListener;
use futures::FutureExt;
use tracing::{info, warn};

use ise_core::error::{ReactorError, Result};

use crate::callbacks::TcpHandler;
use crate::connection::new_connection;
use crate::event_loop_list::EventLoopList;

/// How often the accept loop wakes on its own (via a timeout on `accept`)
/// to re-check the stop flag when no connection is arriving to drive it.
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// A bound TCP listener paired with the loop pool its connections are
/// dispatched to, and the handler that services them. One per configured
/// `TcpServerSpec`.
pub struct Acceptor {
    port: u16,
    conn_count: Arc<AtomicUsize>,
    stop: Arc<AtomicBool>,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl Acceptor {
    /// Bind `port` and spawn a dedicated accept-loop thread that assigns
    /// each accepted connection to `loops` round-robin. Returns once the
    /// listener is bound; the accept loop runs until [`Self::stop`] is
    /// called or the listener errors.
    pub fn bind_and_run<H: TcpHandler>(
        port: u16,
        loops: Arc<EventLoopList>,
        handler: Arc<H>,
        max_recv_buffer_size: usize,
    ) -> Result<Self> {
        let addr: SocketAddr = ([0, 0, 0, 0], port).into();
        let conn_count = Arc::new(AtomicUsize::new(0));
        let accept_count = conn_count.clone();
        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = stop.clone();

        // Binding happens synchronously on a throwaway single-shot runtime
        // so `bind_and_run` can report failure to the caller immediately,
        // matching spec.md's "open() fails fast if any listener can't
        // bind" requirement; the listener itself is then moved onto its
        // own accept-loop thread for the process lifetime.
        let listener = compio::runtime::Runtime::new()
            .map_err(|e| ReactorError::BindFailed { addr: addr.to_string(), source: std::io::Error::other(e) })?
            .block_on(TcpListener::bind(addr))
            .map_err(|source| ReactorError::BindFailed { addr: addr.to_string(), source })?;

        let thread = std::thread::Builder::new()
            .name(format!("ise-acceptor-{port}"))
            .spawn(move || {
                let runtime = compio::runtime::Runtime::new().expect("failed to start acceptor runtime");
                runtime.block_on(accept_loop(listener, loops, handler, max_recv_buffer_size, accept_count, thread_stop));
            })
            .expect("failed to spawn acceptor thread");

        Ok(Self { port, conn_count, stop, thread: Some(thread) })
    }

    /// The port this acceptor is bound to.
    #[must_use]
    pub const fn port(&self) -> u16 {
        self.port
    }

    /// Connections accepted and handed off since this acceptor started (not
    /// decremented on disconnect; a lifetime counter, not a live count).
    #[must_use]
    pub fn accepted_count(&self) -> usize {
        self.conn_count.load(Ordering::Relaxed)
    }

    /// Ask the accept loop to exit and wait for its thread to join. Safe to
    /// call more than once.
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(t) = self.thread.take() {
            let _ = t.join();
        }
    }
}

impl Drop for Acceptor {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(t) = self.thread.take() {
            let _ = t.join();
        }
    }
}

async fn accept_loop<H: TcpHandler>(
    listener: TcpListener,
    loops: Arc<EventLoopList>,
    handler: Arc<H>,
    max_recv_buffer_size: usize,
    conn_count: Arc<AtomicUsize>,
    stop: Arc<AtomicBool>,
) {
    while !stop.load(Ordering::Acquire) {
        let accepted = futures::select! {
            accepted = listener.accept().fuse() => Some(accepted),
            () = compio::time::sleep(STOP_POLL_INTERVAL).fuse() => None,
        };
        let Some(accepted) = accepted else { continue };
        match accepted {
            Ok((stream, peer_addr)) => {
                let local_addr = match stream.local_addr() {
                    Ok(a) => a,
                    Err(e) => {
                        warn!(error = %e, "failed to read local_addr on accepted socket");
                        continue;
                    }
                };
                let (handle, pump) = new_connection(stream, local_addr, peer_addr, handler.clone(), max_recv_buffer_size);
                conn_count.fetch_add(1, Ordering::Relaxed);
                info!(conn = handle.name(), "accepted connection");
                loops.next_loop().register_connection(handle, pump);
            }
            Err(e) => {
                warn!(error = %e, "accept() failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_loop_list::EventLoopList;

    struct EchoHandler;
    impl TcpHandler for EchoHandler {}

    #[test]
    fn binds_reports_port_and_starts_accepting() {
        let port = portpicker::pick_unused_port().expect("no free port");
        let loops = Arc::new(EventLoopList::start("test-acceptor", 1));
        let acceptor = Acceptor::bind_and_run(port, loops, Arc::new(EchoHandler), 1 << 20).unwrap();
        assert_eq!(acceptor.port(), port);
        assert_eq!(acceptor.accepted_count(), 0);
    }
}
