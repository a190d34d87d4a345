//! Business callback surface.
//!
//! Grounded in spec.md §6's callback table. The original describes these as
//! `boost::function` members set on an options object; here they are Rust
//! traits with default-implemented no-op bodies, so a TCP-only application
//! need not implement `UdpHandler` and vice versa.

use crate::connection::TcpConnectionHandle;
use crate::udp::UdpPacket;
use ise_core::options::ReactorOptions;

/// Business callbacks for TCP connections. All methods run on the owning
/// event loop's thread; see the thread-affinity invariant in the crate docs.
pub trait TcpHandler: Send + Sync + 'static {
    /// Called once, before any listener is bound, on the thread calling
    /// `MainServer::open()`. Override to validate or adjust options.
    fn init_options(&self, _options: &ReactorOptions) {}

    /// Fired after `accept()` or a successful outbound `connect()`.
    fn on_tcp_connected(&self, _conn: &TcpConnectionHandle) {}

    /// Fired exactly once per connection, after any error or explicit
    /// close. No further callback for this connection follows.
    fn on_tcp_disconnected(&self, _conn: &TcpConnectionHandle) {}

    /// Fired when a receive task's splitter reports a complete message.
    /// `ctx` is the opaque context the application supplied to `recv`.
    fn on_tcp_recv_complete(&self, _conn: &TcpConnectionHandle, _data: &[u8], _ctx: u64) {}

    /// Fired when a queued send task's bytes have all been written.
    fn on_tcp_send_complete(&self, _conn: &TcpConnectionHandle, _ctx: u64) {}
}

/// Business callbacks for UDP datagrams.
pub trait UdpHandler: Send + Sync + 'static {
    /// Maps a raw datagram to a request-group index, or `None` to drop it.
    /// Runs on the UDP listener thread — keep this cheap.
    fn classify_udp_packet(&self, data: &[u8]) -> Option<usize>;

    /// Fired for each datagram a worker thread dequeues.
    fn on_recv_udp_packet(&self, group_index: usize, packet: &UdpPacket);
}

/// Callback for the periodic scaling daemon and assistor threads.
pub trait SystemHandler: Send + Sync + 'static {
    /// Runs once per configured assistor slot, on that slot's own thread.
    fn assistor_thread_execute(&self, _slot: usize) {}

    /// Runs once per second on the daemon thread. `sec_count` is the
    /// number of seconds since the daemon started.
    fn daemon_thread_execute(&self, _sec_count: u64) {}
}
