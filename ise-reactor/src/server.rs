//! Top-level server lifecycle: reads [`ReactorOptions`], stands up every
//! enabled transport, the scaling daemon, and the assistor pool, and tears
//! them all down again on `close()`.
//!
//! Grounded in `original_source/ise/main/ise_application.h`'s
//! `IseApplication::initialize/run/finalize` and its `IseBusiness` base,
//! which bundles the TCP and UDP callback interfaces into one
//! application-supplied class — the same shape `MainServer`'s `H` bound
//! takes here.

use std::sync::Arc;

use ise_core::error::Result;
use ise_core::options::{ReactorOptions, ServerType};

use crate::acceptor::Acceptor;
use crate::assistor::AssistorPool;
use crate::callbacks::{SystemHandler, TcpHandler, UdpHandler};
use crate::daemon::Daemon;
use crate::event_loop_list::EventLoopList;
use crate::udp::UdpServer;

/// One TCP listener's accept loop paired with the loop pool its
/// connections are dispatched across.
struct TcpListenerHandle {
    acceptor: Acceptor,
    loops: Arc<EventLoopList>,
}

/// Owns every running piece of the engine for one [`ReactorOptions`]
/// configuration. Build with [`MainServer::new`], bring up with
/// [`MainServer::open`], tear down with [`MainServer::close`].
pub struct MainServer<H: TcpHandler + UdpHandler + SystemHandler> {
    options: ReactorOptions,
    handler: Arc<H>,
    tcp_listeners: Vec<TcpListenerHandle>,
    udp: Option<Arc<UdpServer>>,
    daemon: Option<Daemon>,
    assistors: Option<AssistorPool>,
}

impl<H> MainServer<H>
where
    H: TcpHandler + UdpHandler + SystemHandler,
{
    /// Build a not-yet-started server. Nothing binds or spawns until
    /// [`Self::open`] is called.
    #[must_use]
    pub fn new(options: ReactorOptions, handler: Arc<H>) -> Self {
        Self { options, handler, tcp_listeners: Vec::new(), udp: None, daemon: None, assistors: None }
    }

    /// Configured options.
    #[must_use]
    pub const fn options(&self) -> &ReactorOptions {
        &self.options
    }

    /// Validate the configuration, fire `init_options`, and bring up every
    /// enabled transport plus the daemon and assistor threads. On error,
    /// whatever already started is torn back down before returning, so a
    /// failed `open()` never leaks threads.
    pub fn open(mut self) -> Result<Self> {
        self.options.validate()?;
        self.handler.init_options(&self.options);

        if self.options.server_type().contains(ServerType::TCP) {
            if let Err(e) = self.open_tcp() {
                self.close();
                return Err(e);
            }
        }

        if self.options.server_type().contains(ServerType::UDP) {
            if let Err(e) = self.open_udp() {
                self.close();
                return Err(e);
            }
        }

        self.daemon = Some(Daemon::start(self.options.adjust_thread_interval(), self.udp.clone(), self.handler.clone()));

        let assistor_count = self.options.assistor_thread_count();
        if assistor_count > 0 {
            self.assistors = Some(AssistorPool::start(assistor_count, self.handler.clone()));
        }

        Ok(self)
    }

    fn open_tcp(&mut self) -> Result<()> {
        for spec in self.options.tcp_servers() {
            let loops = Arc::new(EventLoopList::start(&format!("tcp-{}", spec.port), spec.event_loop_count));
            let acceptor = Acceptor::bind_and_run(
                spec.port,
                loops.clone(),
                self.handler.clone(),
                self.options.tcp_max_recv_buffer_size(),
            )?;
            self.tcp_listeners.push(TcpListenerHandle { acceptor, loops });
        }
        Ok(())
    }

    fn open_udp(&mut self) -> Result<()> {
        let udp = UdpServer::bind_and_run(
            self.options.udp_server_port(),
            self.options.udp_listener_thread_count(),
            self.options.udp_groups(),
            self.options.udp_request_eff_wait_time(),
            self.options.udp_worker_thread_timeout(),
            self.options.udp_request_queue_alert_line(),
            self.handler.clone(),
        )?;
        self.udp = Some(Arc::new(udp));
        Ok(())
    }

    /// Total TCP connections currently open across every listener.
    #[must_use]
    pub fn tcp_connection_count(&self) -> usize {
        self.tcp_listeners.iter().map(|l| l.loops.total_connection_count()).sum()
    }

    /// Ports bound by TCP listeners, in configured order.
    #[must_use]
    pub fn tcp_ports(&self) -> Vec<u16> {
        self.tcp_listeners.iter().map(|l| l.acceptor.port()).collect()
    }

    /// Stop every running piece. Consumes `self`; best-effort if `self`
    /// was only partially started (e.g. called from a failed `open()`).
    pub fn close(&mut self) {
        if let Some(assistors) = self.assistors.take() {
            assistors.stop();
        }
        if let Some(daemon) = self.daemon.take() {
            daemon.stop();
        }
        if let Some(udp) = self.udp.take() {
            // The daemon (the only other Arc<UdpServer> holder) has already
            // been stopped and joined above, so this is always the sole
            // remaining reference.
            match Arc::try_unwrap(udp) {
                Ok(udp) => udp.shutdown(),
                Err(udp) => {
                    tracing::warn!("udp server still shared at close(); workers left running");
                    udp.groups().iter().for_each(|g| g.shutdown());
                }
            }
        }
        for mut listener in self.tcp_listeners.drain(..) {
            listener.acceptor.stop();
            listener.loops.stop(false);
        }
    }
}

impl<H: TcpHandler + UdpHandler + SystemHandler> Drop for MainServer<H> {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ise_core::options::TcpServerSpec;

    struct EchoBusiness;
    impl TcpHandler for EchoBusiness {}
    impl UdpHandler for EchoBusiness {
        fn classify_udp_packet(&self, _data: &[u8]) -> Option<usize> {
            None
        }
        fn on_recv_udp_packet(&self, _group_index: usize, _packet: &crate::udp::UdpPacket) {}
    }
    impl SystemHandler for EchoBusiness {}

    #[test]
    fn open_with_tcp_only_binds_configured_port_then_closes_cleanly() {
        let port = portpicker::pick_unused_port().expect("no free port");
        let options = ReactorOptions::new(ServerType::TCP)
            .with_tcp_server(TcpServerSpec { port, event_loop_count: 2 });
        let server = MainServer::new(options, Arc::new(EchoBusiness)).open().unwrap();
        assert_eq!(server.tcp_ports(), vec![port]);
        assert_eq!(server.tcp_connection_count(), 0);
    }

    #[test]
    fn invalid_options_fail_open_without_panicking() {
        let options = ReactorOptions::new(ServerType::TCP);
        let err = MainServer::new(options, Arc::new(EchoBusiness)).open().unwrap_err();
        assert!(matches!(err, ise_core::error::ReactorError::InvalidConfig(_)));
    }
}
