//! Engine configuration surface.
//!
//! `ReactorOptions` enumerates the options the reactor engine reads at
//! `MainServer::open()` time: which transports to stand up, how many TCP
//! listeners/loops, and the UDP worker-group sizing knobs. Grounded in
//! `original_source/ise/main/ise_options.h`'s `IseOptions`, flattened into
//! one builder-style struct per idiomatic Rust config conventions.

use crate::error::{ReactorError, Result};
use std::time::Duration;

/// Which transports `MainServer::open()` stands up, as a small bitmask.
/// Combine with `|`, as in `ServerType::TCP | ServerType::UDP`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerType(u8);

impl ServerType {
    /// Stand up the TCP acceptors and event loops.
    pub const TCP: Self = Self(0b01);
    /// Stand up the UDP listener and worker pool.
    pub const UDP: Self = Self(0b10);

    /// Whether `other`'s bits are a subset of this mask.
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for ServerType {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Per-TCP-listener configuration: the port to bind and how many event
/// loop threads serve connections accepted on it.
#[derive(Debug, Clone, Copy)]
pub struct TcpServerSpec {
    /// Port to bind.
    pub port: u16,
    /// Number of event-loop threads connections on this listener are
    /// round-robin assigned to.
    pub event_loop_count: usize,
}

/// Sizing and lifecycle knobs for one UDP request group's worker pool.
#[derive(Debug, Clone, Copy)]
pub struct UdpGroupSpec {
    /// Bounded request queue capacity; beyond this, the oldest queued
    /// packet is dropped to admit the newest.
    pub queue_capacity: usize,
    /// Worker threads never scale below this count.
    pub min_threads: usize,
    /// Worker threads never scale above this count.
    pub max_threads: usize,
}

/// Configuration read by the reactor engine at startup.
///
/// ```
/// use ise_core::options::{ReactorOptions, ServerType, TcpServerSpec};
/// use std::time::Duration;
///
/// let opts = ReactorOptions::new(ServerType::TCP)
///     .with_tcp_server(TcpServerSpec { port: 9000, event_loop_count: 4 })
///     .with_tcp_max_recv_buffer_size(1 << 20);
/// assert_eq!(opts.tcp_server_count(), 1);
/// ```
#[derive(Debug, Clone)]
pub struct ReactorOptions {
    server_type: ServerType,
    tcp_servers: Vec<TcpServerSpec>,
    tcp_max_recv_buffer_size: usize,

    udp_server_port: u16,
    udp_listener_thread_count: usize,
    udp_groups: Vec<UdpGroupSpec>,
    udp_request_eff_wait_time: Duration,
    udp_worker_thread_timeout: Duration,
    udp_request_queue_alert_line: usize,

    adjust_thread_interval: Duration,
    assistor_thread_count: usize,
}

impl ReactorOptions {
    /// Create options for the given transport set, with conservative
    /// defaults for every other knob.
    #[must_use]
    pub fn new(server_type: ServerType) -> Self {
        Self {
            server_type,
            tcp_servers: Vec::new(),
            tcp_max_recv_buffer_size: 4 * 1024 * 1024,
            udp_server_port: 0,
            udp_listener_thread_count: 1,
            udp_groups: Vec::new(),
            udp_request_eff_wait_time: Duration::from_secs(10),
            udp_worker_thread_timeout: Duration::from_secs(60),
            udp_request_queue_alert_line: 1000,
            adjust_thread_interval: Duration::from_secs(1),
            assistor_thread_count: 0,
        }
    }

    /// Register one TCP listener.
    #[must_use]
    pub fn with_tcp_server(mut self, spec: TcpServerSpec) -> Self {
        self.tcp_servers.push(spec);
        self
    }

    /// Per-connection receive-buffer backpressure threshold, in bytes.
    #[must_use]
    pub const fn with_tcp_max_recv_buffer_size(mut self, bytes: usize) -> Self {
        self.tcp_max_recv_buffer_size = bytes;
        self
    }

    /// Set the UDP listener port and how many OS threads read datagrams
    /// off it before dispatch to a request group.
    #[must_use]
    pub const fn with_udp_server(mut self, port: u16, listener_thread_count: usize) -> Self {
        self.udp_server_port = port;
        self.udp_listener_thread_count = listener_thread_count;
        self
    }

    /// Register one UDP request group's worker-pool sizing.
    #[must_use]
    pub fn with_udp_group(mut self, spec: UdpGroupSpec) -> Self {
        self.udp_groups.push(spec);
        self
    }

    /// Seconds a UDP worker thread waits for a request before being
    /// considered idle for scale-down purposes.
    #[must_use]
    pub const fn with_udp_request_eff_wait_time(mut self, d: Duration) -> Self {
        self.udp_request_eff_wait_time = d;
        self
    }

    /// Idle duration after which a scaled-up UDP worker thread exits.
    #[must_use]
    pub const fn with_udp_worker_thread_timeout(mut self, d: Duration) -> Self {
        self.udp_worker_thread_timeout = d;
        self
    }

    /// Queue depth above which the scaling daemon considers a group
    /// under pressure and grows its worker pool.
    #[must_use]
    pub const fn with_udp_request_queue_alert_line(mut self, count: usize) -> Self {
        self.udp_request_queue_alert_line = count;
        self
    }

    /// How often the scaling daemon re-evaluates worker-pool sizes.
    #[must_use]
    pub const fn with_adjust_thread_interval(mut self, d: Duration) -> Self {
        self.adjust_thread_interval = d;
        self
    }

    /// Number of assistor (periodic background task) threads.
    #[must_use]
    pub const fn with_assistor_thread_count(mut self, count: usize) -> Self {
        self.assistor_thread_count = count;
        self
    }

    /// Which transports are enabled.
    #[must_use]
    pub const fn server_type(&self) -> ServerType {
        self.server_type
    }

    /// Configured TCP listeners.
    #[must_use]
    pub fn tcp_servers(&self) -> &[TcpServerSpec] {
        &self.tcp_servers
    }

    /// Number of configured TCP listeners.
    #[must_use]
    pub fn tcp_server_count(&self) -> usize {
        self.tcp_servers.len()
    }

    /// Per-connection receive-buffer backpressure threshold.
    #[must_use]
    pub const fn tcp_max_recv_buffer_size(&self) -> usize {
        self.tcp_max_recv_buffer_size
    }

    /// UDP listener port.
    #[must_use]
    pub const fn udp_server_port(&self) -> u16 {
        self.udp_server_port
    }

    /// Number of UDP listener threads.
    #[must_use]
    pub const fn udp_listener_thread_count(&self) -> usize {
        self.udp_listener_thread_count
    }

    /// Configured UDP request groups.
    #[must_use]
    pub fn udp_groups(&self) -> &[UdpGroupSpec] {
        &self.udp_groups
    }

    /// Number of configured UDP request groups.
    #[must_use]
    pub fn udp_request_group_count(&self) -> usize {
        self.udp_groups.len()
    }

    /// See [`Self::with_udp_request_eff_wait_time`].
    #[must_use]
    pub const fn udp_request_eff_wait_time(&self) -> Duration {
        self.udp_request_eff_wait_time
    }

    /// See [`Self::with_udp_worker_thread_timeout`].
    #[must_use]
    pub const fn udp_worker_thread_timeout(&self) -> Duration {
        self.udp_worker_thread_timeout
    }

    /// See [`Self::with_udp_request_queue_alert_line`].
    #[must_use]
    pub const fn udp_request_queue_alert_line(&self) -> usize {
        self.udp_request_queue_alert_line
    }

    /// See [`Self::with_adjust_thread_interval`].
    #[must_use]
    pub const fn adjust_thread_interval(&self) -> Duration {
        self.adjust_thread_interval
    }

    /// Number of assistor threads.
    #[must_use]
    pub const fn assistor_thread_count(&self) -> usize {
        self.assistor_thread_count
    }

    /// Validate cross-field invariants before `MainServer::open()` acts
    /// on these options: a TCP server needs at least one listener with a
    /// nonzero event-loop count if `ServerType::TCP` is set, and each UDP
    /// group's `min_threads <= max_threads`.
    pub fn validate(&self) -> Result<()> {
        if self.server_type.contains(ServerType::TCP) {
            if self.tcp_servers.is_empty() {
                return Err(ReactorError::InvalidConfig(
                    "ServerType::TCP set but no tcp_servers configured".into(),
                ));
            }
            for spec in &self.tcp_servers {
                if spec.event_loop_count == 0 {
                    return Err(ReactorError::InvalidConfig(format!(
                        "tcp server on port {} has event_loop_count == 0",
                        spec.port
                    )));
                }
            }
        }
        if self.server_type.contains(ServerType::UDP) {
            if self.udp_groups.is_empty() {
                return Err(ReactorError::InvalidConfig(
                    "ServerType::UDP set but no udp_groups configured".into(),
                ));
            }
            for group in &self.udp_groups {
                if group.min_threads > group.max_threads {
                    return Err(ReactorError::InvalidConfig(format!(
                        "udp group min_threads ({}) > max_threads ({})",
                        group.min_threads, group.max_threads
                    )));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_conservative() {
        let opts = ReactorOptions::new(ServerType::TCP);
        assert_eq!(opts.tcp_server_count(), 0);
        assert_eq!(opts.adjust_thread_interval(), Duration::from_secs(1));
    }

    #[test]
    fn tcp_validate_requires_at_least_one_listener() {
        let opts = ReactorOptions::new(ServerType::TCP);
        assert!(opts.validate().is_err());
        let opts = opts.with_tcp_server(TcpServerSpec { port: 9000, event_loop_count: 2 });
        assert!(opts.validate().is_ok());
    }

    #[test]
    fn tcp_validate_rejects_zero_event_loops() {
        let opts = ReactorOptions::new(ServerType::TCP)
            .with_tcp_server(TcpServerSpec { port: 9000, event_loop_count: 0 });
        assert!(opts.validate().is_err());
    }

    #[test]
    fn udp_validate_rejects_min_greater_than_max() {
        let opts = ReactorOptions::new(ServerType::UDP)
            .with_udp_server(9001, 1)
            .with_udp_group(UdpGroupSpec { queue_capacity: 100, min_threads: 4, max_threads: 2 });
        assert!(opts.validate().is_err());
    }

    #[test]
    fn udp_validate_accepts_well_formed_group() {
        let opts = ReactorOptions::new(ServerType::UDP)
            .with_udp_server(9001, 1)
            .with_udp_group(UdpGroupSpec { queue_capacity: 100, min_threads: 1, max_threads: 4 });
        assert!(opts.validate().is_ok());
    }

    #[test]
    fn both_transports_can_be_combined() {
        let opts = ReactorOptions::new(ServerType::TCP | ServerType::UDP)
            .with_tcp_server(TcpServerSpec { port: 9000, event_loop_count: 2 })
            .with_udp_server(9001, 1)
            .with_udp_group(UdpGroupSpec { queue_capacity: 100, min_threads: 1, max_threads: 4 });
        assert!(opts.validate().is_ok());
    }
}
