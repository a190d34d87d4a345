//! UDP datagram dispatch: one or more listener threads read datagrams off a
//! shared socket and fan them out, by application-chosen group, to bounded
//! per-group queues drained by an auto-scaling worker pool.
//!
//! Grounded in `original_source/src/ise_server_udp.cpp`'s `UdpPacket`,
//! `UdpRequestQueue` (drop-head-on-overflow bounded queue, staleness check
//! on dequeue via `effWaitTime_`), `UdpWorkerThread`/`UdpWorkerThreadPool`
//! (the `AdjustThreadCount` scaling policy: grow to `minThreads`, shrink to
//! `maxThreads`, +3 workers when the queue crosses the alert line, -1 idle
//! worker when it's empty), and `ThreadTimeOutChecker` (per-worker busy
//! deadline). `compio::net::UdpSocket` plays the role of the original's
//! listener socket; worker threads stay plain OS threads; blocking on an
//! empty queue uses a `parking_lot` condvar in place of the original's
//! semaphore.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use compio::buf::BufResult;
use compio::net::UdpSocket;
use parking_lot::{Condvar, Mutex};
use tracing::{debug, warn};

use ise_core::options::UdpGroupSpec;

use crate::callbacks::UdpHandler;

/// Single-read datagram size. Larger than the common path MTU; datagrams
/// above this are silently truncated by the kernel, matching UDP's own
/// best-effort contract.
const READ_CHUNK: usize = 64 * 1024;

/// One received datagram, queued for a worker thread to dispatch.
#[derive(Debug, Clone)]
pub struct UdpPacket {
    /// Raw datagram payload.
    pub data: Bytes,
    /// Sender address.
    pub peer_addr: SocketAddr,
    /// When this datagram was read off the socket, used to drop stale
    /// packets that waited too long in queue before a worker picked them up.
    pub recv_time: Instant,
}

struct RequestQueue {
    capacity: usize,
    eff_wait_time: Duration,
    state: Mutex<VecDeque<UdpPacket>>,
    not_empty: Condvar,
}

impl RequestQueue {
    fn new(capacity: usize, eff_wait_time: Duration) -> Self {
        Self { capacity, eff_wait_time, state: Mutex::new(VecDeque::new()), not_empty: Condvar::new() }
    }

    /// Enqueue a packet, dropping the oldest queued one if already at
    /// capacity (`original_source`'s `UdpRequestQueue::addPacket`).
    fn push(&self, packet: UdpPacket) {
        if self.capacity == 0 {
            return;
        }
        let mut q = self.state.lock();
        if q.len() >= self.capacity {
            q.pop_front();
        }
        q.push_back(packet);
        self.not_empty.notify_one();
    }

    /// Block until a non-stale packet is available, or `stop` is set and
    /// the queue has been drained of anything still worth dispatching.
    fn pop(&self, stop: &AtomicBool) -> Option<UdpPacket> {
        let mut q = self.state.lock();
        loop {
            while let Some(packet) = q.pop_front() {
                if packet.recv_time.elapsed() <= self.eff_wait_time {
                    return Some(packet);
                }
            }
            if stop.load(Ordering::Acquire) {
                return None;
            }
            self.not_empty.wait_for(&mut q, Duration::from_millis(500));
        }
    }

    fn len(&self) -> usize {
        self.state.lock().len()
    }

    fn wake_all(&self) {
        self.not_empty.notify_all();
    }
}

struct Worker {
    stop: Arc<AtomicBool>,
    busy_since: Arc<Mutex<Option<Instant>>>,
    thread: Option<std::thread::JoinHandle<()>>,
}

/// One UDP request group: its bounded queue and auto-scaling worker pool.
pub struct UdpRequestGroup {
    index: usize,
    queue: Arc<RequestQueue>,
    handler: Arc<dyn UdpHandler>,
    min_threads: usize,
    max_threads: usize,
    worker_timeout: Duration,
    workers: Mutex<Vec<Worker>>,
}

impl UdpRequestGroup {
    fn new(index: usize, spec: &UdpGroupSpec, eff_wait_time: Duration, worker_timeout: Duration, handler: Arc<dyn UdpHandler>) -> Self {
        Self {
            index,
            queue: Arc::new(RequestQueue::new(spec.queue_capacity, eff_wait_time)),
            handler,
            min_threads: spec.min_threads,
            max_threads: spec.max_threads,
            worker_timeout,
            workers: Mutex::new(Vec::new()),
        }
    }

    /// Queue depth right now.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.queue.len()
    }

    /// Live worker thread count.
    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.workers.lock().len()
    }

    fn spawn_worker(&self) -> Worker {
        let stop = Arc::new(AtomicBool::new(false));
        let busy_since = Arc::new(Mutex::new(None));
        let queue = self.queue.clone();
        let handler = self.handler.clone();
        let index = self.index;
        let thread_stop = stop.clone();
        let thread_busy = busy_since.clone();
        let thread = std::thread::Builder::new()
            .name(format!("ise-udp-worker-{index}"))
            .spawn(move || {
                while !thread_stop.load(Ordering::Acquire) {
                    let Some(packet) = queue.pop(&thread_stop) else { break };
                    *thread_busy.lock() = Some(Instant::now());
                    handler.on_recv_udp_packet(index, &packet);
                    *thread_busy.lock() = None;
                }
            })
            .expect("failed to spawn udp worker thread");
        Worker { stop, busy_since, thread: Some(thread) }
    }

    /// Flag a worker stopped and let a detached reaper thread join it, so
    /// pool resizing never blocks the scaling daemon on a slow dispatch.
    fn retire(&self, mut worker: Worker) {
        worker.stop.store(true, Ordering::Release);
        self.queue.wake_all();
        if let Some(thread) = worker.thread.take() {
            std::thread::spawn(move || {
                let _ = thread.join();
            });
        }
    }

    /// Log (but cannot forcibly kill — Rust has no safe `Thread::kill`)
    /// workers that have been busy on one packet past `worker_timeout`,
    /// matching the original's `ThreadTimeOutChecker`'s intent if not its
    /// mechanism.
    fn warn_on_busy_timeouts(&self) {
        if self.worker_timeout.is_zero() {
            return;
        }
        let now = Instant::now();
        for worker in self.workers.lock().iter() {
            if let Some(since) = *worker.busy_since.lock() {
                if now.saturating_duration_since(since) > self.worker_timeout {
                    warn!(group = self.index, "udp worker thread has been busy past its timeout");
                }
            }
        }
    }

    /// Re-evaluate this group's worker count against its configured bounds
    /// and current queue pressure. Called periodically by the scaling
    /// daemon; grounded in `UdpWorkerThreadPool::AdjustThreadCount`.
    pub fn adjust_thread_count(&self, alert_line: usize) {
        self.warn_on_busy_timeouts();

        let mut workers = self.workers.lock();
        let packet_count = self.queue.len();
        let mut thread_count = workers.len();

        if thread_count < self.min_threads {
            let grow = self.min_threads - thread_count;
            for _ in 0..grow {
                let w = self.spawn_worker();
                workers.push(w);
            }
            thread_count = self.min_threads;
        }

        if thread_count > self.max_threads {
            let shrink = thread_count - self.max_threads;
            for _ in 0..shrink {
                if let Some(w) = workers.pop() {
                    self.retire(w);
                }
            }
            thread_count = self.max_threads;
        }

        if thread_count < self.max_threads && packet_count >= alert_line {
            let grow = (self.max_threads - thread_count).min(3);
            for _ in 0..grow {
                let w = self.spawn_worker();
                workers.push(w);
            }
        } else if thread_count > self.min_threads && packet_count == 0 {
            if let Some(w) = workers.pop() {
                self.retire(w);
            }
        }
    }

    /// Stop every worker in this group and wait for them to exit.
    pub fn shutdown(&self) {
        let mut workers = self.workers.lock();
        let drained: Vec<Worker> = workers.drain(..).collect();
        drop(workers);
        self.queue.wake_all();
        for mut w in drained {
            w.stop.store(true, Ordering::Release);
            self.queue.wake_all();
            if let Some(t) = w.thread.take() {
                let _ = t.join();
            }
        }
    }
}

/// Owns the bound UDP socket, the classify-and-dispatch listener threads,
/// and the set of request groups their datagrams land in.
pub struct UdpServer {
    port: u16,
    groups: Vec<Arc<UdpRequestGroup>>,
    alert_line: usize,
    stop: Arc<AtomicBool>,
    listener_threads: Mutex<Vec<std::thread::JoinHandle<()>>>,
}

impl UdpServer {
    /// Bind `port` and start `listener_thread_count` reader threads plus
    /// each group's minimum worker count.
    ///
    /// # Errors
    ///
    /// Returns the bind error if the socket can't be bound.
    pub fn bind_and_run<H: UdpHandler>(
        port: u16,
        listener_thread_count: usize,
        group_specs: &[UdpGroupSpec],
        eff_wait_time: Duration,
        worker_timeout: Duration,
        alert_line: usize,
        handler: Arc<H>,
    ) -> std::io::Result<Self> {
        let addr: SocketAddr = ([0, 0, 0, 0], port).into();
        let socket = compio::runtime::Runtime::new()?.block_on(UdpSocket::bind(addr))?;
        let socket = Arc::new(socket);

        let handler: Arc<dyn UdpHandler> = handler;
        let groups: Vec<Arc<UdpRequestGroup>> = group_specs
            .iter()
            .enumerate()
            .map(|(i, spec)| Arc::new(UdpRequestGroup::new(i, spec, eff_wait_time, worker_timeout, handler.clone())))
            .collect();
        for group in &groups {
            for _ in 0..group.min_threads {
                let w = group.spawn_worker();
                group.workers.lock().push(w);
            }
        }

        let stop = Arc::new(AtomicBool::new(false));
        let mut listener_threads = Vec::with_capacity(listener_thread_count);
        for i in 0..listener_thread_count.max(1) {
            let socket = socket.clone();
            let groups = groups.clone();
            let handler = handler.clone();
            let stop = stop.clone();
            let thread = std::thread::Builder::new()
                .name(format!("ise-udp-listener-{i}"))
                .spawn(move || {
                    let runtime = compio::runtime::Runtime::new().expect("failed to start udp listener runtime");
                    runtime.block_on(listen_loop(socket, groups, handler, stop));
                })
                .expect("failed to spawn udp listener thread");
            listener_threads.push(thread);
        }

        Ok(Self { port, groups, alert_line, stop, listener_threads })
    }

    /// Port this server is bound to.
    #[must_use]
    pub const fn port(&self) -> u16 {
        self.port
    }

    /// Request groups, in configured order.
    #[must_use]
    pub fn groups(&self) -> &[Arc<UdpRequestGroup>] {
        &self.groups
    }

    /// Re-evaluate every group's worker pool size. Called by the scaling
    /// daemon on its `adjust_thread_interval` cadence.
    pub fn adjust_all(&self) {
        for group in &self.groups {
            group.adjust_thread_count(self.alert_line);
        }
    }

    /// Stop listener threads and every group's workers, and wait for all
    /// of them to exit.
    pub fn shutdown(self) {
        self.stop.store(true, Ordering::Release);
        for t in self.listener_threads {
            let _ = t.join();
        }
        for group in &self.groups {
            group.shutdown();
        }
    }
}

async fn listen_loop(
    socket: Arc<UdpSocket>,
    groups: Vec<Arc<UdpRequestGroup>>,
    handler: Arc<dyn UdpHandler>,
    stop: Arc<AtomicBool>,
) {
    while !stop.load(Ordering::Acquire) {
        let buf = vec![0u8; READ_CHUNK];
        let BufResult(res, buf) = socket.recv_from(buf).await;
        match res {
            Ok((n, peer_addr)) => {
                let data = Bytes::copy_from_slice(&buf[..n]);
                match handler.classify_udp_packet(&data) {
                    Some(group_index) => {
                        if let Some(group) = groups.get(group_index) {
                            group.queue.push(UdpPacket { data, peer_addr, recv_time: Instant::now() });
                        } else {
                            warn!(group_index, "classify_udp_packet returned an out-of-range group index");
                        }
                    }
                    None => debug!(peer = %peer_addr, "dropped unclassified udp packet"),
                }
            }
            Err(e) => {
                warn!(error = %e, "udp recv_from failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn group(min: usize, max: usize, cap: usize) -> UdpRequestGroup {
        struct Noop;
        impl UdpHandler for Noop {
            fn classify_udp_packet(&self, _data: &[u8]) -> Option<usize> {
                Some(0)
            }
            fn on_recv_udp_packet(&self, _group_index: usize, _packet: &UdpPacket) {}
        }
        UdpRequestGroup::new(
            0,
            &UdpGroupSpec { queue_capacity: cap, min_threads: min, max_threads: max },
            Duration::from_secs(10),
            Duration::from_secs(60),
            Arc::new(Noop),
        )
    }

    #[test]
    fn queue_drops_oldest_when_over_capacity() {
        let q = RequestQueue::new(2, Duration::from_secs(10));
        for i in 0..3u8 {
            q.push(UdpPacket {
                data: Bytes::copy_from_slice(&[i]),
                peer_addr: "127.0.0.1:1".parse().unwrap(),
                recv_time: Instant::now(),
            });
        }
        assert_eq!(q.len(), 2);
        let stop = AtomicBool::new(true);
        let first = q.pop(&stop).unwrap();
        assert_eq!(first.data.as_ref(), &[1]);
    }

    #[test]
    fn pop_returns_none_once_stopped_and_drained() {
        let q = RequestQueue::new(4, Duration::from_secs(10));
        let stop = AtomicBool::new(true);
        assert!(q.pop(&stop).is_none());
    }

    #[test]
    fn adjust_grows_to_minimum_then_shrinks_when_idle() {
        let g = group(2, 5, 100);
        g.adjust_thread_count(1000);
        assert_eq!(g.worker_count(), 2);
        g.adjust_thread_count(1000);
        assert_eq!(g.worker_count(), 2, "stays at minimum with an empty queue");
        g.shutdown();
    }

    #[test]
    fn adjust_grows_by_up_to_three_past_alert_line() {
        // A handler slow enough that the lone pre-existing worker can't
        // drain the queue before `adjust_thread_count` reads its depth.
        struct SlowNoop;
        impl UdpHandler for SlowNoop {
            fn classify_udp_packet(&self, _data: &[u8]) -> Option<usize> {
                Some(0)
            }
            fn on_recv_udp_packet(&self, _group_index: usize, _packet: &UdpPacket) {
                std::thread::sleep(Duration::from_millis(200));
            }
        }
        let g = UdpRequestGroup::new(
            0,
            &UdpGroupSpec { queue_capacity: 100, min_threads: 1, max_threads: 10 },
            Duration::from_secs(10),
            Duration::from_secs(60),
            Arc::new(SlowNoop),
        );
        g.adjust_thread_count(1000);
        assert_eq!(g.worker_count(), 1);
        for _ in 0..5 {
            g.queue.push(UdpPacket {
                data: Bytes::new(),
                peer_addr: "127.0.0.1:1".parse().unwrap(),
                recv_time: Instant::now(),
            });
        }
        g.adjust_thread_count(1);
        assert_eq!(g.worker_count(), 4, "grows by at most 3 past the alert line");
        g.shutdown();
    }
}
