//! End-to-end UDP and timer scenarios from spec.md §8: UDP overflow
//! (drop-head under a saturated queue) and a repeating timer firing a
//! fixed number of times before cancellation.

use std::net::UdpSocket;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

use ise::{
    EventLoop, MainServer, ReactorOptions, ServerType, SystemHandler, TcpHandler, UdpGroupSpec, UdpHandler, UdpPacket,
};

struct CountingUdp {
    delivered: Arc<AtomicUsize>,
}

impl TcpHandler for CountingUdp {}
impl UdpHandler for CountingUdp {
    fn classify_udp_packet(&self, _data: &[u8]) -> Option<usize> {
        Some(0)
    }

    fn on_recv_udp_packet(&self, _group_index: usize, _packet: &UdpPacket) {
        // A slow handler so the sender wins the race against the single
        // worker and the queue actually saturates before draining.
        std::thread::sleep(Duration::from_millis(5));
        self.delivered.fetch_add(1, Ordering::SeqCst);
    }
}
impl SystemHandler for CountingUdp {}

/// spec.md §8: "UDP overflow" — capacity-100 queue, 150 datagrams sent
/// faster than the worker drains; exactly 100 dequeues (the 50 oldest
/// dropped before ever reaching a worker).
#[test]
fn udp_overflow_drops_oldest_under_sustained_burst() {
    let port = portpicker::pick_unused_port().expect("no free port");
    let delivered = Arc::new(AtomicUsize::new(0));
    let options = ReactorOptions::new(ServerType::UDP)
        .with_udp_server(port, 1)
        .with_udp_group(UdpGroupSpec { queue_capacity: 100, min_threads: 1, max_threads: 1 });
    let mut server = MainServer::new(options, Arc::new(CountingUdp { delivered: delivered.clone() }))
        .open()
        .expect("server failed to open");

    let client = UdpSocket::bind("127.0.0.1:0").unwrap();
    // Single worker drains at 5ms/packet; firing 150 packets as fast as
    // possible guarantees the queue is saturated well before they're
    // consumed, so capacity (not drain speed) determines survivors.
    for i in 0..150u32 {
        client.send_to(&i.to_be_bytes(), ("127.0.0.1", port)).unwrap();
    }

    // Give the single worker enough time to drain whatever made it into
    // the queue (at most 100 packets * 5ms + scheduling slack).
    std::thread::sleep(Duration::from_millis(1500));

    assert_eq!(delivered.load(Ordering::SeqCst), 100, "exactly the queue capacity should have been dequeued");

    server.close();
}

/// spec.md §8: "Timer every 1 s × 10" — scaled down to keep the test
/// suite fast: a repeating timer scheduled on a live event loop fires a
/// fixed number of times, is canceled, and never fires an eleventh.
#[test]
fn repeating_timer_fires_exactly_n_times_then_cancel_holds() {
    let loop_ = EventLoop::start("timer-repeat-test");
    let (tx, rx) = mpsc::channel();
    let fire_count = Arc::new(AtomicUsize::new(0));

    let count_for_cb = fire_count.clone();
    let tx_for_cb = tx.clone();
    let timer_id = loop_.schedule_timer(std::time::Instant::now(), Duration::from_millis(20), move |_q| {
        let n = count_for_cb.fetch_add(1, Ordering::SeqCst) + 1;
        let _ = tx_for_cb.send(n);
    });

    // Collect 10 firings.
    for expected in 1..=10u64 {
        let got = rx.recv_timeout(Duration::from_secs(2)).expect("timer did not fire the expected number of times");
        assert_eq!(got, expected);
    }

    // Cancel from outside the loop thread: `cancel_timer` delegates onto
    // the owning thread same as scheduling did, and the id returned by
    // `schedule_timer` is valid immediately, not just from inside a fired
    // callback.
    loop_.cancel_timer(timer_id);
    std::thread::sleep(Duration::from_millis(100));

    let fired_at_cancel = fire_count.load(Ordering::SeqCst);
    std::thread::sleep(Duration::from_millis(100));
    assert_eq!(fire_count.load(Ordering::SeqCst), fired_at_cancel, "no 11th firing after cancel");

    loop_.stop(false);
    loop_.join();

    // Drain whatever already landed in the channel before cancellation
    // took effect; no further firings should arrive once the loop stopped.
    while rx.try_recv().is_ok() {}
    assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
}
