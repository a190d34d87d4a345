//! The scaling daemon: a single background thread that ticks once per
//! `adjust_thread_interval` and re-evaluates every UDP request group's
//! worker pool size, plus fires the application's periodic hook.
//!
//! Grounded in `original_source/ise/main/ise_sys_threads.cpp`'s
//! `SysDaemonThread::execute` (a `while (!terminated) { ...; sleep(1); }`
//! loop counting elapsed seconds) and `MainUdpServer::adjustWorkerThreadCount`
//! (the per-tick fan-out to every group's `AdjustThreadCount`).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::callbacks::SystemHandler;
use crate::udp::UdpServer;

/// Runs `SystemHandler::daemon_thread_execute` and the UDP scaling sweep on
/// its own thread until stopped.
pub struct Daemon {
    stop: Arc<AtomicBool>,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl Daemon {
    /// Start the daemon thread. `udp` is `None` when `ServerType::UDP`
    /// isn't enabled, in which case only the application hook fires.
    pub fn start<H: SystemHandler>(interval: Duration, udp: Option<Arc<UdpServer>>, handler: Arc<H>) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = stop.clone();
        let thread = std::thread::Builder::new()
            .name("ise-daemon".to_string())
            .spawn(move || {
                let mut second_count: u64 = 0;
                while !thread_stop.load(Ordering::Acquire) {
                    handler.daemon_thread_execute(second_count);
                    if let Some(udp) = &udp {
                        udp.adjust_all();
                    }
                    second_count += 1;
                    std::thread::sleep(interval);
                }
            })
            .expect("failed to spawn daemon thread");
        Self { stop, thread: Some(thread) }
    }

    /// Stop the daemon and wait for its thread to exit. The wait is bounded
    /// only by `interval`, since the loop checks the stop flag right after
    /// waking from `sleep`.
    pub fn stop(mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(t) = self.thread.take() {
            let _ = t.join();
        }
    }
}

impl Drop for Daemon {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(t) = self.thread.take() {
            let _ = t.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    struct CountingHandler(mpsc::Sender<u64>);
    impl SystemHandler for CountingHandler {
        fn daemon_thread_execute(&self, sec_count: u64) {
            let _ = self.0.send(sec_count);
        }
    }

    #[test]
    fn fires_once_per_tick_with_increasing_second_count() {
        let (tx, rx) = mpsc::channel();
        let daemon = Daemon::start(Duration::from_millis(20), None, Arc::new(CountingHandler(tx)));
        let first = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        let second = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(first, 0);
        assert_eq!(second, 1);
        daemon.stop();
    }
}
