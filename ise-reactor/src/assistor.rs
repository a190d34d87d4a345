//! Assistor threads: a configurable number of background worker threads
//! that simply repeat `SystemHandler::assistor_thread_execute` for the
//! application's own periodic or continuous side work (log rotation,
//! cache warmup, polling an external system — anything outside the
//! request/response path).
//!
//! Grounded in `original_source/include/ise_svr_mod.h`'s
//! `getAssistorThreadCount`/`assistorThreadExecute` pair: one thread per
//! configured slot, each identified by its `assistorIndex`, restarted in a
//! tight loop for as long as the process runs (the original imposes no
//! pacing here; callers that want one add their own sleep inside the hook).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::callbacks::SystemHandler;

/// One thread per configured slot, running `assistor_thread_execute` in a
/// loop until stopped.
pub struct AssistorPool {
    stop: Arc<AtomicBool>,
    threads: Vec<std::thread::JoinHandle<()>>,
}

impl AssistorPool {
    /// Start `count` assistor threads, indexed `0..count`.
    #[must_use]
    pub fn start<H: SystemHandler>(count: usize, handler: Arc<H>) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let threads = (0..count)
            .map(|slot| {
                let handler = handler.clone();
                let thread_stop = stop.clone();
                std::thread::Builder::new()
                    .name(format!("ise-assistor-{slot}"))
                    .spawn(move || {
                        while !thread_stop.load(Ordering::Acquire) {
                            handler.assistor_thread_execute(slot);
                        }
                    })
                    .expect("failed to spawn assistor thread")
            })
            .collect();
        Self { stop, threads }
    }

    /// Number of assistor threads in this pool.
    #[must_use]
    pub fn len(&self) -> usize {
        self.threads.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.threads.is_empty()
    }

    /// Stop every assistor thread and wait for them to exit. Relies on
    /// `assistor_thread_execute` returning promptly; an implementation
    /// that blocks indefinitely will delay shutdown indefinitely too, same
    /// as the original's unpaced loop.
    pub fn stop(mut self) {
        self.stop.store(true, Ordering::Release);
        for t in self.threads.drain(..) {
            let _ = t.join();
        }
    }
}

impl Drop for AssistorPool {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        for t in self.threads.drain(..) {
            let _ = t.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::time::Duration;

    struct RecordingHandler(Arc<Mutex<Vec<usize>>>);
    impl SystemHandler for RecordingHandler {
        fn assistor_thread_execute(&self, slot: usize) {
            self.0.lock().push(slot);
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn starts_one_thread_per_slot_and_each_runs() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let pool = AssistorPool::start(3, Arc::new(RecordingHandler(seen.clone())));
        assert_eq!(pool.len(), 3);
        std::thread::sleep(Duration::from_millis(50));
        pool.stop();
        let seen = seen.lock();
        for slot in 0..3 {
            assert!(seen.contains(&slot), "slot {slot} never ran");
        }
    }

    #[test]
    fn zero_count_starts_nothing() {
        struct Noop;
        impl SystemHandler for Noop {}
        let pool = AssistorPool::start(0, Arc::new(Noop));
        assert!(pool.is_empty());
        pool.stop();
    }
}
