//! A fixed-size pool of [`EventLoop`]s, round-robin assigned to incoming
//! connections.
//!
//! Grounded in `original_source/ise/main/ise_event_loop.h`'s
//! `EventLoopList`, minus the `findEventLoop(THREAD_ID)` lookup — nothing
//! here needs to map an OS thread id back to its owning loop, since
//! `EventLoop::delegate` is the only cross-thread entry point callers need.

use std::sync::atomic::{AtomicUsize, Ordering};

use crate::event_loop::EventLoop;

/// Round-robins [`EventLoop`]s by a monotonically increasing counter,
/// matching spec.md §4.2's "new connections are assigned to event loops in
/// round-robin order".
pub struct EventLoopList {
    loops: Vec<EventLoop>,
    next: AtomicUsize,
}

impl EventLoopList {
    /// Start `count` event loops, named `{prefix}-0`, `{prefix}-1`, ...
    ///
    /// # Panics
    ///
    /// Panics if `count` is zero.
    #[must_use]
    pub fn start(prefix: &str, count: usize) -> Self {
        assert!(count > 0, "EventLoopList needs at least one loop");
        let loops = (0..count).map(|i| EventLoop::start(format!("{prefix}-{i}"))).collect();
        Self { loops, next: AtomicUsize::new(0) }
    }

    /// Number of loops in the pool.
    #[must_use]
    pub fn len(&self) -> usize {
        self.loops.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.loops.is_empty()
    }

    /// Next loop in round-robin order.
    #[must_use]
    pub fn next_loop(&self) -> &EventLoop {
        let i = self.next.fetch_add(1, Ordering::Relaxed) % self.loops.len();
        &self.loops[i]
    }

    /// The loop at a fixed index, e.g. for sticky per-listener assignment.
    #[must_use]
    pub fn get(&self, index: usize) -> &EventLoop {
        &self.loops[index % self.loops.len()]
    }

    /// Total connections currently owned across every loop in the pool.
    #[must_use]
    pub fn total_connection_count(&self) -> usize {
        self.loops.iter().map(EventLoop::connection_count).sum()
    }

    /// Stop every loop and wait for its thread to exit. Safe to call
    /// through a shared reference (e.g. an `Arc<EventLoopList>` also held
    /// by an acceptor's accept loop) and safe to call more than once.
    pub fn stop(&self, force: bool) {
        for l in &self.loops {
            l.stop(force);
        }
        for l in &self.loops {
            l.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_robins_across_loops() {
        let list = EventLoopList::start("test-list", 3);
        let names: Vec<_> = (0..6).map(|_| list.next_loop().name().to_string()).collect();
        assert_eq!(
            names,
            vec![
                "test-list-0",
                "test-list-1",
                "test-list-2",
                "test-list-0",
                "test-list-1",
                "test-list-2",
            ]
        );
        list.stop(false);
    }

    #[test]
    #[should_panic(expected = "at least one loop")]
    fn zero_loops_panics() {
        let _ = EventLoopList::start("empty", 0);
    }
}
