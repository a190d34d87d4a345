//! TCP connection: per-socket state, send/receive task queues, and the
//! actor task that pumps bytes between the kernel and the application.
//!
//! Grounded in `original_source/include/ise_server_tcp.h`'s `TcpConnection`
//! (buffer/task-queue layout, state machine, lazily-computed name) and in
//! the teacher's `actor.rs` split-pump design (one async task per socket,
//! commands delivered over a `flume` channel, no shared mutable state
//! between the read and write halves of one iteration).

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use compio::buf::BufResult;
use compio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use compio::net::TcpStream;
use flume::{Receiver, Sender};
use futures::FutureExt;
use parking_lot::Mutex;
use tracing::{debug, warn};

use ise_core::alloc::IoArena;
use ise_core::error::{ReactorError, Result};
use ise_core::io_buffer::IoBuffer;
use ise_core::poison::PoisonGuard;
use ise_core::splitter::PacketSplitter;

use crate::callbacks::TcpHandler;

/// Maximum bytes written to the wire per write-pump iteration, matching
/// spec.md §4.5's "capped at a configured max chunk size, e.g. 32 KiB".
const MAX_SEND_CHUNK: usize = 32 * 1024;
/// Single-read chunk size requested from the kernel per receive.
const READ_CHUNK: usize = 8 * 1024;

static NEXT_CONN_ID: AtomicU64 = AtomicU64::new(1);

/// Commands accepted by a connection's pump task. Every public method on
/// [`TcpConnection`] is a thin wrapper that sends one of these; this is
/// the mechanism by which calls from any thread are routed onto the
/// connection's owning loop ("delegated", per spec.md's terminology).
enum ConnCmd {
    Send { data: Bytes, ctx: u64, timeout: Option<Duration> },
    Recv { splitter: Arc<dyn PacketSplitter>, ctx: u64, timeout: Option<Duration> },
    Disconnect,
    Shutdown { close_send: bool, close_recv: bool },
    ForceClose,
}

/// A pending send or receive task's deadline bookkeeping, shared between
/// the pump task (which sets it when a task becomes head-of-queue) and
/// the owning event loop's periodic check (which stamps `started_at` on
/// first sight and compares against `timeout` thereafter).
#[derive(Debug, Clone, Copy, Default)]
struct TaskDeadline {
    timeout: Duration,
    started_at: Option<Instant>,
}

#[derive(Debug, Default)]
struct DeadlineState {
    send: Option<TaskDeadline>,
    recv: Option<TaskDeadline>,
}

/// Shared handle to a TCP connection. Cheaply cloneable; the event loop's
/// connection map holds the owning reference, in-flight completions and
/// application callbacks hold borrowed/cloned references that keep the
/// connection alive per spec.md §3's ownership summary.
pub struct TcpConnection {
    id: u64,
    local_addr: SocketAddr,
    peer_addr: SocketAddr,
    name: once_cell::sync::OnceCell<String>,
    cmd_tx: Sender<ConnCmd>,
    errored: AtomicBool,
    deadlines: Arc<Mutex<DeadlineState>>,
}

/// Shared, reference-counted connection handle.
pub type TcpConnectionHandle = Arc<TcpConnection>;

impl TcpConnection {
    /// Unique, process-lifetime connection id (spec.md's "connection
    /// sequence number").
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    /// Stable textual name of the form `localAddr-peerAddr#N`, computed
    /// lazily on first request and then cached.
    #[must_use]
    pub fn name(&self) -> &str {
        self.name
            .get_or_init(|| format!("{}-{}#{}", self.local_addr, self.peer_addr, self.id))
    }

    /// Local socket address.
    #[must_use]
    pub const fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Peer socket address.
    #[must_use]
    pub const fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Whether this connection has already latched an error (and is
    /// tearing down or torn down).
    #[must_use]
    pub fn is_errored(&self) -> bool {
        self.errored.load(Ordering::Acquire)
    }

    /// Queue `data` for sending. Completes when the cumulative sent byte
    /// count reaches `data.len()`, firing `TcpHandler::on_tcp_send_complete`
    /// with `ctx` on the owning loop's thread.
    pub fn send(&self, data: impl Into<Bytes>, ctx: u64, timeout: Option<Duration>) -> Result<()> {
        self.cmd_tx
            .send(ConnCmd::Send { data: data.into(), ctx, timeout })
            .map_err(|_| ReactorError::ConnectionClosed)
    }

    /// Enqueue a receive task: once `splitter` reports a complete message,
    /// `TcpHandler::on_tcp_recv_complete` fires with that message and `ctx`.
    pub fn recv(&self, splitter: Arc<dyn PacketSplitter>, ctx: u64, timeout: Option<Duration>) -> Result<()> {
        self.cmd_tx
            .send(ConnCmd::Recv { splitter, ctx, timeout })
            .map_err(|_| ReactorError::ConnectionClosed)
    }

    /// Half-close the send side; receiving continues until the peer
    /// closes or an error is observed.
    pub fn disconnect(&self) -> Result<()> {
        self.cmd_tx.send(ConnCmd::Disconnect).map_err(|_| ReactorError::ConnectionClosed)
    }

    /// Explicit bidirectional shutdown control.
    pub fn shutdown(&self, close_send: bool, close_recv: bool) -> Result<()> {
        self.cmd_tx
            .send(ConnCmd::Shutdown { close_send, close_recv })
            .map_err(|_| ReactorError::ConnectionClosed)
    }

    /// Tear down immediately, discarding any buffered or in-flight send
    /// and receive tasks. Used by the owning event loop when
    /// [`Self::check_deadlines`] reports an expired task, and during
    /// whole-loop shutdown once its grace period elapses.
    pub fn force_close(&self) -> Result<()> {
        self.cmd_tx.send(ConnCmd::ForceClose).map_err(|_| ReactorError::ConnectionClosed)
    }

    /// Check and, if needed, stamp head-of-queue task deadlines. Called by
    /// the owning event loop at most once per second (spec.md §4.5). If a
    /// deadline has been exceeded this returns `true` and the caller
    /// (`EventLoop`) disconnects the connection.
    pub(crate) fn check_deadlines(&self, now: Instant) -> bool {
        let mut state = self.deadlines.lock();
        let mut expired = false;
        for slot in [&mut state.send, &mut state.recv] {
            if let Some(deadline) = slot {
                match deadline.started_at {
                    None => deadline.started_at = Some(now),
                    Some(start) if now.saturating_duration_since(start) > deadline.timeout => {
                        expired = true;
                    }
                    Some(_) => {}
                }
            }
        }
        expired
    }
}

struct SendTaskState {
    total: usize,
    sent: usize,
    ctx: u64,
    timeout: Option<Duration>,
}

struct RecvTaskState {
    splitter: Arc<dyn PacketSplitter>,
    ctx: u64,
    timeout: Option<Duration>,
}

/// Owns the socket and drives the read/write pump described in spec.md
/// §4.5. Spawned once per connection onto the owning loop's runtime.
pub struct ConnectionPump<H: TcpHandler> {
    stream: TcpStream,
    handle: TcpConnectionHandle,
    handler: Arc<H>,
    cmd_rx: Receiver<ConnCmd>,
    arena: IoArena,
    send_buf: IoBuffer,
    recv_buf: IoBuffer,
    send_tasks: VecDeque<SendTaskState>,
    recv_tasks: VecDeque<RecvTaskState>,
    max_recv_buffer_size: usize,
    send_half_closed: bool,
    recv_half_closed: bool,
    /// Whether `stream.shutdown(Write)` has already been issued. Guards
    /// against calling it more than once once `send_half_closed` is set
    /// and the send buffer has drained.
    send_shutdown_sent: bool,
    /// Set for the duration of the in-flight `write`/`read` future and only
    /// cleared on its successful completion. If the owning `select!` in
    /// `run` picks the command branch instead and drops that future
    /// mid-poll, the flag survives the drop and `run` treats it as a
    /// socket error rather than risk silently resubmitting (or losing)
    /// bytes the kernel may have already committed to the wire.
    send_poisoned: bool,
    recv_poisoned: bool,
}

/// Build a new connection's shared handle and its not-yet-started pump.
/// The caller (acceptor or connector, via the main server's assignment
/// routine) hands the pump to the chosen event loop to spawn.
pub fn new_connection<H: TcpHandler>(
    stream: TcpStream,
    local_addr: SocketAddr,
    peer_addr: SocketAddr,
    handler: Arc<H>,
    max_recv_buffer_size: usize,
) -> (TcpConnectionHandle, ConnectionPump<H>) {
    let (cmd_tx, cmd_rx) = flume::unbounded();
    let handle = Arc::new(TcpConnection {
        id: NEXT_CONN_ID.fetch_add(1, Ordering::Relaxed),
        local_addr,
        peer_addr,
        name: once_cell::sync::OnceCell::new(),
        cmd_tx,
        errored: AtomicBool::new(false),
        deadlines: Arc::new(Mutex::new(DeadlineState::default())),
    });
    let pump = ConnectionPump {
        stream,
        handle: handle.clone(),
        handler,
        cmd_rx,
        arena: IoArena::new(),
        send_buf: IoBuffer::new(),
        recv_buf: IoBuffer::new(),
        send_tasks: VecDeque::new(),
        recv_tasks: VecDeque::new(),
        max_recv_buffer_size,
        send_half_closed: false,
        recv_half_closed: false,
        send_shutdown_sent: false,
        send_poisoned: false,
        recv_poisoned: false,
    };
    (handle, pump)
}

impl<H: TcpHandler> ConnectionPump<H> {
    /// Run the connection to completion: fires `on_tcp_connected`, pumps
    /// bytes and commands until an error, explicit shutdown, or peer close,
    /// then fires `on_tcp_disconnected` exactly once.
    pub async fn run(mut self) {
        self.handler.on_tcp_connected(&self.handle);

        // A clone of the command receiver, independent of `self`, so every
        // branch below can race it against a `&mut self` I/O future
        // (`flush_send`/`read_once`) without the borrow checker seeing
        // `self.cmd_rx` and `self` overlap. This is what lets a
        // `force_close`/`shutdown` sent while a send is stuck mid-write
        // (e.g. a stalled peer past its send deadline, spec.md §4.5)
        // actually interrupt that write instead of queuing unseen behind it.
        let cmd_rx = self.cmd_rx.clone();

        loop {
            if self.send_poisoned || self.recv_poisoned {
                warn!(
                    conn = self.handle.name(),
                    "in-flight I/O was cancelled by a racing command; closing rather than risk a duplicate or lost write"
                );
                break;
            }

            self.maybe_shutdown_send();

            // Flush whatever is still buffered even once `send_half_closed`
            // is set: `disconnect`/`shutdown(close_send=true)` must drain
            // already-queued bytes (and fire their `on_tcp_send_complete`)
            // before the actual socket-level send shutdown is issued below.
            if !self.send_buf.is_empty() {
                futures::select! {
                    cmd = cmd_rx.recv_async().fuse() => {
                        match cmd {
                            Ok(cmd) => { if !self.handle_cmd(cmd) { break; } }
                            Err(_) => break,
                        }
                    }
                    keep_going = self.flush_send().fuse() => {
                        if !keep_going {
                            break;
                        }
                    }
                }
                self.maybe_shutdown_send();
                continue;
            }

            if self.recv_half_closed
                || (self.recv_buf.readable_bytes() >= self.max_recv_buffer_size && self.recv_tasks.is_empty())
            {
                // Backpressure (spec.md §4.5): stop posting reads until the
                // application submits a new receive task, or we're
                // recv-half-closed and only draining commands matters.
                match cmd_rx.recv_async().await {
                    Ok(cmd) => {
                        if !self.handle_cmd(cmd) {
                            break;
                        }
                    }
                    Err(_) => break,
                }
                continue;
            }

            futures::select! {
                cmd = cmd_rx.recv_async().fuse() => {
                    match cmd {
                        Ok(cmd) => { if !self.handle_cmd(cmd) { break; } }
                        Err(_) => break,
                    }
                }
                keep_going = self.read_once().fuse() => {
                    if !keep_going {
                        break;
                    }
                }
            }
        }

        self.handle.errored.store(true, Ordering::Release);
        self.handler.on_tcp_disconnected(&self.handle);
    }

    /// Process one command; returns `false` if the pump should stop.
    fn handle_cmd(&mut self, cmd: ConnCmd) -> bool {
        match cmd {
            ConnCmd::Send { data, ctx, timeout } => {
                self.send_buf.append(&data);
                let is_new_head = self.send_tasks.is_empty();
                self.send_tasks.push_back(SendTaskState { total: data.len(), sent: 0, ctx, timeout });
                if is_new_head {
                    self.arm_send_deadline(timeout);
                }
                true
            }
            ConnCmd::Recv { splitter, ctx, timeout } => {
                let is_new_head = self.recv_tasks.is_empty();
                self.recv_tasks.push_back(RecvTaskState { splitter, ctx, timeout });
                if is_new_head {
                    self.arm_recv_deadline(timeout);
                }
                self.try_satisfy_recv_tasks();
                true
            }
            ConnCmd::Disconnect => {
                // Half-close: stop accepting new sends, drain what's already
                // queued (the run loop keeps flushing `send_buf` regardless
                // of this flag), then issue the actual `shutdown(Write)`
                // once drained. Receiving continues in the meantime since
                // `recv_half_closed` is untouched.
                self.send_half_closed = true;
                self.maybe_shutdown_send();
                true
            }
            ConnCmd::Shutdown { close_send, close_recv } => {
                self.send_half_closed |= close_send;
                self.recv_half_closed |= close_recv;
                self.maybe_shutdown_send();
                !(self.send_half_closed && self.recv_half_closed)
            }
            ConnCmd::ForceClose => false,
        }
    }

    /// Issue the actual send-side `shutdown()` once `send_half_closed` has
    /// been requested and every already-queued byte has been flushed.
    /// Idempotent: does nothing once already sent.
    fn maybe_shutdown_send(&mut self) {
        if !self.send_half_closed || self.send_shutdown_sent {
            return;
        }
        if !self.send_buf.is_empty() || !self.send_tasks.is_empty() {
            return;
        }
        if let Err(e) = self.stream.shutdown(std::net::Shutdown::Write) {
            debug!(conn = self.handle.name(), error = %e, "failed to shut down send side");
        }
        self.send_shutdown_sent = true;
    }

    fn arm_send_deadline(&self, timeout: Option<Duration>) {
        let mut state = self.handle.deadlines.lock();
        state.send = timeout.map(|timeout| TaskDeadline { timeout, started_at: None });
    }

    fn arm_recv_deadline(&self, timeout: Option<Duration>) {
        let mut state = self.handle.deadlines.lock();
        state.recv = timeout.map(|timeout| TaskDeadline { timeout, started_at: None });
    }

    fn clear_send_deadline(&self) {
        self.handle.deadlines.lock().send = None;
    }

    fn clear_recv_deadline(&self) {
        self.handle.deadlines.lock().recv = None;
    }

    /// Write up to `MAX_SEND_CHUNK` bytes, advance completed send tasks,
    /// and fire `on_tcp_send_complete` for each one fully drained.
    async fn flush_send(&mut self) -> bool {
        let n = self.send_buf.readable_bytes().min(MAX_SEND_CHUNK);
        let chunk = self.send_buf.peek()[..n].to_vec();
        let guard = PoisonGuard::new(&mut self.send_poisoned);
        let BufResult(res, _buf) = self.stream.write(chunk).await;
        guard.disarm();
        let written = match res {
            Ok(w) => w,
            Err(e) => {
                warn!(conn = self.handle.name(), error = %e, "send failed");
                return false;
            }
        };
        if written == 0 {
            return false;
        }
        self.send_buf.retrieve(written);

        let mut remaining = written;
        while remaining > 0 {
            let Some(task) = self.send_tasks.front_mut() else { break };
            let take = remaining.min(task.total - task.sent);
            task.sent += take;
            remaining -= take;
            if task.sent >= task.total {
                let done = self.send_tasks.pop_front().unwrap();
                self.handler.on_tcp_send_complete(&self.handle, done.ctx);
                match self.send_tasks.front() {
                    Some(next) => self.arm_send_deadline(next.timeout),
                    None => self.clear_send_deadline(),
                }
            }
        }
        true
    }

    /// Post one read, append to the receive buffer, and satisfy as many
    /// queued receive tasks as the splitter chain allows. Returns `false`
    /// on EOF or I/O error.
    async fn read_once(&mut self) -> bool {
        let slab = self.arena.alloc_mut(READ_CHUNK);
        let guard = PoisonGuard::new(&mut self.recv_poisoned);
        let BufResult(res, slab) = (&mut self.stream).read(slab).await;
        guard.disarm();
        match res {
            Ok(0) => false,
            Ok(_n) => {
                let bytes = slab.freeze();
                self.recv_buf.append(&bytes);
                self.try_satisfy_recv_tasks();
                true
            }
            Err(e) => {
                debug!(conn = self.handle.name(), error = %e, "read failed");
                false
            }
        }
    }

    fn try_satisfy_recv_tasks(&mut self) {
        loop {
            let Some(task) = self.recv_tasks.front() else { break };
            let k = task.splitter.split(self.recv_buf.peek());
            if k == 0 {
                break;
            }
            let message = self.recv_buf.peek()[..k].to_vec();
            self.recv_buf.retrieve(k);
            let task = self.recv_tasks.pop_front().unwrap();
            self.handler.on_tcp_recv_complete(&self.handle, &message, task.ctx);
            match self.recv_tasks.front() {
                Some(next) => self.arm_recv_deadline(next.timeout),
                None => self.clear_recv_deadline(),
            }
        }
    }
}
