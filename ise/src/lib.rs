//! # ise
//!
//! A multi-reactor TCP/UDP server engine. An application registers
//! callbacks (connection lifecycle, framed-message delivery, UDP datagram
//! classification) and the engine drives connection acceptance, byte-stream
//! framing, queued send/receive operations, timer scheduling, and
//! structured shutdown.
//!
//! ## Architecture
//!
//! - **`ise-core`**: runtime-agnostic building blocks — the resizable
//!   [`IoBuffer`](ise_core::io_buffer::IoBuffer), pluggable
//!   [`PacketSplitter`](ise_core::splitter::PacketSplitter)s, the
//!   cancel-safe [`TimerQueue`](ise_core::timer::TimerQueue), and
//!   [`ReactorOptions`](ise_core::options::ReactorOptions).
//! - **`ise-reactor`**: the concrete engine built on those blocks — one
//!   OS thread per event loop, a TCP acceptor and outbound connector, a
//!   UDP request-group worker pool that scales itself, and the
//!   [`MainServer`] façade that brings all of it up and down.
//! - **`ise`** (this crate): the public entry point. Re-exports the pieces
//!   an application needs and nothing else.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use ise::{MainServer, ReactorOptions, ServerType, TcpServerSpec};
//! use ise::{TcpConnectionHandle, TcpHandler, UdpHandler, SystemHandler, LineSplitter};
//! use std::sync::Arc;
//!
//! struct Echo;
//!
//! impl TcpHandler for Echo {
//!     fn on_tcp_connected(&self, conn: &TcpConnectionHandle) {
//!         let _ = conn.recv(Arc::new(LineSplitter), 0, None);
//!     }
//!
//!     fn on_tcp_recv_complete(&self, conn: &TcpConnectionHandle, data: &[u8], ctx: u64) {
//!         let _ = conn.send(data.to_vec(), ctx, None);
//!         let _ = conn.recv(Arc::new(LineSplitter), ctx, None);
//!     }
//! }
//!
//! impl UdpHandler for Echo {
//!     fn classify_udp_packet(&self, _data: &[u8]) -> Option<usize> {
//!         None
//!     }
//!     fn on_recv_udp_packet(&self, _group_index: usize, _packet: &ise::UdpPacket) {}
//! }
//!
//! impl SystemHandler for Echo {}
//!
//! # fn main() -> ise_core::error::Result<()> {
//! let options = ReactorOptions::new(ServerType::TCP)
//!     .with_tcp_server(TcpServerSpec { port: 9000, event_loop_count: 4 });
//! let server = MainServer::new(options, Arc::new(Echo)).open()?;
//! // ... server runs on its own threads until dropped or `close()`d ...
//! drop(server);
//! # Ok(())
//! # }
//! ```
//!
//! ## Non-goals
//!
//! TLS, HTTP semantics, application payload byte-order, cross-host load
//! balancing, and persistent connection state across process restarts are
//! all out of scope for this engine — see `DESIGN.md` at the workspace
//! root for the full rationale.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

pub use ise_core::error::{ReactorError, Result};
pub use ise_core::io_buffer::IoBuffer;
pub use ise_core::options::{ReactorOptions, ServerType, TcpServerSpec, UdpGroupSpec};
pub use ise_core::splitter::{AnySplitter, ByteSplitter, LineSplitter, NullTerminatedSplitter, PacketSplitter};
pub use ise_core::timer::TimerId;

pub use ise_reactor::acceptor::Acceptor;
pub use ise_reactor::assistor::AssistorPool;
pub use ise_reactor::callbacks::{SystemHandler, TcpHandler, UdpHandler};
pub use ise_reactor::connection::{TcpConnection, TcpConnectionHandle};
pub use ise_reactor::connector;
pub use ise_reactor::daemon::Daemon;
pub use ise_reactor::event_loop::EventLoop;
pub use ise_reactor::event_loop_list::EventLoopList;
pub use ise_reactor::server::MainServer;
pub use ise_reactor::udp::{UdpPacket, UdpRequestGroup, UdpServer};

pub use bytes::Bytes;

/// Development helpers for benches/tests/examples (tracing setup).
pub mod dev_tracing;
