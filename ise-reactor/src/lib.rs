//! ise-reactor
//!
//! The concrete multi-reactor engine built on `ise-core`'s runtime-agnostic
//! primitives:
//!
//! - [`event_loop`] / [`event_loop_list`]: one OS thread per loop, each
//!   running its own single-threaded `compio` runtime; a fixed pool of
//!   loops that new connections are assigned to round-robin.
//! - [`connection`]: per-socket send/receive pipelines, pending-task
//!   deadlines, and the lazily-computed `localAddr-peerAddr#N` name.
//! - [`acceptor`] / [`connector`]: inbound `accept()` and outbound
//!   `connect()`, both handing off successful sockets to an event loop.
//! - [`udp`]: bounded per-group request queues drained by an auto-scaling
//!   worker-thread pool.
//! - [`daemon`] / [`assistor`]: the periodic worker-pool scaling sweep and
//!   the application's own background-task slots.
//! - [`callbacks`]: the `TcpHandler` / `UdpHandler` / `SystemHandler`
//!   traits an application implements to receive events.
//! - [`server`]: [`server::MainServer`], which composes everything above
//!   into one open/close lifecycle.

#![deny(unsafe_code)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::must_use_candidate)]

pub mod acceptor;
pub mod assistor;
pub mod callbacks;
pub mod connection;
pub mod connector;
pub mod daemon;
pub mod event_loop;
pub mod event_loop_list;
pub mod server;
pub mod udp;

/// A small prelude for downstream applications.
pub mod prelude {
    pub use crate::callbacks::{SystemHandler, TcpHandler, UdpHandler};
    pub use crate::connection::{TcpConnection, TcpConnectionHandle};
    pub use crate::server::MainServer;
    pub use crate::udp::UdpPacket;
}
