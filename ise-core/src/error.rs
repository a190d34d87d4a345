//! Error kinds for the reactor engine.
//!
//! Most of these are *latched* onto a connection and handled locally by
//! tearing it down; they are never propagated to the application. Only
//! listener bind/listen failures during `MainServer::open` are meant to
//! surface to the caller (see the error-kind table in DESIGN.md).

use std::io;
use thiserror::Error;

/// Error type for reactor-engine operations.
#[derive(Error, Debug)]
pub enum ReactorError {
    /// I/O error from a socket syscall or async completion.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// The head-of-queue send or receive task exceeded its deadline.
    #[error("task timed out after {0:?}")]
    TaskTimeout(std::time::Duration),

    /// A non-blocking `connect()` completed with a nonzero `SO_ERROR`.
    #[error("connect to {peer} failed: {source}")]
    ConnectFailed {
        /// Address that was being connected to.
        peer: String,
        /// Underlying I/O error.
        source: io::Error,
    },

    /// A listener failed to bind or listen during `open()`.
    #[error("failed to bind listener on {addr}: {source}")]
    BindFailed {
        /// Address that failed to bind.
        addr: String,
        /// Underlying I/O error.
        source: io::Error,
    },

    /// The connection was already torn down; operation is a no-op.
    #[error("connection is closed")]
    ConnectionClosed,

    /// A configuration value is out of its valid range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Result alias for reactor-engine operations.
pub type Result<T> = std::result::Result<T, ReactorError>;

impl ReactorError {
    /// Whether this error represents the normal lifecycle end of a
    /// connection, as opposed to a configuration or programmer error.
    #[must_use]
    pub const fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::Io(_) | Self::TaskTimeout(_) | Self::ConnectFailed { .. } | Self::ConnectionClosed
        )
    }
}
