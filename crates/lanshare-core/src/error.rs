//! Error types for LanShare.
//!
//! Two layers of errors exist:
//!
//! - [`TransferError`] is the closed set of outcomes a single transfer can
//!   fail with. The sender returns it directly so callers can tell an
//!   unreachable peer from a timeout or a local cancellation.
//! - [`Error`] covers everything else (socket setup, configuration, I/O)
//!   and wraps a [`TransferError`] when one bubbles up.

use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;

use thiserror::Error;

/// A specialized `Result` type for LanShare operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Failure outcome of one transfer session.
#[derive(Error, Debug, Clone)]
pub enum TransferError {
    /// Source file absent or unreadable at send time
    #[error("file not found: {}", .0.display())]
    NotFound(PathBuf),

    /// Connection refused or peer not listening
    #[error("peer {0} is unreachable")]
    Unreachable(SocketAddr),

    /// Connect or acknowledgment wait exceeded its bound
    #[error("{operation} timed out after {secs} seconds")]
    Timeout {
        /// What was being waited for
        operation: &'static str,
        /// The bound that was exceeded
        secs: u64,
    },

    /// Cooperative cancellation was observed
    #[error("transfer interrupted after {bytes_sent} bytes")]
    Interrupted {
        /// Payload bytes written before the cancellation was seen
        bytes_sent: u64,
    },

    /// Bad header or acknowledgment on the wire
    #[error("malformed transfer data: {0}")]
    Malformed(String),

    /// Peer closed the connection before the declared size arrived
    #[error("transfer truncated: received {received} of {expected} bytes")]
    Truncated {
        /// Bytes actually received
        received: u64,
        /// Bytes declared in the header
        expected: u64,
    },

    /// Any other transport failure
    #[error("transfer failed: {0}")]
    Unknown(String),
}

/// Fieldless discriminant of [`TransferError`], for display and history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// See [`TransferError::NotFound`]
    NotFound,
    /// See [`TransferError::Unreachable`]
    Unreachable,
    /// See [`TransferError::Timeout`]
    Timeout,
    /// See [`TransferError::Interrupted`]
    Interrupted,
    /// See [`TransferError::Malformed`]
    Malformed,
    /// See [`TransferError::Truncated`]
    Truncated,
    /// See [`TransferError::Unknown`]
    Unknown,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::NotFound => "not found",
            Self::Unreachable => "unreachable",
            Self::Timeout => "timeout",
            Self::Interrupted => "interrupted",
            Self::Malformed => "malformed",
            Self::Truncated => "truncated",
            Self::Unknown => "unknown",
        };
        f.write_str(label)
    }
}

impl TransferError {
    /// Returns the fieldless kind of this failure.
    #[must_use]
    pub const fn kind(&self) -> FailureKind {
        match self {
            Self::NotFound(_) => FailureKind::NotFound,
            Self::Unreachable(_) => FailureKind::Unreachable,
            Self::Timeout { .. } => FailureKind::Timeout,
            Self::Interrupted { .. } => FailureKind::Interrupted,
            Self::Malformed(_) => FailureKind::Malformed,
            Self::Truncated { .. } => FailureKind::Truncated,
            Self::Unknown(_) => FailureKind::Unknown,
        }
    }

    /// Returns whether re-invoking the transfer may succeed.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Unreachable(_) | Self::Timeout { .. } | Self::Truncated { .. }
        )
    }

    /// Classify an I/O error raised while talking to `peer`.
    #[must_use]
    pub fn from_io(err: &io::Error, peer: SocketAddr, operation: &'static str, secs: u64) -> Self {
        match err.kind() {
            io::ErrorKind::ConnectionRefused => Self::Unreachable(peer),
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => Self::Timeout { operation, secs },
            _ => Self::Unknown(format!("{operation}: {err}")),
        }
    }
}

/// The main error type for LanShare.
#[derive(Error, Debug)]
pub enum Error {
    /// Unable to create or bind a socket
    #[error("unable to bind {addr}: {source}")]
    BindFailed {
        /// Address that was requested
        addr: SocketAddr,
        /// Underlying error
        #[source]
        source: io::Error,
    },

    /// Service is already running
    #[error("{0} is already running")]
    AlreadyRunning(&'static str),

    /// Invalid user input
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Configuration file error
    #[error("configuration error: {0}")]
    ConfigError(String),

    /// Invalid configuration value
    #[error("invalid configuration value for '{key}': {reason}")]
    InvalidConfig {
        /// Configuration key
        key: String,
        /// Reason for invalidity
        reason: String,
    },

    /// A transfer failed
    #[error(transparent)]
    Transfer(#[from] TransferError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),
}
