//! File transfer engine for LanShare.
//!
//! One TCP connection carries one file, framed as described in
//! [`crate::protocol`]:
//!
//! - [`receiver::Receiver`] accepts connections and writes each file into the
//!   download directory, one task per connection
//! - [`sender::FileSender`] streams a single local file to a peer, reporting
//!   progress and honouring cancellation between chunks
//!
//! Batch sends are a sequence of single-file connections; see
//! [`crate::Node::send_files`].
//!
//! ## Transfer Protocol
//!
//! - Default chunk size: 1MB
//! - Default transfer port: 50002
//! - Acknowledgment: two bytes `"OK"`, awaited for at most 10 seconds

pub mod receiver;
pub mod sender;

pub use receiver::{ReceiveStatus, ReceivedFile, Receiver};
pub use sender::{BatchItem, FileSender, SendReport};
pub use tokio_util::sync::CancellationToken;

use std::time::{Duration, Instant};

/// Progress sink invoked with `(bytes_done, bytes_total)` after each chunk.
///
/// Runs inline with the transfer loop, so it must return quickly.
pub type ProgressFn = dyn Fn(u64, u64) + Send + Sync;

/// Progress sink for batch sends, invoked with
/// `(file_index, file_count, bytes_done, bytes_total)`. `file_index` is
/// 1-based.
pub type BatchProgressFn = dyn Fn(usize, usize, u64, u64) + Send + Sync;

/// State of one in-flight send or receive.
///
/// Owned by the task driving a single connection; never shared.
#[derive(Debug, Clone)]
pub struct TransferSession {
    /// Bytes moved so far
    pub bytes_transferred: u64,
    /// Declared total
    pub total_bytes: u64,
    /// When the session started
    pub started_at: Instant,
}

impl TransferSession {
    /// Start tracking a transfer of `total_bytes`.
    #[must_use]
    pub fn new(total_bytes: u64) -> Self {
        Self {
            bytes_transferred: 0,
            total_bytes,
            started_at: Instant::now(),
        }
    }

    /// Record `n` more bytes.
    pub fn advance(&mut self, n: u64) {
        self.bytes_transferred += n;
    }

    /// Bytes still to move.
    #[must_use]
    pub const fn remaining(&self) -> u64 {
        self.total_bytes.saturating_sub(self.bytes_transferred)
    }

    /// Whether the declared total has been reached.
    #[must_use]
    pub const fn is_complete(&self) -> bool {
        self.bytes_transferred >= self.total_bytes
    }

    /// Time since the session started.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Get progress as a percentage (0.0 - 100.0).
    #[must_use]
    pub fn percentage(&self) -> f64 {
        if self.total_bytes == 0 {
            100.0
        } else {
            (self.bytes_transferred as f64 / self.total_bytes as f64) * 100.0
        }
    }

    /// Average speed in bytes per second.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn speed_bps(&self) -> u64 {
        let secs = self.elapsed().as_secs_f64();
        if secs > 0.0 {
            (self.bytes_transferred as f64 / secs) as u64
        } else {
            0
        }
    }
}
