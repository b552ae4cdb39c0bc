//! Transfer history tracking for LanShare.
//!
//! An in-memory log of finished transfers, sent and received.
//!
//! ## Features
//!
//! - Records every finished transfer with its outcome
//! - Respects `max_entries` from configuration, evicting the oldest first
//! - Entries are kept newest-last

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::HistoryConfig;
use crate::error::{FailureKind, TransferError};

/// Direction of a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferDirection {
    /// File was sent to a peer
    Sent,
    /// File was received from a peer
    Received,
}

impl std::fmt::Display for TransferDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sent => write!(f, "Sent"),
            Self::Received => write!(f, "Received"),
        }
    }
}

/// Final state of a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferState {
    /// Transfer completed successfully
    Completed,
    /// Transfer failed
    Failed(FailureKind),
    /// Transfer was cancelled locally
    Cancelled,
}

impl TransferState {
    /// State recorded for a transfer outcome.
    #[must_use]
    pub fn from_outcome<T>(outcome: &Result<T, TransferError>) -> Self {
        match outcome {
            Ok(_) => Self::Completed,
            Err(TransferError::Interrupted { .. }) => Self::Cancelled,
            Err(e) => Self::Failed(e.kind()),
        }
    }
}

impl std::fmt::Display for TransferState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Completed => write!(f, "Completed"),
            Self::Failed(kind) => write!(f, "Failed ({kind})"),
            Self::Cancelled => write!(f, "Cancelled"),
        }
    }
}

/// A single transfer history entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferHistoryEntry {
    /// Unique identifier for this transfer
    pub id: Uuid,
    /// When the transfer finished
    pub timestamp: DateTime<Utc>,
    /// Direction of the transfer
    pub direction: TransferDirection,
    /// File name as sent or stored
    pub file_name: String,
    /// Remote endpoint
    pub peer: SocketAddr,
    /// Declared file size in bytes
    pub total_bytes: u64,
    /// Bytes actually moved
    pub bytes_transferred: u64,
    /// Final state of the transfer
    pub state: TransferState,
    /// Duration of the transfer in milliseconds
    pub duration_ms: u64,
    /// Error message (if failed)
    pub error_message: Option<String>,
}

impl TransferHistoryEntry {
    /// Create a completed entry stamped now.
    #[must_use]
    pub fn new(direction: TransferDirection, file_name: String, peer: SocketAddr) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            direction,
            file_name,
            peer,
            total_bytes: 0,
            bytes_transferred: 0,
            state: TransferState::Completed,
            duration_ms: 0,
            error_message: None,
        }
    }

    /// Set transfer statistics.
    #[must_use]
    pub fn with_stats(mut self, bytes_transferred: u64, total_bytes: u64, elapsed: Duration) -> Self {
        self.bytes_transferred = bytes_transferred;
        self.total_bytes = total_bytes;
        self.duration_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Record a failure.
    #[must_use]
    pub fn with_error(mut self, error: &TransferError) -> Self {
        self.state = TransferState::from_outcome::<()>(&Err(error.clone()));
        self.error_message = Some(error.to_string());
        self
    }

    /// Transfer speed in bytes per second, if measurable.
    #[must_use]
    pub fn speed_bps(&self) -> Option<u64> {
        (self.duration_ms > 0).then(|| self.bytes_transferred * 1000 / self.duration_ms)
    }

    /// Get the timestamp as a human-readable string.
    #[must_use]
    pub fn formatted_timestamp(&self) -> String {
        self.timestamp.format("%Y-%m-%d %H:%M").to_string()
    }
}

/// Bounded in-memory transfer log.
#[derive(Debug)]
pub struct TransferHistory {
    entries: Mutex<VecDeque<TransferHistoryEntry>>,
    max_entries: usize,
}

impl Default for TransferHistory {
    fn default() -> Self {
        Self::new(&HistoryConfig::default())
    }
}

impl TransferHistory {
    /// Create an empty history.
    #[must_use]
    pub fn new(config: &HistoryConfig) -> Self {
        Self {
            entries: Mutex::new(VecDeque::with_capacity(config.max_entries)),
            max_entries: config.max_entries,
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<TransferHistoryEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append an entry, evicting the oldest ones beyond the limit.
    pub fn add(&self, entry: TransferHistoryEntry) {
        if self.max_entries == 0 {
            return;
        }

        let mut entries = self.lock();
        entries.push_back(entry);
        while entries.len() > self.max_entries {
            entries.pop_front();
        }
    }

    /// Copy of all entries, oldest first.
    #[must_use]
    pub fn list(&self) -> Vec<TransferHistoryEntry> {
        self.lock().iter().cloned().collect()
    }

    /// The `n` most recent entries, newest first.
    #[must_use]
    pub fn recent(&self, n: usize) -> Vec<TransferHistoryEntry> {
        self.lock().iter().rev().take(n).cloned().collect()
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether the history is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Remove every entry.
    pub fn clear(&self) {
        self.lock().clear();
    }
}
