//! # LanShare Core Library
//!
//! `lanshare-core` lets machines on the same local network find each other
//! and exchange files without a central server.
//!
//! ## Features
//!
//! - **Broadcast discovery**: a periodic UDP announce/listen cycle keeps a
//!   live roster of reachable peers
//! - **Framed transfers**: one file per TCP connection, length-prefixed JSON
//!   header followed by the raw payload and a two-byte acknowledgment
//! - **Progress and cancellation**: per-chunk progress callbacks and
//!   cooperative cancellation on the sending side
//!
//! ## Modules
//!
//! - [`config`] - Configuration management
//! - [`connection`] - Parsing of user-entered peer addresses
//! - [`discovery`] - Peer discovery via UDP broadcast and the peer registry
//! - [`mod@file`] - Destination naming for received files
//! - [`history`] - Bounded transfer history
//! - [`network`] - Local address detection
//! - [`protocol`] - Transfer header framing
//! - [`socket`] - Socket factory for discovery and transfer endpoints
//! - [`transfer`] - Sender and receiver
//!
//! ## Example
//!
//! ```rust,ignore
//! use lanshare_core::{config::Config, Node};
//!
//! let node = Node::new(Config::load()?)?;
//! node.start_receiver(None, None).await?;
//! node.start_discovery_background().await?;
//!
//! let peers = node.discover_now(Duration::from_secs(2)).await?;
//! node.send_file("report.pdf", peers[0].address, 50002, None, None).await?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::cast_precision_loss)]

pub mod config;
pub mod connection;
pub mod discovery;
pub mod error;
pub mod file;
pub mod history;
pub mod network;
mod node;
pub mod protocol;
pub mod socket;
pub mod transfer;

pub use error::{Error, FailureKind, Result, TransferError};
pub use node::Node;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default discovery port (UDP)
pub const DEFAULT_DISCOVERY_PORT: u16 = 50001;

/// Default transfer port (TCP)
pub const DEFAULT_TRANSFER_PORT: u16 = 50002;

/// Default chunk size for file transfers (1 MB)
pub const DEFAULT_CHUNK_SIZE: usize = 1024 * 1024;

/// Default cap on concurrently served inbound transfers
pub const DEFAULT_MAX_CONCURRENT_RECEIVES: usize = 16;
