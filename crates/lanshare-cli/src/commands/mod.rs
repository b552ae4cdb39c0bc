//! CLI command definitions and handlers.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Load configuration with graceful fallback to defaults.
///
/// If the config file doesn't exist or can't be parsed, a warning is logged
/// and defaults are used.
pub fn load_config() -> lanshare_core::config::Config {
    lanshare_core::config::Config::load().unwrap_or_else(|e| {
        tracing::warn!("Using default configuration: {}", e);
        lanshare_core::config::Config::default()
    })
}

pub mod config;
pub mod peers;
pub mod receive;
pub mod send;

/// LanShare - find peers and send files on the local network
#[derive(Parser)]
#[command(name = "lanshare")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// The command to execute
    #[command(subcommand)]
    pub command: Command,
}

/// Available commands
#[derive(Subcommand)]
pub enum Command {
    /// Discover peers on the local network
    Peers(PeersArgs),

    /// Send one or more files to a peer
    Send(SendArgs),

    /// Receive files until interrupted
    Receive(ReceiveArgs),

    /// Manage configuration
    Config(ConfigArgs),
}

/// Arguments for the peers command
#[derive(Parser)]
pub struct PeersArgs {
    /// How long to listen for answers (e.g., 3s, 10s)
    #[arg(short, long, default_value = "3s")]
    pub timeout: String,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the send command
#[derive(Parser)]
pub struct SendArgs {
    /// Files to send, in order
    #[arg(required = true, num_args = 1..)]
    pub files: Vec<PathBuf>,

    /// Target: IP, IP:PORT, or the name of a discovered peer
    pub target: String,

    /// How long to search when the target is a peer name
    #[arg(short, long, default_value = "3s")]
    pub timeout: String,

    /// Minimal output
    #[arg(short, long)]
    pub quiet: bool,
}

/// Arguments for the receive command
#[derive(Parser)]
pub struct ReceiveArgs {
    /// Directory to store received files
    #[arg(short, long)]
    pub dir: Option<PathBuf>,

    /// Port to listen on
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Do not announce this node or answer discovery
    #[arg(long)]
    pub no_discovery: bool,
}

/// Arguments for the config command
#[derive(Parser)]
pub struct ConfigArgs {
    /// Config subcommand
    #[command(subcommand)]
    pub action: ConfigAction,
}

/// Config subcommands
#[derive(Subcommand)]
pub enum ConfigAction {
    /// Show the effective configuration
    Show,

    /// Print the configuration file path
    Path,

    /// Get a configuration value
    Get {
        /// Configuration key
        key: String,
    },

    /// Set a configuration value
    Set {
        /// Configuration key
        key: String,
        /// New value
        value: String,
    },

    /// Reset configuration to defaults
    Reset,
}
