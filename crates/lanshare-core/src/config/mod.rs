//! Configuration management for LanShare.
//!
//! This module handles loading, saving, and validating LanShare configuration.
//!
//! ## Configuration File Locations
//!
//! | Platform | Path |
//! |----------|------|
//! | Linux | `~/.config/lanshare/config.toml` |
//! | macOS | `~/Library/Application Support/LanShare/config.toml` |
//! | Windows | `%APPDATA%\LanShare\config.toml` |
//!
//! ## Example
//!
//! ```rust,ignore
//! use lanshare_core::config::Config;
//!
//! let config = Config::load()?;
//! println!("Device name: {}", config.general.device_name);
//! ```

use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Main configuration struct for LanShare.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General settings
    pub general: GeneralConfig,
    /// Network settings
    pub network: NetworkConfig,
    /// Discovery loop settings
    pub discovery: DiscoveryConfig,
    /// Transfer settings
    pub transfer: TransferConfig,
    /// History settings
    pub history: HistoryConfig,
}

/// General configuration options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Display name advertised to peers
    pub device_name: String,
    /// Directory received files are written to
    pub download_dir: PathBuf,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            device_name: crate::network::local_hostname(),
            download_dir: default_download_dir(),
        }
    }
}

fn default_download_dir() -> PathBuf {
    directories::UserDirs::new()
        .and_then(|dirs| dirs.download_dir().map(Path::to_path_buf))
        .unwrap_or_else(|| PathBuf::from("."))
        .join("LANFileShare")
}

/// Network configuration options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Discovery port (UDP)
    pub discovery_port: u16,
    /// Transfer listening port (TCP)
    pub transfer_port: u16,
    /// Address the discovery listener and transfer receiver bind to
    pub bind_address: IpAddr,
    /// Destination of discovery announcements
    pub broadcast_address: Ipv4Addr,
    /// Address advertised to peers instead of the detected one
    pub advertise_address: Option<IpAddr>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            discovery_port: crate::DEFAULT_DISCOVERY_PORT,
            transfer_port: crate::DEFAULT_TRANSFER_PORT,
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            broadcast_address: Ipv4Addr::BROADCAST,
            advertise_address: None,
        }
    }
}

/// Discovery loop configuration options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Period of the announce/listen cycle
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
    /// How long each cycle listens for datagrams
    #[serde(with = "humantime_serde")]
    pub listen_window: Duration,
    /// Peers not heard from for longer than this are pruned
    #[serde(with = "humantime_serde")]
    pub peer_expiry: Duration,
    /// How long stopping waits for the loop to exit
    #[serde(with = "humantime_serde")]
    pub stop_timeout: Duration,
    /// Ignore datagrams advertising our own address
    pub suppress_self: bool,
    /// Answer discovery announcements with our transfer port
    pub respond_to_discovery: bool,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            listen_window: Duration::from_secs(1),
            peer_expiry: Duration::from_secs(60),
            stop_timeout: Duration::from_secs(2),
            suppress_self: false,
            respond_to_discovery: true,
        }
    }
}

impl DiscoveryConfig {
    /// Listen window clamped so a cycle never exceeds its period.
    #[must_use]
    pub fn effective_listen_window(&self) -> Duration {
        self.listen_window.min(self.interval)
    }
}

/// Transfer configuration options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Chunk size for transfers
    pub chunk_size: usize,
    /// How long the sender waits for the receiver's acknowledgment
    #[serde(with = "humantime_serde")]
    pub ack_timeout: Duration,
    /// How long the sender waits for the connection to open
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
    /// How long the receiver waits for a connection's header
    #[serde(with = "humantime_serde")]
    pub header_timeout: Duration,
    /// Inbound transfers served at once (0 = unbounded)
    pub max_concurrent_receives: usize,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            chunk_size: crate::DEFAULT_CHUNK_SIZE,
            ack_timeout: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(10),
            header_timeout: Duration::from_secs(10),
            max_concurrent_receives: crate::DEFAULT_MAX_CONCURRENT_RECEIVES,
        }
    }
}

/// History configuration options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    /// Maximum number of entries kept
    pub max_entries: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self { max_entries: 50 }
    }
}

impl Config {
    /// Load configuration from the default location.
    ///
    /// If the configuration file doesn't exist, returns the default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration file exists but cannot be read or parsed.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path())
    }

    /// Load configuration from a specific file.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::ConfigError(format!("Failed to read config: {e}")))?;

        let config: Self = toml::from_str(&content)
            .map_err(|e| Error::ConfigError(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to the default location.
    ///
    /// Creates the configuration directory if it doesn't exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration cannot be written.
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path())
    }

    /// Save configuration to a specific file.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| Error::ConfigError(format!("Failed to create config directory: {e}")))?;
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| Error::ConfigError(format!("Failed to serialize config: {e}")))?;

        std::fs::write(path, content)
            .map_err(|e| Error::ConfigError(format!("Failed to write config: {e}")))
    }

    /// Check values that would make the services misbehave.
    pub fn validate(&self) -> Result<()> {
        if self.transfer.chunk_size == 0 {
            return Err(Error::InvalidConfig {
                key: "transfer.chunk_size".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.transfer.header_timeout.is_zero() {
            return Err(Error::InvalidConfig {
                key: "transfer.header_timeout".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.discovery.interval.is_zero() {
            return Err(Error::InvalidConfig {
                key: "discovery.interval".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }

    /// Get the default configuration directory path.
    #[must_use]
    pub fn config_dir() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "lanshare", "LanShare")
            .map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Get the full path to the configuration file.
    #[must_use]
    pub fn config_path() -> PathBuf {
        Self::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("config.toml")
    }
}

mod humantime_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if duration.subsec_millis() == 0 {
            serializer.serialize_str(&format!("{}s", duration.as_secs()))
        } else {
            serializer.serialize_str(&format!("{}ms", duration.as_millis()))
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.strip_suffix("ms")
            .map(|millis| {
                millis
                    .parse()
                    .map(Duration::from_millis)
                    .map_err(serde::de::Error::custom)
            })
            .or_else(|| {
                s.strip_suffix('s').map(|secs| {
                    secs.parse()
                        .map(Duration::from_secs)
                        .map_err(serde::de::Error::custom)
                })
            })
            .or_else(|| {
                s.strip_suffix('m').map(|mins| {
                    mins.parse::<u64>()
                        .map(|m| Duration::from_secs(m * 60))
                        .map_err(serde::de::Error::custom)
                })
            })
            .unwrap_or_else(|| Err(serde::de::Error::custom("invalid duration format")))
    }
}
