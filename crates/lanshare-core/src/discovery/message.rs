//! Discovery datagram format.
//!
//! Each datagram is a single UTF-8 JSON object:
//!
//! ```json
//! {"type": "discovery", "hostname": "A", "ip": "10.0.0.5", "timestamp": "2024-05-01T10:00:00.000000"}
//! {"type": "response", "hostname": "B", "ip": "10.0.0.7", "timestamp": "...", "listen_port": 50002}
//! ```
//!
//! Unknown fields are ignored. A datagram without a recognised `type`, or one
//! that is not valid JSON, decodes to `None` and is dropped by the caller.

use std::net::{IpAddr, SocketAddr};

use serde::{Deserialize, Serialize};

/// Maximum datagram size accepted by the listener.
pub const MAX_DATAGRAM_SIZE: usize = 4096;

/// A discovery wire record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum DiscoveryMessage {
    /// Presence announcement
    Discovery {
        /// Sender's advertised host label
        #[serde(default = "unknown_hostname")]
        hostname: String,
        /// Sender's advertised address
        #[serde(default)]
        ip: Option<String>,
        /// ISO-8601 send time
        #[serde(default)]
        timestamp: String,
    },
    /// Answer to an announcement, carrying the transfer port
    Response {
        /// Sender's advertised host label
        #[serde(default = "unknown_hostname")]
        hostname: String,
        /// Sender's advertised address
        #[serde(default)]
        ip: Option<String>,
        /// ISO-8601 send time
        #[serde(default)]
        timestamp: String,
        /// Port the sender accepts transfers on
        #[serde(default = "default_listen_port")]
        listen_port: u16,
    },
}

fn unknown_hostname() -> String {
    "Unknown".to_string()
}

const fn default_listen_port() -> u16 {
    crate::DEFAULT_TRANSFER_PORT
}

fn now_timestamp() -> String {
    chrono::Local::now()
        .naive_local()
        .format("%Y-%m-%dT%H:%M:%S%.6f")
        .to_string()
}

impl DiscoveryMessage {
    /// Build a presence announcement stamped with the current time.
    #[must_use]
    pub fn discovery(hostname: &str, ip: IpAddr) -> Self {
        Self::Discovery {
            hostname: hostname.to_string(),
            ip: Some(ip.to_string()),
            timestamp: now_timestamp(),
        }
    }

    /// Build a response stamped with the current time.
    #[must_use]
    pub fn response(hostname: &str, ip: IpAddr, listen_port: u16) -> Self {
        Self::Response {
            hostname: hostname.to_string(),
            ip: Some(ip.to_string()),
            timestamp: now_timestamp(),
            listen_port,
        }
    }

    /// Decode a datagram, returning `None` for anything malformed.
    #[must_use]
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        serde_json::from_slice(bytes).ok()
    }

    /// Encode to JSON bytes.
    pub fn encode(&self) -> crate::Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| crate::Error::Serialization(e.to_string()))
    }

    /// Advertised host label.
    #[must_use]
    pub fn hostname(&self) -> &str {
        match self {
            Self::Discovery { hostname, .. } | Self::Response { hostname, .. } => hostname,
        }
    }

    /// Transfer port, present on responses only.
    #[must_use]
    pub const fn listen_port(&self) -> Option<u16> {
        match self {
            Self::Discovery { .. } => None,
            Self::Response { listen_port, .. } => Some(*listen_port),
        }
    }

    /// Whether this is an announcement that expects a response.
    #[must_use]
    pub const fn is_discovery(&self) -> bool {
        matches!(self, Self::Discovery { .. })
    }

    /// Address identifying the sender.
    ///
    /// The advertised `ip` wins; the datagram's source address is used when
    /// the field is missing or unparsable.
    #[must_use]
    pub fn sender_address(&self, source: SocketAddr) -> IpAddr {
        let ip = match self {
            Self::Discovery { ip, .. } | Self::Response { ip, .. } => ip.as_deref(),
        };
        ip.and_then(|s| s.parse().ok()).unwrap_or_else(|| source.ip())
    }
}
