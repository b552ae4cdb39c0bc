//! Parsing of user-entered transfer targets.
//!
//! Discovery only works inside one broadcast domain; a peer on another
//! segment can still be reached by typing its address.

use std::net::{IpAddr, SocketAddr};

use crate::error::{Error, Result};
use crate::DEFAULT_TRANSFER_PORT;

fn invalid_host(host: &str) -> Error {
    Error::InvalidInput(format!(
        "Invalid host format '{host}'. Use IP or IP:PORT (e.g., 192.168.1.100 or 192.168.1.100:{DEFAULT_TRANSFER_PORT})"
    ))
}

/// Parse a target address, defaulting the port to 50002.
///
/// Accepts formats:
/// - `IP` (e.g., `192.168.1.100`)
/// - `IP:PORT` (e.g., `192.168.1.100:6000`)
/// - `[IPv6]` and `[IPv6]:PORT`
///
/// # Examples
///
/// ```
/// use lanshare_core::connection::parse_host_address;
///
/// let addr = parse_host_address("192.168.1.100").unwrap();
/// assert_eq!(addr.port(), 50002);
///
/// let addr = parse_host_address("192.168.1.100:6000").unwrap();
/// assert_eq!(addr.port(), 6000);
/// ```
pub fn parse_host_address(host: &str) -> Result<SocketAddr> {
    parse_host_address_with_port(host, DEFAULT_TRANSFER_PORT)
}

/// Parse a target address, using `default_port` when none is given.
pub fn parse_host_address_with_port(host: &str, default_port: u16) -> Result<SocketAddr> {
    let host = host.trim();

    if let Ok(addr) = host.parse::<SocketAddr>() {
        return Ok(addr);
    }

    if let Some(inner) = host.strip_prefix('[').and_then(|h| h.strip_suffix(']')) {
        let ip: IpAddr = inner.parse().map_err(|_| invalid_host(host))?;
        return Ok(SocketAddr::new(ip, default_port));
    }

    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(SocketAddr::new(ip, default_port));
    }

    match host.rsplit_once(':') {
        Some((ip_part, port_part)) if !ip_part.contains(':') => {
            let ip: IpAddr = ip_part.parse().map_err(|_| invalid_host(host))?;
            let port: u16 = port_part.parse().map_err(|_| {
                Error::InvalidInput(format!(
                    "Invalid port '{port_part}'. Port must be a number between 1 and 65535"
                ))
            })?;
            Ok(SocketAddr::new(ip, port))
        }
        _ => Err(invalid_host(host)),
    }
}
