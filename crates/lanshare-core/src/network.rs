//! Local address detection.
//!
//! Only a single best-guess address is produced: the source address the OS
//! would pick for outbound traffic. No packet is sent; connecting a UDP
//! socket merely selects a route.

use std::net::{IpAddr, Ipv4Addr, UdpSocket};

/// Best-guess local IPv4 address, falling back to loopback.
#[must_use]
pub fn local_ip() -> IpAddr {
    guess_local_ip().unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST))
}

fn guess_local_ip() -> Option<IpAddr> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).ok()?;
    socket.connect("8.8.8.8:80").ok()?;
    let addr = socket.local_addr().ok()?;
    if addr.ip().is_unspecified() {
        return None;
    }
    Some(addr.ip())
}

/// Local hostname, used as the default display name.
#[must_use]
pub fn local_hostname() -> String {
    hostname::get().map_or_else(
        |_| "LanShare Device".to_string(),
        |h| h.to_string_lossy().to_string(),
    )
}
