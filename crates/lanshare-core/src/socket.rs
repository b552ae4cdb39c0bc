//! Socket factory.
//!
//! Every endpoint the discovery and transfer layers use is created here, so
//! socket options live in one place:
//!
//! - broadcast sender: ephemeral port, `SO_BROADCAST`
//! - discovery listener: fixed port, address/port reuse so the background
//!   loop and an on-demand scan can both bind it
//! - stream server: `SO_REUSEADDR` listening socket; accepted streams get
//!   the same keep-alive as clients
//! - stream client: connect with a bound, TCP keep-alive enabled
//!
//! All constructors must be called from within a Tokio runtime.

use std::net::{IpAddr, Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Duration;

use socket2::{Domain, Protocol, SockRef, Socket, TcpKeepalive, Type};
use tokio::net::{TcpListener, TcpStream, UdpSocket};

use crate::error::{Error, Result, TransferError};

/// Pending connection backlog for the stream server.
const LISTEN_BACKLOG: i32 = 128;

fn bind_error(addr: SocketAddr) -> impl FnOnce(std::io::Error) -> Error {
    move |source| Error::BindFailed { addr, source }
}

/// Create a UDP socket for sending broadcast datagrams.
pub fn broadcast_socket() -> Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;

    socket.set_broadcast(true)?;
    socket.set_reuse_address(true)?;

    let addr = SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0));
    socket.bind(&addr.into()).map_err(bind_error(addr))?;
    socket.set_nonblocking(true)?;

    let std_socket: std::net::UdpSocket = socket.into();
    Ok(UdpSocket::from_std(std_socket)?)
}

/// Create a UDP socket listening for discovery datagrams on `port`.
pub fn discovery_listener(bind_address: IpAddr, port: u16) -> Result<UdpSocket> {
    let addr = SocketAddr::new(bind_address, port);
    let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP))?;

    socket.set_reuse_address(true)?;

    #[cfg(unix)]
    socket.set_reuse_port(true)?;

    if addr.is_ipv4() {
        socket.set_broadcast(true)?;
    }

    socket.bind(&addr.into()).map_err(bind_error(addr))?;
    socket.set_nonblocking(true)?;

    let std_socket: std::net::UdpSocket = socket.into();
    Ok(UdpSocket::from_std(std_socket)?)
}

/// Create a listening TCP socket for inbound transfers.
pub fn stream_server(bind_address: IpAddr, port: u16) -> Result<TcpListener> {
    let addr = SocketAddr::new(bind_address, port);
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;

    socket.set_reuse_address(true)?;
    socket.bind(&addr.into()).map_err(bind_error(addr))?;
    socket.listen(LISTEN_BACKLOG).map_err(bind_error(addr))?;
    socket.set_nonblocking(true)?;

    let std_listener: std::net::TcpListener = socket.into();
    Ok(TcpListener::from_std(std_listener)?)
}

/// Open an outbound TCP connection for a transfer.
///
/// Refused connections map to [`TransferError::Unreachable`] and an elapsed
/// bound to [`TransferError::Timeout`].
pub async fn stream_client(
    addr: SocketAddr,
    connect_timeout: Duration,
) -> std::result::Result<TcpStream, TransferError> {
    let secs = connect_timeout.as_secs();
    let stream = tokio::time::timeout(connect_timeout, TcpStream::connect(addr))
        .await
        .map_err(|_| TransferError::Timeout {
            operation: "connect",
            secs,
        })?
        .map_err(|e| TransferError::from_io(&e, addr, "connect", secs))?;

    stream.set_nodelay(true).ok();
    if let Err(e) = configure_tcp_keepalive(&stream) {
        tracing::debug!("Failed to enable TCP keep-alive: {}", e);
    }

    Ok(stream)
}

/// Configure TCP keep-alive on a socket.
///
/// Probing starts after 10 seconds of idle time and repeats every 5 seconds,
/// so a silently vanished peer eventually surfaces as a read/write error.
pub(crate) fn configure_tcp_keepalive(stream: &TcpStream) -> std::io::Result<()> {
    let keepalive = TcpKeepalive::new()
        .with_time(Duration::from_secs(10))
        .with_interval(Duration::from_secs(5));

    SockRef::from(stream).set_tcp_keepalive(&keepalive)
}
