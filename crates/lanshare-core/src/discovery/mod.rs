//! Network discovery for LanShare.
//!
//! Peers find each other with a periodic UDP broadcast cycle:
//!
//! 1. Broadcast a `discovery` announcement on the discovery port
//! 2. Listen for incoming datagrams for a bounded window
//! 3. Upsert every well-formed sender into the [`PeerRegistry`], answering
//!    announcements from other hosts with a broadcast `response` carrying
//!    our transfer port
//! 4. Prune stale peers, sleep out the rest of the period, repeat
//!
//! ## Protocol
//!
//! - Discovery port: 50001 (UDP)
//! - Cycle period: 5 seconds, listen window: 1 second
//! - Peer expiry: 60 seconds without a sighting
//!
//! Datagrams may be lost, duplicated or reordered; the registry is keyed by
//! address and only ever moves `last_seen` forward, so all three are harmless.
//! Malformed datagrams are dropped without touching the registry.

mod message;
mod registry;

pub use message::{DiscoveryMessage, MAX_DATAGRAM_SIZE};
pub use registry::{Peer, PeerRegistry};

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::net::UdpSocket;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;

use crate::config::{Config, DiscoveryConfig};
use crate::error::{Error, Result};
use crate::socket;

/// How this node presents itself to peers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalIdentity {
    /// Advertised host label
    pub hostname: String,
    /// Advertised address, also used to recognise our own datagrams
    pub address: IpAddr,
    /// Port our transfer receiver listens on
    pub listen_port: u16,
}

impl LocalIdentity {
    /// Build the identity described by a configuration.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            hostname: config.general.device_name.clone(),
            address: config
                .network
                .advertise_address
                .unwrap_or_else(crate::network::local_ip),
            listen_port: config.network.transfer_port,
        }
    }
}

/// State shared between the service handle and its background task.
#[derive(Debug)]
struct Shared {
    registry: Arc<PeerRegistry>,
    identity: LocalIdentity,
    settings: DiscoveryConfig,
    bind_address: IpAddr,
    broadcast_address: Ipv4Addr,
    port: u16,
}

/// Sockets owned by one discovery pass.
struct Endpoints {
    sender: UdpSocket,
    listener: UdpSocket,
}

impl Shared {
    fn open_endpoints(&self) -> Result<Endpoints> {
        Ok(Endpoints {
            sender: socket::broadcast_socket()?,
            listener: socket::discovery_listener(self.bind_address, self.port)?,
        })
    }

    async fn announce(&self, sender: &UdpSocket) -> Result<()> {
        let payload =
            DiscoveryMessage::discovery(&self.identity.hostname, self.identity.address).encode()?;
        let target = SocketAddr::new(IpAddr::V4(self.broadcast_address), self.port);
        sender.send_to(&payload, target).await?;
        tracing::debug!("Sent discovery announcement to {}", target);
        Ok(())
    }

    /// Receive and process datagrams until `window` elapses.
    ///
    /// Returns the number of datagrams that updated the registry.
    async fn collect(&self, endpoints: &Endpoints, window: Duration) -> usize {
        let deadline = Instant::now() + window;
        let mut buf = [0u8; MAX_DATAGRAM_SIZE];
        let mut accepted = 0;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }

            match tokio::time::timeout(remaining, endpoints.listener.recv_from(&mut buf)).await {
                Ok(Ok((len, source))) => {
                    if self
                        .handle_datagram(&buf[..len], source, Some(&endpoints.sender))
                        .await
                        .is_some()
                    {
                        accepted += 1;
                    }
                }
                Ok(Err(e)) => {
                    tracing::warn!("Error receiving discovery datagram: {}", e);
                }
                Err(_) => break,
            }
        }

        accepted
    }

    /// Apply one datagram to the registry.
    ///
    /// Returns the address that was upserted, or `None` if the datagram was
    /// dropped.
    async fn handle_datagram(
        &self,
        bytes: &[u8],
        source: SocketAddr,
        responder: Option<&UdpSocket>,
    ) -> Option<IpAddr> {
        let Some(message) = DiscoveryMessage::decode(bytes) else {
            tracing::debug!("Dropping malformed discovery datagram from {}", source);
            return None;
        };

        let address = message.sender_address(source);
        let from_self = address == self.identity.address;
        if from_self && self.settings.suppress_self {
            return None;
        }

        self.registry
            .upsert(address, message.hostname(), message.listen_port());

        if message.is_discovery() && self.settings.respond_to_discovery && !from_self {
            if let Some(responder) = responder {
                self.respond(responder, address).await;
            }
        }

        Some(address)
    }

    /// Answer `peer`'s announcement.
    ///
    /// The response is broadcast rather than sent to `peer`: every listener
    /// sharing the discovery port must see it, and unicast datagrams reach
    /// only one of them.
    async fn respond(&self, responder: &UdpSocket, peer: IpAddr) {
        let response = DiscoveryMessage::response(
            &self.identity.hostname,
            self.identity.address,
            self.identity.listen_port,
        );
        let target = SocketAddr::new(IpAddr::V4(self.broadcast_address), self.port);
        match response.encode() {
            Ok(payload) => match responder.send_to(&payload, target).await {
                Ok(_) => tracing::debug!("Answered discovery from {} via {}", peer, target),
                Err(e) => {
                    tracing::warn!("Failed to send discovery response for {}: {}", peer, e);
                }
            },
            Err(e) => tracing::error!("Failed to encode discovery response: {}", e),
        }
    }

    /// One announce/listen/prune pass of the background loop.
    async fn run_cycle(&self, endpoints: &mut Option<Endpoints>) {
        if endpoints.is_none() {
            match self.open_endpoints() {
                Ok(opened) => *endpoints = Some(opened),
                Err(e) => {
                    tracing::warn!("Failed to open discovery sockets: {}", e);
                    return;
                }
            }
        }
        let Some(active) = endpoints.as_ref() else {
            return;
        };

        if let Err(e) = self.announce(&active.sender).await {
            tracing::warn!("Failed to send discovery broadcast: {}", e);
        }

        let accepted = self
            .collect(active, self.settings.effective_listen_window())
            .await;
        let pruned = self.registry.prune();
        tracing::debug!(
            "Discovery cycle: {} datagrams accepted, {} peers pruned",
            accepted,
            pruned
        );
    }
}

/// Discovery service: background loop plus on-demand scans.
#[derive(Debug)]
pub struct DiscoveryService {
    shared: Arc<Shared>,
    /// Shutdown signal sender
    shutdown_tx: broadcast::Sender<()>,
    /// Handle of the background loop, if started
    task: Mutex<Option<JoinHandle<()>>>,
}

impl DiscoveryService {
    /// Create a discovery service that records into `registry`.
    #[must_use]
    pub fn new(config: &Config, registry: Arc<PeerRegistry>) -> Self {
        Self::with_identity(config, registry, LocalIdentity::from_config(config))
    }

    /// Create a discovery service with an explicit identity.
    #[must_use]
    pub fn with_identity(
        config: &Config,
        registry: Arc<PeerRegistry>,
        identity: LocalIdentity,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            shared: Arc::new(Shared {
                registry,
                identity,
                settings: config.discovery.clone(),
                bind_address: config.network.bind_address,
                broadcast_address: config.network.broadcast_address,
                port: config.network.discovery_port,
            }),
            shutdown_tx,
            task: Mutex::new(None),
        }
    }

    /// The registry this service records into.
    #[must_use]
    pub fn registry(&self) -> &Arc<PeerRegistry> {
        &self.shared.registry
    }

    /// How this node presents itself.
    #[must_use]
    pub fn identity(&self) -> &LocalIdentity {
        &self.shared.identity
    }

    /// Start the periodic announce/listen loop.
    ///
    /// Returns immediately; the loop runs on a spawned task until
    /// [`stop_background`](Self::stop_background) is called. Socket or send
    /// failures inside a cycle are logged and the loop moves on to the next
    /// cycle.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AlreadyRunning`] if the loop is already active.
    pub async fn start_background(&self) -> Result<()> {
        let mut task = self.task.lock().await;
        if task.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return Err(Error::AlreadyRunning("discovery loop"));
        }

        let shared = Arc::clone(&self.shared);
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        *task = Some(tokio::spawn(async move {
            let interval = shared.settings.interval;
            let mut endpoints: Option<Endpoints> = None;

            tracing::info!(
                "Discovery loop started on port {} (every {:?})",
                shared.port,
                interval
            );

            loop {
                let cycle_start = Instant::now();

                tokio::select! {
                    () = shared.run_cycle(&mut endpoints) => {}
                    _ = shutdown_rx.recv() => break,
                }

                let pause = interval.saturating_sub(cycle_start.elapsed());
                tokio::select! {
                    () = tokio::time::sleep(pause) => {}
                    _ = shutdown_rx.recv() => break,
                }
            }

            tracing::debug!("Discovery loop received shutdown signal");
        }));

        Ok(())
    }

    /// Stop the background loop.
    ///
    /// Waits up to the configured stop timeout for the loop to exit, then
    /// aborts it. The loop's sockets are released either way.
    pub async fn stop_background(&self) {
        let Some(mut handle) = self.task.lock().await.take() else {
            return;
        };

        let _ = self.shutdown_tx.send(());

        let stop_timeout = self.shared.settings.stop_timeout;
        if tokio::time::timeout(stop_timeout, &mut handle).await.is_err() {
            tracing::warn!("Discovery loop did not stop within {:?}, aborting", stop_timeout);
            handle.abort();
        }
    }

    /// Check if the background loop is running.
    pub async fn is_running(&self) -> bool {
        self.task
            .lock()
            .await
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Broadcast once, collect datagrams for `timeout`, and return all known peers.
    ///
    /// Independent of the background loop: this call opens its own sockets,
    /// and both may run at the same time.
    ///
    /// # Errors
    ///
    /// Returns an error if the sockets cannot be created. A failed send is
    /// only logged.
    pub async fn discover_now(&self, timeout: Duration) -> Result<Vec<Peer>> {
        let endpoints = self.shared.open_endpoints()?;

        if let Err(e) = self.shared.announce(&endpoints.sender).await {
            tracing::warn!("Failed to send discovery broadcast: {}", e);
        }

        let accepted = self.shared.collect(&endpoints, timeout).await;
        tracing::debug!("On-demand discovery accepted {} datagrams", accepted);

        Ok(self.shared.registry.snapshot())
    }

    /// Prune stale entries and return a snapshot of known peers.
    #[must_use]
    pub fn list_known_peers(&self) -> Vec<Peer> {
        self.shared.registry.snapshot()
    }
}

impl Drop for DiscoveryService {
    fn drop(&mut self) {
        if let Ok(mut task) = self.task.try_lock() {
            if let Some(handle) = task.take() {
                handle.abort();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local_config(port: u16) -> Config {
        let mut config = Config::default();
        config.network.discovery_port = port;
        config.network.bind_address = IpAddr::V4(Ipv4Addr::LOCALHOST);
        config.network.broadcast_address = Ipv4Addr::LOCALHOST;
        config.network.advertise_address = Some(IpAddr::V4(Ipv4Addr::LOCALHOST));
        config.general.device_name = "self".to_string();
        config.discovery.interval = Duration::from_millis(200);
        config.discovery.listen_window = Duration::from_millis(100);
        config
    }

    fn service(config: &Config) -> DiscoveryService {
        DiscoveryService::new(config, Arc::new(PeerRegistry::default()))
    }

    fn source() -> SocketAddr {
        "10.0.0.99:40000".parse().unwrap()
    }

    #[tokio::test]
    async fn test_discovery_datagram_creates_peer_without_port() {
        let service = service(&local_config(0));
        let raw = br#"{"type":"discovery","hostname":"A","ip":"10.0.0.5","timestamp":"2024-05-01T10:00:00"}"#;

        let updated = service.shared.handle_datagram(raw, source(), None).await;
        assert_eq!(updated, Some("10.0.0.5".parse().unwrap()));

        let peers = service.list_known_peers();
        assert_eq!(peers.len(), 1);
        assert_eq!(peers[0].address, "10.0.0.5".parse::<IpAddr>().unwrap());
        assert_eq!(peers[0].display_name, "A");
        assert_eq!(peers[0].listen_port, None);
    }

    #[tokio::test]
    async fn test_response_datagram_records_port() {
        let service = service(&local_config(0));
        let raw = br#"{"type":"response","hostname":"B","ip":"10.0.0.7","timestamp":"t","listen_port":50010}"#;

        service.shared.handle_datagram(raw, source(), None).await;

        let peer = service.registry().get(&"10.0.0.7".parse().unwrap()).unwrap();
        assert_eq!(peer.listen_port, Some(50010));
    }

    #[tokio::test]
    async fn test_announcement_answered_on_broadcast_address() {
        let listener = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let mut config = local_config(port);
        config.network.transfer_port = 50002;
        let service = service(&config);
        let responder = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
        let raw = br#"{"type":"discovery","hostname":"A","ip":"10.0.0.5","timestamp":"t"}"#;

        service
            .shared
            .handle_datagram(raw, source(), Some(&responder))
            .await;

        let mut buf = [0u8; MAX_DATAGRAM_SIZE];
        let (len, _) = tokio::time::timeout(Duration::from_secs(2), listener.recv_from(&mut buf))
            .await
            .expect("response in time")
            .unwrap();
        let response = DiscoveryMessage::decode(&buf[..len]).expect("well-formed response");
        assert!(!response.is_discovery());
        assert_eq!(response.hostname(), "self");
        assert_eq!(response.listen_port(), Some(50002));
    }

    #[tokio::test]
    async fn test_malformed_datagrams_ignored() {
        let service = service(&local_config(0));

        for raw in [
            &b"garbage"[..],
            br#"{"hostname":"A","ip":"10.0.0.5"}"#,
            br#"{"type":"unknown","hostname":"A"}"#,
        ] {
            assert!(service.shared.handle_datagram(raw, source(), None).await.is_none());
        }

        assert!(service.list_known_peers().is_empty());
    }

    #[tokio::test]
    async fn test_self_sightings_kept_by_default() {
        let config = local_config(0);
        let service = service(&config);
        let own = DiscoveryMessage::discovery("self", IpAddr::V4(Ipv4Addr::LOCALHOST))
            .encode()
            .unwrap();

        service.shared.handle_datagram(&own, source(), None).await;
        assert_eq!(service.list_known_peers().len(), 1);
    }

    #[tokio::test]
    async fn test_self_sightings_suppressed_when_configured() {
        let mut config = local_config(0);
        config.discovery.suppress_self = true;
        let service = service(&config);
        let own = DiscoveryMessage::discovery("self", IpAddr::V4(Ipv4Addr::LOCALHOST))
            .encode()
            .unwrap();

        assert!(service.shared.handle_datagram(&own, source(), None).await.is_none());
        assert!(service.list_known_peers().is_empty());
    }

    #[tokio::test]
    async fn test_start_stop_background() {
        let service = service(&local_config(0));

        service.start_background().await.expect("start");
        assert!(service.is_running().await);
        assert!(matches!(
            service.start_background().await,
            Err(Error::AlreadyRunning(_))
        ));

        service.stop_background().await;
        assert!(!service.is_running().await);
    }

    #[tokio::test]
    async fn test_stop_without_start_is_noop() {
        let service = service(&local_config(0));
        service.stop_background().await;
        assert!(!service.is_running().await);
    }
}
