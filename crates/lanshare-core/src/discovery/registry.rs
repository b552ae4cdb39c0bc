//! In-memory table of known peers.
//!
//! Entries are keyed by address, refreshed in place on every sighting, and
//! pruned once they have been silent for longer than the expiry window.
//! Every read prunes first and hands out an owned snapshot.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};

/// A discovered machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Peer {
    /// Network address, unique in the registry
    pub address: IpAddr,
    /// Advertised host label
    pub display_name: String,
    /// Port the peer accepts transfers on, if it has told us
    pub listen_port: Option<u16>,
    /// Monotonic time of the most recent sighting
    pub last_seen: Instant,
    /// Wall-clock time of the most recent sighting
    pub last_seen_at: DateTime<Utc>,
}

impl Peer {
    /// Transfer address, if the peer advertised its listening port.
    #[must_use]
    pub fn transfer_addr(&self) -> Option<SocketAddr> {
        self.listen_port.map(|port| SocketAddr::new(self.address, port))
    }
}

/// Thread-safe peer table shared by the background loop and on-demand scans.
#[derive(Debug)]
pub struct PeerRegistry {
    peers: Mutex<HashMap<IpAddr, Peer>>,
    expiry: Duration,
}

impl Default for PeerRegistry {
    fn default() -> Self {
        Self::new(Duration::from_secs(60))
    }
}

impl PeerRegistry {
    /// Create an empty registry with the given expiry window.
    #[must_use]
    pub fn new(expiry: Duration) -> Self {
        Self {
            peers: Mutex::new(HashMap::new()),
            expiry,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<IpAddr, Peer>> {
        // The map holds no invariants a panicking writer could break halfway.
        self.peers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record a sighting now.
    ///
    /// A `listen_port` of `None` keeps any port learned earlier, so a peer
    /// that later sends a bare announcement stays reachable.
    pub fn upsert(&self, address: IpAddr, display_name: &str, listen_port: Option<u16>) {
        self.upsert_at(address, display_name, listen_port, Instant::now());
    }

    /// Record a sighting at an explicit monotonic time.
    pub fn upsert_at(
        &self,
        address: IpAddr,
        display_name: &str,
        listen_port: Option<u16>,
        seen: Instant,
    ) {
        let seen_at = Utc::now()
            - chrono::Duration::from_std(Instant::now().saturating_duration_since(seen))
                .unwrap_or_else(|_| chrono::Duration::zero());

        let mut peers = self.lock();
        match peers.get_mut(&address) {
            Some(peer) => {
                if seen >= peer.last_seen {
                    peer.last_seen = seen;
                    peer.last_seen_at = seen_at;
                }
                display_name.clone_into(&mut peer.display_name);
                if listen_port.is_some() {
                    peer.listen_port = listen_port;
                }
            }
            None => {
                tracing::info!("Discovered peer {} ({})", display_name, address);
                peers.insert(
                    address,
                    Peer {
                        address,
                        display_name: display_name.to_string(),
                        listen_port,
                        last_seen: seen,
                        last_seen_at: seen_at,
                    },
                );
            }
        }
    }

    /// Remove peers silent for longer than the expiry window.
    ///
    /// Returns the number of peers removed.
    pub fn prune(&self) -> usize {
        self.prune_at(Instant::now())
    }

    /// Remove peers silent for longer than the expiry window as of `now`.
    pub fn prune_at(&self, now: Instant) -> usize {
        let expiry = self.expiry;
        let mut peers = self.lock();
        let before = peers.len();
        peers.retain(|_, peer| {
            let expired = now.saturating_duration_since(peer.last_seen) > expiry;
            if expired {
                tracing::info!("Removing expired peer {} ({})", peer.display_name, peer.address);
            }
            !expired
        });
        before - peers.len()
    }

    /// Prune, then return a copy of every live peer sorted by address.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Peer> {
        self.snapshot_at(Instant::now())
    }

    /// Prune as of `now`, then return a copy of every live peer.
    #[must_use]
    pub fn snapshot_at(&self, now: Instant) -> Vec<Peer> {
        self.prune_at(now);
        let mut peers: Vec<Peer> = self.lock().values().cloned().collect();
        peers.sort_by_key(|p| p.address);
        peers
    }

    /// Look up a single peer without pruning.
    #[must_use]
    pub fn get(&self, address: &IpAddr) -> Option<Peer> {
        self.lock().get(address).cloned()
    }

    /// Number of entries, stale ones included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether the registry holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Remove every entry.
    pub fn clear(&self) {
        self.lock().clear();
    }
}
