//! Gossip-maintained peer and service directories.
//!
//! Two typed concurrent maps: known peers with their exported statistics,
//! and known bootstrap service addresses. Single-key operations are
//! atomic; admission is a load-compare-store on the entry timestamp.

use dashmap::DashMap;

/// Peers whose exported timestamp is older than this are rejected on
/// ingest and filtered on export.
pub const FRESH_WINDOW_SECS: i64 = 300;
/// Peers whose timestamp is older than this are considered dead and
/// removed together with their pooled client.
pub const DEAD_WINDOW_SECS: i64 = 360;
/// Peers older than this are skipped by data exchange while the node is
/// unpressured.
pub const STALE_WINDOW_SECS: i64 = 30;

/// A known peer as last gossiped.
#[derive(Debug, Clone)]
pub struct PeerDescriptor {
    pub address: String,
    pub version: String,
    pub avg: Vec<f32>,
    pub hist: Vec<f32>,
    pub n: i64,
    pub timestamp: i64,
}

/// Concurrent peer and service maps.
#[derive(Debug, Default)]
pub struct PeerDirectory {
    peers: DashMap<String, PeerDescriptor>,
    services: DashMap<String, ()>,
}

impl PeerDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores the caller of a `Join` unconditionally: calling proved
    /// liveness.
    pub fn upsert(&self, peer: PeerDescriptor) {
        self.peers.insert(peer.address.clone(), peer);
    }

    /// Admission rule for `ExchangePeers` entries: reject stale entries
    /// and anything older than what is already known; never admit the
    /// node's own address.
    pub fn admit(&self, peer: PeerDescriptor, self_address: &str, now: i64) -> bool {
        if peer.address.is_empty() || peer.address == self_address {
            return false;
        }
        if peer.timestamp + FRESH_WINDOW_SECS < now {
            return false;
        }
        if let Some(existing) = self.peers.get(&peer.address) {
            if existing.timestamp >= peer.timestamp {
                return false;
            }
        }
        self.peers.insert(peer.address.clone(), peer);
        true
    }

    pub fn get(&self, address: &str) -> Option<PeerDescriptor> {
        self.peers.get(address).map(|p| p.value().clone())
    }

    pub fn remove(&self, address: &str) {
        self.peers.remove(address);
    }

    /// All known peers. Iteration order is unspecified.
    pub fn peer_snapshot(&self) -> Vec<PeerDescriptor> {
        self.peers.iter().map(|p| p.value().clone()).collect()
    }

    /// Peers inside the freshness window, the only ones exported.
    pub fn fresh_peers(&self, now: i64) -> Vec<PeerDescriptor> {
        self.peers
            .iter()
            .filter(|p| p.timestamp + FRESH_WINDOW_SECS > now)
            .map(|p| p.value().clone())
            .collect()
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    pub fn add_service(&self, address: String) {
        if !address.is_empty() {
            self.services.insert(address, ());
        }
    }

    pub fn services(&self) -> Vec<String> {
        self.services.iter().map(|s| s.key().clone()).collect()
    }

    pub fn service_count(&self) -> usize {
        self.services.len()
    }
}
