//! The gossip cycle: join, service union, peer union, data exchange.
//!
//! One cycle walks every known bootstrap service (Join only) and every
//! known peer (Join, ExchangeServices, ExchangePeers, ExchangeData).
//! Errors on any step log at warn, schedule a client refresh for that
//! address, and move on to the next peer; gossip never takes the node
//! down.

use std::sync::Arc;

use rand::Rng;
use vecmesh_core::vector_distance;

use crate::clients::{ClientError, MeshClient, MeshClientPool};
use crate::memory::shed_probability;
use crate::node::{unix_now, NodeState};
use crate::peers::{PeerDescriptor, PeerDirectory, DEAD_WINDOW_SECS, STALE_WINDOW_SECS};
use crate::rpc::{point_to_insertion, proto};
use crate::store::{PointStore, StoreStats};

/// Computes how many points to ship to a peer during data exchange.
///
/// The base shipment is a tenth of the count difference, wrapped at 1000
/// per round. When both corpora are near-identical in size and summary
/// statistics and the node is unpressured, a single probe point keeps the
/// exchange alive without churning data.
pub fn shipment_limit(stats: &StoreStats, peer: &PeerDescriptor, state: u8) -> i64 {
    let mut limit = ((stats.n - peer.n) / 10) % 1000;
    let n_ratio = if peer.n != 0 {
        stats.n as f64 / peer.n as f64
    } else {
        0.0
    };
    let distance_avg = vector_distance(&stats.avg, &peer.avg);
    let distance_hist = vector_distance(&stats.hist, &peer.hist);
    if 0.99 < n_ratio
        && n_ratio < 1.01
        && distance_avg < 0.0005
        && distance_hist < 0.0005
        && state == 0
    {
        limit = 1;
    }
    limit
}

/// One node's view of the gossip protocol.
pub struct GossipCycle {
    node: Arc<NodeState>,
    store: Arc<PointStore>,
    peers: Arc<PeerDirectory>,
    pool: Arc<MeshClientPool>,
    port: u16,
}

impl GossipCycle {
    pub fn new(
        node: Arc<NodeState>,
        store: Arc<PointStore>,
        peers: Arc<PeerDirectory>,
        pool: Arc<MeshClientPool>,
        port: u16,
    ) -> Self {
        Self {
            node,
            store,
            peers,
            pool,
            port,
        }
    }

    /// Runs one full cycle over all known services and peers.
    pub async fn run(&self) {
        let now = unix_now();

        for service in self.peers.services() {
            match self.pool.get(&service).await {
                Ok(mut client) => {
                    if let Err(e) = self.call_join(&mut client).await {
                        tracing::warn!(service = %service, error = %e, "join via service failed");
                        self.pool.refresh(&service);
                    }
                }
                Err(e) => {
                    tracing::warn!(service = %service, error = %e, "service dial failed");
                    self.pool.refresh(&service);
                }
            }
        }

        let self_address = self.node.address();
        for peer in self.peers.peer_snapshot() {
            if peer.address.is_empty() || peer.address == self_address {
                continue;
            }
            // Swept before dialing: a dead peer is usually unreachable.
            if peer.timestamp + DEAD_WINDOW_SECS < now {
                tracing::info!(peer = %peer.address, timestamp = peer.timestamp, "removing dead peer");
                self.peers.remove(&peer.address);
                self.pool.remove(&peer.address);
                continue;
            }

            let mut client = match self.pool.get(&peer.address).await {
                Ok(client) => client,
                Err(e) => {
                    tracing::warn!(peer = %peer.address, error = %e, "peer dial failed");
                    self.pool.refresh(&peer.address);
                    continue;
                }
            };

            if let Err(e) = self.call_join(&mut client).await {
                tracing::warn!(peer = %peer.address, error = %e, "join failed");
                self.pool.refresh(&peer.address);
                continue;
            }
            if let Err(e) = self.call_exchange_services(&mut client).await {
                tracing::warn!(peer = %peer.address, error = %e, "service exchange failed");
                self.pool.refresh(&peer.address);
                continue;
            }
            if let Err(e) = self.call_exchange_peers(&mut client).await {
                tracing::warn!(peer = %peer.address, error = %e, "peer exchange failed");
                self.pool.refresh(&peer.address);
                continue;
            }
            if let Err(e) = self.call_exchange_data(&mut client, &peer).await {
                tracing::warn!(peer = %peer.address, error = %e, "data exchange failed");
                self.pool.refresh(&peer.address);
            }
        }
    }

    /// Announces this node; adopts the address the remote side observed.
    async fn call_join(&self, client: &mut MeshClient) -> Result<(), ClientError> {
        let stats = self.store.get_stats();
        let request = proto::JoinRequest {
            address: self.node.address(),
            port: self.port as i32,
            version: self.node.version().to_string(),
            avg: stats.avg,
            hist: stats.hist,
            n: stats.n,
            timestamp: self.node.timestamp(),
        };
        let response = client.join(request).await?.into_inner();
        if !response.address.is_empty() && response.address != self.node.address() {
            self.node.set_address(response.address);
        }
        Ok(())
    }

    async fn call_exchange_services(&self, client: &mut MeshClient) -> Result<(), ClientError> {
        let request = proto::ServiceMessage {
            services: self.peers.services(),
        };
        let response = client.exchange_services(request).await?.into_inner();
        for service in response.services {
            self.peers.add_service(service);
        }
        Ok(())
    }

    async fn call_exchange_peers(&self, client: &mut MeshClient) -> Result<(), ClientError> {
        let now = unix_now();
        let request = proto::PeerMessage {
            peers: self
                .peers
                .fresh_peers(now)
                .iter()
                .map(peer_to_proto)
                .collect(),
        };
        let response = client.exchange_peers(request).await?.into_inner();
        let self_address = self.node.address();
        for peer in &response.peers {
            self.peers.admit(proto_to_peer(peer), &self_address, now);
        }
        Ok(())
    }

    /// Ships random samples to a peer that appears to hold less data,
    /// self-shedding under memory pressure.
    async fn call_exchange_data(
        &self,
        client: &mut MeshClient,
        peer: &PeerDescriptor,
    ) -> Result<(), ClientError> {
        let now = unix_now();
        let state = self.node.state();

        // Peer data too old but not dead: do nothing this round.
        if peer.timestamp + STALE_WINDOW_SECS < now && state == 0 {
            return Ok(());
        }
        let stats = self.store.get_stats();
        if stats.n < peer.n {
            // The peer holds more; let it initiate.
            return Ok(());
        }

        let limit = shipment_limit(&stats, peer, state);
        let points = self.store.get_random_points(limit);
        let timestamp = unix_now() as u64;
        for (key, value) in points {
            let request = point_to_insertion(&key, &value, timestamp);
            match client.insert(request).await {
                Ok(response) => {
                    let code = response.into_inner().code;
                    if code == 0
                        && state > 0
                        && rand::thread_rng().gen_bool(shed_probability(state))
                    {
                        self.store.delete(&key);
                    }
                }
                Err(status) => {
                    tracing::warn!(peer = %peer.address, error = %status, "insert at peer failed");
                }
            }
        }
        Ok(())
    }
}

fn peer_to_proto(peer: &PeerDescriptor) -> proto::Peer {
    proto::Peer {
        address: peer.address.clone(),
        version: peer.version.clone(),
        avg: peer.avg.clone(),
        hist: peer.hist.clone(),
        n: peer.n,
        timestamp: peer.timestamp,
    }
}

fn proto_to_peer(peer: &proto::Peer) -> PeerDescriptor {
    PeerDescriptor {
        address: peer.address.clone(),
        version: peer.version.clone(),
        avg: peer.avg.clone(),
        hist: peer.hist.clone(),
        n: peer.n,
        timestamp: peer.timestamp,
    }
}
