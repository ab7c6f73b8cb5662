//! Query coordination: fan-out, merge, dedup, caching.
//!
//! A single k-NN request is fingerprinted, deduplicated through the
//! query-id set (the loop-break rule for queries that cycle back through
//! the mesh), fanned out to every known peer and to the local store, and
//! reduced under the request deadline. Peers receive 90% of the inbound
//! deadline so the coordinator keeps headroom for merging.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use vecmesh_core::DistanceMetric;

use crate::cache::TtlCache;
use crate::clients::MeshClientPool;
use crate::config::NodeConfig;
use crate::node::{unix_now, NodeState};
use crate::peers::PeerDirectory;
use crate::reducer::TempData;
use crate::rpc::{feature_to_point, proto, scored_to_feature};
use crate::store::PointStore;

/// Response-cache key: the feature vector right-zero-padded to the
/// configured dimension, compared by bit pattern.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(Vec<u32>);

impl Fingerprint {
    pub fn new(feature: &[f32], dimension: usize) -> Self {
        let mut bits = vec![0u32; dimension];
        for (i, v) in feature.iter().take(dimension).enumerate() {
            bits[i] = v.to_bits();
        }
        Self(bits)
    }
}

/// Computes the deadline propagated to peers: 90% of the inbound one,
/// floored, so every fan-out level finishes inside its parent's budget.
pub fn peer_timeout(timeout_ms: i64) -> i64 {
    timeout_ms * 9 / 10
}

/// Orchestrates a single k-NN request across the mesh.
pub struct QueryCoordinator {
    store: Arc<PointStore>,
    peers: Arc<PeerDirectory>,
    pool: Arc<MeshClientPool>,
    node: Arc<NodeState>,
    metric: DistanceMetric,
    dimension: usize,
    query_ids: Mutex<TtlCache<String, bool>>,
    responses: Mutex<TtlCache<Fingerprint, proto::KnnResponse>>,
}

impl QueryCoordinator {
    pub fn new(
        store: Arc<PointStore>,
        peers: Arc<PeerDirectory>,
        pool: Arc<MeshClientPool>,
        node: Arc<NodeState>,
        config: &NodeConfig,
    ) -> Self {
        let ttl = Duration::from_secs(config.cache_ttl_secs);
        Self {
            store,
            peers,
            pool,
            node,
            metric: config.metric,
            dimension: config.dimension,
            query_ids: Mutex::new(TtlCache::new(config.cache_capacity, ttl)),
            responses: Mutex::new(TtlCache::new(config.cache_capacity, ttl)),
        }
    }

    /// Runs the full query algorithm. Serves both the unary and the
    /// streaming RPC; the caller streams `features` for the latter.
    ///
    /// Never fails because a peer failed: contributors that error are
    /// logged and skipped, and whatever arrived before the deadline is
    /// merged and returned.
    pub async fn query(&self, request: proto::KnnRequest) -> proto::KnnResponse {
        let mut request = request;
        let fingerprint = Fingerprint::new(&request.feature, self.dimension);

        if request.id.is_empty() {
            request.id = ulid::Ulid::new().to_string();
            self.query_ids.lock().unwrap().put(request.id.clone(), true);
        } else {
            let seen = self.query_ids.lock().unwrap().contains(&request.id);
            if seen {
                // The query cycled back to a node that already worked on
                // it: answer from the response cache or break the loop
                // with an empty response. No fan-out in either case.
                if let Some(cached) = self.responses.lock().unwrap().get(&fingerprint) {
                    tracing::debug!(id = %request.id, "repeated query id, serving cached response");
                    return cached;
                }
                tracing::debug!(id = %request.id, "repeated query id, no cached response");
                return proto::KnnResponse {
                    id: request.id,
                    features: Vec::new(),
                };
            }
            self.query_ids.lock().unwrap().put(request.id.clone(), false);
        }

        let k = request.k.max(0) as usize;
        let response = self.fan_out(&request, k).await;

        self.query_ids.lock().unwrap().put(request.id.clone(), true);
        self.responses
            .lock()
            .unwrap()
            .put(fingerprint, response.clone());
        response
    }

    async fn fan_out(&self, request: &proto::KnnRequest, k: usize) -> proto::KnnResponse {
        let (tx, mut rx) = mpsc::channel::<proto::Feature>(k.max(1));

        let outbound = proto::KnnRequest {
            id: request.id.clone(),
            feature: request.feature.clone(),
            k: request.k,
            timeout: peer_timeout(request.timeout),
            timestamp: request.timestamp,
        };

        let self_address = self.node.address();
        for peer in self.peers.peer_snapshot() {
            if peer.address.is_empty() || peer.address == self_address {
                continue;
            }
            self.spawn_peer_search(peer.address, outbound.clone(), tx.clone());
        }

        {
            let store = Arc::clone(&self.store);
            let tx = tx.clone();
            let query = request.feature.clone();
            tokio::spawn(async move {
                let now = unix_now() as u64;
                for scored in store.get_knn(k, &query) {
                    if tx.send(scored_to_feature(&scored, now)).await.is_err() {
                        return;
                    }
                }
            });
        }
        drop(tx);

        let deadline =
            tokio::time::Instant::now() + Duration::from_millis(request.timeout.max(0) as u64);
        let mut reducer = TempData::new(self.metric);
        loop {
            match tokio::time::timeout_at(deadline, rx.recv()).await {
                Ok(Some(feature)) => {
                    let (key, value) = feature_to_point(&feature);
                    reducer.insert(key, value);
                }
                // All producers finished
                Ok(None) => break,
                Err(_) => {
                    tracing::debug!(id = %request.id, "query deadline elapsed");
                    break;
                }
            }
        }
        // Dangling producers observe the closed channel and exit
        drop(rx);

        reducer.process(true);
        let now = unix_now() as u64;
        let features = reducer
            .get_knn(k, &request.feature)
            .iter()
            .map(|scored| scored_to_feature(scored, now))
            .collect();

        proto::KnnResponse {
            id: request.id.clone(),
            features,
        }
    }

    fn spawn_peer_search(
        &self,
        address: String,
        request: proto::KnnRequest,
        tx: mpsc::Sender<proto::Feature>,
    ) {
        let pool = Arc::clone(&self.pool);
        tokio::spawn(async move {
            let mut client = match pool.get(&address).await {
                Ok(client) => client,
                Err(e) => {
                    tracing::warn!(peer = %address, error = %e, "peer dial failed");
                    pool.refresh(&address);
                    return;
                }
            };
            let mut stream = match client.get_knn_stream(request).await {
                Ok(response) => response.into_inner(),
                Err(status) => {
                    tracing::warn!(peer = %address, error = %status, "peer search failed");
                    pool.refresh(&address);
                    return;
                }
            };
            loop {
                match stream.message().await {
                    Ok(Some(feature)) => {
                        if tx.send(feature).await.is_err() {
                            // Coordinator stopped collecting
                            return;
                        }
                    }
                    Ok(None) => return,
                    Err(status) => {
                        tracing::warn!(peer = %address, error = %status, "peer stream error");
                        pool.refresh(&address);
                        return;
                    }
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn coordinator_with_points(points: &[(&[f32], &str)]) -> QueryCoordinator {
        let config = NodeConfig::default();
        let store = Arc::new(PointStore::new(&config));
        for (feature, label) in points {
            store.insert(
                vecmesh_core::PointKey {
                    feature: feature.to_vec(),
                    dim1: 0,
                    dim2: 0,
                    size1: 0,
                    size2: 0,
                    group_label: Vec::new(),
                },
                vecmesh_core::PointValue {
                    label: label.as_bytes().to_vec(),
                    version: 0,
                },
            );
        }
        QueryCoordinator::new(
            store,
            Arc::new(PeerDirectory::new()),
            Arc::new(MeshClientPool::new(Duration::from_secs(1))),
            Arc::new(NodeState::new()),
            &config,
        )
    }

    fn request(id: &str, feature: &[f32], k: i32) -> proto::KnnRequest {
        proto::KnnRequest {
            id: id.to_string(),
            feature: feature.to_vec(),
            k,
            timeout: 300,
            timestamp: unix_now(),
        }
    }

    #[test]
    fn test_peer_timeout_is_ninety_percent_floored() {
        assert_eq!(peer_timeout(1000), 900);
        assert_eq!(peer_timeout(101), 90);
        assert_eq!(peer_timeout(9), 8);
        // Depth d from timeout T observes T * 0.9^d
        let mut t = 1000;
        for _ in 0..3 {
            let next = peer_timeout(t);
            assert!(next < t);
            t = next;
        }
        assert_eq!(t, 729);
    }

    #[tokio::test]
    async fn test_fresh_query_assigns_id_and_answers_locally() {
        let coordinator = coordinator_with_points(&[
            (&[0.0, 0.0], "a"),
            (&[1.0, 0.0], "b"),
            (&[5.0, 5.0], "c"),
        ]);

        let response = coordinator.query(request("", &[0.1, 0.1], 2)).await;
        assert!(!response.id.is_empty());
        let labels: Vec<_> = response.features.iter().map(|f| f.label.clone()).collect();
        assert_eq!(labels, vec![b"a".to_vec(), b"b".to_vec()]);
    }

    #[tokio::test]
    async fn test_repeated_id_serves_cache_then_empty() {
        let coordinator = coordinator_with_points(&[(&[0.0, 0.0], "a"), (&[1.0, 0.0], "b")]);

        let first = coordinator.query(request("query-1", &[0.0, 0.0], 2)).await;
        assert_eq!(first.features.len(), 2);

        // Same id, same fingerprint: the cached response comes back verbatim
        let second = coordinator.query(request("query-1", &[0.0, 0.0], 2)).await;
        assert_eq!(second.id, first.id);
        assert_eq!(second.features, first.features);

        // Same id, different fingerprint: loop-break with an empty response
        let third = coordinator.query(request("query-1", &[9.0, 9.0], 2)).await;
        assert_eq!(third.id, "query-1");
        assert!(third.features.is_empty());
    }

    #[tokio::test]
    async fn test_empty_store_returns_empty_response() {
        let coordinator = coordinator_with_points(&[]);

        let response = coordinator.query(request("", &[1.0, 2.0], 5)).await;
        assert!(response.features.is_empty());
    }
}
