//! gRPC surface of a mesh node.
//!
//! Thin wiring from the wire types onto the store, the coordinator, and
//! the peer directory. Admission control consults the memory state; the
//! query RPCs delegate everything to the coordinator.

use std::pin::Pin;
use std::sync::Arc;

use futures::Stream;
use tokio_stream::wrappers::ReceiverStream;
use tonic::{Request, Response, Status, Streaming};

use crate::coordinator::QueryCoordinator;
use crate::memory::REJECT_STATE;
use crate::node::{unix_now, NodeState};
use crate::peers::{PeerDescriptor, PeerDirectory};
use crate::rpc::proto::mesh_service_server::MeshService;
use crate::rpc::proto::{
    Feature, GetLocalDataRequest, InsertionRequest, InsertionResponse, JoinRequest, JoinResponse,
    KnnRequest, KnnResponse, PeerMessage, ServiceMessage,
};
use crate::rpc::{feature_to_point, insertion_to_point, point_to_feature};
use crate::store::PointStore;

/// The mesh node service.
#[derive(Clone)]
pub struct MeshServer {
    store: Arc<PointStore>,
    coordinator: Arc<QueryCoordinator>,
    peers: Arc<PeerDirectory>,
    node: Arc<NodeState>,
}

impl MeshServer {
    pub fn new(
        store: Arc<PointStore>,
        coordinator: Arc<QueryCoordinator>,
        peers: Arc<PeerDirectory>,
        node: Arc<NodeState>,
    ) -> Self {
        Self {
            store,
            coordinator,
            peers,
            node,
        }
    }

    fn accepting_inserts(&self) -> bool {
        self.node.state() < REJECT_STATE
    }
}

#[tonic::async_trait]
impl MeshService for MeshServer {
    async fn get_knn(&self, request: Request<KnnRequest>) -> Result<Response<KnnResponse>, Status> {
        let response = self.coordinator.query(request.into_inner()).await;
        Ok(Response::new(response))
    }

    type GetKnnStreamStream = Pin<Box<dyn Stream<Item = Result<Feature, Status>> + Send + 'static>>;

    async fn get_knn_stream(
        &self,
        request: Request<KnnRequest>,
    ) -> Result<Response<Self::GetKnnStreamStream>, Status> {
        let response = self.coordinator.query(request.into_inner()).await;
        // Features are already in ascending distance order
        let stream = futures::stream::iter(response.features.into_iter().map(Ok));
        Ok(Response::new(Box::pin(stream)))
    }

    async fn insert(
        &self,
        request: Request<InsertionRequest>,
    ) -> Result<Response<InsertionResponse>, Status> {
        if !self.accepting_inserts() {
            return Ok(Response::new(InsertionResponse { code: 1 }));
        }
        let (key, value) = insertion_to_point(&request.into_inner());
        self.store.insert(key, value);
        Ok(Response::new(InsertionResponse { code: 0 }))
    }

    type InsertStreamStream =
        Pin<Box<dyn Stream<Item = Result<InsertionResponse, Status>> + Send + 'static>>;

    async fn insert_stream(
        &self,
        request: Request<Streaming<Feature>>,
    ) -> Result<Response<Self::InsertStreamStream>, Status> {
        let mut inbound = request.into_inner();
        let store = Arc::clone(&self.store);
        let node = Arc::clone(&self.node);
        let (tx, rx) = tokio::sync::mpsc::channel(16);

        tokio::spawn(async move {
            loop {
                let feature = match inbound.message().await {
                    Ok(Some(feature)) => feature,
                    Ok(None) => break,
                    Err(status) => {
                        tracing::warn!(error = %status, "insert stream receive failed");
                        break;
                    }
                };
                if node.state() >= REJECT_STATE {
                    // First rejection ends the stream
                    let _ = tx.send(Ok(InsertionResponse { code: 1 })).await;
                    break;
                }
                let (key, value) = feature_to_point(&feature);
                store.insert(key, value);
                if tx.send(Ok(InsertionResponse { code: 0 })).await.is_err() {
                    break;
                }
            }
        });

        Ok(Response::new(Box::pin(ReceiverStream::new(rx))))
    }

    type GetLocalDataStream =
        Pin<Box<dyn Stream<Item = Result<Feature, Status>> + Send + 'static>>;

    async fn get_local_data(
        &self,
        _request: Request<GetLocalDataRequest>,
    ) -> Result<Response<Self::GetLocalDataStream>, Status> {
        let snapshot = self.store.snapshot();
        let timestamp = unix_now() as u64;
        let features: Vec<Result<Feature, Status>> = snapshot
            .iter()
            .map(|(key, value)| Ok(point_to_feature(key, value, timestamp)))
            .collect();
        Ok(Response::new(Box::pin(futures::stream::iter(features))))
    }

    async fn join(&self, request: Request<JoinRequest>) -> Result<Response<JoinResponse>, Status> {
        let observed_host = request.remote_addr().map(|addr| addr.ip().to_string());
        let join = request.into_inner();

        // The caller's address as this node saw it: observed host plus the
        // advertised port. Without transport information fall back to the
        // self-reported address.
        let address = match observed_host {
            Some(host) => format!("{}:{}", host, join.port),
            None => join.address.clone(),
        };

        self.peers.upsert(PeerDescriptor {
            address: address.clone(),
            version: join.version,
            avg: join.avg,
            hist: join.hist,
            n: join.n,
            timestamp: join.timestamp,
        });

        Ok(Response::new(JoinResponse { address }))
    }

    async fn exchange_services(
        &self,
        request: Request<ServiceMessage>,
    ) -> Result<Response<ServiceMessage>, Status> {
        for service in request.into_inner().services {
            self.peers.add_service(service);
        }
        Ok(Response::new(ServiceMessage {
            services: self.peers.services(),
        }))
    }

    async fn exchange_peers(
        &self,
        request: Request<PeerMessage>,
    ) -> Result<Response<PeerMessage>, Status> {
        let now = unix_now();
        let self_address = self.node.address();

        for peer in request.into_inner().peers {
            self.peers.admit(
                PeerDescriptor {
                    address: peer.address,
                    version: peer.version,
                    avg: peer.avg,
                    hist: peer.hist,
                    n: peer.n,
                    timestamp: peer.timestamp,
                },
                &self_address,
                now,
            );
        }

        let peers = self
            .peers
            .fresh_peers(now)
            .into_iter()
            .map(|p| crate::rpc::proto::Peer {
                address: p.address,
                version: p.version,
                avg: p.avg,
                hist: p.hist,
                n: p.n,
                timestamp: p.timestamp,
            })
            .collect();

        Ok(Response::new(PeerMessage { peers }))
    }
}
