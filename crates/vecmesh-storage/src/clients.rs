//! Pooled gRPC clients keyed by peer address.
//!
//! Clients wrap a tonic `Channel`, which is cheap to clone, so the pool
//! hands out clones of a cached client and dials on first use. After any
//! observed stream error the caller schedules a background refresh that
//! rebuilds the handle without blocking the failing request.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use thiserror::Error;
use tonic::transport::{Channel, Endpoint};

use crate::rpc::proto::mesh_service_client::MeshServiceClient;

/// A pooled client handle.
pub type MeshClient = MeshServiceClient<Channel>;

/// Errors surfaced by client management.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Failed to connect to {address}: {source}")]
    Connect {
        address: String,
        #[source]
        source: tonic::transport::Error,
    },

    #[error("RPC failed: {0}")]
    Rpc(#[from] tonic::Status),
}

async fn dial(address: &str, connect_timeout: Duration) -> Result<MeshClient, ClientError> {
    let endpoint = Endpoint::from_shared(format!("http://{address}"))
        .map_err(|source| ClientError::Connect {
            address: address.to_string(),
            source,
        })?
        .connect_timeout(connect_timeout);

    let channel = endpoint
        .connect()
        .await
        .map_err(|source| ClientError::Connect {
            address: address.to_string(),
            source,
        })?;

    Ok(MeshServiceClient::new(channel))
}

/// Cache of live client handles, one per peer address.
pub struct MeshClientPool {
    clients: Arc<DashMap<String, MeshClient>>,
    connect_timeout: Duration,
}

impl MeshClientPool {
    pub fn new(connect_timeout: Duration) -> Self {
        Self {
            clients: Arc::new(DashMap::new()),
            connect_timeout,
        }
    }

    /// Returns the pooled client for `address`, dialing on demand. Dial
    /// failures surface as errors; successes are cached.
    pub async fn get(&self, address: &str) -> Result<MeshClient, ClientError> {
        if let Some(client) = self.clients.get(address) {
            return Ok(client.clone());
        }
        let client = dial(address, self.connect_timeout).await?;
        self.clients.insert(address.to_string(), client.clone());
        Ok(client)
    }

    /// Forcibly rebuilds the handle for `address` in a detached task.
    /// Used after any observed stream error.
    pub fn refresh(&self, address: &str) {
        let clients = Arc::clone(&self.clients);
        let connect_timeout = self.connect_timeout;
        let address = address.to_string();
        tokio::spawn(async move {
            tracing::debug!(address = %address, "refreshing pooled client");
            match dial(&address, connect_timeout).await {
                Ok(client) => {
                    clients.insert(address, client);
                }
                Err(e) => {
                    tracing::warn!(address = %address, error = %e, "client refresh failed");
                }
            }
        });
    }

    /// Drops the pooled handle for `address`, if any.
    pub fn remove(&self, address: &str) {
        self.clients.remove(address);
    }

    pub fn connected_count(&self) -> usize {
        self.clients.len()
    }

    pub fn contains(&self, address: &str) -> bool {
        self.clients.contains_key(address)
    }
}

impl std::fmt::Debug for MeshClientPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MeshClientPool")
            .field("connected", &self.clients.len())
            .field("connect_timeout", &self.connect_timeout)
            .finish()
    }
}
