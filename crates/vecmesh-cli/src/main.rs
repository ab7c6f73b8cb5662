//! VecMesh node binary.
//!
//! Starts the gRPC mesh service, the background memory-state controller
//! (which drives the gossip cycle), and the HTTP health endpoint.
//!
//! ```bash
//! # Plain node on the default port
//! vecmesh
//!
//! # Join an existing mesh through bootstrap services
//! vecmesh --port 10001 --services seed-a:10000,seed-b:10000
//!
//! # TLS
//! vecmesh --tls --cert-file server.pem --key-file server.key
//! ```

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use axum::routing::get;
use axum::{Json, Router};
use clap::Parser;
use tonic::transport::{Identity, Server, ServerTlsConfig};

use vecmesh_storage::{
    logging, GossipCycle, MemoryController, MeshClientPool, MeshServer, MeshServiceServer,
    NodeConfig, NodeState, PeerDirectory, PointStore, QueryCoordinator,
};

/// Port of the HTTP health endpoint.
const HEALTH_PORT: u16 = 8000;

#[derive(Parser, Debug)]
#[command(name = "vecmesh", about = "Self-organizing distributed nearest-neighbor index node")]
struct Cli {
    /// Serve TLS instead of plain TCP
    #[arg(long, default_value_t = false)]
    tls: bool,

    /// TLS certificate file (PEM)
    #[arg(long, env = "VECMESH_CERT_FILE")]
    cert_file: Option<String>,

    /// TLS key file (PEM)
    #[arg(long, env = "VECMESH_KEY_FILE")]
    key_file: Option<String>,

    /// JSON seed-data file
    #[arg(long)]
    json_db_file: Option<String>,

    /// gRPC listen port
    #[arg(long, default_value_t = 10000, env = "VECMESH_PORT")]
    port: u16,

    /// Comma-separated list of bootstrap services
    #[arg(long, default_value = "", env = "VECMESH_SERVICES")]
    services: String,

    /// Allow the evictor to drop points under memory pressure
    #[arg(long, action = clap::ArgAction::Set, default_value_t = true)]
    evictable: bool,
}

impl Cli {
    fn into_config(self) -> NodeConfig {
        NodeConfig {
            port: self.port,
            tls: self.tls,
            cert_file: self.cert_file,
            key_file: self.key_file,
            json_db_file: self.json_db_file,
            services: self
                .services
                .split(',')
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
            evictable: self.evictable,
            ..NodeConfig::default()
        }
    }
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({"alive": true}))
}

#[tokio::main]
async fn main() -> Result<()> {
    logging::init();

    let config = Cli::parse().into_config();

    let node = Arc::new(NodeState::new());
    let store = Arc::new(PointStore::new(&config));
    let peers = Arc::new(PeerDirectory::new());
    for service in &config.services {
        peers.add_service(service.clone());
    }
    let pool = Arc::new(MeshClientPool::new(Duration::from_secs(5)));
    let coordinator = Arc::new(QueryCoordinator::new(
        Arc::clone(&store),
        Arc::clone(&peers),
        Arc::clone(&pool),
        Arc::clone(&node),
        &config,
    ));

    let gossip = GossipCycle::new(
        Arc::clone(&node),
        Arc::clone(&store),
        Arc::clone(&peers),
        Arc::clone(&pool),
        config.port,
    );
    let controller = MemoryController::new(
        Arc::clone(&node),
        Arc::clone(&store),
        gossip,
        &config,
    );
    tokio::spawn(controller.run());

    let health_app = Router::new()
        .route("/", get(health))
        .route("/health", get(health));
    let health_addr: SocketAddr = format!("0.0.0.0:{HEALTH_PORT}").parse()?;
    let health_listener = tokio::net::TcpListener::bind(health_addr)
        .await
        .with_context(|| format!("failed to bind health endpoint on {health_addr}"))?;
    tokio::spawn(async move {
        if let Err(e) = axum::serve(health_listener, health_app).await {
            tracing::error!(error = %e, "health endpoint failed");
        }
    });

    let mesh = MeshServer::new(
        Arc::clone(&store),
        coordinator,
        Arc::clone(&peers),
        Arc::clone(&node),
    );

    let mut builder = Server::builder();
    if config.tls {
        let (Some(cert_file), Some(key_file)) = (&config.cert_file, &config.key_file) else {
            bail!("--tls requires --cert-file and --key-file");
        };
        let cert = std::fs::read(cert_file)
            .with_context(|| format!("failed to read certificate {cert_file}"))?;
        let key =
            std::fs::read(key_file).with_context(|| format!("failed to read key {key_file}"))?;
        builder = builder
            .tls_config(ServerTlsConfig::new().identity(Identity::from_pem(cert, key)))
            .context("failed to configure TLS")?;
    }

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    tracing::info!(
        port = config.port,
        tls = config.tls,
        services = config.services.len(),
        evictable = config.evictable,
        "mesh node listening"
    );

    builder
        .add_service(MeshServiceServer::new(mesh))
        .serve(addr)
        .await
        .context("gRPC server failed")?;

    Ok(())
}
