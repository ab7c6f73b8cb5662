//! VecMesh storage and replication engine.
//!
//! This crate implements the distributed query and replication core of a
//! self-organizing nearest-neighbor index:
//!
//! - [`store::PointStore`]: the in-memory corpus with incremental
//!   statistics and exact local k-NN
//! - [`reducer::TempData`]: the per-request result accumulator
//! - [`coordinator::QueryCoordinator`]: query fan-out with at-most-once
//!   propagation, deadline-bounded collection, and response caching
//! - [`peers::PeerDirectory`] / [`clients::MeshClientPool`]: the
//!   gossip-maintained peer map and the pooled RPC clients
//! - [`gossip::GossipCycle`]: join, service union, peer union, and data
//!   exchange against every known peer
//! - [`memory::MemoryController`]: the memory-pressure state machine
//!   coupling admission, shedding, and eviction
//! - [`server::MeshServer`]: the gRPC surface wired over all of the above

pub mod cache;
pub mod clients;
pub mod codec;
pub mod config;
pub mod coordinator;
pub mod gossip;
pub mod logging;
pub mod memory;
pub mod node;
pub mod peers;
pub mod reducer;
pub mod rpc;
pub mod server;
pub mod store;

pub use clients::MeshClientPool;
pub use config::NodeConfig;
pub use coordinator::QueryCoordinator;
pub use gossip::GossipCycle;
pub use memory::MemoryController;
pub use node::NodeState;
pub use peers::{PeerDescriptor, PeerDirectory};
pub use rpc::proto;
pub use rpc::proto::mesh_service_server::MeshServiceServer;
pub use server::MeshServer;
pub use store::{PointStore, StoreStats};
