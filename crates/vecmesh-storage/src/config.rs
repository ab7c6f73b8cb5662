//! Node configuration.
//!
//! Configuration is an immutable record constructed once at startup and
//! passed by reference to the server, the gossip cycle, and the
//! memory-state controller. Values come from (highest priority first):
//!
//! 1. Command-line flags (applied by the binary)
//! 2. Environment variables with the `VECMESH__` prefix
//! 3. An optional TOML file
//! 4. Built-in defaults

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;
use vecmesh_core::{DistanceMetric, DEFAULT_DIMENSION};

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read configuration file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Immutable node configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// gRPC listen port.
    pub port: u16,
    /// Serve TLS instead of plain TCP.
    pub tls: bool,
    /// TLS certificate file (PEM), required when `tls` is set.
    pub cert_file: Option<String>,
    /// TLS key file (PEM), required when `tls` is set.
    pub key_file: Option<String>,
    /// Optional JSON seed-data file.
    pub json_db_file: Option<String>,
    /// Bootstrap service addresses.
    pub services: Vec<String>,
    /// Whether the evictor may drop points under memory pressure.
    pub evictable: bool,
    /// Memory budget for the state machine, MiB.
    pub max_memory_mib: u64,
    /// Feature dimensionality D.
    pub dimension: usize,
    /// Distance metric for local search.
    pub metric: DistanceMetric,
    /// Seconds between gossip cycles.
    pub gossip_interval_secs: i64,
    /// Capacity of the query-id and response caches.
    pub cache_capacity: usize,
    /// Access TTL of the query-id and response caches, seconds.
    pub cache_ttl_secs: u64,
    /// Fraction of the store that may drift before the search snapshot is
    /// rebuilt.
    pub rebuild_drift: f64,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            port: 10000,
            tls: false,
            cert_file: None,
            key_file: None,
            json_db_file: None,
            services: Vec::new(),
            evictable: true,
            max_memory_mib: 1024,
            dimension: DEFAULT_DIMENSION,
            metric: DistanceMetric::Euclidean,
            gossip_interval_secs: 10,
            cache_capacity: 1000,
            cache_ttl_secs: 10,
            rebuild_drift: 0.05,
        }
    }
}

impl NodeConfig {
    /// Loads configuration from an optional TOML file with environment
    /// variable overrides applied on top.
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(file_path) = path {
            if Path::new(file_path).exists() {
                let contents = std::fs::read_to_string(file_path)?;
                config = toml::from_str(&contents)?;
            }
        }

        config.apply_env_overrides();
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("VECMESH__PORT") {
            if let Ok(v) = val.parse() {
                self.port = v;
            }
        }
        if let Ok(val) = std::env::var("VECMESH__MAX_MEMORY_MIB") {
            if let Ok(v) = val.parse() {
                self.max_memory_mib = v;
            }
        }
        if let Ok(val) = std::env::var("VECMESH__GOSSIP_INTERVAL_SECS") {
            if let Ok(v) = val.parse() {
                self.gossip_interval_secs = v;
            }
        }
        if let Ok(val) = std::env::var("VECMESH__EVICTABLE") {
            self.evictable = val.to_lowercase() == "true" || val == "1";
        }
    }
}
