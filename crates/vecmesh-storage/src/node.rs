//! Shared identity and liveness of the local node.

use std::sync::atomic::{AtomicI64, AtomicU8, Ordering};
use std::sync::RwLock;

/// Returns the current unix time in seconds.
pub fn unix_now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Mutable node identity shared by the server, the gossip cycle, and the
/// memory-state controller.
///
/// The advertised address starts empty and is learned from `Join`
/// responses, which echo the address the remote side observed (NAT-aware
/// self-address discovery).
#[derive(Debug)]
pub struct NodeState {
    address: RwLock<String>,
    version: String,
    timestamp: AtomicI64,
    state: AtomicU8,
}

impl NodeState {
    pub fn new() -> Self {
        Self {
            address: RwLock::new(String::new()),
            version: env!("CARGO_PKG_VERSION").to_string(),
            timestamp: AtomicI64::new(unix_now()),
            state: AtomicU8::new(0),
        }
    }

    /// The address this node advertises to peers, as last observed.
    pub fn address(&self) -> String {
        self.address.read().unwrap().clone()
    }

    /// Rewrites the advertised address after a `Join` response reported a
    /// different observation.
    pub fn set_address(&self, address: String) {
        let mut current = self.address.write().unwrap();
        if *current != address {
            tracing::info!(old = %current, new = %address, "advertised address updated");
            *current = address;
        }
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// Current memory-pressure state (0..=3).
    pub fn state(&self) -> u8 {
        self.state.load(Ordering::Relaxed)
    }

    pub fn set_state(&self, state: u8) {
        self.state.store(state, Ordering::Relaxed);
    }

    /// Last controller tick, unix seconds. Exported to peers via `Join`.
    pub fn timestamp(&self) -> i64 {
        self.timestamp.load(Ordering::Relaxed)
    }

    pub fn touch(&self, now: i64) {
        self.timestamp.store(now, Ordering::Relaxed);
    }
}

impl Default for NodeState {
    fn default() -> Self {
        Self::new()
    }
}
