//! Memory-pressure state machine and controller.
//!
//! A background task samples the process resident set every second,
//! classifies the pressure ratio into states 0..=3, evicts under high
//! pressure, and drives the gossip cycle on its own schedule. The state
//! feeds back into admission (state 3 rejects inserts) and into
//! self-shedding during data exchange.

use std::sync::Arc;
use std::time::Duration;

use sysinfo::{Pid, System};

use crate::config::NodeConfig;
use crate::gossip::GossipCycle;
use crate::node::{unix_now, NodeState};
use crate::store::PointStore;

/// Inserts are rejected at or above this state.
pub const REJECT_STATE: u8 = 3;
/// Eviction is permitted at or above this state (when the node is
/// evictable).
pub const EVICT_STATE: u8 = 2;

/// Classifies the memory pressure ratio `resident / budget`.
///
/// | ratio            | state |
/// |------------------|-------|
/// | r < 0.50         | 0     |
/// | 0.50 <= r < 0.75 | 1     |
/// | 0.75 <= r < 0.85 | 2     |
/// | r >= 0.85        | 3     |
pub fn classify(ratio: f64) -> u8 {
    if ratio < 0.50 {
        0
    } else if ratio < 0.75 {
        1
    } else if ratio < 0.85 {
        2
    } else {
        3
    }
}

/// Probability of deleting a locally held point after successfully
/// handing it to a peer. Clamped: the state machine never produces
/// states above 3, but a corrupt value must not panic the sampler.
pub fn shed_probability(state: u8) -> f64 {
    (0.3 * state as f64).min(1.0)
}

/// Periodic task owning the state machine and the gossip schedule.
pub struct MemoryController {
    node: Arc<NodeState>,
    store: Arc<PointStore>,
    gossip: GossipCycle,
    max_memory_mib: u64,
    evictable: bool,
    gossip_interval_secs: i64,
    system: System,
    pid: Pid,
}

impl MemoryController {
    pub fn new(
        node: Arc<NodeState>,
        store: Arc<PointStore>,
        gossip: GossipCycle,
        config: &NodeConfig,
    ) -> Self {
        Self {
            node,
            store,
            gossip,
            max_memory_mib: config.max_memory_mib.max(1),
            evictable: config.evictable,
            gossip_interval_secs: config.gossip_interval_secs,
            system: System::new(),
            pid: Pid::from(std::process::id() as usize),
        }
    }

    /// Runs forever: one tick per second.
    pub async fn run(mut self) {
        let mut ticker = tokio::time::interval(Duration::from_secs(1));
        let mut next_sync = unix_now();
        loop {
            ticker.tick().await;
            self.tick(&mut next_sync).await;
        }
    }

    async fn tick(&mut self, next_sync: &mut i64) {
        let resident = self.resident_mib();
        let ratio = resident as f64 / self.max_memory_mib as f64;
        let state = classify(ratio);
        if state != self.node.state() {
            tracing::info!(
                resident_mib = resident,
                budget_mib = self.max_memory_mib,
                state,
                "memory state changed"
            );
        }
        self.node.set_state(state);

        if state >= EVICT_STATE && self.evictable {
            let batch = (self.store.len() / 20).max(1);
            let evicted = self.store.evict_oldest(batch);
            if evicted > 0 {
                tracing::debug!(evicted, "evicted oldest points under memory pressure");
            }
        }

        let now = unix_now();
        if *next_sync <= now {
            self.gossip.run().await;
            *next_sync = unix_now() + self.gossip_interval_secs;
        }
        self.node.touch(unix_now());
    }

    fn resident_mib(&mut self) -> u64 {
        self.system.refresh_process(self.pid);
        self.system
            .process(self.pid)
            .map(|p| p.memory() / (1024 * 1024))
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_state_table() {
        assert_eq!(classify(0.0), 0);
        assert_eq!(classify(0.49), 0);
        assert_eq!(classify(0.50), 1);
        assert_eq!(classify(0.74), 1);
        assert_eq!(classify(0.75), 2);
        assert_eq!(classify(0.84), 2);
        assert_eq!(classify(0.85), 3);
        assert_eq!(classify(2.0), 3);
    }

    #[test]
    fn test_shed_probability_scales_with_state() {
        assert_eq!(shed_probability(0), 0.0);
        assert!((shed_probability(1) - 0.3).abs() < 1e-9);
        assert!((shed_probability(2) - 0.6).abs() < 1e-9);
        assert!((shed_probability(3) - 0.9).abs() < 1e-9);
    }

    #[test]
    fn test_shed_probability_is_clamped() {
        assert_eq!(shed_probability(4), 1.0);
        assert_eq!(shed_probability(100), 1.0);
    }
}
