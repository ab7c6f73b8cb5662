//! The local point corpus.
//!
//! Owns the in-memory collection of feature vectors and their incremental
//! statistics. Searches run against a flat snapshot (`Arc<Vec<..>>`)
//! rebuilt lazily once the dataset has drifted past a configured
//! fraction; at the dimensionalities this index targets a spatial tree
//! degenerates to a scan anyway, so the snapshot is searched with a
//! bounded heap select. Readers keep the snapshot they grabbed at query
//! start and are never blocked by writers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use vecmesh_core::{select_nearest, DistanceMetric, PointKey, PointValue, ScoredPoint};

use crate::config::NodeConfig;
use crate::node::unix_now;

/// Snapshot of the store summary exported to peers.
#[derive(Debug, Clone)]
pub struct StoreStats {
    /// Number of distinct keys.
    pub n: i64,
    /// Per-dimension mean of the (zero-padded) features.
    pub avg: Vec<f32>,
    /// Normalized histogram of stored values over [-1, 1).
    pub hist: Vec<f32>,
}

struct Stored {
    value: PointValue,
    written_at: i64,
}

/// Running per-dimension sums and histogram counts, kept exact under
/// insert, replace, and delete so exported statistics always match the
/// corpus.
struct StatsAccumulator {
    dimension: usize,
    sum: Vec<f64>,
    buckets: Vec<u64>,
    values: u64,
}

impl StatsAccumulator {
    fn new(dimension: usize) -> Self {
        Self {
            dimension,
            sum: vec![0.0; dimension],
            buckets: vec![0; dimension],
            values: 0,
        }
    }

    fn bucket(&self, v: f32) -> usize {
        // Uniform buckets over [-1, 1), clamped into the edge buckets.
        let norm = (v + 1.0) / 2.0;
        let idx = (norm * self.dimension as f32).floor() as isize;
        idx.clamp(0, self.dimension as isize - 1) as usize
    }

    fn add(&mut self, feature: &[f32]) {
        for (d, v) in feature.iter().take(self.dimension).enumerate() {
            self.sum[d] += *v as f64;
            let bucket = self.bucket(*v);
            self.buckets[bucket] += 1;
            self.values += 1;
        }
    }

    fn remove(&mut self, feature: &[f32]) {
        for (d, v) in feature.iter().take(self.dimension).enumerate() {
            self.sum[d] -= *v as f64;
            let bucket = self.bucket(*v);
            self.buckets[bucket] = self.buckets[bucket].saturating_sub(1);
            self.values = self.values.saturating_sub(1);
        }
    }

    fn snapshot(&self, n: i64) -> StoreStats {
        let avg = if n > 0 {
            self.sum.iter().map(|s| (*s / n as f64) as f32).collect()
        } else {
            vec![0.0; self.dimension]
        };
        let hist = if self.values > 0 {
            self.buckets
                .iter()
                .map(|b| (*b as f64 / self.values as f64) as f32)
                .collect()
        } else {
            vec![0.0; self.dimension]
        };
        StoreStats { n, avg, hist }
    }
}

/// The in-memory point store.
pub struct PointStore {
    metric: DistanceMetric,
    rebuild_drift: f64,
    points: RwLock<HashMap<PointKey, Stored>>,
    snapshot: RwLock<Arc<Vec<(PointKey, PointValue)>>>,
    drift: AtomicUsize,
    stats: Mutex<StatsAccumulator>,
}

impl PointStore {
    pub fn new(config: &NodeConfig) -> Self {
        Self {
            metric: config.metric,
            rebuild_drift: config.rebuild_drift,
            points: RwLock::new(HashMap::new()),
            snapshot: RwLock::new(Arc::new(Vec::new())),
            drift: AtomicUsize::new(0),
            stats: Mutex::new(StatsAccumulator::new(config.dimension)),
        }
    }

    /// Inserts a point. Re-inserting an equal `(key, value)` is a no-op;
    /// on a key match the higher version wins. Never fails.
    pub fn insert(&self, key: PointKey, value: PointValue) {
        let mut points = self.points.write().unwrap();
        match points.get_mut(&key) {
            Some(existing) => {
                if value.version <= existing.value.version {
                    return;
                }
                existing.value = value;
                existing.written_at = unix_now();
            }
            None => {
                self.stats.lock().unwrap().add(&key.feature);
                points.insert(
                    key,
                    Stored {
                        value,
                        written_at: unix_now(),
                    },
                );
            }
        }
        self.drift.fetch_add(1, Ordering::Relaxed);
    }

    /// Removes a point if present.
    pub fn delete(&self, key: &PointKey) {
        let mut points = self.points.write().unwrap();
        if points.remove(key).is_some() {
            self.stats.lock().unwrap().remove(&key.feature);
            self.drift.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Number of distinct keys held.
    pub fn len(&self) -> usize {
        self.points.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns up to `k` points ordered by ascending distance to `query`,
    /// ties broken by lexicographic label order. Searches a consistent
    /// snapshot taken at call time.
    pub fn get_knn(&self, k: usize, query: &[f32]) -> Vec<ScoredPoint> {
        if k == 0 {
            return Vec::new();
        }
        let snapshot = self.search_snapshot();
        select_nearest(snapshot.iter(), k, query, self.metric)
    }

    /// Samples up to `limit` points uniformly without replacement.
    /// Non-positive limits return nothing.
    pub fn get_random_points(&self, limit: i64) -> Vec<(PointKey, PointValue)> {
        if limit <= 0 {
            return Vec::new();
        }
        let snapshot = self.full_snapshot();
        let amount = (limit as usize).min(snapshot.len());
        if amount == 0 {
            return Vec::new();
        }
        let mut rng = rand::thread_rng();
        rand::seq::index::sample(&mut rng, snapshot.len(), amount)
            .into_iter()
            .map(|i| snapshot[i].clone())
            .collect()
    }

    /// Every stored point, exactly once, in unspecified order. Used by
    /// the full-dump RPC.
    pub fn snapshot(&self) -> Arc<Vec<(PointKey, PointValue)>> {
        self.full_snapshot()
    }

    /// Current statistics snapshot (not a live view).
    pub fn get_stats(&self) -> StoreStats {
        let n = self.points.read().unwrap().len() as i64;
        self.stats.lock().unwrap().snapshot(n)
    }

    /// Removes up to `limit` of the oldest-written points. Returns the
    /// number actually removed.
    pub fn evict_oldest(&self, limit: usize) -> usize {
        if limit == 0 {
            return 0;
        }
        let mut points = self.points.write().unwrap();
        let mut entries: Vec<(PointKey, i64)> = points
            .iter()
            .map(|(k, s)| (k.clone(), s.written_at))
            .collect();
        entries.sort_by_key(|(_, written_at)| *written_at);

        let mut evicted = 0;
        for (key, _) in entries.into_iter().take(limit) {
            if points.remove(&key).is_some() {
                self.stats.lock().unwrap().remove(&key.feature);
                self.drift.fetch_add(1, Ordering::Relaxed);
                evicted += 1;
            }
        }
        evicted
    }

    /// Snapshot for search: rebuilt only once the drift fraction is
    /// exceeded, otherwise the previous snapshot is served as-is.
    fn search_snapshot(&self) -> Arc<Vec<(PointKey, PointValue)>> {
        let drift = self.drift.load(Ordering::Relaxed);
        if drift == 0 {
            return Arc::clone(&self.snapshot.read().unwrap());
        }
        let snapshot_len = self.snapshot.read().unwrap().len().max(1);
        if drift as f64 / snapshot_len as f64 > self.rebuild_drift {
            self.rebuild_snapshot()
        } else {
            Arc::clone(&self.snapshot.read().unwrap())
        }
    }

    /// Snapshot reflecting every pending mutation.
    fn full_snapshot(&self) -> Arc<Vec<(PointKey, PointValue)>> {
        if self.drift.load(Ordering::Relaxed) > 0 {
            self.rebuild_snapshot()
        } else {
            Arc::clone(&self.snapshot.read().unwrap())
        }
    }

    fn rebuild_snapshot(&self) -> Arc<Vec<(PointKey, PointValue)>> {
        let fresh: Arc<Vec<(PointKey, PointValue)>> = {
            let points = self.points.read().unwrap();
            Arc::new(
                points
                    .iter()
                    .map(|(k, s)| (k.clone(), s.value.clone()))
                    .collect(),
            )
        };
        *self.snapshot.write().unwrap() = Arc::clone(&fresh);
        self.drift.store(0, Ordering::Relaxed);
        fresh
    }
}
