//! Per-request result accumulator.
//!
//! `TempData` merges features streamed from the local store and from
//! remote peers during a single query. It is request-scoped: built on the
//! coordinator, discarded at request end, and never exposed to peers.

use std::collections::HashMap;

use vecmesh_core::{select_nearest, DistanceMetric, PointKey, PointValue, ScoredPoint};

/// Single-use accumulator with the point store's search contract.
pub struct TempData {
    metric: DistanceMetric,
    points: HashMap<PointKey, PointValue>,
    snapshot: Vec<(PointKey, PointValue)>,
    dirty: bool,
}

impl TempData {
    pub fn new(metric: DistanceMetric) -> Self {
        Self {
            metric,
            points: HashMap::new(),
            snapshot: Vec::new(),
            dirty: false,
        }
    }

    /// Inserts a merged feature. Equal keys dedupe silently; the higher
    /// version wins. O(1) amortized.
    pub fn insert(&mut self, key: PointKey, value: PointValue) {
        match self.points.get_mut(&key) {
            Some(existing) => {
                if value.version > existing.version {
                    *existing = value;
                    self.dirty = true;
                }
            }
            None => {
                self.points.insert(key, value);
                self.dirty = true;
            }
        }
    }

    /// Builds or refreshes the search snapshot.
    pub fn process(&mut self, finalize: bool) {
        if self.dirty || finalize {
            self.snapshot = self
                .points
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            self.dirty = false;
        }
    }

    /// Top-k over the accumulated points, with the store's ordering
    /// contract. Call [`TempData::process`] first.
    pub fn get_knn(&self, k: usize, query: &[f32]) -> Vec<ScoredPoint> {
        select_nearest(self.snapshot.iter(), k, query, self.metric)
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}
