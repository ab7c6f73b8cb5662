//! Core data types for VecMesh.
//!
//! This crate holds the vocabulary shared by the storage engine and the
//! service layer: point keys and values, scored search results, distance
//! metrics, and the top-k selection used by both the point store and the
//! per-request reducer. It is free of async code and I/O.

use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::hash::{Hash, Hasher};

/// Default feature dimensionality. Features shorter than the configured
/// dimension are right-zero-padded wherever a fixed width is required
/// (cache fingerprints, statistics).
pub const DEFAULT_DIMENSION: usize = 1024;

// =============================================================================
// Distance Metrics
// =============================================================================

/// Distance metric for feature similarity.
///
/// Euclidean is the default; cosine is the init-time alternative. Lower
/// distance always means more similar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DistanceMetric {
    /// Euclidean (L2) distance. Range: 0.0 to infinity.
    #[default]
    Euclidean,
    /// Cosine distance (1 - cosine similarity). Range: 0.0 to 2.0.
    Cosine,
}

impl DistanceMetric {
    /// Computes the distance between two vectors under this metric.
    ///
    /// Vectors of unequal length are compared as if the shorter one were
    /// right-zero-padded.
    pub fn distance(&self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            DistanceMetric::Euclidean => euclidean_distance(a, b),
            DistanceMetric::Cosine => cosine_distance(a, b),
        }
    }
}

impl std::fmt::Display for DistanceMetric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DistanceMetric::Euclidean => write!(f, "euclidean"),
            DistanceMetric::Cosine => write!(f, "cosine"),
        }
    }
}

/// Computes the Euclidean (L2) distance between two vectors.
///
/// The shorter vector is treated as right-zero-padded, so operands of
/// unequal length are always comparable.
pub fn euclidean_distance(a: &[f32], b: &[f32]) -> f32 {
    let len = a.len().max(b.len());
    let mut sum = 0.0f32;
    for i in 0..len {
        let x = a.get(i).copied().unwrap_or(0.0);
        let y = b.get(i).copied().unwrap_or(0.0);
        let d = x - y;
        sum += d * d;
    }
    sum.sqrt()
}

/// Computes the cosine distance (1 - cosine similarity) between two vectors.
///
/// Zero padding does not change norms or the dot product, so unequal
/// lengths are handled by iterating over the overlap. Zero vectors are at
/// maximum distance from everything.
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    let norm_product = norm_a * norm_b;
    if norm_product == 0.0 {
        return 1.0;
    }
    1.0 - (dot / norm_product)
}

/// Euclidean distance between two summary vectors, right-zero-padding the
/// shorter operand. Used for cross-node comparison of averages and
/// histograms during data exchange.
pub fn vector_distance(a: &[f32], b: &[f32]) -> f32 {
    euclidean_distance(a, b)
}

// =============================================================================
// Points
// =============================================================================

/// Identity of a stored datum.
///
/// Two keys are equal iff every field is bitwise equal; the feature is
/// compared and hashed through its `f32` bit patterns so that keys can
/// live in hash maps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PointKey {
    /// The feature vector as received on the wire.
    pub feature: Vec<f32>,
    /// First reshaping dimension.
    pub dim1: u32,
    /// Second reshaping dimension.
    pub dim2: u32,
    /// First reshaping size.
    pub size1: u32,
    /// Second reshaping size.
    pub size2: u32,
    /// Opaque group label.
    pub group_label: Vec<u8>,
}

impl PartialEq for PointKey {
    fn eq(&self, other: &Self) -> bool {
        self.dim1 == other.dim1
            && self.dim2 == other.dim2
            && self.size1 == other.size1
            && self.size2 == other.size2
            && self.group_label == other.group_label
            && self.feature.len() == other.feature.len()
            && self
                .feature
                .iter()
                .zip(other.feature.iter())
                .all(|(a, b)| a.to_bits() == b.to_bits())
    }
}

impl Eq for PointKey {}

impl Hash for PointKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for v in &self.feature {
            v.to_bits().hash(state);
        }
        self.dim1.hash(state);
        self.dim2.hash(state);
        self.size1.hash(state);
        self.size2.hash(state);
        self.group_label.hash(state);
    }
}

/// Payload of a stored datum. On re-insert of an equal key the higher
/// version wins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PointValue {
    /// Opaque label.
    pub label: Vec<u8>,
    /// Monotonically increasing version counter.
    pub version: u64,
}

/// A point scored against a query, produced by k-NN search.
#[derive(Debug, Clone)]
pub struct ScoredPoint {
    pub key: PointKey,
    pub value: PointValue,
    pub distance: f32,
}

// =============================================================================
// Top-k selection
// =============================================================================

/// Heap entry ordered by (distance, label) so that ties in distance break
/// by lexicographic label order.
struct Candidate {
    distance: OrderedFloat<f32>,
    key: PointKey,
    value: PointValue,
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.distance == other.distance && self.value.label == other.value.label
    }
}

impl Eq for Candidate {}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.distance
            .cmp(&other.distance)
            .then_with(|| self.value.label.cmp(&other.value.label))
    }
}

/// Selects the k nearest points to `query` from `points`.
///
/// Maintains a bounded max-heap of the k best candidates, so the cost is
/// O(n log k) over the input. Results are ordered by ascending distance
/// with ties broken by lexicographic label order.
pub fn select_nearest<'a, I>(
    points: I,
    k: usize,
    query: &[f32],
    metric: DistanceMetric,
) -> Vec<ScoredPoint>
where
    I: IntoIterator<Item = &'a (PointKey, PointValue)>,
{
    if k == 0 {
        return Vec::new();
    }

    let mut heap: BinaryHeap<Candidate> = BinaryHeap::with_capacity(k + 1);
    for (key, value) in points {
        let distance = OrderedFloat(metric.distance(&key.feature, query));
        if heap.len() == k {
            // Skip without cloning when the candidate cannot displace the
            // current worst entry.
            let worst = heap.peek().unwrap();
            if distance > worst.distance
                || (distance == worst.distance && value.label >= worst.value.label)
            {
                continue;
            }
        }
        heap.push(Candidate {
            distance,
            key: key.clone(),
            value: value.clone(),
        });
        if heap.len() > k {
            heap.pop();
        }
    }

    heap.into_sorted_vec()
        .into_iter()
        .map(|c| ScoredPoint {
            key: c.key,
            value: c.value,
            distance: c.distance.0,
        })
        .collect()
}
