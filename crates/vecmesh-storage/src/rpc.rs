//! Generated protobuf types and conversions to the core data model.

use vecmesh_core::{PointKey, PointValue, ScoredPoint};

/// Generated protobuf code for the mesh service.
pub mod proto {
    tonic::include_proto!("vecmesh");
}

/// Converts a wire `Feature` into a store key/value pair.
///
/// A caller-reported zero `size2` inherits `size1`, matching the upstream
/// wire behavior.
pub fn feature_to_point(feature: &proto::Feature) -> (PointKey, PointValue) {
    datum_to_point(
        &feature.feature,
        feature.dim1,
        feature.dim2,
        feature.size1,
        feature.size2,
        &feature.group_label,
        &feature.label,
        feature.version,
    )
}

/// Converts an `InsertionRequest` into a store key/value pair.
pub fn insertion_to_point(request: &proto::InsertionRequest) -> (PointKey, PointValue) {
    datum_to_point(
        &request.feature,
        request.dim1,
        request.dim2,
        request.size1,
        request.size2,
        &request.group_label,
        &request.label,
        request.version,
    )
}

#[allow(clippy::too_many_arguments)]
fn datum_to_point(
    feature: &[f32],
    dim1: u32,
    dim2: u32,
    size1: u32,
    size2: u32,
    group_label: &[u8],
    label: &[u8],
    version: u64,
) -> (PointKey, PointValue) {
    let size2 = if size2 == 0 { size1 } else { size2 };
    (
        PointKey {
            feature: feature.to_vec(),
            dim1,
            dim2,
            size1,
            size2,
            group_label: group_label.to_vec(),
        },
        PointValue {
            label: label.to_vec(),
            version,
        },
    )
}

/// Converts a stored point back into its wire representation.
pub fn point_to_feature(key: &PointKey, value: &PointValue, timestamp: u64) -> proto::Feature {
    proto::Feature {
        feature: key.feature.clone(),
        group_label: key.group_label.clone(),
        label: value.label.clone(),
        version: value.version,
        timestamp,
        dim1: key.dim1,
        dim2: key.dim2,
        size1: key.size1,
        size2: key.size2,
    }
}

/// Converts a stored point into an insertion request for a peer.
pub fn point_to_insertion(
    key: &PointKey,
    value: &PointValue,
    timestamp: u64,
) -> proto::InsertionRequest {
    proto::InsertionRequest {
        feature: key.feature.clone(),
        group_label: key.group_label.clone(),
        label: value.label.clone(),
        version: value.version,
        timestamp,
        dim1: key.dim1,
        dim2: key.dim2,
        size1: key.size1,
        size2: key.size2,
    }
}

/// Converts a scored search result into its wire representation.
pub fn scored_to_feature(scored: &ScoredPoint, timestamp: u64) -> proto::Feature {
    point_to_feature(&scored.key, &scored.value, timestamp)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_size2_inherits_size1() {
        let feature = proto::Feature {
            feature: vec![1.0, 2.0],
            group_label: b"g".to_vec(),
            label: b"l".to_vec(),
            version: 3,
            timestamp: 0,
            dim1: 2,
            dim2: 1,
            size1: 7,
            size2: 0,
        };

        let (key, value) = feature_to_point(&feature);
        assert_eq!(key.size1, 7);
        assert_eq!(key.size2, 7);
        assert_eq!(value.version, 3);
    }

    #[test]
    fn test_explicit_size2_is_kept() {
        let request = proto::InsertionRequest {
            feature: vec![0.5],
            group_label: Vec::new(),
            label: b"x".to_vec(),
            version: 1,
            timestamp: 0,
            dim1: 0,
            dim2: 0,
            size1: 4,
            size2: 9,
        };

        let (key, _) = insertion_to_point(&request);
        assert_eq!(key.size2, 9);
    }

    #[test]
    fn test_point_feature_round_trip() {
        let feature = proto::Feature {
            feature: vec![1.0, -2.5],
            group_label: b"group".to_vec(),
            label: b"label".to_vec(),
            version: 42,
            timestamp: 11,
            dim1: 1,
            dim2: 2,
            size1: 3,
            size2: 4,
        };

        let (key, value) = feature_to_point(&feature);
        let back = point_to_feature(&key, &value, 11);
        assert_eq!(back, feature);
    }
}
