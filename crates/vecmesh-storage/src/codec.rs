//! Binary codec for persisted keys and values.
//!
//! The store itself is in-memory; this codec is the stable byte
//! representation consumed by snapshot tooling and seed-data import.
//! Failures propagate to the caller and never leave partial state behind.

use thiserror::Error;
use vecmesh_core::{PointKey, PointValue};

/// Codec errors.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("Failed to encode: {0}")]
    Encode(#[source] bincode::Error),

    #[error("Failed to decode: {0}")]
    Decode(#[source] bincode::Error),
}

pub fn encode_key(key: &PointKey) -> Result<Vec<u8>, CodecError> {
    bincode::serialize(key).map_err(CodecError::Encode)
}

pub fn decode_key(bytes: &[u8]) -> Result<PointKey, CodecError> {
    bincode::deserialize(bytes).map_err(CodecError::Decode)
}

pub fn encode_value(value: &PointValue) -> Result<Vec<u8>, CodecError> {
    bincode::serialize(value).map_err(CodecError::Encode)
}

pub fn decode_value(bytes: &[u8]) -> Result<PointValue, CodecError> {
    bincode::deserialize(bytes).map_err(CodecError::Decode)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_round_trip() {
        let key = PointKey {
            feature: vec![0.25, -1.5, f32::MIN_POSITIVE],
            dim1: 1,
            dim2: 2,
            size1: 3,
            size2: 3,
            group_label: b"group".to_vec(),
        };

        let encoded = encode_key(&key).unwrap();
        let decoded = decode_key(&encoded).unwrap();
        assert_eq!(decoded, key);
    }

    #[test]
    fn test_value_round_trip() {
        let value = PointValue {
            label: b"label".to_vec(),
            version: u64::MAX,
        };

        let encoded = encode_value(&value).unwrap();
        let decoded = decode_value(&encoded).unwrap();
        assert_eq!(decoded, value);
    }

    #[test]
    fn test_decode_garbage_fails() {
        assert!(decode_key(&[0xff; 3]).is_err());
        assert!(decode_value(&[]).is_err());
    }
}
