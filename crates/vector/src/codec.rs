//! Key and value encodings for vector data in the primary store

use crate::error::{VectorError, VectorResult};

/// Data key of one vector row: region prefix followed by the big-endian id.
pub fn vector_data_key(prefix: &[u8], vector_id: u64) -> Vec<u8> {
    let mut key = Vec::with_capacity(prefix.len() + 8);
    key.extend_from_slice(prefix);
    key.extend_from_slice(&vector_id.to_be_bytes());
    key
}

/// Vector id from the trailing 8 bytes of a data key.
pub fn decode_vector_id(key: &[u8]) -> Option<u64> {
    if key.len() < 8 {
        return None;
    }
    let tail: [u8; 8] = key[key.len() - 8..].try_into().ok()?;
    Some(u64::from_be_bytes(tail))
}

pub fn encode_vector_value(values: &[f32]) -> VectorResult<Vec<u8>> {
    bincode::serde::encode_to_vec(values, bincode::config::standard())
        .map_err(|e| VectorError::internal(format!("encode vector value failed: {}", e)))
}

pub fn decode_vector_value(value: &[u8]) -> VectorResult<Vec<f32>> {
    bincode::serde::decode_from_slice::<Vec<f32>, _>(value, bincode::config::standard())
        .map(|(values, _)| values)
        .map_err(|e| VectorError::internal(format!("decode vector value failed: {}", e)))
}

/// Big-endian encoding of an apply/snapshot log id for the meta store.
pub fn encode_log_id(log_id: u64) -> Vec<u8> {
    log_id.to_be_bytes().to_vec()
}

pub fn decode_log_id(value: &[u8]) -> VectorResult<u64> {
    let bytes: [u8; 8] = value
        .try_into()
        .map_err(|_| VectorError::internal(format!("bad log id length: {}", value.len())))?;
    Ok(u64::from_be_bytes(bytes))
}
