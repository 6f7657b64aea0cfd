//! Embedding blob encoding
//!
//! Vectors are stored as raw little-endian `f32` bytes; the dimension lives in
//! its own column so a blob can be checked before it is trusted.

use crate::error::{MnemoError, Result};

/// Serialize a vector as little-endian 4-byte floats
pub fn encode_embedding(vector: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vector.len() * 4);
    for value in vector {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

/// Rebuild a vector, refusing blobs that disagree with the stored dimension
pub fn decode_embedding(bytes: &[u8], dimension: usize) -> Result<Vec<f32>> {
    if bytes.len() % 4 != 0 || bytes.len() / 4 != dimension {
        return Err(MnemoError::DimensionMismatch {
            expected: dimension,
            actual: bytes.len() / 4,
        });
    }

    Ok(bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}
