//! Cosine and weighted multi-vector similarity

use super::FragmentEmbeddings;
use crate::error::{MnemoError, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Weight of each embedding kind in the combined similarity
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimilarityWeights {
    pub category: f32,
    pub content: f32,
    pub combined: f32,
}

impl Default for SimilarityWeights {
    fn default() -> Self {
        Self {
            category: 0.4,
            content: 0.3,
            combined: 0.3,
        }
    }
}

/// Cosine similarity of two vectors of equal length
///
/// Vectors of different lengths are an error, never truncated or padded.
/// A zero vector has similarity 0 with everything.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Result<f32> {
    if a.len() != b.len() {
        return Err(MnemoError::DimensionMismatch {
            expected: a.len(),
            actual: b.len(),
        });
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return Ok(0.0);
    }
    Ok(dot / (norm_a.sqrt() * norm_b.sqrt()))
}

/// Weighted similarity of a query against a fragment's embeddings
///
/// Only embeddings that exist and share the query's dimension take part; the
/// weights are renormalized over that subset. With none usable the result
/// is 0.
pub fn weighted_similarity(
    query: &[f32],
    embeddings: &FragmentEmbeddings,
    weights: &SimilarityWeights,
) -> f32 {
    let parts = [
        (&embeddings.category, weights.category),
        (&embeddings.content, weights.content),
        (&embeddings.combined, weights.combined),
    ];

    let mut score = 0.0f32;
    let mut total_weight = 0.0f32;
    for (vector, weight) in parts {
        let Some(vector) = vector else { continue };
        match cosine_similarity(query, vector) {
            Ok(similarity) => {
                score += weight * similarity;
                total_weight += weight;
            }
            Err(e) => debug!("Skipping embedding: {}", e),
        }
    }

    if total_weight > 0.0 {
        score / total_weight
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(v: &[f32]) -> Vec<f32> {
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        v.iter().map(|x| x / norm).collect()
    }

    #[test]
    fn test_self_similarity_is_one() {
        let v = unit(&[0.3, -1.2, 4.0, 0.01]);
        assert!((cosine_similarity(&v, &v).unwrap() - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_orthogonal_and_opposite() {
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).unwrap(), 0.0);
        assert!((cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]).unwrap() + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_dimension_mismatch_is_an_error() {
        let err = cosine_similarity(&[1.0, 0.0, 0.0], &[1.0, 0.0]).unwrap_err();
        assert!(matches!(
            err,
            MnemoError::DimensionMismatch {
                expected: 3,
                actual: 2
            }
        ));
    }

    #[test]
    fn test_zero_vector() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]).unwrap(), 0.0);
    }

    #[test]
    fn test_combined_only_equals_plain_cosine() {
        let query = unit(&[1.0, 2.0, 3.0]);
        let combined = unit(&[3.0, 2.0, 1.0]);
        let embeddings = FragmentEmbeddings::combined_only(combined.clone());

        let weighted = weighted_similarity(&query, &embeddings, &SimilarityWeights::default());
        let plain = cosine_similarity(&query, &combined).unwrap();
        assert!((weighted - plain).abs() < 1e-6);
    }

    #[test]
    fn test_weights_renormalize_over_present_parts() {
        let query = vec![1.0, 0.0];
        let embeddings = FragmentEmbeddings {
            combined: Some(vec![0.0, 1.0]), // cos 0
            category: Some(vec![1.0, 0.0]), // cos 1
            content: None,
        };

        let score = weighted_similarity(&query, &embeddings, &SimilarityWeights::default());
        // 0.4 * 1 + 0.3 * 0 over 0.7
        assert!((score - 0.4 / 0.7).abs() < 1e-6);
    }

    #[test]
    fn test_mismatched_parts_are_skipped() {
        let query = vec![1.0, 0.0];
        let embeddings = FragmentEmbeddings {
            combined: Some(vec![1.0, 0.0]),
            category: Some(vec![0.0, 1.0, 0.0]),
            content: None,
        };
        let score = weighted_similarity(&query, &embeddings, &SimilarityWeights::default());
        assert!((score - 1.0).abs() < 1e-6);

        let none = FragmentEmbeddings::default();
        assert_eq!(weighted_similarity(&query, &none, &SimilarityWeights::default()), 0.0);
    }
}
