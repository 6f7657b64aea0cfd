//! Shared fixtures for integration tests
#![allow(dead_code)]

use mnemo::embedding::{l2_normalize, EmbeddingError, EmbeddingProvider};
use mnemo::retrieval::FragmentEmbeddings;
use mnemo::storage::FragmentStore;

pub const DIMENSION: usize = 64;

/// Bag-of-words embedder: each lowercase word increments one hashed bucket
///
/// Texts sharing words get a high cosine; disjoint texts get zero.
pub struct HashingProvider;

impl EmbeddingProvider for HashingProvider {
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let mut vector = vec![0.0f32; DIMENSION];
        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            let bucket = word
                .to_lowercase()
                .bytes()
                .fold(17usize, |h, b| h.wrapping_mul(31).wrapping_add(b as usize))
                % DIMENSION;
            vector[bucket] += 1.0;
        }
        l2_normalize(&mut vector);
        Ok(vector)
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        texts.iter().map(|t| self.embed(t)).collect()
    }

    fn dimension(&self) -> usize {
        DIMENSION
    }

    fn model_name(&self) -> &str {
        "hashing-bow"
    }
}

pub fn add_fragment(store: &FragmentStore, category: &str, content: &str) -> i64 {
    let embeddings = FragmentEmbeddings::compute(&HashingProvider, category, content).unwrap();
    store.insert(category, content, &embeddings).unwrap()
}

/// Small knowledge base used across tests
pub fn seed(store: &FragmentStore) {
    add_fragment(
        store,
        "Worker pool",
        "The worker pool limits concurrent language model processes with a semaphore",
    );
    add_fragment(
        store,
        "Adapter",
        "The adapter spawns the inference executable and watches its output for response markers",
    );
    add_fragment(
        store,
        "Embeddings",
        "Sentence embeddings are mean pooled and normalized to unit length",
    );
    add_fragment(
        store,
        "Billing",
        "Invoices are sent on the first business day of every month",
    );
}
