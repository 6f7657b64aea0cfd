/// Embedding generation
///
/// Turns text into unit-length vectors for the retrieval ranker.
/// Architecture:
/// - EmbeddingProvider trait for abstraction
/// - OnnxEmbedder runs a local BERT-style encoder (e.g. all-MiniLM-L6-v2, 384-dim)
/// - normalize / tokenizer / pooling are the pure stages of its pipeline
mod normalize;
mod onnx;
mod pooling;
mod provider;
mod tokenizer;

pub use normalize::{normalize_text, DEFAULT_MAX_INPUT_CHARS};
pub use onnx::{EmbedderOptions, OnnxEmbedder};
pub use pooling::{l2_norm, l2_normalize, mean_pool};
pub use provider::{EmbeddingError, EmbeddingProvider};
pub use tokenizer::{build_fixed_length, SpecialTokens, TextTokenizer, TokenizationResult};
