//! Local sentence embeddings through ONNX Runtime
//!
//! Pipeline per call: normalize text, tokenize to a fixed length, run the
//! encoder, mean-pool the token vectors over the attention mask, then scale
//! to unit length.

use super::normalize::{normalize_text, DEFAULT_MAX_INPUT_CHARS};
use super::pooling::{l2_normalize, mean_pool};
use super::provider::verify_dimension;
use super::tokenizer::{TextTokenizer, TokenizationResult};
use super::{EmbeddingError, EmbeddingProvider};
use crate::error::{MnemoError, Result};
use ndarray::{ArrayView2, ArrayView3};
use ort::session::Session;
use ort::value::Tensor;
use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};
use tracing::{debug, info};

const TOKEN_TYPE_INPUT: &str = "token_type_ids";
const PREFERRED_OUTPUT: &str = "last_hidden_state";

/// Everything needed to load an encoder model
#[derive(Debug, Clone)]
pub struct EmbedderOptions {
    pub model_path: PathBuf,
    pub tokenizer_path: PathBuf,
    pub dimension: usize,
    pub max_sequence_length: usize,
    pub batch_size: usize,
    /// CPU-only memory ceiling: single calls drop their buffers right away
    /// and the runtime does not keep a reusable memory arena
    pub low_memory: bool,
    pub intra_threads: usize,
    pub max_input_chars: usize,
    /// Output tensor to pool; defaults to `last_hidden_state`, else the first
    pub output_name: Option<String>,
}

impl EmbedderOptions {
    pub fn new(model_path: impl Into<PathBuf>, tokenizer_path: impl Into<PathBuf>) -> Self {
        Self {
            model_path: model_path.into(),
            tokenizer_path: tokenizer_path.into(),
            dimension: 384,
            max_sequence_length: 256,
            batch_size: 32,
            low_memory: false,
            intra_threads: 1,
            max_input_chars: DEFAULT_MAX_INPUT_CHARS,
            output_name: None,
        }
    }
}

/// Encoder model plus tokenizer
pub struct OnnxEmbedder {
    session: Mutex<Session>,
    tokenizer: TextTokenizer,
    uses_token_types: bool,
    output_name: String,
    dimension: usize,
    batch_size: usize,
    low_memory: bool,
    max_input_chars: usize,
    model_name: String,
}

impl std::fmt::Debug for OnnxEmbedder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OnnxEmbedder")
            .field("model", &self.model_name)
            .field("dimension", &self.dimension)
            .field("uses_token_types", &self.uses_token_types)
            .field("output", &self.output_name)
            .finish()
    }
}

impl OnnxEmbedder {
    /// Load the model and tokenizer
    ///
    /// Missing files fail here, never at embed time. The model's declared
    /// inputs decide once whether `token_type_ids` is fed.
    pub fn new(options: EmbedderOptions) -> Result<Self> {
        for (kind, path) in [
            ("embedding model", &options.model_path),
            ("tokenizer", &options.tokenizer_path),
        ] {
            if !path.is_file() {
                return Err(MnemoError::ModelFileMissing {
                    kind,
                    path: path.clone(),
                });
            }
        }
        if options.dimension == 0 {
            return Err(MnemoError::InvalidConfigValue {
                path: "embedding.dimension".to_string(),
                message: "must be greater than 0".to_string(),
            });
        }

        let tokenizer =
            TextTokenizer::from_file(&options.tokenizer_path, options.max_sequence_length)?;

        let session = Session::builder()
            .map_err(init_error)?
            .with_intra_threads(options.intra_threads.max(1))
            .map_err(init_error)?
            .with_memory_pattern(!options.low_memory)
            .map_err(init_error)?
            .commit_from_file(&options.model_path)
            .map_err(|e| {
                EmbeddingError::InitializationError(format!(
                    "failed to load {:?}: {}",
                    options.model_path, e
                ))
            })?;

        let input_names: Vec<String> = session.inputs.iter().map(|i| i.name.clone()).collect();
        let output_names: Vec<String> = session.outputs.iter().map(|o| o.name.clone()).collect();

        for required in ["input_ids", "attention_mask"] {
            if !input_names.iter().any(|name| name == required) {
                return Err(EmbeddingError::InitializationError(format!(
                    "model does not declare a `{}` input (inputs: {:?})",
                    required, input_names
                ))
                .into());
            }
        }
        let uses_token_types = input_names.iter().any(|name| name == TOKEN_TYPE_INPUT);

        let output_name = match &options.output_name {
            Some(name) if output_names.contains(name) => name.clone(),
            Some(name) => {
                return Err(EmbeddingError::InitializationError(format!(
                    "model has no output `{}` (outputs: {:?})",
                    name, output_names
                ))
                .into())
            }
            None => output_names
                .iter()
                .find(|name| name.as_str() == PREFERRED_OUTPUT)
                .or_else(|| output_names.first())
                .cloned()
                .ok_or_else(|| {
                    EmbeddingError::InitializationError("model declares no outputs".to_string())
                })?,
        };

        let model_name = options
            .model_path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| "onnx".to_string());

        info!(
            "Loaded embedding model {:?} ({} inputs, output `{}`, dim {})",
            options.model_path,
            if uses_token_types { 3 } else { 2 },
            output_name,
            options.dimension
        );

        Ok(Self {
            session: Mutex::new(session),
            tokenizer,
            uses_token_types,
            output_name,
            dimension: options.dimension,
            batch_size: options.batch_size.max(1),
            low_memory: options.low_memory,
            max_input_chars: options.max_input_chars,
            model_name,
        })
    }

    /// Whether the model takes a third `token_type_ids` input
    pub fn uses_token_types(&self) -> bool {
        self.uses_token_types
    }

    /// Normalize and tokenize one text
    pub fn encode(&self, text: &str) -> TokenizationResult {
        let cleaned = normalize_text(text, self.max_input_chars);
        self.tokenizer.tokenize(&cleaned, self.uses_token_types)
    }

    /// Run the encoder over a batch of encodings and pool the output
    fn infer(&self, encodings: &[TokenizationResult]) -> std::result::Result<Vec<Vec<f32>>, EmbeddingError> {
        let batch = encodings.len();
        let seq_len = self.tokenizer.max_length();
        let shape = vec![batch as i64, seq_len as i64];

        let mut ids = Vec::with_capacity(batch * seq_len);
        let mut mask = Vec::with_capacity(batch * seq_len);
        for encoding in encodings {
            ids.extend_from_slice(&encoding.input_ids);
            mask.extend_from_slice(&encoding.attention_mask);
        }
        if ids.len() != batch * seq_len {
            return Err(EmbeddingError::InvalidInput(format!(
                "encodings must all be {} tokens long",
                seq_len
            )));
        }

        let ids_tensor = Tensor::from_array((shape.clone(), ids))
            .map_err(|e| EmbeddingError::GenerationError(e.to_string()))?;
        let mask_tensor = Tensor::from_array((shape.clone(), mask.clone()))
            .map_err(|e| EmbeddingError::GenerationError(e.to_string()))?;

        let mut session = self.session.lock().unwrap_or_else(PoisonError::into_inner);
        let run = if self.uses_token_types {
            let types: Vec<i64> = encodings
                .iter()
                .flat_map(|encoding| match &encoding.token_type_ids {
                    Some(types) => types.clone(),
                    None => vec![0; seq_len],
                })
                .collect();
            let types_tensor = Tensor::from_array((shape, types))
                .map_err(|e| EmbeddingError::GenerationError(e.to_string()))?;
            session.run(ort::inputs![
                "input_ids" => ids_tensor,
                "attention_mask" => mask_tensor,
                TOKEN_TYPE_INPUT => types_tensor
            ])
        } else {
            session.run(ort::inputs![
                "input_ids" => ids_tensor,
                "attention_mask" => mask_tensor
            ])
        };
        let outputs = run
            .map_err(|e| EmbeddingError::GenerationError(format!("inference failed: {}", e)))?;

        let output = outputs.get(self.output_name.as_str()).ok_or_else(|| {
            EmbeddingError::GenerationError(format!("model returned no `{}`", self.output_name))
        })?;
        let (dims, data) = output
            .try_extract_tensor::<f32>()
            .map_err(|e| EmbeddingError::GenerationError(e.to_string()))?;
        let dims: Vec<usize> = dims.iter().map(|&d| d as usize).collect();

        let mut vectors = match dims.as_slice() {
            [b, s, d] => {
                let hidden = ArrayView3::from_shape((*b, *s, *d), data)
                    .map_err(|e| EmbeddingError::GenerationError(e.to_string()))?;
                let mask = ArrayView2::from_shape((batch, seq_len), &mask)
                    .map_err(|e| EmbeddingError::GenerationError(e.to_string()))?;
                if *b != batch || *s != seq_len {
                    return Err(EmbeddingError::GenerationError(format!(
                        "output shape {:?} does not match input [{}, {}]",
                        dims, batch, seq_len
                    )));
                }
                mean_pool(hidden, mask)
            }
            // already pooled by the model
            [b, d] if *b == batch && *d > 0 => data.chunks(*d).map(<[f32]>::to_vec).collect(),
            _ => {
                return Err(EmbeddingError::GenerationError(format!(
                    "unexpected output shape {:?}",
                    dims
                )))
            }
        };
        drop(outputs);
        drop(session);

        for vector in &mut vectors {
            verify_dimension(vector, self.dimension)?;
            l2_normalize(vector);
        }
        Ok(vectors)
    }
}

fn init_error(e: impl std::fmt::Display) -> EmbeddingError {
    EmbeddingError::InitializationError(e.to_string())
}

impl EmbeddingProvider for OnnxEmbedder {
    fn embed(&self, text: &str) -> std::result::Result<Vec<f32>, EmbeddingError> {
        let mut encoding = self.encode(text);
        debug!("Embedding {} tokens", encoding.token_count);

        let result = self.infer(std::slice::from_ref(&encoding));
        if self.low_memory {
            encoding.clear();
        }

        result?
            .pop()
            .ok_or_else(|| EmbeddingError::GenerationError("model returned an empty batch".to_string()))
    }

    fn embed_batch(&self, texts: &[String]) -> std::result::Result<Vec<Vec<f32>>, EmbeddingError> {
        let mut vectors = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(self.batch_size) {
            let encodings: Vec<TokenizationResult> =
                chunk.iter().map(|text| self.encode(text)).collect();
            vectors.extend(self.infer(&encodings)?);
        }
        debug!("Embedded batch of {} texts", texts.len());
        Ok(vectors)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_model_is_fatal_at_construction() {
        let temp = tempfile::TempDir::new().unwrap();
        let options = EmbedderOptions::new(
            temp.path().join("model.onnx"),
            temp.path().join("tokenizer.json"),
        );

        let err = OnnxEmbedder::new(options).unwrap_err();
        assert!(matches!(
            err,
            MnemoError::ModelFileMissing {
                kind: "embedding model",
                ..
            }
        ));
    }

    #[test]
    fn test_missing_tokenizer_is_fatal_at_construction() {
        let temp = tempfile::TempDir::new().unwrap();
        let model = temp.path().join("model.onnx");
        std::fs::write(&model, b"not really onnx").unwrap();

        let err = OnnxEmbedder::new(EmbedderOptions::new(model, temp.path().join("tokenizer.json")))
            .unwrap_err();
        assert!(matches!(
            err,
            MnemoError::ModelFileMissing {
                kind: "tokenizer",
                ..
            }
        ));
    }
}
