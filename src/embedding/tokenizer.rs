//! Fixed-length subword tokenization for BERT-style encoders

use super::EmbeddingError;
use std::path::Path;
use tokenizers::Tokenizer;
use tracing::warn;

/// Token arrays for one text, always exactly `max_length` long
#[derive(Debug, Clone, PartialEq)]
pub struct TokenizationResult {
    pub input_ids: Vec<i64>,
    pub attention_mask: Vec<i64>,
    /// Only populated for models that declare a `token_type_ids` input
    pub token_type_ids: Option<Vec<i64>>,
    /// Non-padding positions, boundary tokens included
    pub token_count: usize,
}

impl TokenizationResult {
    /// Release the backing buffers
    pub fn clear(&mut self) {
        self.input_ids = Vec::new();
        self.attention_mask = Vec::new();
        self.token_type_ids = None;
        self.token_count = 0;
    }
}

/// Boundary and padding token ids
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpecialTokens {
    pub cls: u32,
    pub sep: u32,
    pub pad: u32,
}

impl SpecialTokens {
    /// Look the special tokens up in a tokenizer's vocabulary
    ///
    /// BERT vocabularies use `[CLS]`/`[SEP]`/`[PAD]`, RoBERTa-style ones
    /// `<s>`/`</s>`/`<pad>`.
    pub fn from_tokenizer(tokenizer: &Tokenizer) -> Result<Self, EmbeddingError> {
        let lookup = |candidates: &[&str]| {
            candidates
                .iter()
                .find_map(|token| tokenizer.token_to_id(token))
        };

        let cls = lookup(&["[CLS]", "<s>"]).ok_or_else(|| {
            EmbeddingError::InitializationError("tokenizer has no [CLS] or <s> token".to_string())
        })?;
        let sep = lookup(&["[SEP]", "</s>"]).ok_or_else(|| {
            EmbeddingError::InitializationError("tokenizer has no [SEP] or </s> token".to_string())
        })?;
        let pad = lookup(&["[PAD]", "<pad>", "<|pad|>"]).unwrap_or(0);

        Ok(Self { cls, sep, pad })
    }
}

/// Lay interior token ids out into a fixed-length encoding
///
/// Slot 0 holds the leading boundary token, the interior is truncated to
/// `max_length - 2` tokens, the trailing boundary token follows it, and the
/// rest is padding with a zero attention mask.
pub fn build_fixed_length(
    interior: &[u32],
    special: SpecialTokens,
    max_length: usize,
    with_token_types: bool,
) -> TokenizationResult {
    let max_length = max_length.max(2);
    let kept = interior.len().min(max_length - 2);

    let mut input_ids = Vec::with_capacity(max_length);
    input_ids.push(special.cls as i64);
    input_ids.extend(interior[..kept].iter().map(|&id| id as i64));
    input_ids.push(special.sep as i64);

    let token_count = input_ids.len();
    input_ids.resize(max_length, special.pad as i64);

    let mut attention_mask = vec![1i64; token_count];
    attention_mask.resize(max_length, 0);

    TokenizationResult {
        input_ids,
        attention_mask,
        token_type_ids: with_token_types.then(|| vec![0i64; max_length]),
        token_count,
    }
}

/// Wrapper around a HuggingFace tokenizer producing fixed-length encodings
pub struct TextTokenizer {
    inner: Tokenizer,
    special: SpecialTokens,
    max_length: usize,
}

impl TextTokenizer {
    /// Load a `tokenizer.json` from disk
    pub fn from_file(path: &Path, max_length: usize) -> Result<Self, EmbeddingError> {
        let inner = Tokenizer::from_file(path).map_err(|e| {
            EmbeddingError::InitializationError(format!(
                "failed to load tokenizer {:?}: {}",
                path, e
            ))
        })?;
        Self::from_tokenizer(inner, max_length)
    }

    /// Load a tokenizer from its JSON definition
    pub fn from_json(json: &str, max_length: usize) -> Result<Self, EmbeddingError> {
        let inner = Tokenizer::from_bytes(json.as_bytes())
            .map_err(|e| EmbeddingError::InitializationError(e.to_string()))?;
        Self::from_tokenizer(inner, max_length)
    }

    fn from_tokenizer(inner: Tokenizer, max_length: usize) -> Result<Self, EmbeddingError> {
        if max_length < 2 {
            return Err(EmbeddingError::InitializationError(format!(
                "max sequence length must leave room for boundary tokens, got {}",
                max_length
            )));
        }
        let special = SpecialTokens::from_tokenizer(&inner)?;
        Ok(Self {
            inner,
            special,
            max_length,
        })
    }

    /// Tokenize into a fixed-length encoding
    ///
    /// Never fails: if the tokenizer rejects the text, the result is the
    /// minimal boundary-token-only encoding.
    pub fn tokenize(&self, text: &str, with_token_types: bool) -> TokenizationResult {
        let interior = match self.inner.encode(text, false) {
            Ok(encoding) => encoding.get_ids().to_vec(),
            Err(e) => {
                warn!("Tokenizer rejected input ({} chars): {}", text.len(), e);
                Vec::new()
            }
        };

        build_fixed_length(&interior, self.special, self.max_length, with_token_types)
    }

    pub fn max_length(&self) -> usize {
        self.max_length
    }

    pub fn special_tokens(&self) -> SpecialTokens {
        self.special
    }
}
