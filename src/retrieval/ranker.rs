//! Ranks stored fragments against a query

use super::fuzzy::{keyword_boost, match_keywords, KeywordBoost};
use super::keywords::{extract_keywords, Language, StopWordLevel};
use super::similarity::{weighted_similarity, SimilarityWeights};
use super::MemoryFragment;
use crate::config::RetrievalConfig;
use crate::embedding::{EmbeddingError, EmbeddingProvider};
use crate::error::Result;
use crate::storage::FragmentStore;
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

/// Query with its filters
#[derive(Debug, Clone)]
pub struct RetrievalQuery {
    pub text: String,
    pub top_k: usize,
    pub min_relevance_score: f32,
    /// Case-insensitive category allow-list
    pub categories: Option<Vec<String>>,
    /// Truncate returned fragment content to this many characters
    pub max_chars: Option<usize>,
    pub language: Language,
    pub stop_words: StopWordLevel,
}

impl RetrievalQuery {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            top_k: 5,
            min_relevance_score: 0.5,
            categories: None,
            max_chars: None,
            language: Language::default(),
            stop_words: StopWordLevel::default(),
        }
    }

    /// Start from the configured defaults
    pub fn from_config(text: impl Into<String>, config: &RetrievalConfig) -> Self {
        Self {
            top_k: config.top_k,
            min_relevance_score: config.min_relevance_score,
            max_chars: config.max_fragment_chars,
            language: config.language,
            stop_words: config.stop_words,
            ..Self::new(text)
        }
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    pub fn with_min_score(mut self, score: f32) -> Self {
        self.min_relevance_score = score;
        self
    }

    pub fn with_categories(mut self, categories: Vec<String>) -> Self {
        self.categories = Some(categories);
        self
    }

    pub fn with_max_chars(mut self, max_chars: usize) -> Self {
        self.max_chars = Some(max_chars);
        self
    }

    pub fn with_language(mut self, language: Language) -> Self {
        self.language = language;
        self
    }

    pub fn with_stop_words(mut self, level: StopWordLevel) -> Self {
        self.stop_words = level;
        self
    }

    fn allows(&self, category: &str) -> bool {
        match &self.categories {
            Some(allowed) => allowed.iter().any(|c| c.eq_ignore_ascii_case(category)),
            None => true,
        }
    }
}

/// One surviving fragment with its relevance
#[derive(Debug, Clone, Serialize)]
pub struct RankedResult {
    pub fragment: MemoryFragment,
    /// Final score in `0..=1`
    pub score: f32,
    /// Embedding similarity before keyword boosts
    pub similarity: f32,
    pub matched_keywords: Vec<String>,
}

/// Scoring knobs
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RankerSettings {
    pub weights: SimilarityWeights,
    pub boost: KeywordBoost,
}

impl RankerSettings {
    pub fn from_config(config: &RetrievalConfig) -> Self {
        Self {
            weights: config.weights,
            boost: config.keyword_boost,
        }
    }
}

/// Embedding similarity plus keyword boosts
pub struct RetrievalRanker {
    provider: Arc<dyn EmbeddingProvider>,
    settings: RankerSettings,
}

impl RetrievalRanker {
    pub fn new(provider: Arc<dyn EmbeddingProvider>, settings: RankerSettings) -> Self {
        Self { provider, settings }
    }

    pub fn settings(&self) -> &RankerSettings {
        &self.settings
    }

    /// Search the store's searchable fragments
    pub fn search(&self, store: &FragmentStore, query: &RetrievalQuery) -> Result<Vec<RankedResult>> {
        let candidates = store.list_searchable(query.categories.as_deref())?;
        debug!("Ranking {} candidate fragments", candidates.len());
        self.rank(query, candidates)
    }

    /// Embed the query and rank the given fragments
    pub fn rank(
        &self,
        query: &RetrievalQuery,
        fragments: Vec<MemoryFragment>,
    ) -> Result<Vec<RankedResult>> {
        if query.text.trim().is_empty() {
            return Err(EmbeddingError::InvalidInput("query text cannot be empty".to_string()).into());
        }

        let embedding = self.provider.embed(&query.text)?;
        Ok(self.rank_with_embedding(query, &embedding, fragments))
    }

    /// Rank fragments against an already computed query embedding
    pub fn rank_with_embedding(
        &self,
        query: &RetrievalQuery,
        query_embedding: &[f32],
        fragments: Vec<MemoryFragment>,
    ) -> Vec<RankedResult> {
        let keywords = extract_keywords(&query.text, query.language, query.stop_words);
        debug!("Query keywords: {:?}", keywords);

        let mut results: Vec<RankedResult> = fragments
            .into_iter()
            .filter(|fragment| fragment.is_searchable() && query.allows(&fragment.category))
            .map(|fragment| {
                let similarity =
                    weighted_similarity(query_embedding, &fragment.embeddings, &self.settings.weights);

                let matches = match_keywords(&keywords, &fragment.searchable_text(), &self.settings.boost);
                let boost = keyword_boost(&matches, keywords.len(), &self.settings.boost);

                RankedResult {
                    score: (similarity + boost).clamp(0.0, 1.0),
                    similarity,
                    matched_keywords: matches.into_iter().map(|m| m.keyword).collect(),
                    fragment,
                }
            })
            .collect();

        results.sort_by(|a, b| b.score.total_cmp(&a.score));
        results.truncate(query.top_k);
        results.retain(|r| r.score >= query.min_relevance_score);

        if let Some(max_chars) = query.max_chars {
            for result in &mut results {
                truncate_chars(&mut result.fragment.content, max_chars);
            }
        }
        results
    }
}

fn truncate_chars(text: &mut String, max_chars: usize) {
    if let Some((cut, _)) = text.char_indices().nth(max_chars) {
        text.truncate(cut);
    }
}
