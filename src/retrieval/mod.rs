//! Retrieval ranking
//!
//! Scores stored memory fragments against a query by weighted embedding
//! similarity, adds exact and fuzzy keyword boosts, and returns the top
//! fragments above a relevance threshold.

mod fragment;
mod fuzzy;
mod keywords;
mod ranker;
mod similarity;

pub use fragment::{FragmentEmbeddings, MemoryFragment};
pub use fuzzy::{keyword_boost, levenshtein, match_keywords, KeywordBoost, KeywordMatch, MatchKind};
pub use keywords::{effective_level, extract_keywords, tokenize_words, Language, StopWordLevel};
pub use ranker::{RankedResult, RankerSettings, RetrievalQuery, RetrievalRanker};
pub use similarity::{cosine_similarity, weighted_similarity, SimilarityWeights};
