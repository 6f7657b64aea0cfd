//! Exact and typo-tolerant keyword matching

use super::keywords::tokenize_words;
use serde::{Deserialize, Serialize};

/// Boost sizes for keyword hits
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeywordBoost {
    /// Added when every keyword occurs verbatim in the fragment
    pub exact: f32,
    /// Added when every keyword is within `max_distance` edits of a word
    pub fuzzy: f32,
    pub max_distance: usize,
    /// Shorter keywords are only matched exactly
    pub min_fuzzy_len: usize,
}

impl Default for KeywordBoost {
    fn default() -> Self {
        Self {
            exact: 0.15,
            fuzzy: 0.08,
            max_distance: 1,
            min_fuzzy_len: 4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchKind {
    Exact,
    Fuzzy { distance: usize },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeywordMatch {
    pub keyword: String,
    pub kind: MatchKind,
}

/// Levenshtein distance over characters
pub fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }

    let mut previous: Vec<usize> = (0..=b.len()).collect();
    let mut current = vec![0; b.len() + 1];

    for (i, ca) in a.iter().enumerate() {
        current[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let substitution = previous[j] + usize::from(ca != cb);
            current[j + 1] = substitution.min(previous[j + 1] + 1).min(current[j] + 1);
        }
        std::mem::swap(&mut previous, &mut current);
    }
    previous[b.len()]
}

/// Match keywords against a fragment's text
///
/// Substring hits count as exact; otherwise the closest word within
/// `max_distance` edits counts as fuzzy. Keywords shorter than
/// `min_fuzzy_len` must match a whole word, so "hi" does not hit "this".
pub fn match_keywords(keywords: &[String], text: &str, boost: &KeywordBoost) -> Vec<KeywordMatch> {
    let lowered = text.to_lowercase();
    let words = tokenize_words(text);

    keywords
        .iter()
        .filter_map(|keyword| {
            let keyword_len = keyword.chars().count();
            let short = keyword_len < boost.min_fuzzy_len;

            let exact = if short {
                words.iter().any(|word| word == keyword)
            } else {
                lowered.contains(keyword.as_str())
            };
            if exact {
                return Some(KeywordMatch {
                    keyword: keyword.clone(),
                    kind: MatchKind::Exact,
                });
            }
            if boost.max_distance == 0 || short {
                return None;
            }

            words
                .iter()
                .filter(|word| word.chars().count().abs_diff(keyword_len) <= boost.max_distance)
                .map(|word| levenshtein(keyword, word))
                .filter(|&distance| distance <= boost.max_distance)
                .min()
                .map(|distance| KeywordMatch {
                    keyword: keyword.clone(),
                    kind: MatchKind::Fuzzy { distance },
                })
        })
        .collect()
}

/// Score boost proportional to the share of keywords that matched
pub fn keyword_boost(matches: &[KeywordMatch], keyword_count: usize, boost: &KeywordBoost) -> f32 {
    if keyword_count == 0 {
        return 0.0;
    }

    let total: f32 = matches
        .iter()
        .map(|m| match m.kind {
            MatchKind::Exact => boost.exact,
            MatchKind::Fuzzy { .. } => boost.fuzzy,
        })
        .sum();
    total / keyword_count as f32
}
