//! Query keyword extraction with language-aware stop words
//!
//! Two strictness levels: `Full` drops question words, modal verbs, pronouns
//! and auxiliaries on top of articles and prepositions; `Light` drops only
//! articles, prepositions and conjunctions, so short imperative queries
//! ("restart the pool") keep their verbs. Greetings and politeness words are
//! dropped at both levels.

use ahash::AHashSet;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// Query language
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[default]
    English,
    German,
}

impl std::str::FromStr for Language {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "en" | "english" => Ok(Language::English),
            "de" | "german" | "deutsch" => Ok(Language::German),
            other => Err(format!("unsupported language: {}", other)),
        }
    }
}

/// How aggressively stop words are removed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StopWordLevel {
    Full,
    Light,
    /// `Light` for queries of at most three words, otherwise `Full`
    #[default]
    Auto,
}

const AUTO_LIGHT_MAX_WORDS: usize = 3;

const EN_LIGHT: &[&str] = &[
    "a", "an", "the", "of", "in", "on", "at", "to", "for", "from", "by", "with", "about", "into",
    "over", "under", "and", "or", "but", "as",
];

const EN_GREETINGS: &[&str] = &[
    "hello", "hi", "hey", "hiya", "thanks", "thank", "thx", "please", "bye", "goodbye",
];

const EN_FULL_EXTRA: &[&str] = &[
    // question words
    "what", "who", "whom", "whose", "which", "when", "where", "why", "how",
    // modal verbs
    "can", "could", "would", "should", "will", "shall", "may", "might", "must",
    // pronouns
    "i", "me", "my", "you", "your", "he", "him", "his", "she", "her", "it", "its", "we", "us",
    "our", "they", "them", "their", "this", "that", "these", "those",
    // auxiliaries
    "is", "are", "was", "were", "be", "been", "am", "do", "does", "did", "have", "has", "had",
    "there", "some", "any",
];

const DE_LIGHT: &[&str] = &[
    "der", "die", "das", "den", "dem", "des", "ein", "eine", "einen", "einem", "einer", "eines",
    "und", "oder", "aber", "in", "im", "an", "am", "auf", "aus", "bei", "mit", "nach", "von",
    "vom", "zu", "zum", "zur", "für", "über", "unter",
];

const DE_GREETINGS: &[&str] = &["hallo", "hi", "hey", "servus", "moin", "danke", "bitte", "tschüss"];

const DE_FULL_EXTRA: &[&str] = &[
    "wer", "was", "wann", "wo", "warum", "wie", "welche", "welcher", "welches",
    "kann", "können", "könnte", "soll", "sollte", "muss", "müssen", "darf", "will", "möchte",
    "ich", "du", "er", "sie", "es", "wir", "ihr", "mich", "mir", "dich", "dir", "uns", "euch",
    "ist", "sind", "war", "hat", "habe", "haben",
];

struct StopWords {
    light: AHashSet<&'static str>,
    full: AHashSet<&'static str>,
}

impl StopWords {
    fn build(light: &[&'static str], greetings: &[&'static str], extra: &[&'static str]) -> Self {
        let light: AHashSet<_> = light.iter().chain(greetings).copied().collect();
        let full = light.iter().copied().chain(extra.iter().copied()).collect();
        Self { light, full }
    }
}

fn stop_words(language: Language) -> &'static StopWords {
    static ENGLISH: OnceLock<StopWords> = OnceLock::new();
    static GERMAN: OnceLock<StopWords> = OnceLock::new();

    match language {
        Language::English => ENGLISH.get_or_init(|| StopWords::build(EN_LIGHT, EN_GREETINGS, EN_FULL_EXTRA)),
        Language::German => GERMAN.get_or_init(|| StopWords::build(DE_LIGHT, DE_GREETINGS, DE_FULL_EXTRA)),
    }
}

/// Lowercased words of a text
pub fn tokenize_words(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|word| !word.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// Resolve `Auto` against a concrete query
pub fn effective_level(level: StopWordLevel, word_count: usize) -> StopWordLevel {
    match level {
        StopWordLevel::Auto if word_count <= AUTO_LIGHT_MAX_WORDS => StopWordLevel::Light,
        StopWordLevel::Auto => StopWordLevel::Full,
        other => other,
    }
}

/// Keywords left after stop-word removal, deduplicated, in query order
pub fn extract_keywords(query: &str, language: Language, level: StopWordLevel) -> Vec<String> {
    let words = tokenize_words(query);
    let set = match effective_level(level, words.len()) {
        StopWordLevel::Light => &stop_words(language).light,
        _ => &stop_words(language).full,
    };

    let mut seen = AHashSet::new();
    words
        .into_iter()
        .filter(|word| word.chars().count() >= 2)
        .filter(|word| !set.contains(word.as_str()))
        .filter(|word| seen.insert(word.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_level_strips_question_words() {
        let keywords = extract_keywords(
            "How can I restart the worker pool?",
            Language::English,
            StopWordLevel::Full,
        );
        assert_eq!(keywords, vec!["restart", "worker", "pool"]);
    }

    #[test]
    fn test_light_level_keeps_imperatives() {
        let keywords = extract_keywords("show me the logs", Language::English, StopWordLevel::Light);
        assert_eq!(keywords, vec!["show", "me", "logs"]);
    }

    #[test]
    fn test_auto_level() {
        assert_eq!(effective_level(StopWordLevel::Auto, 3), StopWordLevel::Light);
        assert_eq!(effective_level(StopWordLevel::Auto, 4), StopWordLevel::Full);
        assert_eq!(effective_level(StopWordLevel::Full, 1), StopWordLevel::Full);

        let long = extract_keywords(
            "what is the adapter timeout",
            Language::English,
            StopWordLevel::Auto,
        );
        assert_eq!(long, vec!["adapter", "timeout"]);
    }

    #[test]
    fn test_greeting_only_query_is_empty_under_full() {
        assert!(extract_keywords("Hello!", Language::English, StopWordLevel::Full).is_empty());
    }

    #[test]
    fn test_greetings_dropped_at_every_level() {
        for level in [StopWordLevel::Light, StopWordLevel::Auto, StopWordLevel::Full] {
            assert!(extract_keywords("hi", Language::English, level).is_empty());
            assert!(extract_keywords("Hallo", Language::German, level).is_empty());
        }
        assert_eq!(
            extract_keywords("hey, restart pool please", Language::English, StopWordLevel::Auto),
            vec!["restart", "pool"]
        );
    }

    #[test]
    fn test_german_stop_words() {
        let keywords = extract_keywords(
            "Wie kann ich den Speicher für das Modell ändern?",
            Language::German,
            StopWordLevel::Full,
        );
        assert_eq!(keywords, vec!["speicher", "modell", "ändern"]);
    }

    #[test]
    fn test_deduplicates_and_drops_single_letters() {
        let keywords = extract_keywords("pool x POOL pool", Language::English, StopWordLevel::Light);
        assert_eq!(keywords, vec!["pool"]);
    }

    #[test]
    fn test_language_from_str() {
        assert_eq!("de".parse::<Language>().unwrap(), Language::German);
        assert_eq!("English".parse::<Language>().unwrap(), Language::English);
        assert!("fr".parse::<Language>().is_err());
    }
}
