mod common;

use common::{add_fragment, seed, HashingProvider};
use mnemo::retrieval::{FragmentEmbeddings, RankerSettings, RetrievalQuery, RetrievalRanker};
use mnemo::storage::FragmentStore;
use std::sync::Arc;

fn ranker() -> RetrievalRanker {
    RetrievalRanker::new(Arc::new(HashingProvider), RankerSettings::default())
}

fn seeded_store() -> FragmentStore {
    let store = FragmentStore::in_memory().unwrap();
    seed(&store);
    store
}

#[test]
fn test_relevant_fragment_ranks_first() {
    let store = seeded_store();
    let query = RetrievalQuery::new("How does the worker pool limit processes?").with_min_score(0.0);

    let results = ranker().search(&store, &query).unwrap();

    assert!(!results.is_empty());
    assert_eq!(results[0].fragment.category, "Worker pool");
    assert!(results[0].matched_keywords.contains(&"pool".to_string()));
    for pair in results.windows(2) {
        assert!(pair[0].score >= pair[1].score);
    }
    assert!(results.iter().all(|r| (0.0..=1.0).contains(&r.score)));
}

#[test]
fn test_unrelated_greeting_returns_nothing() {
    let store = seeded_store();
    let query = RetrievalQuery::new("hello").with_min_score(0.5);

    assert!(ranker().search(&store, &query).unwrap().is_empty());
}

#[test]
fn test_typo_gets_fuzzy_boost() {
    let store = seeded_store();
    let query = RetrievalQuery::new("adaptr").with_min_score(0.0).with_top_k(4);

    let results = ranker().search(&store, &query).unwrap();

    let adapter = results
        .iter()
        .find(|r| r.fragment.category == "Adapter")
        .unwrap();
    assert_eq!(adapter.matched_keywords, vec!["adaptr"]);
    assert_eq!(results[0].fragment.category, "Adapter");
}

#[test]
fn test_category_filter_is_case_insensitive() {
    let store = seeded_store();
    let query = RetrievalQuery::new("worker pool semaphore")
        .with_min_score(0.0)
        .with_categories(vec!["billing".to_string(), "ADAPTER".to_string()]);

    let results = ranker().search(&store, &query).unwrap();

    assert!(!results.is_empty());
    assert!(results
        .iter()
        .all(|r| r.fragment.category == "Billing" || r.fragment.category == "Adapter"));
}

#[test]
fn test_top_k_and_character_cap() {
    let store = seeded_store();
    let query = RetrievalQuery::new("the worker")
        .with_min_score(0.0)
        .with_top_k(2)
        .with_max_chars(12);

    let results = ranker().search(&store, &query).unwrap();

    assert_eq!(results.len(), 2);
    assert!(results.iter().all(|r| r.fragment.content.chars().count() <= 12));
}

#[test]
fn test_fragments_without_combined_embedding_are_not_searched() {
    let store = seeded_store();
    let provider = HashingProvider;
    let category_only = FragmentEmbeddings {
        combined: None,
        category: Some(mnemo::embedding::EmbeddingProvider::embed(&provider, "Semaphore").unwrap()),
        content: None,
    };
    store
        .insert("Semaphore", "semaphore semaphore semaphore", &category_only)
        .unwrap();

    let query = RetrievalQuery::new("semaphore").with_min_score(0.0).with_top_k(10);
    let results = ranker().search(&store, &query).unwrap();

    assert!(results.iter().all(|r| r.fragment.category != "Semaphore"));
    assert_eq!(store.stats().unwrap().searchable_count, 4);
}

#[test]
fn test_new_fragment_becomes_searchable() {
    let store = seeded_store();
    let query = RetrievalQuery::new("tokenizer padding length").with_min_score(0.3);
    assert!(ranker().search(&store, &query).unwrap().is_empty());

    let id = add_fragment(
        &store,
        "Tokenizer",
        "Sequences are padded to a fixed length with the padding token",
    );

    let results = ranker().search(&store, &query).unwrap();
    assert_eq!(results[0].fragment.id, id);
}
