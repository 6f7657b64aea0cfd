mod common;

use common::{add_fragment, seed, DIMENSION};
use mnemo::retrieval::FragmentEmbeddings;
use mnemo::storage::FragmentStore;
use mnemo::MnemoError;
use tempfile::TempDir;

#[test]
fn test_file_store_persists_across_opens() {
    let temp = TempDir::new().unwrap();
    let db_path = temp.path().join("nested").join("fragments.db");

    let id = {
        let store = FragmentStore::open(&db_path).expect("Failed to create store");
        seed(&store);
        add_fragment(&store, "Notes", "Remember to rotate the logs")
    };
    assert!(db_path.exists(), "Database file should exist");

    // Reopening runs migrations again without touching existing rows
    let store = FragmentStore::open(&db_path).unwrap();
    assert_eq!(store.count().unwrap(), 5);

    let fragment = store.get(id).unwrap();
    assert_eq!(fragment.category, "Notes");
    assert_eq!(fragment.content, "Remember to rotate the logs");
    assert!(fragment.is_searchable());

    let embeddings = &fragment.embeddings;
    assert_eq!(embeddings.combined.as_ref().map(Vec::len), Some(DIMENSION));
    assert_eq!(embeddings.category.as_ref().map(Vec::len), Some(DIMENSION));
    assert_eq!(embeddings.content.as_ref().map(Vec::len), Some(DIMENSION));
}

#[test]
fn test_embeddings_round_trip_exactly() {
    let store = FragmentStore::in_memory().unwrap();
    let combined = vec![0.1f32, -0.25, 1e-7, f32::MAX];
    let id = store
        .insert(
            "Exact",
            "bytes",
            &FragmentEmbeddings::combined_only(combined.clone()),
        )
        .unwrap();

    let fragment = store.get(id).unwrap();
    assert_eq!(fragment.embeddings.combined, Some(combined));
    assert_eq!(fragment.embeddings.category, None);
}

#[test]
fn test_mixed_dimensions_rejected_on_insert() {
    let store = FragmentStore::in_memory().unwrap();
    let embeddings = FragmentEmbeddings {
        combined: Some(vec![0.0; 4]),
        category: Some(vec![0.0; 3]),
        content: None,
    };

    let err = store.insert("Bad", "dims", &embeddings).unwrap_err();
    assert!(matches!(
        err,
        MnemoError::DimensionMismatch {
            expected: 4,
            actual: 3
        }
    ));
    assert_eq!(store.count().unwrap(), 0);
}

#[test]
fn test_listing_counting_and_deleting() {
    let store = FragmentStore::in_memory().unwrap();
    seed(&store);
    store
        .insert("billing", "Unembedded note", &FragmentEmbeddings::default())
        .unwrap();

    let billing = store.list(Some(&["BILLING".to_string()])).unwrap();
    assert_eq!(billing.len(), 2);
    assert_eq!(store.list_searchable(Some(&["Billing".to_string()])).unwrap().len(), 1);
    assert!(store.list(Some(&[])).unwrap().is_empty());

    let stats = store.stats().unwrap();
    assert_eq!(stats.fragment_count, 5);
    assert_eq!(stats.searchable_count, 4);
    assert_eq!(stats.category_count, 5);
    assert_eq!(stats.dimensions, vec![DIMENSION]);

    let first = store.list(None).unwrap()[0].id;
    store.delete(first).unwrap();
    assert_eq!(store.count().unwrap(), 4);
    assert!(matches!(
        store.get(first),
        Err(MnemoError::FragmentNotFound { .. })
    ));
    assert!(matches!(
        store.delete(first),
        Err(MnemoError::FragmentNotFound { .. })
    ));
}
