//! Journey: the user states facts, repeats one, and the assistant recalls
//! them with and without an embedding service.

use std::sync::Arc;

use mnemo_core::search::{MatchMethod, TEXT_MATCH_SCORE};
use mnemo_core::{FactFilter, FactInput, FactType};
use mnemo_e2e_tests::harness::TestDatabaseManager;
use mnemo_e2e_tests::mocks::{TestDataFactory, UnavailableEmbedder};

fn dark_mode_twice(db: &TestDatabaseManager) -> f64 {
    let facts = db.engine.facts(&db.session);
    let first = facts
        .add(
            FactInput::new("User prefers dark mode")
                .with_type(FactType::Preference)
                .with_confidence(0.9),
        )
        .unwrap();
    assert!(!first.is_merged());

    let second = facts
        .add(FactInput::new("user prefers dark mode").with_confidence(0.6))
        .unwrap();
    assert!(second.is_merged());
    assert_eq!(second.record().id, first.record().id);
    second.record().confidence
}

#[test]
fn test_repeated_preference_merges_without_embeddings() {
    let db = TestDatabaseManager::new_temp();
    let confidence = dark_mode_twice(&db);

    assert_eq!(db.live_facts(), 1);
    // 0.9 blended with 0.6, then reinforced
    assert!((0.82..=0.9).contains(&confidence), "confidence {}", confidence);
}

#[test]
fn test_repeated_preference_merges_with_embeddings() {
    let db = TestDatabaseManager::with_embeddings();
    let confidence = dark_mode_twice(&db);

    assert_eq!(db.live_facts(), 1);
    assert!((0.82..=0.9).contains(&confidence), "confidence {}", confidence);
}

#[test]
fn test_identical_add_counts_as_access() {
    let db = TestDatabaseManager::new_temp();
    let facts = db.engine.facts(&db.session);

    let first = facts.add(FactInput::new("User lives in Lisbon")).unwrap().into_record();
    let again = facts.add(FactInput::new("User lives in Lisbon")).unwrap().into_record();

    assert_eq!(first.id, again.id);
    assert_eq!(again.access_count, first.access_count + 1);
    assert!(again.confidence >= first.confidence);
    assert_eq!(db.live_facts(), 1);
}

#[test]
fn test_text_search_when_embeddings_unavailable() {
    let db = TestDatabaseManager::with_builder(|builder| builder.embedder(Arc::new(UnavailableEmbedder)));
    db.seed_profile();
    db.seed_facts(6);

    let hits = db
        .engine
        .facts(&db.session)
        .search("memo", 10, &FactFilter::default())
        .unwrap();

    assert_eq!(hits.len(), 1);
    assert!(hits[0].item.content.contains("memo"));
    assert_eq!(hits[0].score, TEXT_MATCH_SCORE);
    assert_eq!(hits[0].method, MatchMethod::Text);
}

#[test]
fn test_search_marks_hits_as_accessed() {
    let db = TestDatabaseManager::new_temp();
    db.seed_profile();

    let facts = db.engine.facts(&db.session);
    let hit = facts
        .search("Lisbon", 5, &FactFilter::default())
        .unwrap()
        .into_iter()
        .next()
        .unwrap();
    let stored = facts.get(&hit.item.id).unwrap();

    assert_eq!(stored.access_count, 1);
    assert!(stored.last_accessed.is_some());
}

#[test]
fn test_vector_search_ranks_closest_first() {
    let db = TestDatabaseManager::with_embeddings();
    db.seed_profile();
    db.seed_facts(4);

    let hits = db
        .engine
        .facts(&db.session)
        .search("dark mode editor", 3, &FactFilter::default())
        .unwrap();

    assert!(!hits.is_empty());
    assert_eq!(hits[0].method, MatchMethod::Vector);
    assert!(hits[0].item.content.contains("dark mode"));
    assert!(hits.windows(2).all(|pair| pair[0].score >= pair[1].score));
}

#[test]
fn test_invalidated_fact_drops_out_of_recall() {
    let db = TestDatabaseManager::new_temp();
    let ids = db.seed_profile();
    let facts = db.engine.facts(&db.session);

    assert!(facts.invalidate(&ids[0]).unwrap());

    let hits = facts.search("Lisbon", 5, &FactFilter::default()).unwrap();
    assert!(hits.iter().all(|hit| hit.item.id != ids[0]));
    assert_eq!(db.live_facts(), TestDataFactory::profile_facts().len() as i64 - 1);

    let history = facts
        .search("Lisbon", 5, &FactFilter::default().including_invalid())
        .unwrap();
    assert!(history.iter().any(|hit| hit.item.id == ids[0]));
}
