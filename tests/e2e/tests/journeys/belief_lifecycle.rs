//! Journey: beliefs form, gather evidence, get challenged into rejection and
//! evolve through supersession.

use mnemo_core::{BeliefInput, BeliefStatus, BeliefType, FactInput, MemoryError};
use mnemo_e2e_tests::harness::TestDatabaseManager;

#[test]
fn test_repeated_challenges_reject_for_good() {
    let db = TestDatabaseManager::new_temp();
    let beliefs = db.engine.beliefs(&db.session);
    let id = beliefs
        .form(BeliefInput::new("User dislikes early meetings").with_confidence(0.7))
        .unwrap()
        .into_record()
        .id;

    let mut belief = beliefs.get(&id).unwrap();
    let mut rounds = 0;
    while belief.status == BeliefStatus::Active {
        let before = belief.confidence;
        belief = beliefs.challenge(&id, 0.5, None).unwrap();
        assert!(belief.confidence <= before);
        rounds += 1;
        assert!(rounds < 10, "belief never rejected");
    }

    assert_eq!(belief.status, BeliefStatus::Rejected);
    assert!(belief.confidence < 0.1);

    // A rejected belief takes no further evidence
    assert!(matches!(
        beliefs.reinforce(&id, 0.5, None),
        Err(MemoryError::Validation(_))
    ));
    assert_eq!(beliefs.get(&id).unwrap().status, BeliefStatus::Rejected);
}

#[test]
fn test_supersede_links_old_to_new() {
    let db = TestDatabaseManager::new_temp();
    let beliefs = db.engine.beliefs(&db.session);
    let old = beliefs
        .form(
            BeliefInput::new("User prefers Python for scripting")
                .with_type(BeliefType::Preference)
                .with_confidence(0.8),
        )
        .unwrap()
        .into_record();

    let new = beliefs
        .supersede(&old.id, "User prefers Rust for scripting", Some("switched languages"))
        .unwrap();
    let old = beliefs.get(&old.id).unwrap();

    assert_eq!(old.status, BeliefStatus::Superseded);
    assert_eq!(old.superseded_by.as_deref(), Some(new.id.as_str()));
    assert_eq!(new.status, BeliefStatus::Active);
    assert!(new.superseded_by.is_none());
    assert_eq!(new.belief_type, BeliefType::Preference);
    assert_eq!(new.confidence, old.confidence);

    let active = beliefs.active(0.0, &[], 10).unwrap();
    assert!(active.iter().all(|b| b.superseded_by.is_none()));
    assert!(active.iter().any(|b| b.id == new.id));
    assert!(active.iter().all(|b| b.id != old.id));
}

#[test]
fn test_evidence_moves_confidence() {
    let db = TestDatabaseManager::new_temp();
    let facts = db.engine.facts(&db.session);
    let beliefs = db.engine.beliefs(&db.session);

    let support = facts
        .add(FactInput::new("User ran a half marathon in March"))
        .unwrap()
        .into_record();
    let belief = beliefs
        .form(BeliefInput::new("User enjoys endurance sports").with_confidence(0.5))
        .unwrap()
        .into_record();

    let reinforced = beliefs.reinforce(&belief.id, 0.3, Some(&support.id)).unwrap();
    assert!(reinforced.confidence > belief.confidence);
    assert_eq!(reinforced.supporting_facts, vec![support.id.clone()]);
    assert_eq!(reinforced.times_reinforced, 1);

    let challenged = beliefs.challenge(&belief.id, 0.8, None).unwrap();
    assert!(challenged.confidence < reinforced.confidence);
    assert_eq!(challenged.status, BeliefStatus::Active);

    // formation, reinforcement, challenge
    assert_eq!(challenged.confidence_history.len(), 3);
}

#[test]
fn test_forming_again_reinforces() {
    let db = TestDatabaseManager::new_temp();
    let beliefs = db.engine.beliefs(&db.session);

    let first = beliefs
        .form(BeliefInput::new("User is more productive in the morning").with_confidence(0.6))
        .unwrap();
    let second = beliefs
        .form(BeliefInput::new("User is more productive in the morning").with_confidence(0.6))
        .unwrap();

    assert!(second.is_merged());
    assert_eq!(second.record().id, first.record().id);
    assert!(second.record().confidence > 0.6);
}
