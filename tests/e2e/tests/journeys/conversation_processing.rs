//! Journey: turns of a conversation flow through the manager, memory
//! operations land through the gateway, and the next prompt sees them.

use std::sync::Arc;

use mnemo_core::memory::OperationKind;
use mnemo_core::{MemoryKind, ProposedOperation};
use mnemo_e2e_tests::harness::TestDatabaseManager;
use mnemo_e2e_tests::mocks::{OfflineModel, ScriptedModel, StaticDecisions, TestDataFactory};

fn adopt_dog() -> ProposedOperation {
    ProposedOperation {
        fact_type: Some("fact".into()),
        confidence: Some(0.9),
        reason: Some("user announced it".into()),
        ..ProposedOperation::add_fact("User adopted a dog named Biscuit")
    }
}

#[test]
fn test_decisions_reach_memory_through_gateway() {
    let decisions = Arc::new(StaticDecisions::new(vec![
        adopt_dog(),
        ProposedOperation {
            memory_id: Some("ghost".into()),
            ..ProposedOperation::new("DELETE")
        },
        ProposedOperation::new("NOOP"),
        // Too short to store; dropped before the gateway
        ProposedOperation::add_fact("dog"),
    ]));
    let db = TestDatabaseManager::with_builder(|builder| builder.decision_source(decisions.clone()));
    let manager = db.engine.manager(&db.session);

    let summary = manager
        .process_interaction("I just adopted a dog called Biscuit!", "Congratulations!")
        .unwrap();

    assert_eq!(decisions.calls(), 1);
    assert_eq!(summary.outcomes.len(), 3);
    assert_eq!(summary.applied(), 1);

    let add = &summary.outcomes[0];
    assert_eq!(add.applied, OperationKind::Add);
    assert_eq!(add.memory_kind, MemoryKind::Fact);

    // A missing target is a logged no-op, not a failure
    let delete = &summary.outcomes[1];
    assert_eq!(delete.requested, OperationKind::Delete);
    assert_eq!(delete.applied, OperationKind::Noop);
    assert!(delete.success);
    assert!(delete.error.is_some());

    let log = db.engine.gateway(&db.session).recent_operations(10).unwrap();
    assert_eq!(log.len(), 3);
}

#[test]
fn test_next_prompt_sees_what_was_learned() {
    let decisions = Arc::new(StaticDecisions::new(vec![adopt_dog()]));
    let db = TestDatabaseManager::with_builder(|builder| builder.decision_source(decisions));
    let manager = db.engine.manager(&db.session);

    manager
        .process_interaction("I just adopted a dog called Biscuit!", "Congratulations!")
        .unwrap();

    let context = manager.build_context("dog");
    assert_eq!(context.relevant_facts.len(), 1);
    let prompt = manager.format_context_for_prompt(&context);
    assert!(prompt.contains("Biscuit"));
}

#[test]
fn test_repeated_announcement_does_not_duplicate() {
    let decisions = Arc::new(StaticDecisions::new(vec![adopt_dog()]));
    let db = TestDatabaseManager::with_builder(|builder| builder.decision_source(decisions));
    let manager = db.engine.manager(&db.session);

    for _ in 0..3 {
        manager
            .process_interaction("Biscuit the dog is settling in", "Glad to hear it")
            .unwrap();
    }

    assert_eq!(db.live_facts(), 1);
    assert_eq!(db.stats().messages, 6);
}

#[test]
fn test_scripted_model_drives_every_step() {
    let model = ScriptedModel::new(vec![
        r#"[{"operation": "ADD", "memory_type": "fact", "content": "User moved to Lisbon", "fact_type": "demographic", "confidence": 0.95}]"#,
        r#"{"attributes": ["User lives in Lisbon"], "event": "User moved to Lisbon"}"#,
        "relocation",
    ]);
    let prompts = model.prompts();
    let db = TestDatabaseManager::with_builder(|builder| builder.language_model(Arc::new(model)));
    let manager = db.engine.manager(&db.session);

    let (user, assistant) = TestDataFactory::conversation()[0];
    let summary = manager.process_interaction(user, assistant).unwrap();

    assert!(summary.failed_steps.is_empty(), "{:?}", summary.failed_steps);
    assert_eq!(summary.applied(), 1);
    assert_eq!(summary.topic.as_deref(), Some("relocation"));
    assert!(summary.keywords.iter().any(|k| k == "lisbon"));
    assert_eq!(prompts.lock().unwrap().len(), 3);

    let profile = db.engine.persona(&db.session).active_profile().unwrap();
    assert!(!profile.attributes.is_empty());
}

#[test]
fn test_offline_model_degrades_to_storing_messages() {
    let db = TestDatabaseManager::with_builder(|builder| builder.language_model(Arc::new(OfflineModel)));
    let manager = db.engine.manager(&db.session);

    for (user, assistant) in TestDataFactory::conversation() {
        let summary = manager.process_interaction(user, assistant).unwrap();
        assert!(summary.outcomes.is_empty());
        assert!(summary.failed_steps.contains(&"persona".to_string()));
        assert!(!summary.keywords.is_empty());
    }

    assert_eq!(db.stats().messages, 4);
    assert_eq!(db.live_facts(), 0);
}
