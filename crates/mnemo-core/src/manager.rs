//! Memory Manager
//!
//! Session-level orchestration over every network:
//! - Context assembly for a query, which never fails
//! - Prompt formatting under per-section and total budgets
//! - Post-interaction processing (decide, apply, persona, indexes, heat)
//! - Consolidation, statistics and session clearing

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::consolidation::ConsolidationReport;
use crate::engine::MemoryEngine;
use crate::error::{MemoryError, Result};
use crate::memory::{
    Belief, EntityContext, Experience, Fact, FactFilter, InteractionMessage, MemoryStats, MessageRole, SessionId,
};
use crate::networks::{ExperienceQuery, PersonaProfile, PersonaUpdate, TopicContext};
use crate::operations::{DecisionGateway, Interaction, OperationOutcome};
use crate::scheduler::SchedulingStats;
use crate::search::SearchHit;

/// Facts searched for a query
const CONTEXT_FACT_LIMIT: usize = 10;
/// Recent experiences included
const CONTEXT_EXPERIENCE_LIMIT: usize = 5;
/// Belief confidence needed to appear in context
const CONTEXT_BELIEF_MIN_CONFIDENCE: f64 = 0.7;
const CONTEXT_BELIEF_LIMIT: usize = 20;

const PROFILE_ATTRIBUTE_LINES: usize = 10;
const PROFILE_EVENT_LINES: usize = 7;
const ENTITY_LINES: usize = 7;
const BELIEF_LINES: usize = 7;
const TOPIC_KEY_POINTS: usize = 2;
/// Room the topic section needs to be considered
const TOPIC_RESERVE: usize = 300;
/// Cut from the total budget to make room for the marker
const TRUNCATION_RESERVE: usize = 50;

pub const TRUNCATION_MARKER: &str = "\n\n[Context truncated]";

// ============================================================================
// CONTEXT
// ============================================================================

/// Everything memory knows that may matter for one query
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryContext {
    pub persona: Option<PersonaProfile>,
    pub relevant_facts: Vec<SearchHit<Fact>>,
    pub recent_experiences: Vec<Experience>,
    pub entity_context: Vec<EntityContext>,
    pub beliefs: Vec<Belief>,
    pub current_topic: Option<String>,
    pub topic_context: Option<TopicContext>,
    /// Hot facts the scheduler preloaded for this query
    pub preloaded: Vec<Fact>,
}

impl MemoryContext {
    pub fn is_empty(&self) -> bool {
        self.persona.is_none()
            && self.relevant_facts.is_empty()
            && self.recent_experiences.is_empty()
            && self.entity_context.is_empty()
            && self.beliefs.is_empty()
            && self.topic_context.is_none()
    }
}

/// What processing one interaction did
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingSummary {
    pub user_message_id: String,
    pub assistant_message_id: String,
    pub outcomes: Vec<OperationOutcome>,
    pub persona: PersonaUpdate,
    pub topic: Option<String>,
    pub keywords: Vec<String>,
    pub heat_updated: usize,
    /// Best-effort steps that failed and were skipped
    pub failed_steps: Vec<String>,
}

impl ProcessingSummary {
    /// Operations that changed a record
    pub fn applied(&self) -> usize {
        self.outcomes.iter().filter(|o| o.touched().is_some()).count()
    }
}

/// Counters for one session
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManagerStats {
    pub memory: MemoryStats,
    pub scheduling: SchedulingStats,
}

// ============================================================================
// MANAGER
// ============================================================================

/// Orchestrator for one session
pub struct MemoryManager<'e> {
    engine: &'e MemoryEngine,
    session: &'e SessionId,
}

/// Value of a best-effort step, or its default after logging the failure
fn or_default<T: Default>(step: &str, result: Result<T>) -> T {
    match result {
        Ok(value) => value,
        Err(MemoryError::CollaboratorUnavailable(e)) => {
            tracing::debug!(step, "Collaborator unavailable: {}", e);
            T::default()
        }
        Err(e) => {
            tracing::error!(step, "Context step failed: {}", e);
            T::default()
        }
    }
}

impl<'e> MemoryManager<'e> {
    pub(crate) fn new(engine: &'e MemoryEngine, session: &'e SessionId) -> Self {
        Self { engine, session }
    }

    fn sid(&self) -> &str {
        self.session.as_str()
    }

    /// Gather context for `query`.
    ///
    /// Each source is independent; one failing leaves its part empty.
    pub fn build_context(&self, query: &str) -> MemoryContext {
        let engine = self.engine;
        let session = self.session;

        let persona = or_default("persona", engine.persona(session).active_profile().map(Some));
        let relevant_facts = or_default(
            "facts",
            engine
                .facts(session)
                .search(query, CONTEXT_FACT_LIMIT, &FactFilter::default()),
        );
        let recent_experiences = or_default(
            "experiences",
            engine
                .experiences(session)
                .recent(&ExperienceQuery::default().with_limit(CONTEXT_EXPERIENCE_LIMIT)),
        );

        let observations = engine.observations(session);
        let entity_context = or_default(
            "entities",
            observations.extract_entities(query).and_then(|names| {
                if names.is_empty() {
                    Ok(Vec::new())
                } else {
                    observations.entity_context(&names)
                }
            }),
        );

        let beliefs = or_default(
            "beliefs",
            engine
                .beliefs(session)
                .active(CONTEXT_BELIEF_MIN_CONFIDENCE, &[], CONTEXT_BELIEF_LIMIT),
        );

        let persona_index = engine.persona(session);
        let current_topic = or_default("topic", persona_index.identify_topic(query));
        let topic_context = match &current_topic {
            Some(topic) => or_default("topic_context", persona_index.topic_context(topic).map(Some)),
            None => None,
        };

        let preloaded = or_default("preload", engine.scheduler(session).predict_and_preload(query));

        MemoryContext {
            persona,
            relevant_facts,
            recent_experiences,
            entity_context,
            beliefs,
            current_topic,
            topic_context,
            preloaded,
        }
    }

    /// Render `context` as prompt sections within the configured budgets.
    ///
    /// A section over its own budget is dropped whole; the joined result is
    /// cut and marked if it still exceeds the total.
    pub fn format_context_for_prompt(&self, context: &MemoryContext) -> String {
        let config = self.engine.config();
        format_context(context, config.section_budget, config.context_budget)
    }

    /// Store one raw conversation message
    pub fn record_message(&self, role: MessageRole, content: &str) -> Result<InteractionMessage> {
        let message = InteractionMessage::new(self.sid(), role, content, Utc::now());
        self.engine.storage().insert_message(&message)?;
        Ok(message)
    }

    /// Learn from one exchange, using relevant facts and beliefs as the
    /// decision context.
    pub fn process_interaction(&self, user_message: &str, assistant_response: &str) -> Result<ProcessingSummary> {
        let context = self.decision_context(user_message);
        self.process_interaction_with_context(user_message, assistant_response, &context)
    }

    /// Learn from one exchange.
    ///
    /// Only storing the two messages can fail; every later step is
    /// best-effort and recorded in `failed_steps` when it does not succeed.
    pub fn process_interaction_with_context(
        &self,
        user_message: &str,
        assistant_response: &str,
        context: &str,
    ) -> Result<ProcessingSummary> {
        let user = self.record_message(MessageRole::User, user_message)?;
        let assistant = self.record_message(MessageRole::Assistant, assistant_response)?;

        let mut summary = ProcessingSummary {
            user_message_id: user.id.clone(),
            assistant_message_id: assistant.id.clone(),
            ..ProcessingSummary::default()
        };

        let gateway = self.engine.gateway(self.session);
        let operations = gateway.decide(context, &Interaction::new(user_message, assistant_response));
        summary.outcomes = gateway.execute_all(&operations);

        let persona = self.engine.persona(self.session);
        match persona.update_from_interaction(user_message, assistant_response) {
            Ok(update) => summary.persona = update,
            Err(e) => summary.skip("persona", &e),
        }

        match persona.identify_topic(user_message) {
            Ok(Some(topic)) => match persona.index_message_to_topic(&topic, &user.id) {
                Ok(_) => summary.topic = Some(topic),
                Err(e) => summary.skip("topic_index", &e),
            },
            Ok(None) => {}
            Err(e) => summary.skip("topic", &e),
        }

        let keywords = self
            .engine
            .observations(self.session)
            .extract_keywords(&format!("{} {}", user_message, assistant_response));
        match persona.index_message_to_keywords(&keywords, Some(&user.id)) {
            Ok(indexed) => summary.keywords = indexed.into_iter().map(|k| k.keyword).collect(),
            Err(e) => summary.skip("keyword_index", &e),
        }

        let touched: Vec<_> = summary.outcomes.iter().filter_map(OperationOutcome::touched).collect();
        match self.engine.scheduler(self.session).update_heat_scores(&touched) {
            Ok(updated) => summary.heat_updated = updated,
            Err(e) => summary.skip("heat", &e),
        }

        tracing::info!(
            operations = summary.outcomes.len(),
            applied = summary.applied(),
            failed_steps = summary.failed_steps.len(),
            "Processed interaction"
        );
        Ok(summary)
    }

    /// Facts and beliefs related to `message`, formatted for the decision source
    fn decision_context(&self, message: &str) -> String {
        let context = MemoryContext {
            relevant_facts: or_default(
                "facts",
                self.engine
                    .facts(self.session)
                    .search(message, CONTEXT_FACT_LIMIT, &FactFilter::default()),
            ),
            beliefs: or_default(
                "beliefs",
                self.engine
                    .beliefs(self.session)
                    .active(CONTEXT_BELIEF_MIN_CONFIDENCE, &[], CONTEXT_BELIEF_LIMIT),
            ),
            ..MemoryContext::default()
        };
        self.format_context_for_prompt(&context)
    }

    /// Run the consolidation pass for this session
    pub fn consolidate(&self) -> ConsolidationReport {
        self.engine.consolidator(self.session).consolidate()
    }

    pub fn stats(&self) -> Result<ManagerStats> {
        Ok(ManagerStats {
            memory: self.engine.storage().get_stats(self.sid(), Utc::now())?,
            scheduling: self.engine.scheduler(self.session).scheduling_stats()?,
        })
    }

    /// Delete everything this session owns. Returns rows removed.
    pub fn clear_session(&self) -> Result<usize> {
        let removed = self.engine.storage().clear_session(self.sid())?;
        tracing::info!(session = self.sid(), removed, "Cleared session memory");
        Ok(removed)
    }
}

impl ProcessingSummary {
    fn skip(&mut self, step: &str, error: &MemoryError) {
        match error {
            MemoryError::CollaboratorUnavailable(_) => tracing::debug!(step, "Skipped: {}", error),
            _ => tracing::warn!(step, "Interaction step failed: {}", error),
        }
        self.failed_steps.push(step.to_string());
    }
}

// ============================================================================
// FORMATTING
// ============================================================================

/// Cut `text` to `max` characters, ending in `...` when shortened
fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max.saturating_sub(3)).collect();
    out.push_str("...");
    out
}

fn percent(value: f64) -> String {
    format!("{}%", (value * 100.0).round() as i64)
}

fn format_context(context: &MemoryContext, section_budget: usize, total_budget: usize) -> String {
    let mut sections: Vec<String> = Vec::new();
    let mut total = 0usize;

    let push = |section: String, sections: &mut Vec<String>, total: &mut usize| {
        let len = section.chars().count();
        if len <= section_budget {
            *total += len;
            sections.push(section);
        }
    };

    if let Some(persona) = &context.persona {
        if !persona.summary.is_empty() || !persona.attributes.is_empty() {
            let mut section = String::from("## USER PROFILE\n");
            if !persona.summary.is_empty() {
                section.push_str(&format!("{}\n\n", truncate(&persona.summary, 300)));
            }
            if !persona.attributes.is_empty() {
                section.push_str("**Key Attributes:**\n");
                for attribute in persona.attributes.iter().take(PROFILE_ATTRIBUTE_LINES) {
                    section.push_str(&format!("- {}\n", truncate(&attribute.content, 150)));
                }
            }
            if !persona.events.is_empty() {
                section.push_str("\n**Important Events:**\n");
                for event in persona.events.iter().take(PROFILE_EVENT_LINES) {
                    section.push_str(&format!("- {}\n", truncate(&event.content, 150)));
                }
            }
            push(section, &mut sections, &mut total);
        }
    }

    if !context.relevant_facts.is_empty() && total < total_budget {
        let lines: Vec<String> = context
            .relevant_facts
            .iter()
            .take(CONTEXT_FACT_LIMIT)
            .map(|hit| format!("- {} ({})", truncate(&hit.item.content, 200), percent(hit.item.confidence)))
            .collect();
        push(format!("## RELEVANT KNOWLEDGE\n{}", lines.join("\n")), &mut sections, &mut total);
    }

    if !context.entity_context.is_empty() && total < total_budget {
        let lines: Vec<String> = context
            .entity_context
            .iter()
            .take(ENTITY_LINES)
            .map(|e| {
                let summary = e.summary.as_deref().unwrap_or("No summary");
                format!("- **{}**: {}", truncate(&e.name, 50), truncate(summary, 120))
            })
            .collect();
        push(format!("## ENTITY CONTEXT\n{}", lines.join("\n")), &mut sections, &mut total);
    }

    if !context.beliefs.is_empty() && total < total_budget {
        let lines: Vec<String> = context
            .beliefs
            .iter()
            .take(BELIEF_LINES)
            .map(|b| format!("- {} ({})", truncate(&b.belief, 180), percent(b.confidence)))
            .collect();
        push(format!("## MY UNDERSTANDING\n{}", lines.join("\n")), &mut sections, &mut total);
    }

    if !context.recent_experiences.is_empty() && total < total_budget {
        let lines: Vec<String> = context
            .recent_experiences
            .iter()
            .take(CONTEXT_EXPERIENCE_LIMIT)
            .map(|e| format!("- {}", truncate(&e.description, 150)))
            .collect();
        push(format!("## RECENT INTERACTIONS\n{}", lines.join("\n")), &mut sections, &mut total);
    }

    if let Some(topic) = &context.topic_context {
        if let Some(summary) = &topic.topic.summary {
            if total < total_budget.saturating_sub(TOPIC_RESERVE) {
                let mut section = format!(
                    "## TOPIC: {}\n{}\n",
                    truncate(&topic.topic.topic, 30),
                    truncate(summary, 200)
                );
                if !topic.topic.key_points.is_empty() {
                    section.push_str("Key points:\n");
                    for point in topic.topic.key_points.iter().take(TOPIC_KEY_POINTS) {
                        section.push_str(&format!("- {}\n", truncate(point, 80)));
                    }
                }
                push(section, &mut sections, &mut total);
            }
        }
    }

    let result = sections.join("\n\n");
    if result.chars().count() > total_budget {
        let mut cut: String = result
            .chars()
            .take(total_budget.saturating_sub(TRUNCATION_RESERVE))
            .collect();
        cut.push_str(TRUNCATION_MARKER);
        return cut;
    }
    result
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::memory::{BeliefInput, FactInput};
    use crate::networks::LEARNING_SUMMARY;
    use crate::search::MatchMethod;
    use crate::testing::{engine_with, test_engine, OfflineModel, ScriptedModel};

    fn hit(fact: Fact) -> SearchHit<Fact> {
        SearchHit {
            item: fact,
            score: 1.0,
            method: MatchMethod::Text,
        }
    }

    #[test]
    fn test_truncate_marks_cut_text() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("abcdefghij", 8), "abcde...");
        assert_eq!(truncate("héllo wörld", 6), "hél...");
    }

    #[test]
    fn test_build_context_without_collaborators() {
        let (engine, _dir) = test_engine();
        let session = SessionId::default();
        engine
            .facts(&session)
            .add(FactInput::new("User's favourite language is Rust").with_confidence(0.9))
            .unwrap();
        engine
            .beliefs(&session)
            .form(BeliefInput::new("User prefers statically typed languages").with_confidence(0.8))
            .unwrap();

        let manager = engine.manager(&session);
        let context = manager.build_context("Rust");
        assert_eq!(context.relevant_facts.len(), 1);
        assert_eq!(context.beliefs.len(), 1);
        assert!(context.current_topic.is_none());
        assert_eq!(context.persona.as_ref().unwrap().summary, LEARNING_SUMMARY);

        let prompt = manager.format_context_for_prompt(&context);
        assert!(prompt.starts_with("## USER PROFILE\n"));
        assert!(prompt.contains("## RELEVANT KNOWLEDGE\n- User's favourite language is Rust (90%)"));
        assert!(prompt.contains("## MY UNDERSTANDING\n- User prefers statically typed languages (80%)"));
        assert!(!prompt.contains("[Context truncated]"));
    }

    #[test]
    fn test_build_context_survives_offline_model() {
        let (engine, _dir) = engine_with(|b| b.language_model(Arc::new(OfflineModel)));
        let session = SessionId::default();
        let context = engine.manager(&session).build_context("anything at all");
        assert!(context.current_topic.is_none());
        assert!(context.relevant_facts.is_empty());
    }

    #[test]
    fn test_oversized_section_is_dropped() {
        let (engine, _dir) = test_engine();
        let session = SessionId::default();
        let facts = engine.facts(&session);
        let context = MemoryContext {
            relevant_facts: (0..10)
                .map(|i| {
                    hit(facts
                        .add(FactInput::new(format!("Fact number {} {}", i, "x".repeat(190))))
                        .unwrap()
                        .into_record())
                })
                .collect(),
            ..MemoryContext::default()
        };
        let formatted = format_context(&context, 500, 15_000);
        assert!(formatted.is_empty());

        let formatted = format_context(&context, 2_500, 15_000);
        assert!(formatted.starts_with("## RELEVANT KNOWLEDGE"));
    }

    #[test]
    fn test_total_budget_truncates_with_marker() {
        let (engine, _dir) = test_engine();
        let session = SessionId::default();
        let facts = engine.facts(&session);
        let context = MemoryContext {
            relevant_facts: (0..5)
                .map(|i| {
                    hit(facts
                        .add(FactInput::new(format!("Distinct fact {} about {}", i, "y".repeat(100 + i))))
                        .unwrap()
                        .into_record())
                })
                .collect(),
            ..MemoryContext::default()
        };
        let formatted = format_context(&context, 2_500, 200);
        assert!(formatted.ends_with(TRUNCATION_MARKER));
        assert_eq!(formatted.chars().count(), 150 + TRUNCATION_MARKER.chars().count());
    }

    #[test]
    fn test_process_interaction_applies_and_indexes() {
        let model = ScriptedModel::new(vec![
            r#"[{"operation": "ADD", "memory_type": "fact", "content": "User adopted a dog named Biscuit", "confidence": 0.9}]"#,
            r#"{"attributes": ["User is a dog owner"], "event": null}"#,
            "pets",
        ]);
        let (engine, _dir) = engine_with(|b| b.language_model(Arc::new(model)));
        let session = SessionId::default();
        let manager = engine.manager(&session);

        let summary = manager
            .process_interaction(
                "I just adopted a dog called Biscuit!",
                "Congratulations on adopting Biscuit!",
            )
            .unwrap();

        assert_eq!(summary.applied(), 1);
        assert_eq!(summary.persona.attributes.len(), 1);
        assert_eq!(summary.topic.as_deref(), Some("pets"));
        assert!(summary.keywords.iter().any(|k| k == "biscuit"));
        assert!(summary.failed_steps.is_empty());
        assert_eq!(summary.heat_updated, 1);

        let stats = manager.stats().unwrap();
        assert_eq!(stats.memory.messages, 2);
        assert_eq!(stats.memory.facts_live, 2);
        assert_eq!(stats.memory.topics, 1);
        assert_eq!(stats.memory.operations, 1);
    }

    #[test]
    fn test_process_interaction_without_model_still_stores_messages() {
        let (engine, _dir) = test_engine();
        let session = SessionId::default();
        let manager = engine.manager(&session);

        let summary = manager.process_interaction("Hello there", "Hi! How can I help?").unwrap();
        assert!(summary.outcomes.is_empty());
        assert_eq!(summary.failed_steps, vec!["persona".to_string(), "topic".to_string()]);
        assert_eq!(manager.stats().unwrap().memory.messages, 2);
    }

    #[test]
    fn test_clear_session_leaves_other_sessions() {
        let (engine, _dir) = test_engine();
        let alice = SessionId::new("alice").unwrap();
        let bob = SessionId::new("bob").unwrap();
        engine.facts(&alice).add(FactInput::new("Alice likes chess")).unwrap();
        engine.facts(&bob).add(FactInput::new("Bob likes golf")).unwrap();

        assert!(engine.manager(&alice).clear_session().unwrap() >= 1);
        assert_eq!(engine.manager(&alice).stats().unwrap().memory.facts_total, 0);
        assert_eq!(engine.manager(&bob).stats().unwrap().memory.facts_total, 1);
    }
}
