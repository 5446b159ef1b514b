//! Decision sources

use std::sync::Arc;
use std::time::Duration;

use super::ProposedOperation;
use crate::collaborators::{
    parse_json_array, sanitize_prompt_input, CollaboratorError, CollaboratorRuntime,
    CompletionRequest, LanguageModel,
};

/// Characters of each message handed to a decision source
const MAX_MESSAGE_CHARS: usize = 1000;

/// Characters of rendered context handed to a decision source
const MAX_CONTEXT_CHARS: usize = 4000;

const DECISION_SYSTEM: &str =
    "You are a memory manager. Return a valid JSON array only. Be selective and only remember important facts.";

const DECISION_PROMPT: &str = "Analyze this interaction and decide what to remember.

## CURRENT KNOWLEDGE
{context}

## NEW INTERACTION
User: {user}
Assistant: {assistant}

## OPERATIONS
- ADD: store a new fact, belief or experience about the user
- UPDATE: modify an existing memory (reinforce, challenge or correct it)
- DELETE: invalidate outdated information
- NOOP: nothing worth remembering

Each operation has:
- operation: ADD/UPDATE/DELETE/NOOP
- memory_type: fact/belief/experience
- content: what to store (for ADD)
- fact_type: preference/habit/goal/demographic/skill/opinion (for ADD facts)
- memory_id: which memory to modify (for UPDATE/DELETE)
- new_content, new_confidence: corrected values (for UPDATE facts)
- reinforce or challenge: true (for UPDATE beliefs)
- reason: why
- confidence: 0-1

Return a JSON array of operations, or [] if nothing is worth remembering.";

/// One exchange between the user and the assistant
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interaction {
    pub user_message: String,
    pub assistant_response: String,
}

impl Interaction {
    pub fn new(user_message: impl Into<String>, assistant_response: impl Into<String>) -> Self {
        Self {
            user_message: user_message.into(),
            assistant_response: assistant_response.into(),
        }
    }
}

/// Anything that can propose memory operations for an interaction.
///
/// Implementations return raw proposals; validation happens downstream.
pub trait DecisionSource: Send + Sync {
    fn propose(
        &self,
        context: &str,
        interaction: &Interaction,
    ) -> Result<Vec<ProposedOperation>, CollaboratorError>;
}

/// [`DecisionSource`] backed by a language model
pub struct LanguageModelDecisions {
    model: Arc<dyn LanguageModel>,
    timeout: Duration,
    runtime: CollaboratorRuntime,
}

impl LanguageModelDecisions {
    pub fn new(model: Arc<dyn LanguageModel>, timeout: Duration) -> Self {
        Self {
            model,
            timeout,
            runtime: CollaboratorRuntime::new(),
        }
    }

    pub fn with_runtime(mut self, runtime: CollaboratorRuntime) -> Self {
        self.runtime = runtime;
        self
    }

    fn prompt(context: &str, interaction: &Interaction) -> String {
        let context = if context.trim().is_empty() {
            "No prior context.".to_string()
        } else {
            sanitize_prompt_input(context, MAX_CONTEXT_CHARS)
        };
        DECISION_PROMPT
            .replace("{context}", &context)
            .replace(
                "{user}",
                &sanitize_prompt_input(&interaction.user_message, MAX_MESSAGE_CHARS),
            )
            .replace(
                "{assistant}",
                &sanitize_prompt_input(&interaction.assistant_response, MAX_MESSAGE_CHARS),
            )
    }
}

impl DecisionSource for LanguageModelDecisions {
    /// Malformed model output yields no proposals rather than an error
    fn propose(
        &self,
        context: &str,
        interaction: &Interaction,
    ) -> Result<Vec<ProposedOperation>, CollaboratorError> {
        let request = CompletionRequest::new(Self::prompt(context, interaction))
            .with_system(DECISION_SYSTEM)
            .with_max_tokens(1000)
            .with_timeout(self.timeout);
        let response = self.runtime.complete(&self.model, request)?;

        let values = match parse_json_array(&response) {
            Ok(values) => values,
            Err(e) => {
                tracing::warn!("Failed to parse operation decisions: {}", e);
                return Ok(Vec::new());
            }
        };

        let proposed: Vec<ProposedOperation> = values
            .into_iter()
            .filter_map(|value| serde_json::from_value(value).ok())
            .collect();
        tracing::debug!(count = proposed.len(), model = self.model.name(), "Proposed operations");
        Ok(proposed)
    }
}
