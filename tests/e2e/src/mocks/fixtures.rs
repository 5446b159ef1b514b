//! Test Data Factory
//!
//! Realistic memories for one user: profile facts, beliefs, experiences and
//! conversation turns.

use mnemo_core::{
    BeliefInput, BeliefType, ExperienceInput, ExperienceType, FactCategory, FactInput, FactType,
    Outcome,
};

/// Sentences sharing only their subject
const DISTINCT_SENTENCES: &[&str] = &[
    "User commutes by bicycle along the river",
    "User's sister teaches chemistry in Porto",
    "User files quarterly taxes every April",
    "User is allergic to peanuts",
    "User plays bass guitar in a jazz trio",
    "User's laptop runs Arch Linux",
    "User volunteers at the animal shelter on Saturdays",
    "User learned Portuguese from evening classes",
    "User keeps sourdough starter in the fridge",
    "User's flat overlooks a small park",
    "User supports Benfica football club",
    "User reads science fiction before sleeping",
];

/// Factory for creating test data
///
/// # Example
///
/// ```rust,ignore
/// for input in TestDataFactory::profile_facts() {
///     engine.facts(&session).add(input)?;
/// }
/// ```
pub struct TestDataFactory;

impl TestDataFactory {
    /// Content that never dedups against any other index
    pub fn distinct_content(index: usize) -> String {
        let sentence = DISTINCT_SENTENCES[index % DISTINCT_SENTENCES.len()];
        if index < DISTINCT_SENTENCES.len() {
            sentence.to_string()
        } else {
            let rest = sentence
                .strip_prefix("User's ")
                .or_else(|| sentence.strip_prefix("User "))
                .unwrap_or(sentence);
            format!("Entry {} {}", index, rest)
        }
    }

    /// A small persona: where the user lives, works and what they like
    pub fn profile_facts() -> Vec<FactInput> {
        vec![
            FactInput::new("User lives in Lisbon")
                .with_type(FactType::Demographic)
                .with_category(FactCategory::Personal)
                .with_confidence(0.95),
            FactInput::new("User works as a backend engineer at a logistics startup")
                .with_type(FactType::Fact)
                .with_category(FactCategory::Work)
                .with_confidence(0.9),
            FactInput::new("User prefers dark mode in every editor")
                .with_type(FactType::Preference)
                .with_category(FactCategory::Work)
                .with_confidence(0.85),
            FactInput::new("User runs five kilometres most mornings")
                .with_type(FactType::Habit)
                .with_category(FactCategory::Health)
                .with_confidence(0.8),
            FactInput::new("User wants to finish the Rust memo tool by December")
                .with_type(FactType::Goal)
                .with_category(FactCategory::Learning)
                .with_confidence(0.7),
        ]
    }

    pub fn beliefs() -> Vec<BeliefInput> {
        vec![
            BeliefInput::new("User values concise answers over long explanations")
                .with_type(BeliefType::Preference)
                .with_confidence(0.75),
            BeliefInput::new("User is more productive in the morning")
                .with_type(BeliefType::Inference)
                .with_confidence(0.6),
        ]
    }

    /// An email-sending agent run with the given outcome
    pub fn email_run(outcome: Outcome) -> ExperienceInput {
        ExperienceInput::new("Sent the weekly status email", ExperienceType::AgentRun)
            .with_action("send_email")
            .with_outcome(outcome)
            .with_duration(30)
    }

    /// User and assistant turns of a short conversation
    pub fn conversation() -> Vec<(&'static str, &'static str)> {
        vec![
            (
                "I just moved to Lisbon and I'm looking for a climbing gym",
                "Welcome to Lisbon! There are a few bouldering gyms near Alcantara.",
            ),
            (
                "I prefer dark mode in all my editors, can you remember that?",
                "Noted, I'll suggest dark themes from now on.",
            ),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mnemo_core::search::text_similarity;

    #[test]
    fn test_distinct_contents_stay_below_dedup_threshold() {
        let contents: Vec<String> = (0..30).map(TestDataFactory::distinct_content).collect();
        for (i, a) in contents.iter().enumerate() {
            for b in contents.iter().skip(i + 1) {
                assert!(text_similarity(a, b) < 0.9, "{} ~ {}", a, b);
            }
        }
    }

    #[test]
    fn test_profile_inputs_validate() {
        for input in TestDataFactory::profile_facts() {
            assert!(input.validated().is_ok());
        }
        for input in TestDataFactory::beliefs() {
            assert!(input.validated().is_ok());
        }
    }
}
