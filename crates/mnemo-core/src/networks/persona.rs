//! Persona and working-memory index
//!
//! The user profile is built from persona facts. Topics and keywords are
//! secondary indexes over raw conversation messages, each keeping only the
//! newest message ids.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Upsert;
use crate::collaborators::{
    parse_json_object, sanitize_prompt_input, CompletionRequest, SummaryStyle,
};
use crate::engine::MemoryEngine;
use crate::error::Result;
use crate::memory::{
    Fact, FactInput, FactSource, FactType, InteractionMessage, KeywordIndex, SessionId, Topic,
};
use crate::search::clamp_limit;

/// Placeholder summary until enough attributes are known
pub const LEARNING_SUMMARY: &str = "Still learning about the user...";

/// Attributes needed before a profile summary is requested
pub const MIN_SUMMARY_ATTRIBUTES: usize = 3;

/// Messages a topic needs before it is summarized
pub const MIN_TOPIC_MESSAGES: usize = 3;

const MAX_TOPIC_LENGTH: usize = 100;
const MAX_KEY_POINTS: usize = 5;
const MAX_KEYWORDS_PER_MESSAGE: usize = 20;
const MIN_KEYWORD_LENGTH: usize = 3;
const MAX_ATTRIBUTES_PER_INTERACTION: usize = 3;
const PROFILE_EVENT_LIMIT: usize = 10;
const TOPIC_CONTEXT_MESSAGES: usize = 10;

/// Attributes, recent events and a short summary of the user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersonaProfile {
    pub attributes: Vec<Fact>,
    pub events: Vec<Fact>,
    pub summary: String,
}

/// A topic with its most recent messages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopicContext {
    pub topic: Topic,
    pub recent_messages: Vec<InteractionMessage>,
}

/// Persona facts learned from one interaction
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersonaUpdate {
    pub attributes: Vec<Fact>,
    pub event: Option<Fact>,
}

impl PersonaUpdate {
    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty() && self.event.is_none()
    }
}

/// Persona, topic and keyword views of one session
pub struct PersonaIndex<'e> {
    engine: &'e MemoryEngine,
    session: &'e SessionId,
}

impl<'e> PersonaIndex<'e> {
    pub(crate) fn new(engine: &'e MemoryEngine, session: &'e SessionId) -> Self {
        Self { engine, session }
    }

    fn sid(&self) -> &str {
        self.session.as_str()
    }

    // ========================================================================
    // PROFILE
    // ========================================================================

    /// Current profile. Never fails on summarizer errors; falls back to a
    /// count of known attributes instead.
    pub fn active_profile(&self) -> Result<PersonaProfile> {
        let facts = self.engine.facts(self.session);
        let attributes = facts.persona_attributes()?;
        let events = facts.persona_events(PROFILE_EVENT_LIMIT)?;

        let summary = if attributes.len() < MIN_SUMMARY_ATTRIBUTES {
            LEARNING_SUMMARY.to_string()
        } else {
            let mut items: Vec<String> = attributes
                .iter()
                .take(10)
                .map(|a| match a.category {
                    Some(category) => format!("{} ({})", a.content, category),
                    None => a.content.clone(),
                })
                .collect();
            items.extend(events.iter().take(5).map(|e| format!("Event: {}", e.content)));
            match self.engine.summarize(&items, SummaryStyle::Profile) {
                Ok(summary) => summary,
                Err(e) => {
                    tracing::debug!("Profile summary unavailable: {}", e);
                    format!("User profile available with {} known attributes.", attributes.len())
                }
            }
        };

        Ok(PersonaProfile {
            attributes,
            events,
            summary,
        })
    }

    /// Stable trait of the user, stored with confidence 0.8
    pub fn add_attribute(&self, content: &str) -> Result<Upsert<Fact>> {
        let input = FactInput::new(content)
            .with_type(FactType::PersonaAttribute)
            .with_confidence(0.8)
            .with_source(FactSource::Inferred);
        self.engine.facts(self.session).add(input)
    }

    /// Dated occurrence in the user's life
    pub fn add_event(&self, content: &str, event_time: Option<DateTime<Utc>>) -> Result<Upsert<Fact>> {
        let mut input = FactInput::new(content)
            .with_type(FactType::PersonaEvent)
            .with_confidence(1.0)
            .with_source(FactSource::Chat);
        input.event_time = event_time;
        self.engine.facts(self.session).add(input)
    }

    /// Ask the language model what the user revealed about themselves
    pub fn update_from_interaction(&self, user_message: &str, assistant_response: &str) -> Result<PersonaUpdate> {
        let prompt = format!(
            "Analyze this interaction for user profile updates:\n\n\
             User: {}\nAssistant: {}\n\n\
             What can we learn about the user? Return JSON:\n\
             {{\"attributes\": [\"new facts about the user\"], \"event\": \"significant event or null\", \
             \"event_time\": \"RFC 3339 time of the event or null\"}}\n\n\
             Return {{\"attributes\": [], \"event\": null}} if nothing to learn.",
            sanitize_prompt_input(user_message, 500),
            sanitize_prompt_input(assistant_response, 500),
        );
        let request = CompletionRequest::new(prompt)
            .with_system("Extract user profile information. Return valid JSON only.");
        let response = self.engine.complete(request)?;
        let data = parse_json_object(&response)?;

        let mut update = PersonaUpdate::default();
        let attributes = data
            .get("attributes")
            .and_then(|a| a.as_array())
            .cloned()
            .unwrap_or_default();
        for attribute in attributes.iter().take(MAX_ATTRIBUTES_PER_INTERACTION) {
            let Some(text) = attribute.as_str().map(str::trim) else {
                continue;
            };
            if text.chars().count() > 5 {
                update.attributes.push(self.add_attribute(text)?.into_record());
            }
        }

        if let Some(event) = data.get("event").and_then(|e| e.as_str()).map(str::trim) {
            if event.chars().count() > 5 {
                let event_time = data
                    .get("event_time")
                    .and_then(|t| t.as_str())
                    .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
                    .map(|t| t.with_timezone(&Utc));
                update.event = Some(self.add_event(event, event_time)?.into_record());
            }
        }

        if !update.is_empty() {
            tracing::debug!(
                attributes = update.attributes.len(),
                event = update.event.is_some(),
                "Updated persona from interaction"
            );
        }
        Ok(update)
    }

    // ========================================================================
    // TOPICS
    // ========================================================================

    /// One to three word topic of `text`, or `None` for small talk
    pub fn identify_topic(&self, text: &str) -> Result<Option<String>> {
        let prompt = format!(
            "Identify the main topic of this text in 1-3 words:\n\n{}\n\nReturn \"general\" if no specific topic.",
            sanitize_prompt_input(text, 500)
        );
        let request = CompletionRequest::new(prompt)
            .with_system("Return only the topic name.")
            .with_max_tokens(20);
        let response = self.engine.complete(request)?;
        let topic: String = response
            .trim()
            .trim_matches(|c: char| c == '"' || c == '\'' || c == '.')
            .to_lowercase()
            .chars()
            .take(MAX_TOPIC_LENGTH)
            .collect();
        if topic.is_empty() || topic == "general" {
            return Ok(None);
        }
        Ok(Some(topic))
    }

    pub fn get_or_create_topic(&self, name: &str) -> Result<Topic> {
        let storage = self.engine.storage();
        if let Some(topic) = storage.get_topic(self.sid(), name)? {
            return Ok(topic);
        }
        let topic = Topic::new(self.sid(), name, Utc::now());
        storage.save_topic(&topic)?;
        Ok(topic)
    }

    /// Record `message_id` under a topic, keeping the newest 100 ids
    pub fn index_message_to_topic(&self, name: &str, message_id: &str) -> Result<Topic> {
        let mut topic = self.get_or_create_topic(name)?;
        topic.index_message(message_id, Utc::now());
        self.engine.storage().save_topic(&topic)?;
        Ok(topic)
    }

    /// A topic with its ten most recent messages, newest first
    pub fn topic_context(&self, name: &str) -> Result<TopicContext> {
        let topic = self.get_or_create_topic(name)?;
        let start = topic.message_ids.len().saturating_sub(TOPIC_CONTEXT_MESSAGES);
        let mut recent_messages = self
            .engine
            .storage()
            .get_messages(self.sid(), &topic.message_ids[start..])?;
        recent_messages.reverse();
        for message in &mut recent_messages {
            message.content = message.content.chars().take(200).collect();
        }
        Ok(TopicContext {
            topic,
            recent_messages,
        })
    }

    pub fn recent_topics(&self, limit: usize) -> Result<Vec<Topic>> {
        Ok(self.engine.storage().recent_topics(self.sid(), clamp_limit(limit))?)
    }

    /// Summarize a topic with at least three messages.
    ///
    /// Reads a `Summary:` line and up to five `- ` key-point lines from the
    /// response. Returns `None` when the topic is too short.
    pub fn update_topic_summary(&self, name: &str) -> Result<Option<Topic>> {
        let mut topic = self.get_or_create_topic(name)?;
        let start = topic.message_ids.len().saturating_sub(20);
        let messages = self
            .engine
            .storage()
            .get_messages(self.sid(), &topic.message_ids[start..])?;
        if messages.len() < MIN_TOPIC_MESSAGES {
            return Ok(None);
        }

        let conversation = messages
            .iter()
            .map(|m| format!("{}: {}", m.role, sanitize_prompt_input(&m.content, 200)))
            .collect::<Vec<_>>()
            .join("\n");
        let prompt = format!(
            "Summarize the key points discussed about \"{}\":\n\n{}\n\n\
             Return a 1-2 sentence summary and 3-5 key points.\n\n\
             Format:\nSummary: [summary here]\nKey points:\n- [point 1]\n- [point 2]",
            sanitize_prompt_input(name, MAX_TOPIC_LENGTH),
            conversation
        );
        let request = CompletionRequest::new(prompt).with_system("Summarize conversations concisely.");
        let response = self.engine.complete(request)?;

        let (summary, key_points) = parse_topic_summary(&response);
        topic.summary = Some(summary);
        topic.key_points = key_points;
        topic.updated_at = Utc::now();
        self.engine.storage().save_topic(&topic)?;
        Ok(Some(topic))
    }

    // ========================================================================
    // KEYWORDS
    // ========================================================================

    /// Index a message under up to 20 keywords of three or more characters
    pub fn index_message_to_keywords(&self, keywords: &[String], message_id: Option<&str>) -> Result<Vec<KeywordIndex>> {
        let storage = self.engine.storage();
        let now = Utc::now();
        let mut updated: Vec<KeywordIndex> = Vec::new();

        for keyword in keywords.iter().take(MAX_KEYWORDS_PER_MESSAGE) {
            let keyword = keyword.trim().to_lowercase();
            if keyword.chars().count() < MIN_KEYWORD_LENGTH
                || updated.iter().any(|k| k.keyword == keyword)
            {
                continue;
            }
            let mut index = storage
                .get_keyword(self.sid(), &keyword)?
                .unwrap_or_else(|| KeywordIndex::new(self.sid(), keyword.as_str(), now));
            match message_id {
                Some(id) => index.index_message(id),
                None => index.occurrence_count += 1,
            }
            updated.push(index);
        }

        storage.save_keywords(&updated)?;
        Ok(updated)
    }

    /// Messages indexed under `keyword`, newest first
    pub fn search_by_keyword(&self, keyword: &str, limit: usize) -> Result<Vec<InteractionMessage>> {
        let storage = self.engine.storage();
        let Some(index) = storage.get_keyword(self.sid(), &keyword.trim().to_lowercase())? else {
            return Ok(Vec::new());
        };
        let start = index.message_ids.len().saturating_sub(clamp_limit(limit));
        let mut messages = storage.get_messages(self.sid(), &index.message_ids[start..])?;
        messages.reverse();
        Ok(messages)
    }

    pub fn top_keywords(&self, limit: usize) -> Result<Vec<KeywordIndex>> {
        Ok(self.engine.storage().top_keywords(self.sid(), clamp_limit(limit))?)
    }
}

/// `Summary:` line and `- ` key points of a topic summary response
fn parse_topic_summary(response: &str) -> (String, Vec<String>) {
    let mut summary = String::new();
    let mut key_points = Vec::new();
    for line in response.lines().map(str::trim) {
        if let Some(rest) = line.strip_prefix("Summary:") {
            summary = rest.trim().to_string();
        } else if let Some(point) = line.strip_prefix("- ") {
            if key_points.len() < MAX_KEY_POINTS {
                key_points.push(point.trim().to_string());
            }
        }
    }
    (summary, key_points)
}
