//! Working-memory indexes over raw conversation messages

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Message ids kept per topic
pub const TOPIC_MESSAGE_WINDOW: usize = 100;

/// Message ids kept per keyword
pub const KEYWORD_MESSAGE_WINDOW: usize = 50;

memory_enum! {
    /// Speaker of an interaction message
    pub enum MessageRole ("role") {
        User => "user",
        Assistant => "assistant",
        System => "system",
    }
}

/// One raw conversation message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InteractionMessage {
    pub id: String,
    pub session_id: String,
    pub role: MessageRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl InteractionMessage {
    pub fn new(session_id: &str, role: MessageRole, content: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            session_id: session_id.to_string(),
            role,
            content: content.into(),
            timestamp: at,
        }
    }
}

/// Conversation topic with its most recent messages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Topic {
    pub id: String,
    pub session_id: String,
    pub topic: String,
    pub description: Option<String>,
    pub message_ids: Vec<String>,
    pub message_count: i64,
    pub first_discussed: Option<DateTime<Utc>>,
    pub last_discussed: Option<DateTime<Utc>>,
    pub summary: Option<String>,
    pub key_points: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Topic {
    pub fn new(session_id: &str, topic: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            session_id: session_id.to_string(),
            topic: topic.into(),
            description: None,
            message_ids: Vec::new(),
            message_count: 0,
            first_discussed: None,
            last_discussed: None,
            summary: None,
            key_points: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Record a message under this topic
    pub fn index_message(&mut self, message_id: &str, at: DateTime<Utc>) {
        push_bounded(&mut self.message_ids, message_id, TOPIC_MESSAGE_WINDOW);
        self.message_count += 1;
        self.first_discussed.get_or_insert(at);
        self.last_discussed = Some(at);
        self.updated_at = at;
    }
}

/// Keyword with the messages and facts mentioning it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeywordIndex {
    pub id: String,
    pub session_id: String,
    pub keyword: String,
    pub message_ids: Vec<String>,
    pub fact_ids: Vec<String>,
    pub occurrence_count: i64,
    pub created_at: DateTime<Utc>,
}

impl KeywordIndex {
    pub fn new(session_id: &str, keyword: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            session_id: session_id.to_string(),
            keyword: keyword.into(),
            message_ids: Vec::new(),
            fact_ids: Vec::new(),
            occurrence_count: 0,
            created_at: now,
        }
    }

    pub fn index_message(&mut self, message_id: &str) {
        push_bounded(&mut self.message_ids, message_id, KEYWORD_MESSAGE_WINDOW);
        self.occurrence_count += 1;
    }
}

/// Append `id` unless already last, keeping only the newest `cap` entries
pub fn push_bounded(list: &mut Vec<String>, id: &str, cap: usize) {
    if list.last().is_some_and(|last| last == id) {
        return;
    }
    list.push(id.to_string());
    if list.len() > cap {
        let excess = list.len() - cap;
        list.drain(..excess);
    }
}
