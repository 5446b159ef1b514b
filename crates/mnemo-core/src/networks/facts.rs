//! Fact network

use chrono::{DateTime, Utc};

use super::Upsert;
use crate::collaborators::{parse_json_array, sanitize_prompt_input, CompletionRequest};
use crate::confidence::{bump_heat, reinforce, weighted_merge};
use crate::engine::MemoryEngine;
use crate::error::{MemoryError, Result, ValidationError};
use crate::memory::{
    Fact, FactCategory, FactFilter, FactInput, FactSource, FactType, FactUpdate, Link, LinkType,
    MemoryKind, SessionId,
};
use crate::search::{clamp_limit, rank, text_similarity, SearchHit};

/// Weight of the stored confidence when a duplicate is merged
pub const MERGE_OLD_WEIGHT: f64 = 0.6;

/// Reinforcement applied after a merge
pub const MERGE_REINFORCE_STRENGTH: f64 = 0.2;

/// Heat added to a fact a duplicate merged into
pub const MERGE_HEAT_BUMP: f64 = 0.2;

/// Heat added to every fact returned by a search
pub const SEARCH_HEAT_BUMP: f64 = 0.1;

const EXTRACTION_PROMPT: &str = "Extract factual information about the user from this conversation.
Focus on: preferences, habits, goals, demographics, skills, opinions.

Conversation:
{conversation}

Return a JSON array of facts. Each fact has:
- content: the fact (1 sentence)
- fact_type: preference/habit/goal/demographic/skill/opinion
- category: work/personal/health/finance/learning/other
- confidence: 0-1

Return only a valid JSON array. Return [] if no facts are found.";

/// Facts of one session
pub struct FactNetwork<'e> {
    engine: &'e MemoryEngine,
    session: &'e SessionId,
}

impl<'e> FactNetwork<'e> {
    pub(crate) fn new(engine: &'e MemoryEngine, session: &'e SessionId) -> Self {
        Self { engine, session }
    }

    fn sid(&self) -> &str {
        self.session.as_str()
    }

    /// Add a fact, or merge it into a live near-duplicate.
    ///
    /// A duplicate scores at least the dedup threshold by embedding
    /// similarity, or by [`text_similarity`] when no embedding is
    /// available. The merge blends confidences, reinforces the result and
    /// counts as an access.
    pub fn add(&self, input: FactInput) -> Result<Upsert<Fact>> {
        let input = input.validated()?;
        let now = Utc::now();
        let storage = self.engine.storage();

        if let Some((mut existing, score)) = self.find_duplicate(&input.content, now)? {
            let blended = weighted_merge(existing.confidence, input.confidence, MERGE_OLD_WEIGHT);
            existing.confidence = reinforce(blended, MERGE_REINFORCE_STRENGTH);
            existing.heat_score = bump_heat(existing.heat_score, MERGE_HEAT_BUMP);
            existing.access_count += 1;
            existing.last_accessed = Some(now);
            existing.updated_at = now;
            storage.save_fact(&existing)?;
            tracing::debug!(id = %existing.id, score, "Merged duplicate fact");
            return Ok(Upsert::Merged(existing));
        }

        let fact = Fact::from_input(self.sid(), input, now);
        storage.insert_fact(&fact)?;
        self.engine
            .index_embedding(self.session, MemoryKind::Fact, &fact.id, fact.embedding_text(), now);
        tracing::info!(
            id = %fact.id,
            fact_type = %fact.fact_type,
            confidence = fact.confidence,
            "Added fact"
        );
        Ok(Upsert::Inserted(fact))
    }

    /// Best live fact scoring at or above the dedup threshold
    fn find_duplicate(&self, content: &str, now: DateTime<Utc>) -> Result<Option<(Fact, f64)>> {
        let config = self.engine.config();
        let threshold = config.dedup_threshold;
        let storage = self.engine.storage();

        if let Some(query) = self.engine.embeddings().embed(content) {
            let stored = storage.load_embeddings(self.sid(), MemoryKind::Fact)?;
            let ranked = self.engine.embeddings().find_similar(
                &query,
                stored.iter().map(|s| (s.memory_id.as_str(), &s.embedding)),
                threshold,
                config.dedup_candidates,
            );
            for (id, score) in ranked {
                if let Some(fact) = storage.get_fact(self.sid(), &id)? {
                    if fact.is_valid_at(now) {
                        return Ok(Some((fact, score)));
                    }
                }
            }
            return Ok(None);
        }

        if let Some(fact) = storage.find_live_fact_by_content(self.sid(), content, now)? {
            return Ok(Some((fact, 1.0)));
        }

        let mut best: Option<(Fact, f64)> = None;
        storage.scan_live_facts(self.sid(), now, |fact| {
            let score = text_similarity(&fact.content, content);
            if score >= threshold && best.as_ref().is_none_or(|(_, top)| score > *top) {
                best = Some((fact, score));
            }
            score < 1.0
        })?;
        Ok(best)
    }

    /// Rank facts for `query`.
    ///
    /// Uses embedding similarity when available and falls back to substring
    /// matching scored at 0.5. Every returned fact counts as accessed.
    pub fn search(&self, query: &str, limit: usize, filter: &FactFilter) -> Result<Vec<SearchHit<Fact>>> {
        let now = Utc::now();
        let mut hits = self.lookup(query, limit, filter)?;
        if hits.is_empty() {
            return Ok(hits);
        }

        let ids: Vec<String> = hits.iter().map(|h| h.item.id.clone()).collect();
        self.engine
            .storage()
            .record_fact_access(self.sid(), &ids, SEARCH_HEAT_BUMP, now)?;
        for hit in &mut hits {
            hit.item.access_count += 1;
            hit.item.last_accessed = Some(now);
            hit.item.heat_score = bump_heat(hit.item.heat_score, SEARCH_HEAT_BUMP);
        }
        Ok(hits)
    }

    /// Rank facts for `query` like [`Self::search`] without counting an access
    pub fn lookup(&self, query: &str, limit: usize, filter: &FactFilter) -> Result<Vec<SearchHit<Fact>>> {
        let query = query.trim();
        if query.is_empty() {
            return Ok(Vec::new());
        }
        let limit = clamp_limit(limit);
        let now = Utc::now();

        let hits = self.vector_search(query, limit, filter, now)?;
        if !hits.is_empty() {
            return Ok(hits);
        }
        Ok(self
            .engine
            .storage()
            .search_facts_text(self.sid(), query, filter, limit, now)?
            .into_iter()
            .map(SearchHit::text)
            .collect())
    }

    fn vector_search(
        &self,
        query: &str,
        limit: usize,
        filter: &FactFilter,
        now: DateTime<Utc>,
    ) -> Result<Vec<SearchHit<Fact>>> {
        let Some(embedding) = self.engine.embeddings().embed(query) else {
            return Ok(Vec::new());
        };
        let storage = self.engine.storage();
        let stored = storage.load_embeddings(self.sid(), MemoryKind::Fact)?;
        let ranked = self.engine.embeddings().find_similar(
            &embedding,
            stored.iter().map(|s| (s.memory_id.as_str(), &s.embedding)),
            0.0,
            stored.len(),
        );

        let mut hits = Vec::new();
        for (id, score) in ranked {
            if hits.len() >= limit {
                break;
            }
            if let Some(fact) = storage.get_fact(self.sid(), &id)? {
                if filter.matches(&fact, now) {
                    hits.push(SearchHit::vector(fact, score));
                }
            }
        }
        Ok(rank(hits, limit))
    }

    pub fn get(&self, id: &str) -> Result<Fact> {
        self.engine
            .storage()
            .get_fact(self.sid(), id)?
            .ok_or_else(|| MemoryError::not_found(MemoryKind::Fact, id))
    }

    /// Change content, confidence, category, keywords or tags of a live fact
    pub fn update(&self, id: &str, update: FactUpdate) -> Result<Fact> {
        let update = update.validated()?;
        if update.is_empty() {
            return Err(ValidationError::Malformed {
                field: "update",
                reason: "no fields to change".to_string(),
            }
            .into());
        }
        let mut fact = self.get(id)?;
        if !fact.is_live() {
            return Err(ValidationError::Malformed {
                field: "fact",
                reason: "closed facts are immutable".to_string(),
            }
            .into());
        }

        let now = Utc::now();
        let content_changed = update.content.as_ref().is_some_and(|c| *c != fact.content);
        update.apply(&mut fact, now);
        self.engine.storage().save_fact(&fact)?;
        if content_changed {
            self.engine
                .index_embedding(self.session, MemoryKind::Fact, &fact.id, fact.embedding_text(), now);
        }
        Ok(fact)
    }

    /// Close a fact (sets `valid_to`); false when no live fact has `id`
    pub fn invalidate(&self, id: &str) -> Result<bool> {
        let closed = self.engine.storage().close_fact(self.sid(), id, Utc::now())?;
        if closed {
            tracing::info!(id, "Invalidated fact");
        }
        Ok(closed)
    }

    pub fn get_by_type(&self, fact_type: FactType, limit: usize, min_confidence: f64) -> Result<Vec<Fact>> {
        Ok(self.engine.storage().facts_by_type(
            self.sid(),
            fact_type,
            min_confidence,
            clamp_limit(limit),
            Utc::now(),
        )?)
    }

    pub fn persona_attributes(&self) -> Result<Vec<Fact>> {
        Ok(self.engine.storage().persona_attributes(self.sid(), Utc::now())?)
    }

    pub fn persona_events(&self, limit: usize) -> Result<Vec<Fact>> {
        Ok(self.engine.storage().persona_events(self.sid(), clamp_limit(limit))?)
    }

    /// Live facts that do not link to anything yet, newest first
    pub fn unlinked(&self, limit: usize) -> Result<Vec<Fact>> {
        Ok(self
            .engine
            .storage()
            .unlinked_facts(self.sid(), clamp_limit(limit), Utc::now())?)
    }

    /// Link two facts; false when the link already exists
    pub fn create_link(
        &self,
        source_id: &str,
        target_id: &str,
        link_type: LinkType,
        strength: f64,
        reason: Option<String>,
    ) -> Result<bool> {
        if source_id == target_id {
            return Err(ValidationError::Malformed {
                field: "link",
                reason: "a fact cannot link to itself".to_string(),
            }
            .into());
        }
        self.get(source_id)?;
        self.get(target_id)?;

        let link = Link {
            id: uuid::Uuid::new_v4().to_string(),
            session_id: self.sid().to_string(),
            source_kind: MemoryKind::Fact,
            source_id: source_id.to_string(),
            target_kind: MemoryKind::Fact,
            target_id: target_id.to_string(),
            link_type,
            strength: crate::confidence::clamp_unit(strength),
            bidirectional: true,
            reason,
            created_at: Utc::now(),
        };
        Ok(self.engine.storage().insert_link(&link)?)
    }

    /// Live facts per category
    pub fn count_by_category(&self) -> Result<std::collections::BTreeMap<String, i64>> {
        Ok(self
            .engine
            .storage()
            .count_facts_by_category(self.sid(), Utc::now())?)
    }

    /// Ask the language model for facts in the most recent messages and add
    /// each through [`FactNetwork::add`]
    pub fn extract_from_recent_messages(&self) -> Result<Vec<Upsert<Fact>>> {
        let window = self.engine.config().extraction_window;
        let messages = self.engine.storage().recent_messages(self.sid(), window)?;
        if messages.is_empty() {
            return Ok(Vec::new());
        }

        let conversation = messages
            .iter()
            .map(|m| format!("{}: {}", m.role, sanitize_prompt_input(&m.content, 500)))
            .collect::<Vec<_>>()
            .join("\n");
        let request = CompletionRequest::new(EXTRACTION_PROMPT.replace("{conversation}", &conversation))
            .with_system("Extract facts. Return a valid JSON array only.");
        let response = self.engine.complete(request)?;
        let items = parse_json_array(&response)?;

        let mut added = Vec::new();
        for item in items {
            let Some(input) = extracted_fact(&item) else {
                continue;
            };
            match self.add(input) {
                Ok(outcome) => added.push(outcome),
                Err(MemoryError::Validation(e)) => {
                    tracing::debug!("Skipped extracted fact: {}", e);
                }
                Err(e) => return Err(e),
            }
        }
        tracing::info!(count = added.len(), "Extracted facts from recent messages");
        Ok(added)
    }
}

/// Map one extracted JSON item onto an input; unknown enum names fall back
/// to defaults rather than dropping the fact
fn extracted_fact(item: &serde_json::Value) -> Option<FactInput> {
    let content = item.get("content")?.as_str()?.trim();
    if content.is_empty() {
        return None;
    }
    let mut input = FactInput::new(content)
        .with_source(FactSource::Chat)
        .with_confidence(item.get("confidence").and_then(|c| c.as_f64()).unwrap_or(0.7));
    if let Some(fact_type) = item
        .get("fact_type")
        .and_then(|t| t.as_str())
        .and_then(FactType::parse_name)
    {
        input = input.with_type(fact_type);
    }
    if let Some(category) = item
        .get("category")
        .and_then(|c| c.as_str())
        .and_then(FactCategory::parse_name)
    {
        input = input.with_category(category);
    }
    Some(input)
}
