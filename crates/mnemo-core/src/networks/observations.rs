//! Observation network: entities and the relationships between them

use chrono::{Duration, Utc};

use super::Upsert;
use crate::collaborators::SummaryStyle;
use crate::confidence::{bump_unit, weighted_merge, RELATIONSHIP_STRENGTH_STEP};
use crate::engine::MemoryEngine;
use crate::error::{MemoryError, Result};
use crate::memory::{
    canonicalize, Entity, EntityContext, EntityInput, FactFilter, MemoryKind, Relationship,
    RelationshipInput, RelationshipView, SessionId,
};
use crate::search::{self, clamp_limit, SearchHit};

/// Entities and relationships included by [`ObservationNetwork::entity_context`]
pub const CONTEXT_ENTITY_LIMIT: usize = 5;
pub const CONTEXT_RELATIONSHIP_LIMIT: usize = 5;

/// Summaries older than this are refreshed
const SUMMARY_STALE_DAYS: i64 = 7;
const SUMMARY_REFRESH_LIMIT: usize = 10;
const KEYWORD_LIMIT: usize = 10;

/// Entities and relationships of one session
pub struct ObservationNetwork<'e> {
    engine: &'e MemoryEngine,
    session: &'e SessionId,
}

impl<'e> ObservationNetwork<'e> {
    pub(crate) fn new(engine: &'e MemoryEngine, session: &'e SessionId) -> Self {
        Self { engine, session }
    }

    fn sid(&self) -> &str {
        self.session.as_str()
    }

    // ========================================================================
    // ENTITIES
    // ========================================================================

    /// Record a mention of an entity, creating it on first sight
    pub fn upsert_entity(&self, input: EntityInput) -> Result<Upsert<Entity>> {
        let input = input.validated()?;
        let now = Utc::now();
        let storage = self.engine.storage();

        if let Some(mut entity) = storage.find_entity_by_canonical(self.sid(), &canonicalize(&input.name))? {
            entity.absorb(input, now);
            storage.save_entity(&entity)?;
            return Ok(Upsert::Merged(entity));
        }

        let entity = Entity::from_input(self.sid(), input, now);
        storage.save_entity(&entity)?;
        self.engine.index_embedding(
            self.session,
            MemoryKind::Entity,
            &entity.id,
            &entity_text(&entity),
            now,
        );
        tracing::debug!(id = %entity.id, name = %entity.name, "Created entity");
        Ok(Upsert::Inserted(entity))
    }

    pub fn get_entity(&self, id: &str) -> Result<Entity> {
        self.engine
            .storage()
            .get_entity(self.sid(), id)?
            .ok_or_else(|| MemoryError::not_found(MemoryKind::Entity, id))
    }

    /// Look an entity up by any spelling of its name
    pub fn find_entity(&self, name: &str) -> Result<Option<Entity>> {
        Ok(self
            .engine
            .storage()
            .find_entity_by_canonical(self.sid(), &canonicalize(name))?)
    }

    pub fn search_entities(&self, query: &str, limit: usize) -> Result<Vec<SearchHit<Entity>>> {
        let query = query.trim();
        if query.is_empty() {
            return Ok(Vec::new());
        }
        let limit = clamp_limit(limit);
        let storage = self.engine.storage();

        if let Some(embedding) = self.engine.embeddings().embed(query) {
            let stored = storage.load_embeddings(self.sid(), MemoryKind::Entity)?;
            let ranked = self.engine.embeddings().find_similar(
                &embedding,
                stored.iter().map(|s| (s.memory_id.as_str(), &s.embedding)),
                0.0,
                limit,
            );
            let mut hits = Vec::with_capacity(ranked.len());
            for (id, score) in ranked {
                if let Some(entity) = storage.get_entity(self.sid(), &id)? {
                    hits.push(SearchHit::vector(entity, score));
                }
            }
            if !hits.is_empty() {
                return Ok(hits);
            }
        }

        Ok(storage
            .search_entities_text(self.sid(), query, limit)?
            .into_iter()
            .map(SearchHit::text)
            .collect())
    }

    pub fn top_entities(&self, limit: usize) -> Result<Vec<Entity>> {
        Ok(self.engine.storage().top_entities(self.sid(), clamp_limit(limit))?)
    }

    // ========================================================================
    // RELATIONSHIPS
    // ========================================================================

    /// Add an edge, or reinforce the live edge with the same endpoints and type.
    ///
    /// Reinforcing adds 0.1 to strength (capped at 1) and averages the
    /// confidences.
    pub fn add_relationship(&self, input: RelationshipInput) -> Result<Upsert<Relationship>> {
        let input = input.validated()?;
        let storage = self.engine.storage();
        for id in [&input.source_id, &input.target_id] {
            if storage.get_entity(self.sid(), id)?.is_none() {
                return Err(MemoryError::not_found(MemoryKind::Entity, id.as_str()));
            }
        }

        let now = Utc::now();
        if let Some(mut existing) = storage.find_live_relationship(
            self.sid(),
            &input.source_id,
            &input.target_id,
            &input.relation_type,
        )? {
            existing.strength = bump_unit(existing.strength, RELATIONSHIP_STRENGTH_STEP);
            existing.confidence = weighted_merge(existing.confidence, input.confidence, 0.5);
            for fact_id in input.evidence {
                if !existing.evidence.contains(&fact_id) {
                    existing.evidence.push(fact_id);
                }
            }
            existing.updated_at = now;
            storage.save_relationship(&existing)?;
            return Ok(Upsert::Merged(existing));
        }

        let relationship = Relationship::from_input(self.sid(), input, now);
        storage.save_relationship(&relationship)?;
        tracing::debug!(
            id = %relationship.id,
            relation_type = %relationship.relation_type,
            "Added relationship"
        );
        Ok(Upsert::Inserted(relationship))
    }

    pub fn get_relationship(&self, id: &str) -> Result<Relationship> {
        self.engine
            .storage()
            .get_relationship(self.sid(), id)?
            .ok_or_else(|| MemoryError::not_found(MemoryKind::Relationship, id))
    }

    /// Live relationships of an entity in both directions
    pub fn relationships(&self, entity_id: &str, limit: usize) -> Result<Vec<RelationshipView>> {
        Ok(self
            .engine
            .storage()
            .relationships_of(self.sid(), entity_id, clamp_limit(limit))?)
    }

    pub fn invalidate_relationship(&self, id: &str) -> Result<bool> {
        Ok(self.engine.storage().close_relationship(self.sid(), id, Utc::now())?)
    }

    /// Prompt-ready description of up to five named entities
    pub fn entity_context(&self, names: &[String]) -> Result<Vec<EntityContext>> {
        let mut contexts = Vec::new();
        for name in names.iter().take(CONTEXT_ENTITY_LIMIT) {
            let Some(entity) = self.find_entity(name)? else {
                continue;
            };
            let relationships = self.relationships(&entity.id, CONTEXT_RELATIONSHIP_LIMIT)?;
            contexts.push(EntityContext {
                name: entity.name,
                entity_type: entity.entity_type,
                summary: entity.summary,
                key_facts: entity.key_facts,
                relationships,
            });
        }
        Ok(contexts)
    }

    /// Regenerate missing or stale summaries for the most mentioned entities.
    ///
    /// Returns the number refreshed. Fails only when the summarizer is
    /// unavailable for every candidate.
    pub fn refresh_summaries(&self) -> Result<usize> {
        let storage = self.engine.storage();
        let stale_before = Utc::now() - Duration::days(SUMMARY_STALE_DAYS);
        let candidates = storage.entities_needing_summary(self.sid(), stale_before, SUMMARY_REFRESH_LIMIT)?;

        let mut refreshed = 0;
        let mut last_error = None;
        for mut entity in candidates {
            let mut items = vec![format!("{} ({})", entity.name, entity.entity_type)];
            items.extend(entity.key_facts.iter().cloned());
            items.extend(
                storage
                    .search_facts_text(self.sid(), &entity.name, &FactFilter::default(), 10, Utc::now())?
                    .into_iter()
                    .map(|f| f.content),
            );

            match self.engine.summarize(&items, SummaryStyle::Entity) {
                Ok(summary) if !summary.trim().is_empty() => {
                    let now = Utc::now();
                    entity.summary = Some(summary.trim().chars().take(2000).collect());
                    entity.last_updated = Some(now);
                    storage.save_entity(&entity)?;
                    refreshed += 1;
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::debug!(entity = %entity.name, "Summary refresh failed: {}", e);
                    last_error = Some(e);
                }
            }
        }

        match last_error {
            Some(e) if refreshed == 0 => Err(e.into()),
            _ => Ok(refreshed),
        }
    }

    // ========================================================================
    // TEXT EXTRACTION
    // ========================================================================

    /// Known entity names present in `text`, then capitalised word runs
    pub fn extract_entities(&self, text: &str) -> Result<Vec<String>> {
        let lower = text.to_lowercase();
        let mut names: Vec<String> = Vec::new();
        for (_, canonical) in self.engine.storage().entity_names(self.sid())? {
            if !canonical.is_empty() && lower.contains(&canonical) && !names.contains(&canonical) {
                names.push(canonical);
            }
        }
        for phrase in search::capitalised_phrases(text) {
            if !names.contains(&phrase) {
                names.push(phrase);
            }
        }
        Ok(names)
    }

    /// Most frequent content words of `text`
    pub fn extract_keywords(&self, text: &str) -> Vec<String> {
        search::extract_keywords(text, KEYWORD_LIMIT)
    }
}

fn entity_text(entity: &Entity) -> String {
    match &entity.summary {
        Some(summary) => format!("{} {}", entity.name, summary),
        None => entity.name.clone(),
    }
}
