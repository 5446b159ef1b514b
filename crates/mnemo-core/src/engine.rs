//! The engine context
//!
//! One [`MemoryEngine`] is constructed per process. It owns the storage
//! handle, the configuration, the embedding service and every external
//! collaborator, and hands out borrowed per-session views:
//!
//! ```rust,no_run
//! use mnemo_core::prelude::*;
//!
//! # fn main() -> mnemo_core::Result<()> {
//! let engine = MemoryEngine::builder(Storage::new(None)?).build();
//! let session = SessionId::default();
//! let fact = engine.facts(&session).add(FactInput::new("User prefers dark mode"))?;
//! println!("{}", fact.record().id);
//! # Ok(())
//! # }
//! ```

use chrono::{DateTime, Utc};
use std::path::PathBuf;
use std::sync::Arc;

use crate::collaborators::{
    CollaboratorError, CollaboratorRuntime, CompletionRequest, LanguageModel,
    LanguageModelSummarizer, Summarizer, SummaryStyle,
};
use crate::config::EngineConfig;
use crate::consolidation::Consolidator;
use crate::embeddings::{Embedder, EmbeddingService};
use crate::manager::MemoryManager;
use crate::memory::{MemoryKind, SessionId};
use crate::networks::{BeliefNetwork, ExperienceNetwork, FactNetwork, ObservationNetwork, PersonaIndex};
use crate::operations::{DecisionSource, MemoryGateway};
use crate::scheduler::MemoryScheduler;
use crate::snapshot::{SnapshotManager, SnapshotStore};
use crate::storage::Storage;

/// Process-wide memory engine
pub struct MemoryEngine {
    storage: Storage,
    config: EngineConfig,
    embeddings: EmbeddingService,
    language_model: Option<Arc<dyn LanguageModel>>,
    summarizer: Option<Arc<dyn Summarizer>>,
    decisions: Option<Arc<dyn DecisionSource>>,
    runtime: CollaboratorRuntime,
    snapshots: SnapshotStore,
}

/// Assembles a [`MemoryEngine`]
pub struct EngineBuilder {
    storage: Storage,
    config: EngineConfig,
    embedder: Option<Arc<dyn Embedder>>,
    language_model: Option<Arc<dyn LanguageModel>>,
    summarizer: Option<Arc<dyn Summarizer>>,
    decisions: Option<Arc<dyn DecisionSource>>,
}

impl EngineBuilder {
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    /// Language model used for extraction, topics and persona updates.
    /// Also backs the summarizer and decision source unless those are set.
    pub fn language_model(mut self, model: Arc<dyn LanguageModel>) -> Self {
        self.language_model = Some(model);
        self
    }

    pub fn summarizer(mut self, summarizer: Arc<dyn Summarizer>) -> Self {
        self.summarizer = Some(summarizer);
        self
    }

    pub fn decision_source(mut self, decisions: Arc<dyn DecisionSource>) -> Self {
        self.decisions = Some(decisions);
        self
    }

    pub fn build(self) -> MemoryEngine {
        let timeout = self.config.collaborator_timeout();
        let runtime = CollaboratorRuntime::new();
        let embeddings = match self.embedder {
            Some(embedder) => EmbeddingService::new(embedder, timeout).with_runtime(runtime.clone()),
            None => EmbeddingService::disabled(),
        };
        let summarizer = self.summarizer.or_else(|| {
            self.language_model.as_ref().map(|model| {
                let summarizer =
                    LanguageModelSummarizer::new(Arc::clone(model), timeout).with_runtime(runtime.clone());
                Arc::new(summarizer) as Arc<dyn Summarizer>
            })
        });
        let decisions = self.decisions.or_else(|| {
            self.language_model.as_ref().map(|model| {
                let decisions = crate::operations::LanguageModelDecisions::new(Arc::clone(model), timeout)
                    .with_runtime(runtime.clone());
                Arc::new(decisions) as Arc<dyn DecisionSource>
            })
        });

        MemoryEngine {
            snapshots: SnapshotStore::new(self.config.snapshot_capacity),
            storage: self.storage,
            config: self.config,
            embeddings,
            language_model: self.language_model,
            summarizer,
            decisions,
            runtime,
        }
    }
}

impl MemoryEngine {
    pub fn builder(storage: Storage) -> EngineBuilder {
        EngineBuilder {
            storage,
            config: EngineConfig::default(),
            embedder: None,
            language_model: None,
            summarizer: None,
            decisions: None,
        }
    }

    /// Open storage at `path` (or the platform default) with no collaborators
    pub fn open(path: Option<PathBuf>, config: EngineConfig) -> crate::Result<Self> {
        Ok(Self::builder(Storage::new(path)?).config(config).build())
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn embeddings(&self) -> &EmbeddingService {
        &self.embeddings
    }

    pub fn language_model(&self) -> Option<&Arc<dyn LanguageModel>> {
        self.language_model.as_ref()
    }

    pub fn summarizer(&self) -> Option<&Arc<dyn Summarizer>> {
        self.summarizer.as_ref()
    }

    pub fn decision_source(&self) -> Option<&Arc<dyn DecisionSource>> {
        self.decisions.as_ref()
    }

    pub(crate) fn snapshot_store(&self) -> &SnapshotStore {
        &self.snapshots
    }

    // ========================================================================
    // SESSION VIEWS
    // ========================================================================

    pub fn facts<'e>(&'e self, session: &'e SessionId) -> FactNetwork<'e> {
        FactNetwork::new(self, session)
    }

    pub fn experiences<'e>(&'e self, session: &'e SessionId) -> ExperienceNetwork<'e> {
        ExperienceNetwork::new(self, session)
    }

    pub fn observations<'e>(&'e self, session: &'e SessionId) -> ObservationNetwork<'e> {
        ObservationNetwork::new(self, session)
    }

    pub fn beliefs<'e>(&'e self, session: &'e SessionId) -> BeliefNetwork<'e> {
        BeliefNetwork::new(self, session)
    }

    pub fn persona<'e>(&'e self, session: &'e SessionId) -> PersonaIndex<'e> {
        PersonaIndex::new(self, session)
    }

    pub fn scheduler<'e>(&'e self, session: &'e SessionId) -> MemoryScheduler<'e> {
        MemoryScheduler::new(self, session)
    }

    pub fn gateway<'e>(&'e self, session: &'e SessionId) -> MemoryGateway<'e> {
        MemoryGateway::new(self, session)
    }

    pub fn consolidator<'e>(&'e self, session: &'e SessionId) -> Consolidator<'e> {
        Consolidator::new(self, session)
    }

    pub fn snapshots<'e>(&'e self, session: &'e SessionId) -> SnapshotManager<'e> {
        SnapshotManager::new(self, session)
    }

    pub fn manager<'e>(&'e self, session: &'e SessionId) -> MemoryManager<'e> {
        MemoryManager::new(self, session)
    }

    // ========================================================================
    // COLLABORATOR CALLS
    // ========================================================================

    /// Run a completion with the configured timeout
    pub(crate) fn complete(&self, request: CompletionRequest) -> Result<String, CollaboratorError> {
        let model = self
            .language_model
            .as_ref()
            .ok_or_else(|| CollaboratorError::unavailable("language model", "not configured"))?;
        self.runtime
            .complete(model, request.with_timeout(self.config.collaborator_timeout()))
    }

    pub(crate) fn summarize(
        &self,
        items: &[String],
        style: SummaryStyle,
    ) -> Result<String, CollaboratorError> {
        let summarizer = self
            .summarizer
            .as_ref()
            .ok_or_else(|| CollaboratorError::unavailable("summarizer", "not configured"))?;
        summarizer.summarize(items, style)
    }

    /// Embed `text` and store the vector for `(kind, id)`; failures only log
    pub(crate) fn index_embedding(
        &self,
        session: &SessionId,
        kind: MemoryKind,
        id: &str,
        text: &str,
        now: DateTime<Utc>,
    ) {
        let Some(embedding) = self.embeddings.embed(text) else {
            return;
        };
        if let Err(e) = self.storage.save_embedding(
            session.as_str(),
            kind,
            id,
            &embedding,
            self.embeddings.model_name(),
            now,
        ) {
            tracing::warn!(kind = %kind, id, "Failed to store embedding: {}", e);
        }
    }
}
