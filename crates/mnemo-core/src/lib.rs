//! # Mnemo Core
//!
//! Multi-network memory engine for a personal assistant that remembers one
//! user across sessions:
//!
//! - **Fact network**: bitemporal facts with dedup-on-add and heat tracking
//! - **Experience network**: episodes with outcomes, mined into procedures
//! - **Observation network**: entities and the relationships between them
//! - **Belief network**: opinions whose confidence moves with evidence
//! - **Persona index**: user profile, conversation topics and keywords
//! - **Scheduler**: heat-based ranking, decay, preloading and archival
//! - **Operation gateway**: validated ADD/UPDATE/DELETE/NOOP from an
//!   external decision source, every outcome logged
//! - **Consolidator**: independent maintenance steps with partial success
//! - **Snapshots**: value copies of at-risk records with idempotent rollback
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use mnemo_core::prelude::*;
//!
//! let storage = Storage::new(None)?;
//! let engine = MemoryEngine::builder(storage).build();
//! let session = SessionId::default();
//!
//! engine.facts(&session).add(FactInput::new("User lives in Lisbon"))?;
//!
//! let manager = engine.manager(&session);
//! let context = manager.build_context("where does the user live?");
//! let prompt = manager.format_context_for_prompt(&context);
//! ```
//!
//! ## Feature Flags
//!
//! - `bundled-sqlite` (default): bundled SQLite
//! - `encryption`: SQLCipher, keyed by `MNEMO_ENCRYPTION_KEY`
//! - `embeddings`: local fastembed backend

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(rustdoc::missing_crate_level_docs)]

#[macro_use]
mod macros;

// ============================================================================
// MODULES
// ============================================================================

pub mod collaborators;
pub mod config;
pub mod confidence;
pub mod consolidation;
pub mod embeddings;
pub mod engine;
pub mod error;
pub mod manager;
pub mod memory;
pub mod networks;
pub mod operations;
pub mod scheduler;
pub mod search;
pub mod snapshot;
pub mod storage;

#[cfg(test)]
mod testing;

// ============================================================================
// PUBLIC API RE-EXPORTS
// ============================================================================

// Records
pub use memory::{
    Belief, BeliefInput, BeliefStatus, BeliefType, Entity, EntityInput, EntityType, Experience,
    ExperienceInput, ExperienceType, Fact, FactCategory, FactFilter, FactInput, FactSource,
    FactType, FactUpdate, InteractionMessage, MemoryKind, MemoryStats, MessageRole, Outcome,
    Relationship, RelationshipInput, SessionId,
};

// Engine and configuration
pub use config::{ConfigError, EngineConfig};
pub use engine::{EngineBuilder, MemoryEngine};
pub use error::{MemoryError, Result, ValidationError};

// Collaborators
pub use collaborators::{CollaboratorError, CompletionRequest, LanguageModel, Summarizer, SummaryStyle};
pub use embeddings::{Embedder, Embedding, EmbeddingService};

#[cfg(feature = "embeddings")]
#[cfg_attr(docsrs, doc(cfg(feature = "embeddings")))]
pub use embeddings::LocalEmbedder;

// Session views
pub use consolidation::{ConsolidationReport, ConsolidationStep, Consolidator, StepOutcome};
pub use manager::{MemoryContext, MemoryManager, ProcessingSummary};
pub use networks::{BeliefNetwork, ExperienceNetwork, FactNetwork, ObservationNetwork, PersonaIndex, Upsert};
pub use operations::{
    DecisionGateway, DecisionSource, Interaction, MemoryGateway, OperationOutcome, ProposedOperation,
};
pub use scheduler::{MemoryScheduler, SchedulingStats};
pub use snapshot::{Snapshot, SnapshotManager, RollbackSummary};

// Storage layer
pub use storage::{Storage, StorageError};

// ============================================================================
// VERSION INFO
// ============================================================================

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// ============================================================================
// PRELUDE
// ============================================================================

/// Convenient imports for common usage
pub mod prelude {
    pub use crate::{
        BeliefInput, ConsolidationReport, EngineConfig, ExperienceInput, Fact, FactFilter,
        FactInput, MemoryEngine, MemoryError, MemoryKind, Result, SessionId, Storage,
    };
    pub use crate::operations::DecisionGateway;
}
