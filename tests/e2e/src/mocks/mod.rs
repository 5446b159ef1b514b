//! Deterministic collaborators and fixture data

mod collaborators;
mod fixtures;

pub use collaborators::{HashEmbedder, OfflineModel, ScriptedModel, StaticDecisions, UnavailableEmbedder};
pub use fixtures::TestDataFactory;
