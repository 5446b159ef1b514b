//! Storage Module
//!
//! SQLite-based storage layer with:
//! - One table per memory network, scoped by session
//! - Bitemporal validity columns and fixed-width UTC timestamps
//! - Embedded vector storage for optional similarity ranking
//! - An append-only operation log

mod beliefs;
mod experiences;
mod facts;
mod governance;
mod graph;
mod indexes;
mod migrations;
mod snapshots;
mod sqlite;
mod vectors;

pub use experiences::ExperienceCluster;
pub use governance::DecayCounts;
pub use migrations::{Migration, MIGRATIONS};
pub use snapshots::{CaptureWindow, CapturedRecords, RestoreCounts};
pub use sqlite::{Result, Storage, StorageError};
pub use vectors::StoredEmbedding;

pub(crate) use sqlite::{like_pattern, ts};

#[cfg(test)]
pub(crate) use sqlite::test_support;
