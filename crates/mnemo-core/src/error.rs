//! Error taxonomy
//!
//! Input problems are [`ValidationError`]s and are raised before any write.
//! Everything else surfaces as a [`MemoryError`]. Callers on the context
//! building path never see `CollaboratorUnavailable`; those paths degrade
//! to heuristics instead.

use crate::collaborators::CollaboratorError;
use crate::memory::MemoryKind;
use crate::storage::StorageError;

// ============================================================================
// VALIDATION
// ============================================================================

/// Rejected input, reported before anything is written
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    /// Required text was empty after trimming
    #[error("{field} must not be empty")]
    Empty { field: &'static str },
    /// Text longer than the field allows
    #[error("{field} exceeds {max} characters (got {actual})")]
    TooLong {
        field: &'static str,
        max: usize,
        actual: usize,
    },
    /// Value outside a closed set
    #[error("unknown {field} '{value}' (expected one of: {allowed})")]
    InvalidEnum {
        field: &'static str,
        value: String,
        allowed: String,
    },
    /// Number outside its documented range
    #[error("{field} must be within [{min}, {max}] (got {value})")]
    OutOfRange {
        field: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },
    /// List with too many entries
    #[error("{field} holds {actual} items, the limit is {max}")]
    TooManyItems {
        field: &'static str,
        max: usize,
        actual: usize,
    },
    /// One list entry is too long
    #[error("an entry of {field} exceeds {max} characters")]
    ItemTooLong { field: &'static str, max: usize },
    /// Structurally invalid value
    #[error("invalid {field}: {reason}")]
    Malformed { field: &'static str, reason: String },
}

// ============================================================================
// MEMORY ERRORS
// ============================================================================

/// Crate-level error
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum MemoryError {
    /// Malformed or out-of-range input
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
    /// Operation referenced an id that does not exist in the session
    #[error("{kind} not found: {id}")]
    NotFound { kind: MemoryKind, id: String },
    /// Embedding or language model service could not answer
    #[error("Collaborator unavailable: {0}")]
    CollaboratorUnavailable(#[from] CollaboratorError),
    /// One consolidation step failed; the others still ran
    #[error("Consolidation step '{step}' failed: {message}")]
    ConsolidationStep { step: &'static str, message: String },
    /// A snapshot could not be restored; the mutation is still in place
    #[error("Rollback of snapshot {snapshot_id} failed: {message}")]
    RollbackFailure {
        snapshot_id: String,
        message: String,
    },
    /// Persistence failure
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl MemoryError {
    /// Build a not-found error for a memory kind
    pub fn not_found(kind: MemoryKind, id: impl Into<String>) -> Self {
        MemoryError::NotFound {
            kind,
            id: id.into(),
        }
    }

    /// True for [`MemoryError::NotFound`]
    pub fn is_not_found(&self) -> bool {
        matches!(self, MemoryError::NotFound { .. })
    }

    /// True for [`MemoryError::Validation`]
    pub fn is_validation(&self) -> bool {
        matches!(self, MemoryError::Validation(_))
    }
}

/// Crate result type
pub type Result<T> = std::result::Result<T, MemoryError>;
