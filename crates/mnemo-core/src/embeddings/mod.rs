//! Semantic Embeddings Module
//!
//! - [`Embedding`] vectors with a compact byte codec for storage
//! - [`Embedder`]: the backend contract
//! - [`EmbeddingService`]: availability cached once, LRU query cache,
//!   caller-imposed timeouts
//! - Local fastembed backend behind the `embeddings` feature

#[cfg(feature = "embeddings")]
mod local;
mod service;
mod vector;

#[cfg(feature = "embeddings")]
pub use local::{matryoshka_truncate, LocalEmbedder, EMBEDDING_DIMENSIONS};

pub use service::{Embedder, EmbeddingService, MAX_TEXT_LENGTH, QUERY_CACHE_SIZE};
pub use vector::{cosine_similarity, similarity_score, Embedding, EmbeddingError};
