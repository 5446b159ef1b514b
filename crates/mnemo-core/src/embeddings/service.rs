//! Embedding service: availability check, query cache and timeouts around
//! any [`Embedder`] backend.

use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use super::vector::{similarity_score, Embedding, EmbeddingError};
use crate::collaborators::{CollaboratorError, CollaboratorRuntime};

/// Maximum characters sent to the backend
pub const MAX_TEXT_LENGTH: usize = 8192;

/// Query embeddings kept in memory
pub const QUERY_CACHE_SIZE: usize = 256;

const CHECK_TEXT: &str = "availability check";

/// Text embedding backend
pub trait Embedder: Send + Sync {
    fn embed(&self, text: &str) -> Result<Embedding, EmbeddingError>;

    fn model_name(&self) -> &str;

    fn dimensions(&self) -> usize;
}

/// Engine-owned handle to the embedding backend.
///
/// Availability is checked on first use and cached for the lifetime of the
/// service; every caller falls back to text search when it reports
/// unavailable.
pub struct EmbeddingService {
    embedder: Option<Arc<dyn Embedder>>,
    available: OnceLock<bool>,
    cache: Mutex<LruCache<String, Embedding>>,
    timeout: Duration,
    runtime: CollaboratorRuntime,
}

impl EmbeddingService {
    pub fn new(embedder: Arc<dyn Embedder>, timeout: Duration) -> Self {
        Self {
            embedder: Some(embedder),
            available: OnceLock::new(),
            cache: Mutex::new(LruCache::new(cache_capacity())),
            timeout,
            runtime: CollaboratorRuntime::new(),
        }
    }

    /// Run backend calls on a shared runtime
    pub fn with_runtime(mut self, runtime: CollaboratorRuntime) -> Self {
        self.runtime = runtime;
        self
    }

    /// A service with no backend; every call reports unavailable
    pub fn disabled() -> Self {
        Self {
            embedder: None,
            available: OnceLock::new(),
            cache: Mutex::new(LruCache::new(cache_capacity())),
            timeout: Duration::from_secs(1),
            runtime: CollaboratorRuntime::new(),
        }
    }

    /// Whether the backend answered the one-time check
    pub fn is_available(&self) -> bool {
        *self.available.get_or_init(|| match self.call(CHECK_TEXT) {
            Ok(_) => {
                tracing::info!(model = self.model_name(), "Embedding backend available");
                true
            }
            Err(e) => {
                tracing::warn!("Embedding backend unavailable, using text search: {}", e);
                false
            }
        })
    }

    pub fn model_name(&self) -> &str {
        self.embedder.as_ref().map_or("none", |e| e.model_name())
    }

    /// Embed `text`, or `None` when the backend is unavailable or fails
    pub fn embed(&self, text: &str) -> Option<Embedding> {
        match self.try_embed(text) {
            Ok(embedding) => Some(embedding),
            Err(e) => {
                tracing::debug!("Embedding skipped: {}", e);
                None
            }
        }
    }

    /// Embed `text`, reporting why no vector was produced
    pub fn try_embed(&self, text: &str) -> Result<Embedding, CollaboratorError> {
        if text.trim().is_empty() {
            return Err(CollaboratorError::malformed("embedder", "empty text"));
        }
        if !self.is_available() {
            return Err(CollaboratorError::unavailable("embedder", "availability check failed"));
        }

        if let Ok(mut cache) = self.cache.lock() {
            if let Some(hit) = cache.get(text) {
                return Ok(hit.clone());
            }
        }

        let embedding = self.call(text)?;
        if let Ok(mut cache) = self.cache.lock() {
            cache.put(text.to_string(), embedding.clone());
        }
        Ok(embedding)
    }

    fn call(&self, text: &str) -> Result<Embedding, CollaboratorError> {
        let embedder = self
            .embedder
            .clone()
            .ok_or_else(|| CollaboratorError::unavailable("embedder", "no backend configured"))?;
        let text: String = text.chars().take(MAX_TEXT_LENGTH).collect();
        self.runtime.call("embedder", self.timeout, move || {
            embedder.embed(&text).map_err(|e| match e {
                EmbeddingError::InvalidInput(reason) => CollaboratorError::malformed("embedder", reason),
                other => CollaboratorError::unavailable("embedder", other.to_string()),
            })
        })
    }

    /// Rank candidates against `query`, best first, keeping scores at or
    /// above `min_score`
    pub fn find_similar<'a, I>(
        &self,
        query: &Embedding,
        candidates: I,
        min_score: f64,
        top_k: usize,
    ) -> Vec<(String, f64)>
    where
        I: IntoIterator<Item = (&'a str, &'a Embedding)>,
    {
        let mut scored: Vec<(String, f64)> = candidates
            .into_iter()
            .map(|(id, emb)| (id.to_string(), similarity_score(query, emb)))
            .filter(|(_, score)| *score >= min_score)
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(top_k);
        scored
    }
}

fn cache_capacity() -> NonZeroUsize {
    NonZeroUsize::new(QUERY_CACHE_SIZE).unwrap_or(NonZeroUsize::MIN)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting {
        calls: AtomicUsize,
    }

    impl Embedder for Counting {
        fn embed(&self, text: &str) -> Result<Embedding, EmbeddingError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Embedding::new(vec![text.len() as f32, 1.0]))
        }

        fn model_name(&self) -> &str {
            "counting"
        }

        fn dimensions(&self) -> usize {
            2
        }
    }

    struct Broken;

    impl Embedder for Broken {
        fn embed(&self, _text: &str) -> Result<Embedding, EmbeddingError> {
            Err(EmbeddingError::Unavailable("model missing".to_string()))
        }

        fn model_name(&self) -> &str {
            "broken"
        }

        fn dimensions(&self) -> usize {
            0
        }
    }

    #[test]
    fn test_queries_are_cached() {
        let backend = Arc::new(Counting { calls: AtomicUsize::new(0) });
        let service = EmbeddingService::new(backend.clone(), Duration::from_secs(5));

        assert!(service.embed("dark mode").is_some());
        assert!(service.embed("dark mode").is_some());
        // one check plus one real call
        assert_eq!(backend.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_unavailable_backend_is_checked_once() {
        let service = EmbeddingService::new(Arc::new(Broken), Duration::from_secs(5));
        assert!(!service.is_available());
        assert!(service.embed("anything").is_none());
        assert!(matches!(
            service.try_embed("anything"),
            Err(CollaboratorError::Unavailable { .. })
        ));

        let disabled = EmbeddingService::disabled();
        assert!(!disabled.is_available());
        assert_eq!(disabled.model_name(), "none");
    }

    #[test]
    fn test_find_similar_orders_and_filters() {
        let service = EmbeddingService::disabled();
        let query = Embedding::new(vec![1.0, 0.0]);
        let close = Embedding::new(vec![0.9, 0.1]);
        let far = Embedding::new(vec![0.0, 1.0]);
        let same = Embedding::new(vec![2.0, 0.0]);

        let ranked = service.find_similar(
            &query,
            [("close", &close), ("far", &far), ("same", &same)],
            0.5,
            5,
        );
        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].0, "same");
        assert_eq!(ranked[1].0, "close");
    }
}
