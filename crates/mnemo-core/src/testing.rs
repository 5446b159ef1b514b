//! Test doubles shared by the unit tests

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use tempfile::TempDir;

use crate::collaborators::{CollaboratorError, CompletionRequest, LanguageModel};
use crate::embeddings::{Embedder, Embedding, EmbeddingError};
use crate::engine::{EngineBuilder, MemoryEngine};
use crate::search::tokenize;
use crate::storage::test_support::create_test_storage;

/// Engine over a fresh temporary database with no collaborators
pub(crate) fn test_engine() -> (MemoryEngine, TempDir) {
    engine_with(|builder| builder)
}

/// Engine over a fresh temporary database, customised by `configure`
pub(crate) fn engine_with<F>(configure: F) -> (MemoryEngine, TempDir)
where
    F: FnOnce(EngineBuilder) -> EngineBuilder,
{
    let (storage, dir) = create_test_storage();
    (configure(MemoryEngine::builder(storage)).build(), dir)
}

/// Bag-of-words embedder: each word hashes into one of `dimensions` buckets
pub(crate) struct HashEmbedder {
    dimensions: usize,
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self { dimensions: 128 }
    }
}

impl Embedder for HashEmbedder {
    fn embed(&self, text: &str) -> Result<Embedding, EmbeddingError> {
        let mut vector = vec![0.0f32; self.dimensions];
        for word in tokenize(text) {
            let bucket = word
                .bytes()
                .fold(0xcbf2_9ce4_8422_2325u64, |h, b| (h ^ u64::from(b)).wrapping_mul(0x100_0000_01b3));
            vector[(bucket % self.dimensions as u64) as usize] += 1.0;
        }
        if vector.iter().all(|v| *v == 0.0) {
            return Err(EmbeddingError::InvalidInput("no words".to_string()));
        }
        let mut embedding = Embedding::new(vector);
        embedding.normalize();
        Ok(embedding)
    }

    fn model_name(&self) -> &str {
        "hash-bow"
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

/// Language model that replays canned responses in order and records every
/// prompt; once the script runs out it reports unavailable
pub(crate) struct ScriptedModel {
    responses: Mutex<VecDeque<String>>,
    prompts: Arc<Mutex<Vec<String>>>,
}

impl ScriptedModel {
    pub(crate) fn new(responses: Vec<&str>) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter().map(str::to_string).collect()),
            prompts: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Handle to the recorded prompts, usable after the model moves into an engine
    pub(crate) fn prompts(&self) -> Arc<Mutex<Vec<String>>> {
        Arc::clone(&self.prompts)
    }
}

impl LanguageModel for ScriptedModel {
    fn complete(&self, request: &CompletionRequest) -> Result<String, CollaboratorError> {
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(request.prompt.clone());
        }
        self.responses
            .lock()
            .ok()
            .and_then(|mut r| r.pop_front())
            .ok_or_else(|| CollaboratorError::unavailable("language model", "script exhausted"))
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// Language model that always fails
pub(crate) struct OfflineModel;

impl LanguageModel for OfflineModel {
    fn complete(&self, _request: &CompletionRequest) -> Result<String, CollaboratorError> {
        Err(CollaboratorError::unavailable("language model", "offline"))
    }
}
