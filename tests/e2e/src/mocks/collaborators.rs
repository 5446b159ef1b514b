//! Deterministic collaborators
//!
//! Stand-ins for the embedding service, the language model and the decision
//! source that never touch the network.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use mnemo_core::embeddings::EmbeddingError;
use mnemo_core::search::tokenize;
use mnemo_core::{
    CollaboratorError, CompletionRequest, DecisionSource, Embedder, Embedding, Interaction,
    LanguageModel, ProposedOperation,
};

/// Bag-of-words embedder: each word hashes into one of `dimensions` buckets
pub struct HashEmbedder {
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

/// Embedder whose backend never starts
pub struct UnavailableEmbedder;

impl Embedder for UnavailableEmbedder {
    fn embed(&self, _text: &str) -> Result<Embedding, EmbeddingError> {
        Err(EmbeddingError::Unavailable("model not downloaded".to_string()))
    }

    fn model_name(&self) -> &str {
        "unavailable"
    }

    fn dimensions(&self) -> usize {
        128
    }
}

/// Replays canned completions in order, then reports unavailable
pub struct ScriptedModel {
    responses: Mutex<VecDeque<String>>,
    prompts: Arc<Mutex<Vec<String>>>,
}

impl ScriptedModel {
    pub fn new(responses: Vec<&str>) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter().map(str::to_string).collect()),
            prompts: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Every prompt seen so far
    pub fn prompts(&self) -> Arc<Mutex<Vec<String>>> {
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
pub struct OfflineModel;

impl LanguageModel for OfflineModel {
    fn complete(&self, _request: &CompletionRequest) -> Result<String, CollaboratorError> {
        Err(CollaboratorError::unavailable("language model", "offline"))
    }
}

/// Decision source that proposes the same operations for every interaction
/// and remembers what it was asked
#[derive(Default)]
pub struct StaticDecisions {
    operations: Vec<ProposedOperation>,
    seen: Mutex<Vec<Interaction>>,
}

impl StaticDecisions {
    pub fn new(operations: Vec<ProposedOperation>) -> Self {
        Self {
            operations,
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.seen.lock().map(|seen| seen.len()).unwrap_or(0)
    }
}

impl DecisionSource for StaticDecisions {
    fn propose(
        &self,
        _context: &str,
        interaction: &Interaction,
    ) -> Result<Vec<ProposedOperation>, CollaboratorError> {
        if let Ok(mut seen) = self.seen.lock() {
            seen.push(interaction.clone());
        }
        Ok(self.operations.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_embedder_is_deterministic() {
        let embedder = HashEmbedder::default();
        let a = embedder.embed("dark mode editor").unwrap();
        let b = embedder.embed("dark mode editor").unwrap();
        assert_eq!(a, b);
        assert!(embedder.embed("  ").is_err());
    }

    #[test]
    fn test_scripted_model_runs_out() {
        let model = ScriptedModel::new(vec!["[]"]);
        let request = CompletionRequest::new("prompt");
        assert_eq!(model.complete(&request).unwrap(), "[]");
        assert!(model.complete(&request).is_err());
        assert_eq!(model.prompts().lock().unwrap().len(), 2);
    }
}
