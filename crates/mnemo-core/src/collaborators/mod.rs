//! External Collaborators
//!
//! Narrow interfaces to the services the engine consumes but does not own:
//!
//! - [`LanguageModel`]: free-form completion, used for extraction, topic
//!   identification and persona updates
//! - [`Summarizer`]: short human-readable summaries of profiles, topics
//!   and entities
//! - [`crate::embeddings::Embedder`]: text vectors (lives in `embeddings`)
//!
//! Backends are blocking. Every call runs on the [`CollaboratorRuntime`]
//! blocking pool under `tokio::time::timeout`. Failures surface as
//! [`CollaboratorError`] and callers degrade to heuristics.

mod llm;

pub use llm::{
    parse_json_array, parse_json_object, sanitize_prompt_input, strip_code_fences,
    LanguageModelSummarizer, FILTERED_MARKER,
};

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use tokio::runtime::{Handle, Runtime};

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Failure of an external collaborator
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CollaboratorError {
    /// Service not configured or refusing calls
    #[error("{collaborator} unavailable: {reason}")]
    Unavailable {
        collaborator: &'static str,
        reason: String,
    },
    /// Call exceeded the caller-imposed timeout
    #[error("{collaborator} timed out after {timeout_ms}ms")]
    Timeout {
        collaborator: &'static str,
        timeout_ms: u64,
    },
    /// Output could not be interpreted
    #[error("{collaborator} returned malformed output: {reason}")]
    Malformed {
        collaborator: &'static str,
        reason: String,
    },
}

impl CollaboratorError {
    pub fn unavailable(collaborator: &'static str, reason: impl Into<String>) -> Self {
        Self::Unavailable {
            collaborator,
            reason: reason.into(),
        }
    }

    pub fn malformed(collaborator: &'static str, reason: impl Into<String>) -> Self {
        Self::Malformed {
            collaborator,
            reason: reason.into(),
        }
    }
}

/// Collaborator result type
pub type Result<T> = std::result::Result<T, CollaboratorError>;

// ============================================================================
// LANGUAGE MODEL
// ============================================================================

/// One completion call
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub system: Option<String>,
    pub prompt: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub timeout: Duration,
}

impl CompletionRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            system: None,
            prompt: prompt.into(),
            max_tokens: 1024,
            temperature: 0.2,
            timeout: Duration::from_secs(30),
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Text completion service
pub trait LanguageModel: Send + Sync {
    fn complete(&self, request: &CompletionRequest) -> Result<String>;

    fn name(&self) -> &str {
        "language-model"
    }
}

// ============================================================================
// SUMMARIZER
// ============================================================================

memory_enum! {
    /// What a summary is for
    #[derive(Default)]
    pub enum SummaryStyle ("style") {
        #[default]
        Profile => "profile",
        Topic => "topic",
        Entity => "entity",
    }
}

/// Short natural-language summaries; never used for data-model decisions
pub trait Summarizer: Send + Sync {
    fn summarize(&self, items: &[String], style: SummaryStyle) -> Result<String>;
}

// ============================================================================
// RUNTIME
// ============================================================================

/// Pool threads that overrunning backend calls can hold at once
const MAX_BLOCKING_CALLS: usize = 8;

struct OwnedRuntime(Option<Runtime>);

impl Drop for OwnedRuntime {
    fn drop(&mut self) {
        // calls still stuck in a backend are not waited for
        if let Some(runtime) = self.0.take() {
            runtime.shutdown_background();
        }
    }
}

/// Small tokio runtime that runs blocking collaborator calls.
///
/// Each call goes to the blocking pool through `spawn_blocking` and is
/// bounded by `tokio::time::timeout`. A call that overruns keeps its pool
/// thread until the backend returns. The pool is capped, so a hung backend
/// cannot grow the thread count past [`MAX_BLOCKING_CALLS`]. The runtime
/// starts on first use and is shared by clones.
///
/// Calls block the current thread and must not be made from inside an
/// async task; use `spawn_blocking` there.
#[derive(Clone, Default)]
pub struct CollaboratorRuntime {
    runtime: Arc<OnceLock<std::result::Result<OwnedRuntime, String>>>,
}

impl CollaboratorRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    fn handle(&self, collaborator: &'static str) -> Result<Handle> {
        let slot = self.runtime.get_or_init(|| {
            tokio::runtime::Builder::new_multi_thread()
                .worker_threads(1)
                .max_blocking_threads(MAX_BLOCKING_CALLS)
                .thread_name("mnemo-collaborator")
                .enable_time()
                .build()
                .map(|runtime| OwnedRuntime(Some(runtime)))
                .map_err(|e| e.to_string())
        });
        match slot {
            Ok(OwnedRuntime(Some(runtime))) => Ok(runtime.handle().clone()),
            Ok(OwnedRuntime(None)) => Err(CollaboratorError::unavailable(collaborator, "runtime stopped")),
            Err(reason) => Err(CollaboratorError::unavailable(collaborator, reason.clone())),
        }
    }

    /// Run `f` on the blocking pool and wait at most `timeout` for it
    pub fn call<T, F>(&self, collaborator: &'static str, timeout: Duration, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T> + Send + 'static,
    {
        let handle = self.handle(collaborator)?;
        let task = handle.spawn_blocking(f);
        let outcome = handle.block_on(async move { tokio::time::timeout(timeout, task).await });

        match outcome {
            Ok(Ok(result)) => result,
            Ok(Err(join)) => Err(CollaboratorError::unavailable(collaborator, join.to_string())),
            Err(_) => {
                let timeout_ms = timeout.as_millis() as u64;
                tracing::warn!(collaborator, timeout_ms, "Collaborator timed out");
                Err(CollaboratorError::Timeout {
                    collaborator,
                    timeout_ms,
                })
            }
        }
    }

    /// Run a completion under the request's timeout
    pub fn complete(&self, model: &Arc<dyn LanguageModel>, request: CompletionRequest) -> Result<String> {
        let model = Arc::clone(model);
        let timeout = request.timeout;
        self.call("language model", timeout, move || model.complete(&request))
    }
}

impl std::fmt::Debug for CollaboratorRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollaboratorRuntime")
            .field("started", &self.runtime.get().is_some())
            .finish()
    }
}
