//! Generation-service access: the Ollama client, the post-processing step
//! and the pull-once recovery they share.

mod client;
mod postprocess;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::ErrorKind;

pub use client::OllamaClient;
pub use postprocess::{compose_prompt, with_model_recovery, LlmPostProcessor};

/// A model known to the generation service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub name: String,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub modified_at: Option<String>,
}

/// Remote text generation capability.
///
/// Implementations block the calling thread; callers run them on worker
/// threads.
pub trait GenerationService: Send + Sync {
    /// Single-shot completion of `prompt` by `model`.
    fn generate(&self, model: &str, prompt: &str) -> Result<String, LlmError>;

    /// Sends base64-encoded images with `prompt` to a vision model.
    fn describe_images(
        &self,
        model: &str,
        prompt: &str,
        images_base64: &[String],
    ) -> Result<String, LlmError>;

    fn list_models(&self) -> Result<Vec<ModelInfo>, LlmError>;

    /// Downloads `model` onto the service. Blocks until the pull finishes.
    fn pull(&self, model: &str) -> Result<(), LlmError>;
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LlmError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("API error (HTTP {status}): {body}")]
    Api { status: u16, body: String },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Model '{0}' still unavailable after pull")]
    UnavailableAfterPull(String),

    #[error("Failed to pull model '{model}': {reason}")]
    PullFailed { model: String, reason: String },
}

impl LlmError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LlmError::Connection(_) => ErrorKind::UpstreamUnavailable,
            LlmError::Timeout(_) => ErrorKind::Timeout,
            LlmError::ModelNotFound(_) => ErrorKind::NotFound,
            LlmError::Api { .. }
            | LlmError::Parse(_)
            | LlmError::PullFailed { .. }
            | LlmError::UnavailableAfterPull(_) => ErrorKind::AugmentationFailure,
        }
    }
}
