use std::sync::Arc;

use tracing::{info, warn};

use super::{GenerationService, LlmError};

/// Builds the generation prompt: the client prompt, a blank line, then the
/// extracted text.
pub fn compose_prompt(prompt: &str, extracted_text: &str) -> String {
    format!("{}\n\n{}", prompt.trim_end(), extracted_text)
}

/// Runs `call`; on `ModelNotFound` pulls the model once and retries once.
///
/// There is no second pull. A retry that still finds no model fails with
/// `UnavailableAfterPull`; other retry failures are returned as-is.
pub fn with_model_recovery<T, F>(
    generator: &dyn GenerationService,
    model: &str,
    auto_pull: bool,
    call: F,
) -> Result<T, LlmError>
where
    F: Fn() -> Result<T, LlmError>,
{
    match call() {
        Err(LlmError::ModelNotFound(_)) if auto_pull => {
            warn!(model, "Model missing on generation service, pulling once");
            generator.pull(model)?;
            info!(model, "Model pulled, retrying");
            match call() {
                Err(LlmError::ModelNotFound(_)) => {
                    Err(LlmError::UnavailableAfterPull(model.to_string()))
                }
                other => other,
            }
        }
        other => other,
    }
}

/// Optional augmentation step: forwards extracted text plus a prompt to the
/// generation service.
#[derive(Clone)]
pub struct LlmPostProcessor {
    generator: Arc<dyn GenerationService>,
    auto_pull: bool,
}

impl LlmPostProcessor {
    pub fn new(generator: Arc<dyn GenerationService>, auto_pull: bool) -> Self {
        Self {
            generator,
            auto_pull,
        }
    }

    pub fn generator(&self) -> &Arc<dyn GenerationService> {
        &self.generator
    }

    /// Direct generation with pull-once recovery.
    pub fn generate(&self, model: &str, prompt: &str) -> Result<String, LlmError> {
        let _span = tracing::info_span!("llm.generate", model).entered();
        with_model_recovery(self.generator.as_ref(), model, self.auto_pull, || {
            self.generator.generate(model, prompt)
        })
    }

    /// Folds `extracted_text` into `prompt` and returns the model's answer.
    pub fn augment(
        &self,
        model: &str,
        prompt: &str,
        extracted_text: &str,
    ) -> Result<String, LlmError> {
        let full_prompt = compose_prompt(prompt, extracted_text);
        self.generate(model, &full_prompt)
    }
}
