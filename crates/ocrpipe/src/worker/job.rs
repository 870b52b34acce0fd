use std::sync::Arc;

use crate::strategy::StrategyId;

/// Client request for one extraction.
#[derive(Debug, Clone)]
pub struct ExtractionRequest {
    /// Raw document bytes. Shared so a timed-out step can keep its copy.
    pub document: Arc<[u8]>,
    /// Strategy name as supplied by the client; resolved at submission.
    pub strategy: String,
    pub cache_enabled: bool,
    pub prompt: Option<String>,
    pub model: Option<String>,
    pub storage_profile: Option<String>,
    pub storage_filename: Option<String>,
}

impl ExtractionRequest {
    /// Request with caching off and no optional steps.
    pub fn new(document: impl Into<Arc<[u8]>>, strategy: impl Into<String>) -> Self {
        Self {
            document: document.into(),
            strategy: strategy.into(),
            cache_enabled: false,
            prompt: None,
            model: None,
            storage_profile: None,
            storage_filename: None,
        }
    }

    pub fn with_cache(mut self, enabled: bool) -> Self {
        self.cache_enabled = enabled;
        self
    }

    /// Runs the extracted text through `model` with `prompt`.
    pub fn with_generation(mut self, model: impl Into<String>, prompt: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self.prompt = Some(prompt.into());
        self
    }

    /// Stores the final text as `filename` under `profile`.
    pub fn with_storage(mut self, profile: impl Into<String>, filename: impl Into<String>) -> Self {
        self.storage_profile = Some(profile.into());
        self.storage_filename = Some(filename.into());
        self
    }

    /// `(model, prompt)` when augmentation was requested.
    pub fn generation(&self) -> Option<(&str, &str)> {
        match (self.model.as_deref(), self.prompt.as_deref()) {
            (Some(model), Some(prompt)) => Some((model, prompt)),
            _ => None,
        }
    }

    /// `(profile, filename)` when persistence was requested.
    pub fn destination(&self) -> Option<(&str, &str)> {
        match (
            self.storage_profile.as_deref(),
            self.storage_filename.as_deref(),
        ) {
            (Some(profile), Some(filename)) => Some((profile, filename)),
            _ => None,
        }
    }
}

/// A validated request waiting in the queue under its job id.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: String,
    pub strategy: StrategyId,
    pub request: ExtractionRequest,
}

impl Job {
    pub fn new(id: impl Into<String>, strategy: StrategyId, request: ExtractionRequest) -> Self {
        Self {
            id: id.into(),
            strategy,
            request,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_builder() {
        let request = ExtractionRequest::new(b"%PDF-1.4".to_vec(), "marker")
            .with_cache(true)
            .with_generation("llama3.1", "Summarize")
            .with_storage("results", "out.md");

        assert!(request.cache_enabled);
        assert_eq!(request.generation(), Some(("llama3.1", "Summarize")));
        assert_eq!(request.destination(), Some(("results", "out.md")));
    }

    #[test]
    fn test_optional_steps_need_both_halves() {
        let mut request = ExtractionRequest::new(b"%PDF-1.4".to_vec(), "marker");
        assert!(!request.cache_enabled);
        request.model = Some("llama3.1".to_string());
        request.storage_filename = Some("out.md".to_string());
        assert_eq!(request.generation(), None);
        assert_eq!(request.destination(), None);
    }
}
