use std::time::Duration;

use crate::config::{Config, FailurePolicy};

/// Runtime settings of the pipeline body.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub failure_policy: FailurePolicy,
    pub extraction_timeout: Duration,
    pub generation_timeout: Duration,
}

impl PipelineConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            failure_policy: config.pipeline.failure_policy,
            extraction_timeout: Duration::from_secs(config.pipeline.extraction_timeout_secs),
            generation_timeout: Duration::from_secs(config.pipeline.generation_timeout_secs),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}
