use std::time::Duration;

use thiserror::Error;

use crate::error::{ErrorKind, ExtractionError, JobError, StorageError};
use crate::llm::LlmError;
use crate::strategy::StrategyId;

/// Pipeline steps that run on a helper thread under a deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Extraction,
    Augmentation,
}

impl std::fmt::Display for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Step::Extraction => write!(f, "extraction"),
            Step::Augmentation => write!(f, "augmentation"),
        }
    }
}

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Strategy '{0}' is not registered")]
    StrategyUnavailable(StrategyId),

    #[error("Extraction failed: {0}")]
    Extraction(#[from] ExtractionError),

    #[error("Augmentation failed: {0}")]
    Augmentation(#[from] LlmError),

    #[error("Persistence failed: {0}")]
    Persistence(#[from] StorageError),

    #[error("{step} timed out after {}s", limit.as_secs())]
    Timeout { step: Step, limit: Duration },

    #[error("{step} panicked: {reason}")]
    Panicked { step: Step, reason: String },
}

impl PipelineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::StrategyUnavailable(_) => ErrorKind::UnknownStrategy,
            PipelineError::Extraction(_) => ErrorKind::ExtractionFailure,
            PipelineError::Augmentation(LlmError::Timeout(_)) => ErrorKind::Timeout,
            PipelineError::Augmentation(_) => ErrorKind::AugmentationFailure,
            PipelineError::Persistence(_) => ErrorKind::PersistenceFailure,
            PipelineError::Timeout { .. } => ErrorKind::Timeout,
            PipelineError::Panicked {
                step: Step::Extraction,
                ..
            } => ErrorKind::ExtractionFailure,
            PipelineError::Panicked {
                step: Step::Augmentation,
                ..
            } => ErrorKind::AugmentationFailure,
        }
    }

    pub fn to_job_error(&self) -> JobError {
        JobError::new(self.kind(), self.to_string())
    }
}
