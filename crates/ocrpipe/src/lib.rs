pub mod cache;
pub mod config;
pub mod db;
pub mod error;
pub mod fingerprint;
pub mod jobs;
pub mod llm;
pub mod logging;
pub mod pipeline;
pub mod sanitize;
pub mod service;
pub mod storage;
pub mod strategy;
pub mod worker;

pub use cache::{CacheKey, ResultCache};
pub use config::{load_config, resolve_config, Config};
pub use error::{ErrorKind, JobError, Result, ServiceError};
pub use fingerprint::Fingerprint;
pub use jobs::{JobOutput, JobRecord, JobState, JobStatus, JobStore};
pub use llm::{GenerationService, LlmError, LlmPostProcessor, OllamaClient};
pub use pipeline::{Pipeline, PipelineConfig, PipelineContext};
pub use service::{ExtractionService, ServiceComponents};
pub use storage::{FilesystemStorage, StorageGateway};
pub use strategy::{ExtractionStrategy, StrategyId, StrategyRegistry};
pub use worker::{ExtractionRequest, WorkerPool};
