//! Client-facing operations: submission, status polling, cache and storage
//! administration, and model management.

use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use tokio::sync::broadcast;

use crate::cache::{self, ResultCache};
use crate::config::Config;
use crate::db::Database;
use crate::error::{Result, ServiceError, StorageError, WorkerError};
use crate::jobs::{JobEvent, JobListFilter, JobOutput, JobRecord, JobStatus, JobStore};
use crate::llm::{GenerationService, LlmPostProcessor, ModelInfo, OllamaClient};
use crate::pipeline::{NoopProgress, Pipeline, PipelineConfig, PipelineContext};
use crate::sanitize;
use crate::storage::{FilesystemStorage, StorageGateway};
use crate::strategy::{StrategyId, StrategyRegistry};
use crate::worker::{ExtractionRequest, Job, WorkerPool};

/// Magic bytes every accepted document starts with.
pub const PDF_SIGNATURE: &[u8] = b"%PDF-";

/// Collaborators the service is assembled from.
pub struct ServiceComponents {
    pub registry: StrategyRegistry,
    pub cache: Arc<dyn ResultCache>,
    pub generator: Arc<dyn GenerationService>,
    pub storage: Arc<dyn StorageGateway>,
    pub store: JobStore,
}

impl ServiceComponents {
    /// Production wiring: Ollama client, configured strategies, cache backend,
    /// filesystem storage and (optionally) a SQLite-backed job store.
    pub fn from_config(config: &Config) -> Result<Self> {
        let generator: Arc<dyn GenerationService> = Arc::new(OllamaClient::new(&config.llm)?);
        let registry = StrategyRegistry::from_config(config, Arc::clone(&generator));
        let cache = cache::from_config(config)?;
        let storage = Arc::new(FilesystemStorage::from_config(&config.storage));

        let store = match config.database.path.as_deref() {
            Some(path) => {
                let db = Database::open(&PathBuf::from(path))?;
                JobStore::with_database(&config.jobs, db)?
            }
            None => JobStore::new(&config.jobs),
        };

        Ok(Self {
            registry,
            cache,
            generator,
            storage,
            store,
        })
    }
}

pub struct ExtractionService {
    pipeline: Arc<Pipeline>,
    store: Arc<JobStore>,
    pool: RwLock<Option<WorkerPool>>,
}

impl ExtractionService {
    pub fn new(config: &Config, components: ServiceComponents) -> Result<Self> {
        let llm = LlmPostProcessor::new(components.generator, config.llm.auto_pull);
        let pipeline = Arc::new(Pipeline::new(
            PipelineConfig::from_config(config),
            components.registry,
            components.cache,
            llm,
            components.storage,
        ));
        let store = Arc::new(components.store);
        let pool = WorkerPool::new(Arc::clone(&pipeline), Arc::clone(&store), config.workers)?;

        log::info!(
            "Extraction service ready ({} workers, strategies: {:?})",
            config.workers,
            pipeline.registry().available()
        );

        Ok(Self {
            pipeline,
            store,
            pool: RwLock::new(Some(pool)),
        })
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(config, ServiceComponents::from_config(config)?)
    }

    /// Checks a request before any work starts; returns the resolved strategy.
    pub fn validate(&self, request: &ExtractionRequest) -> Result<StrategyId> {
        if request.document.is_empty() {
            return Err(ServiceError::Validation("document is empty".to_string()));
        }
        if !request.document.starts_with(PDF_SIGNATURE) {
            return Err(ServiceError::Validation(
                "document is not a PDF (missing %PDF- signature)".to_string(),
            ));
        }

        let strategy = self.pipeline.registry().resolve(&request.strategy)?;

        match (request.model.as_deref(), request.prompt.as_deref()) {
            (None, None) => {}
            (Some(model), Some(prompt)) => {
                if model.trim().is_empty() || prompt.trim().is_empty() {
                    return Err(ServiceError::Validation(
                        "model and prompt must not be empty".to_string(),
                    ));
                }
            }
            _ => {
                return Err(ServiceError::Validation(
                    "model and prompt must be supplied together".to_string(),
                ))
            }
        }

        match (
            request.storage_profile.as_deref(),
            request.storage_filename.as_deref(),
        ) {
            (None, None) => {}
            (Some(profile), Some(filename)) => {
                if !self.pipeline.storage().has_profile(profile) {
                    return Err(StorageError::UnknownProfile(profile.to_string()).into());
                }
                sanitize::validate_filename(filename).map_err(|reason| {
                    StorageError::InvalidFilename {
                        filename: filename.to_string(),
                        reason,
                    }
                })?;
            }
            _ => {
                return Err(ServiceError::Validation(
                    "storage profile and filename must be supplied together".to_string(),
                ))
            }
        }

        Ok(strategy)
    }

    /// Validates and queues a request, returning the new job id.
    ///
    /// Invalid requests never create a job.
    pub fn submit(&self, request: ExtractionRequest) -> Result<String> {
        let strategy = self.validate(&request)?;
        self.store.purge_expired();

        let guard = match self.pool.read() {
            Ok(g) => g,
            Err(poisoned) => {
                log::warn!("Worker pool lock was poisoned, recovering");
                poisoned.into_inner()
            }
        };
        let Some(pool) = guard.as_ref() else {
            return Err(WorkerError::ChannelClosed.into());
        };

        let job = self.store.create(strategy);
        if let Err(e) = pool.submit(Job::new(&job.id, strategy, request)) {
            self.store.discard(&job.id);
            return Err(e.into());
        }

        log::info!("Queued job {} ({})", job.id, strategy);
        Ok(job.id)
    }

    /// Validates and runs a request on the calling thread without a job record.
    pub fn submit_sync(&self, request: ExtractionRequest) -> Result<JobOutput> {
        let strategy = self.validate(&request)?;
        self.pipeline
            .run(PipelineContext::new(strategy, request), &NoopProgress)
            .map_err(|e| ServiceError::Job(e.to_job_error()))
    }

    /// Non-blocking status read.
    pub fn status(&self, job_id: &str) -> Result<JobStatus> {
        self.job(job_id).map(|job| job.status())
    }

    pub fn job(&self, job_id: &str) -> Result<JobRecord> {
        self.store
            .get(job_id)
            .ok_or_else(|| ServiceError::JobNotFound(job_id.to_string()))
    }

    pub fn list_jobs(&self, filter: &JobListFilter) -> Vec<JobRecord> {
        self.store.list(filter)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.store.subscribe()
    }

    pub fn strategies(&self) -> Vec<StrategyId> {
        self.pipeline.registry().available()
    }

    pub fn clear_cache(&self) -> Result<()> {
        self.pipeline.cache().clear_all()?;
        log::info!("Result cache cleared");
        Ok(())
    }

    pub fn storage_profiles(&self) -> Vec<String> {
        self.pipeline.storage().profiles()
    }

    pub fn storage_list(&self, profile: &str) -> Result<Vec<String>> {
        Ok(self.pipeline.storage().list(profile)?)
    }

    pub fn storage_load(&self, profile: &str, filename: &str) -> Result<Vec<u8>> {
        Ok(self.pipeline.storage().load(profile, filename)?)
    }

    pub fn storage_delete(&self, profile: &str, filename: &str) -> Result<()> {
        Ok(self.pipeline.storage().delete(profile, filename)?)
    }

    pub fn list_models(&self) -> Result<Vec<ModelInfo>> {
        Ok(self.pipeline.llm().generator().list_models()?)
    }

    pub fn pull_model(&self, model: &str) -> Result<()> {
        if model.trim().is_empty() {
            return Err(ServiceError::Validation("model name is empty".to_string()));
        }
        self.pipeline.llm().generator().pull(model)?;
        log::info!("Pulled model {}", model);
        Ok(())
    }

    /// Direct generation with pull-once recovery.
    pub fn generate(&self, model: &str, prompt: &str) -> Result<String> {
        if prompt.trim().is_empty() {
            return Err(ServiceError::Validation("no prompt provided".to_string()));
        }
        Ok(self.pipeline.llm().generate(model, prompt)?)
    }

    /// Stops accepting jobs, waits for running ones and fails the queue.
    /// Later calls are no-ops.
    pub fn shutdown(&self) {
        let pool = match self.pool.write() {
            Ok(mut g) => g.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(pool) = pool {
            pool.shutdown();
            pool.wait();
        }
    }
}

impl Drop for ExtractionService {
    fn drop(&mut self) {
        self.shutdown();
    }
}
