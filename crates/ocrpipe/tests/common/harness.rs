//! Service harness over a temporary directory.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use ocrpipe::config::{CacheBackend, FailurePolicy, StorageProfile};
use ocrpipe::db::Database;
use ocrpipe::{
    cache, Config, ExtractionService, ExtractionStrategy, FilesystemStorage, JobStatus, JobStore,
    ServiceComponents, StrategyId, StrategyRegistry,
};
use tempfile::TempDir;

use super::builders::{CountingStrategy, FakeGenerator};

pub const STORAGE_PROFILE: &str = "results";
pub const MODEL: &str = "llama3.2";

/// Owns a temp directory, the test doubles and a service wired to them.
///
/// `marker` and `tesseract` are registered under their strategy ids.
pub struct TestHarness {
    pub temp_dir: TempDir,
    pub storage_dir: PathBuf,
    pub config: Config,
    pub marker: Arc<CountingStrategy>,
    pub tesseract: Arc<CountingStrategy>,
    pub generator: Arc<FakeGenerator>,
    pub service: ExtractionService,
}

pub struct HarnessBuilder {
    policy: FailurePolicy,
    workers: usize,
    sqlite_cache: bool,
    database: bool,
    extraction_timeout_secs: u64,
    marker: CountingStrategy,
    generator: FakeGenerator,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn builder() -> HarnessBuilder {
        HarnessBuilder {
            policy: FailurePolicy::Lenient,
            workers: 2,
            sqlite_cache: false,
            database: false,
            extraction_timeout_secs: 30,
            marker: CountingStrategy::new(StrategyId::Marker),
            generator: FakeGenerator::new().with_installed(MODEL),
        }
    }

    /// Replaces the service with a fresh one over the same directory and
    /// test doubles. The previous service is shut down first.
    pub fn reopen(&mut self) {
        self.service.shutdown();
        self.service = build_service(
            &self.config,
            &self.marker,
            &self.tesseract,
            &self.generator,
            &self.storage_dir,
        );
    }

    /// Polls until the job is terminal or `timeout` passes.
    pub fn wait_terminal(&self, job_id: &str, timeout: Duration) -> JobStatus {
        let deadline = Instant::now() + timeout;
        loop {
            let status = self.service.status(job_id).expect("job exists");
            if status.is_terminal() {
                return status;
            }
            if Instant::now() >= deadline {
                panic!("job {} still not terminal: {:?}", job_id, status);
            }
            std::thread::sleep(Duration::from_millis(20));
        }
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.temp_dir.path().join(name)
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

impl HarnessBuilder {
    pub fn policy(mut self, policy: FailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn sqlite_cache(mut self) -> Self {
        self.sqlite_cache = true;
        self
    }

    pub fn database(mut self) -> Self {
        self.database = true;
        self
    }

    pub fn extraction_timeout_secs(mut self, secs: u64) -> Self {
        self.extraction_timeout_secs = secs;
        self
    }

    pub fn marker(mut self, strategy: CountingStrategy) -> Self {
        self.marker = strategy;
        self
    }

    pub fn generator(mut self, generator: FakeGenerator) -> Self {
        self.generator = generator;
        self
    }

    pub fn build(self) -> TestHarness {
        let temp_dir = TempDir::new().expect("create temp dir");
        let storage_dir = temp_dir.path().join("storage");

        let mut config = Config {
            workers: self.workers,
            ..Config::default()
        };
        config.pipeline.failure_policy = self.policy;
        config.pipeline.extraction_timeout_secs = self.extraction_timeout_secs;
        config.storage.profiles.insert(
            STORAGE_PROFILE.to_string(),
            StorageProfile {
                root: storage_dir.display().to_string(),
            },
        );
        if self.sqlite_cache {
            config.cache.backend = CacheBackend::Sqlite;
            config.cache.path = Some(temp_dir.path().join("cache.db").display().to_string());
        }
        if self.database {
            config.database.path = Some(temp_dir.path().join("jobs.db").display().to_string());
        }

        let marker = Arc::new(self.marker);
        let tesseract = Arc::new(CountingStrategy::new(StrategyId::Tesseract));
        let generator = Arc::new(self.generator);
        let service = build_service(&config, &marker, &tesseract, &generator, &storage_dir);

        TestHarness {
            temp_dir,
            storage_dir,
            config,
            marker,
            tesseract,
            generator,
            service,
        }
    }
}

fn build_service(
    config: &Config,
    marker: &Arc<CountingStrategy>,
    tesseract: &Arc<CountingStrategy>,
    generator: &Arc<FakeGenerator>,
    storage_dir: &Path,
) -> ExtractionService {
    let registry = StrategyRegistry::with_strategies([
        Arc::clone(marker) as Arc<dyn ExtractionStrategy>,
        Arc::clone(tesseract) as Arc<dyn ExtractionStrategy>,
    ]);

    let mut profiles = BTreeMap::new();
    profiles.insert(STORAGE_PROFILE.to_string(), storage_dir.to_path_buf());

    let store = match config.database.path.as_deref() {
        Some(path) => {
            let db = Database::open(&PathBuf::from(path)).expect("open job database");
            JobStore::with_database(&config.jobs, db).expect("job store")
        }
        None => JobStore::new(&config.jobs),
    };

    ExtractionService::new(
        config,
        ServiceComponents {
            registry,
            cache: cache::from_config(config).expect("cache backend"),
            generator: Arc::clone(generator) as Arc<dyn ocrpipe::GenerationService>,
            storage: Arc::new(FilesystemStorage::new(profiles)),
            store,
        },
    )
    .expect("build service")
}
