use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::strategy::StrategyId;

pub const CONFIG_VERSION: &str = "1.0";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub version: String,
    #[serde(default = "default_worker_count")]
    pub workers: usize,
    #[serde(default)]
    pub strategies: StrategiesConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub jobs: JobsConfig,
    #[serde(default)]
    pub pipeline: PipelineSettings,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
}

fn default_worker_count() -> usize {
    num_cpus::get()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION.to_string(),
            workers: default_worker_count(),
            strategies: StrategiesConfig::default(),
            cache: CacheConfig::default(),
            jobs: JobsConfig::default(),
            pipeline: PipelineSettings::default(),
            llm: LlmConfig::default(),
            storage: StorageConfig::default(),
            database: DatabaseConfig::default(),
        }
    }
}

impl Config {
    /// Applies `OCRPIPE_*` environment overrides on top of loaded values.
    ///
    /// Supported env vars:
    /// - `OCRPIPE_LLM_ENDPOINT`: generation service base URL
    /// - `OCRPIPE_VISION_PROMPT`: prompt sent with every page image
    /// - `OCRPIPE_CACHE_PATH`: SQLite cache file (switches the backend to sqlite)
    /// - `OCRPIPE_WORKERS`: worker thread count
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(val) = std::env::var("OCRPIPE_LLM_ENDPOINT") {
            if !val.trim().is_empty() {
                self.llm.endpoint = val;
            }
        }
        if let Ok(val) = std::env::var("OCRPIPE_VISION_PROMPT") {
            if !val.trim().is_empty() {
                self.strategies.vision.prompt = val;
            }
        }
        if let Ok(val) = std::env::var("OCRPIPE_CACHE_PATH") {
            if !val.trim().is_empty() {
                self.cache.backend = CacheBackend::Sqlite;
                self.cache.path = Some(val);
            }
        }
        if let Ok(val) = std::env::var("OCRPIPE_WORKERS") {
            match val.parse::<usize>() {
                Ok(n) if n > 0 => self.workers = n,
                _ => log::warn!("Ignoring invalid OCRPIPE_WORKERS value '{}'", val),
            }
        }
        self
    }

    /// Path of the SQLite file backing the result cache.
    pub fn cache_db_path(&self) -> Option<PathBuf> {
        self.cache
            .path
            .as_ref()
            .map(PathBuf::from)
            .or_else(|| self.database.path.as_ref().map(PathBuf::from))
            .or_else(crate::db::default_database_path)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategiesConfig {
    /// Strategy used when a request does not name one.
    #[serde(default)]
    pub default: StrategyId,
    /// Strategies registered at startup.
    #[serde(default = "default_enabled_strategies")]
    pub enabled: Vec<StrategyId>,
    #[serde(default)]
    pub ocr: OcrConfig,
    #[serde(default)]
    pub vision: VisionConfig,
}

fn default_enabled_strategies() -> Vec<StrategyId> {
    StrategyId::ALL.to_vec()
}

impl Default for StrategiesConfig {
    fn default() -> Self {
        Self {
            default: StrategyId::default(),
            enabled: default_enabled_strategies(),
            ocr: OcrConfig::default(),
            vision: VisionConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcrConfig {
    #[serde(default = "default_languages")]
    pub languages: Vec<String>,
    #[serde(default = "default_dpi")]
    pub dpi: u32,
}

fn default_languages() -> Vec<String> {
    vec!["eng".to_string()]
}

fn default_dpi() -> u32 {
    300
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            languages: default_languages(),
            dpi: default_dpi(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisionConfig {
    #[serde(default = "default_vision_model")]
    pub model: String,
    #[serde(default = "default_vision_prompt")]
    pub prompt: String,
    /// Rendering DPI for page images sent to the model.
    #[serde(default = "default_vision_dpi")]
    pub dpi: u32,
    /// Longest edge, in pixels, of an image sent to the model.
    #[serde(default = "default_max_image_dim")]
    pub max_image_dim: u32,
}

fn default_vision_model() -> String {
    "llama3.2-vision".to_string()
}

fn default_vision_prompt() -> String {
    "You are OCR. Convert image to markdown.".to_string()
}

fn default_vision_dpi() -> u32 {
    150
}

fn default_max_image_dim() -> u32 {
    1600
}

impl Default for VisionConfig {
    fn default() -> Self {
        Self {
            model: default_vision_model(),
            prompt: default_vision_prompt(),
            dpi: default_vision_dpi(),
            max_image_dim: default_max_image_dim(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
    #[default]
    Memory,
    Sqlite,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default)]
    pub backend: CacheBackend,
    /// SQLite file for the `sqlite` backend.
    #[serde(default)]
    pub path: Option<String>,
    /// Optional entry bound for the `memory` backend. Unset means entries
    /// live until `clear_cache`.
    #[serde(default)]
    pub max_entries: Option<u64>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: CacheBackend::default(),
            path: None,
            max_entries: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobsConfig {
    /// Seconds a terminal job stays pollable.
    #[serde(default = "default_retention_secs")]
    pub retention_secs: u64,
    /// Upper bound on terminal jobs kept in memory.
    #[serde(default = "default_max_finished")]
    pub max_finished: usize,
}

fn default_retention_secs() -> u64 {
    24 * 60 * 60
}

fn default_max_finished() -> usize {
    1000
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            retention_secs: default_retention_secs(),
            max_finished: default_max_finished(),
        }
    }
}

/// What happens when an optional step fails after extraction succeeded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// The job succeeds with the extracted text; the failure becomes a warning.
    #[default]
    Lenient,
    /// Every requested step must succeed.
    Strict,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSettings {
    #[serde(default)]
    pub failure_policy: FailurePolicy,
    #[serde(default = "default_extraction_timeout_secs")]
    pub extraction_timeout_secs: u64,
    #[serde(default = "default_generation_timeout_secs")]
    pub generation_timeout_secs: u64,
}

fn default_extraction_timeout_secs() -> u64 {
    600
}

fn default_generation_timeout_secs() -> u64 {
    300
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            failure_policy: FailurePolicy::default(),
            extraction_timeout_secs: default_extraction_timeout_secs(),
            generation_timeout_secs: default_generation_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    /// HTTP timeout for a single request.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Pull a missing model once before giving up.
    #[serde(default = "default_true")]
    pub auto_pull: bool,
}

fn default_endpoint() -> String {
    "http://localhost:11434".to_string()
}

fn default_request_timeout_secs() -> u64 {
    300
}

fn default_true() -> bool {
    true
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            request_timeout_secs: default_request_timeout_secs(),
            auto_pull: true,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub profiles: BTreeMap<String, StorageProfile>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageProfile {
    /// Directory holding this profile's objects.
    pub root: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite file for job write-through. Jobs are memory-only when unset.
    #[serde(default)]
    pub path: Option<String>,
}
