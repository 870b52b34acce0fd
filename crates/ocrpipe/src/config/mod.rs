pub mod loader;
pub mod schema;

pub use loader::{load_config, load_config_from_str, resolve_config, validate_config, ConfigFormat};
pub use schema::{
    CacheBackend, CacheConfig, Config, DatabaseConfig, FailurePolicy, JobsConfig, LlmConfig,
    OcrConfig, PipelineSettings, StorageConfig, StorageProfile, StrategiesConfig, VisionConfig,
};
