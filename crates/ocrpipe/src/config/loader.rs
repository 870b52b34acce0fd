use std::path::Path;

use crate::config::schema::{Config, CONFIG_VERSION};
use crate::error::ConfigError;

const SCHEMA_JSON: &str = include_str!("../../schema/config-v1.json");

/// Source format of a configuration document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Json,
    Yaml,
}

impl ConfigFormat {
    /// Picks the format from a file extension; anything but `.yaml`/`.yml` is JSON.
    pub fn from_path(path: &Path) -> Self {
        match path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .as_deref()
        {
            Some("yaml") | Some("yml") => ConfigFormat::Yaml,
            _ => ConfigFormat::Json,
        }
    }
}

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content, ConfigFormat::from_path(path))
}

pub fn load_config_from_str(content: &str, format: ConfigFormat) -> Result<Config, ConfigError> {
    let json_value: serde_json::Value = match format {
        ConfigFormat::Json => serde_json::from_str(content)?,
        ConfigFormat::Yaml => serde_yaml::from_str(content)?,
    };

    validate_schema(&json_value)?;

    let config: Config = serde_json::from_value(json_value)?;

    validate_config(&config)?;

    Ok(config)
}

/// Loads the file at `path` (or the defaults when `None`), applies
/// environment overrides and re-validates the result.
pub fn resolve_config(path: Option<&Path>) -> Result<Config, ConfigError> {
    let config = match path {
        Some(path) => load_config(path)?,
        None => Config::default(),
    }
    .with_env_overrides();

    validate_config(&config)?;

    Ok(config)
}

fn validate_schema(json_value: &serde_json::Value) -> Result<(), ConfigError> {
    let schema: serde_json::Value =
        serde_json::from_str(SCHEMA_JSON).map_err(|e| ConfigError::Validation {
            message: format!("Invalid embedded schema JSON: {}", e),
        })?;

    let validator = jsonschema::validator_for(&schema).map_err(|e| ConfigError::Validation {
        message: format!("Failed to compile JSON schema: {}", e),
    })?;

    let error_messages: Vec<String> = validator
        .iter_errors(json_value)
        .map(|e| e.to_string())
        .collect();
    if !error_messages.is_empty() {
        return Err(ConfigError::SchemaValidation {
            errors: error_messages.join("; "),
        });
    }

    Ok(())
}

pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.version != CONFIG_VERSION {
        return Err(ConfigError::Validation {
            message: format!("Unsupported config version: {}", config.version),
        });
    }

    if config.workers == 0 {
        return Err(ConfigError::Validation {
            message: "workers must be greater than 0".to_string(),
        });
    }

    if config.strategies.enabled.is_empty() {
        return Err(ConfigError::Validation {
            message: "at least one strategy must be enabled".to_string(),
        });
    }
    if !config
        .strategies
        .enabled
        .contains(&config.strategies.default)
    {
        return Err(ConfigError::Validation {
            message: format!(
                "default strategy '{}' is not enabled",
                config.strategies.default
            ),
        });
    }

    if config.pipeline.extraction_timeout_secs == 0 || config.pipeline.generation_timeout_secs == 0
    {
        return Err(ConfigError::Validation {
            message: "pipeline timeouts must be greater than 0".to_string(),
        });
    }

    if config.jobs.max_finished == 0 {
        return Err(ConfigError::Validation {
            message: "jobs.max_finished must be greater than 0".to_string(),
        });
    }
    if config.cache.max_entries == Some(0) {
        return Err(ConfigError::Validation {
            message: "cache.max_entries must be greater than 0".to_string(),
        });
    }

    for (name, profile) in &config.storage.profiles {
        if name.trim().is_empty() {
            return Err(ConfigError::Validation {
                message: "storage profile names must not be empty".to_string(),
            });
        }
        if profile.root.trim().is_empty() {
            return Err(ConfigError::Validation {
                message: format!("storage profile '{}' has an empty root", name),
            });
        }
    }

    Ok(())
}
