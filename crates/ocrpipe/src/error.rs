use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::llm::LlmError;

/// Client-visible error categories.
///
/// Every failure that reaches a caller (synchronously at submission or
/// recorded on a failed job) carries exactly one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    ValidationError,
    UnknownStrategy,
    NotFound,
    ExtractionFailure,
    AugmentationFailure,
    PersistenceFailure,
    Timeout,
    UpstreamUnavailable,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::ValidationError => "ValidationError",
            ErrorKind::UnknownStrategy => "UnknownStrategy",
            ErrorKind::NotFound => "NotFound",
            ErrorKind::ExtractionFailure => "ExtractionFailure",
            ErrorKind::AugmentationFailure => "AugmentationFailure",
            ErrorKind::PersistenceFailure => "PersistenceFailure",
            ErrorKind::Timeout => "Timeout",
            ErrorKind::UpstreamUnavailable => "UpstreamUnavailable",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ValidationError" => Some(ErrorKind::ValidationError),
            "UnknownStrategy" => Some(ErrorKind::UnknownStrategy),
            "NotFound" => Some(ErrorKind::NotFound),
            "ExtractionFailure" => Some(ErrorKind::ExtractionFailure),
            "AugmentationFailure" => Some(ErrorKind::AugmentationFailure),
            "PersistenceFailure" => Some(ErrorKind::PersistenceFailure),
            "Timeout" => Some(ErrorKind::Timeout),
            "UpstreamUnavailable" => Some(ErrorKind::UpstreamUnavailable),
            _ => None,
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured error recorded on a failed job and returned by status polling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobError {
    pub kind: ErrorKind,
    pub message: String,
}

impl JobError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for JobError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Failed to parse config YAML: {0}")]
    ParseYaml(#[from] serde_yaml::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },

    #[error("Schema validation failed: {errors}")]
    SchemaValidation { errors: String },
}

/// Failure inside an extraction strategy.
#[derive(Error, Debug)]
pub enum ExtractionError {
    #[error("Failed to process PDF: {0}")]
    PdfProcessing(String),

    #[error("Failed to render page {page}: {reason}")]
    Rendering { page: usize, reason: String },

    #[error("OCR failed: {0}")]
    OcrFailed(String),

    #[error("Required tool '{tool}' is not available: {reason}")]
    ToolMissing { tool: String, reason: String },

    #[error("Vision model failed on page {page}: {reason}")]
    Vision { page: usize, reason: String },
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Unknown storage profile '{0}'")]
    UnknownProfile(String),

    #[error("Invalid storage filename '{filename}': {reason}")]
    InvalidFilename { filename: String, reason: String },

    #[error("Object '{filename}' not found in profile '{profile}'")]
    NotFound { profile: String, filename: String },

    #[error("Failed to create directory '{path}': {source}")]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write file '{path}': {source}")]
    WriteFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to delete file '{path}': {source}")]
    DeleteFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to list profile directory '{path}': {reason}")]
    ListFailed { path: PathBuf, reason: String },
}

impl StorageError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StorageError::UnknownProfile(_) | StorageError::InvalidFilename { .. } => {
                ErrorKind::ValidationError
            }
            StorageError::NotFound { .. } => ErrorKind::NotFound,
            _ => ErrorKind::PersistenceFailure,
        }
    }
}

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Cache database error: {0}")]
    Database(#[from] crate::db::DatabaseError),
}

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Failed to spawn worker: {0}")]
    SpawnFailed(String),

    #[error("Worker channel closed unexpectedly")]
    ChannelClosed,
}

/// Errors returned by the public service operations.
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Unknown strategy '{strategy}'. Available: {available}")]
    UnknownStrategy { strategy: String, available: String },

    #[error("Job '{0}' not found")]
    JobNotFound(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Generation service error: {0}")]
    Llm(#[from] LlmError),

    #[error("Worker error: {0}")]
    Worker(#[from] WorkerError),

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A synchronous pipeline run failed.
    #[error("{0}")]
    Job(JobError),
}

impl ServiceError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ServiceError::Validation(_) | ServiceError::Config(_) => ErrorKind::ValidationError,
            ServiceError::UnknownStrategy { .. } => ErrorKind::UnknownStrategy,
            ServiceError::JobNotFound(_) => ErrorKind::NotFound,
            ServiceError::Storage(e) => e.kind(),
            ServiceError::Llm(e) => e.kind(),
            ServiceError::Worker(_) => ErrorKind::UpstreamUnavailable,
            ServiceError::Database(_) | ServiceError::Cache(_) => ErrorKind::PersistenceFailure,
            ServiceError::Job(e) => e.kind,
        }
    }

    /// Converts into the structured client-facing form.
    pub fn to_job_error(&self) -> JobError {
        match self {
            ServiceError::Job(e) => e.clone(),
            other => JobError::new(other.kind(), other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, ServiceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind_round_trips_through_str() {
        for kind in [
            ErrorKind::ValidationError,
            ErrorKind::UnknownStrategy,
            ErrorKind::NotFound,
            ErrorKind::ExtractionFailure,
            ErrorKind::AugmentationFailure,
            ErrorKind::PersistenceFailure,
            ErrorKind::Timeout,
            ErrorKind::UpstreamUnavailable,
        ] {
            assert_eq!(ErrorKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(ErrorKind::parse("Bogus"), None);
    }

    #[test]
    fn test_error_kind_serializes_as_name() {
        let json = serde_json::to_string(&ErrorKind::AugmentationFailure).unwrap();
        assert_eq!(json, "\"AugmentationFailure\"");
    }

    #[test]
    fn test_storage_error_kinds() {
        assert_eq!(
            StorageError::UnknownProfile("x".into()).kind(),
            ErrorKind::ValidationError
        );
        assert_eq!(
            StorageError::NotFound {
                profile: "p".into(),
                filename: "f".into()
            }
            .kind(),
            ErrorKind::NotFound
        );
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk full");
        assert_eq!(
            StorageError::WriteFile {
                path: PathBuf::from("/x"),
                source: io
            }
            .kind(),
            ErrorKind::PersistenceFailure
        );
    }

    #[test]
    fn test_service_error_to_job_error() {
        let err = ServiceError::UnknownStrategy {
            strategy: "foo".into(),
            available: "marker, tesseract".into(),
        };
        let job_err = err.to_job_error();
        assert_eq!(job_err.kind, ErrorKind::UnknownStrategy);
        assert!(job_err.message.contains("foo"));

        let inner = JobError::new(ErrorKind::Timeout, "too slow");
        assert_eq!(ServiceError::Job(inner.clone()).to_job_error(), inner);
    }
}
