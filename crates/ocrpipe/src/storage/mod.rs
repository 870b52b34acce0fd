pub mod filesystem;

pub use filesystem::FilesystemStorage;

use crate::error::StorageError;

/// Persists final results under a named profile.
///
/// `put` is idempotent for identical `(profile, filename)`: a second call
/// replaces the object and returns the same location.
pub trait StorageGateway: Send + Sync {
    fn has_profile(&self, profile: &str) -> bool;

    fn profiles(&self) -> Vec<String>;

    fn put(&self, profile: &str, filename: &str, content: &[u8]) -> Result<String, StorageError>;

    fn list(&self, profile: &str) -> Result<Vec<String>, StorageError>;

    fn load(&self, profile: &str, filename: &str) -> Result<Vec<u8>, StorageError>;

    fn delete(&self, profile: &str, filename: &str) -> Result<(), StorageError>;
}
