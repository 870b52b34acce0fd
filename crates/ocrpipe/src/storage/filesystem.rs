use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use super::StorageGateway;
use crate::config::StorageConfig;
use crate::error::StorageError;
use crate::sanitize;

/// Prefix of in-flight temp files; never listed.
const TEMP_PREFIX: &str = ".ocrpipe-";

/// One directory per profile; objects are flat files inside it.
#[derive(Debug, Clone, Default)]
pub struct FilesystemStorage {
    profiles: BTreeMap<String, PathBuf>,
}

impl FilesystemStorage {
    pub fn new(profiles: BTreeMap<String, PathBuf>) -> Self {
        Self { profiles }
    }

    pub fn from_config(config: &StorageConfig) -> Self {
        Self::new(
            config
                .profiles
                .iter()
                .map(|(name, profile)| (name.clone(), PathBuf::from(&profile.root)))
                .collect(),
        )
    }

    fn root(&self, profile: &str) -> Result<&Path, StorageError> {
        self.profiles
            .get(profile)
            .map(PathBuf::as_path)
            .ok_or_else(|| StorageError::UnknownProfile(profile.to_string()))
    }

    fn object_path(&self, profile: &str, filename: &str) -> Result<PathBuf, StorageError> {
        sanitize::validate_filename(filename).map_err(|reason| StorageError::InvalidFilename {
            filename: filename.to_string(),
            reason,
        })?;
        Ok(self.root(profile)?.join(filename))
    }

    fn ensure_directory(&self, path: &Path) -> Result<(), StorageError> {
        if !path.exists() {
            std::fs::create_dir_all(path).map_err(|e| StorageError::CreateDirectory {
                path: path.to_path_buf(),
                source: e,
            })?;
        }
        Ok(())
    }
}

impl StorageGateway for FilesystemStorage {
    fn has_profile(&self, profile: &str) -> bool {
        self.profiles.contains_key(profile)
    }

    fn profiles(&self) -> Vec<String> {
        self.profiles.keys().cloned().collect()
    }

    /// Writes to a temp file in the profile directory, then renames it over
    /// the target so readers never observe a partial object.
    fn put(&self, profile: &str, filename: &str, content: &[u8]) -> Result<String, StorageError> {
        let path = self.object_path(profile, filename)?;
        let root = self.root(profile)?;
        self.ensure_directory(root)?;

        let write_err = |source| StorageError::WriteFile {
            path: path.clone(),
            source,
        };

        let mut tmp = tempfile::Builder::new()
            .prefix(TEMP_PREFIX)
            .tempfile_in(root)
            .map_err(write_err)?;
        tmp.write_all(content).map_err(write_err)?;
        tmp.as_file().sync_all().map_err(write_err)?;
        tmp.persist(&path).map_err(|e| write_err(e.error))?;

        log::debug!(
            "Stored {} bytes at {}",
            content.len(),
            sanitize::redact_path(&path)
        );
        Ok(path.display().to_string())
    }

    fn list(&self, profile: &str) -> Result<Vec<String>, StorageError> {
        let root = self.root(profile)?;
        if !root.exists() {
            return Ok(Vec::new());
        }

        let mut names = Vec::new();
        for entry in WalkDir::new(root).min_depth(1).max_depth(1) {
            let entry = entry.map_err(|e| StorageError::ListFailed {
                path: root.to_path_buf(),
                reason: e.to_string(),
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if !name.starts_with(TEMP_PREFIX) {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }

    fn load(&self, profile: &str, filename: &str) -> Result<Vec<u8>, StorageError> {
        let path = self.object_path(profile, filename)?;
        std::fs::read(&path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => StorageError::NotFound {
                profile: profile.to_string(),
                filename: filename.to_string(),
            },
            _ => StorageError::ReadFile { path, source: e },
        })
    }

    fn delete(&self, profile: &str, filename: &str) -> Result<(), StorageError> {
        let path = self.object_path(profile, filename)?;
        std::fs::remove_file(&path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => StorageError::NotFound {
                profile: profile.to_string(),
                filename: filename.to_string(),
            },
            _ => StorageError::DeleteFile { path: path.clone(), source: e },
        })?;
        log::debug!("Deleted {}", sanitize::redact_path(&path));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use tempfile::TempDir;

    fn storage(dir: &TempDir) -> FilesystemStorage {
        let mut profiles = BTreeMap::new();
        profiles.insert("results".to_string(), dir.path().join("results"));
        FilesystemStorage::new(profiles)
    }

    #[test]
    fn test_put_load_list_delete() {
        let dir = TempDir::new().unwrap();
        let storage = storage(&dir);

        let location = storage.put("results", "doc.md", b"# Hello").unwrap();
        assert!(location.ends_with("doc.md"));
        assert_eq!(storage.load("results", "doc.md").unwrap(), b"# Hello");
        assert_eq!(storage.list("results").unwrap(), vec!["doc.md".to_string()]);

        storage.delete("results", "doc.md").unwrap();
        assert!(storage.list("results").unwrap().is_empty());
    }

    #[test]
    fn test_put_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let storage = storage(&dir);

        let first = storage.put("results", "doc.md", b"v1").unwrap();
        let second = storage.put("results", "doc.md", b"v2").unwrap();

        assert_eq!(first, second);
        assert_eq!(storage.list("results").unwrap().len(), 1);
        assert_eq!(storage.load("results", "doc.md").unwrap(), b"v2");
    }

    #[test]
    fn test_list_of_missing_directory_is_empty() {
        let dir = TempDir::new().unwrap();
        assert!(storage(&dir).list("results").unwrap().is_empty());
    }

    #[test]
    fn test_unknown_profile() {
        let dir = TempDir::new().unwrap();
        let err = storage(&dir).put("nope", "doc.md", b"x").unwrap_err();
        assert!(matches!(err, StorageError::UnknownProfile(_)));
        assert_eq!(err.kind(), ErrorKind::ValidationError);
    }

    #[test]
    fn test_traversal_is_rejected() {
        let dir = TempDir::new().unwrap();
        let storage = storage(&dir);
        for name in ["../escape.md", "a/b.md", "..", ""] {
            let err = storage.put("results", name, b"x").unwrap_err();
            assert!(
                matches!(err, StorageError::InvalidFilename { .. }),
                "{} should be rejected",
                name
            );
        }
    }

    #[test]
    fn test_missing_object_is_not_found() {
        let dir = TempDir::new().unwrap();
        let storage = storage(&dir);
        let load = storage.load("results", "ghost.md").unwrap_err();
        assert_eq!(load.kind(), ErrorKind::NotFound);
        let delete = storage.delete("results", "ghost.md").unwrap_err();
        assert_eq!(delete.kind(), ErrorKind::NotFound);
    }
}
