//! Result cache: extracted text keyed by document fingerprint and strategy.
//!
//! Entries are advisory. A failed read is treated as a miss and a failed
//! write never fails a job.

mod memory;
mod sqlite;

use std::sync::Arc;

use crate::config::{CacheBackend, Config};
use crate::db::Database;
use crate::error::CacheError;
use crate::fingerprint::Fingerprint;
use crate::strategy::StrategyId;

pub use memory::MemoryCache;
pub use sqlite::SqliteCache;

/// Identifies one cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub fingerprint: Fingerprint,
    pub strategy: StrategyId,
}

impl CacheKey {
    pub fn new(fingerprint: Fingerprint, strategy: StrategyId) -> Self {
        Self {
            fingerprint,
            strategy,
        }
    }
}

/// Key/value store of extracted text.
///
/// Each operation is atomic on its own; nothing spans several keys.
pub trait ResultCache: Send + Sync {
    /// Returns the cached text; a miss is `Ok(None)`.
    fn get(&self, key: &CacheKey) -> Result<Option<String>, CacheError>;

    /// Stores `text`, replacing any previous value (last write wins).
    fn set(&self, key: &CacheKey, text: &str) -> Result<(), CacheError>;

    /// Removes every entry.
    fn clear_all(&self) -> Result<(), CacheError>;
}

/// Builds the backend selected in `config`.
pub fn from_config(config: &Config) -> Result<Arc<dyn ResultCache>, CacheError> {
    match config.cache.backend {
        CacheBackend::Memory => {
            let cache = match config.cache.max_entries {
                Some(max) => MemoryCache::bounded(max),
                None => MemoryCache::new(),
            };
            Ok(Arc::new(cache))
        }
        CacheBackend::Sqlite => {
            let db = match config.cache_db_path() {
                Some(path) => Database::open(&path)?,
                None => Database::open_in_memory()?,
            };
            Ok(Arc::new(SqliteCache::new(db)))
        }
    }
}
