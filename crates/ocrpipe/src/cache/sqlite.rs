use super::{CacheKey, ResultCache};
use crate::db::{cache_repo, Database};
use crate::error::CacheError;

/// Cache persisted in the `cache_entries` table.
pub struct SqliteCache {
    db: Database,
}

impl SqliteCache {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

impl ResultCache for SqliteCache {
    fn get(&self, key: &CacheKey) -> Result<Option<String>, CacheError> {
        Ok(cache_repo::get(
            &self.db,
            &key.fingerprint.to_hex(),
            key.strategy.as_str(),
        )?)
    }

    fn set(&self, key: &CacheKey, text: &str) -> Result<(), CacheError> {
        cache_repo::put(
            &self.db,
            &key.fingerprint.to_hex(),
            key.strategy.as_str(),
            text,
            &chrono::Utc::now().to_rfc3339(),
        )?;
        Ok(())
    }

    fn clear_all(&self) -> Result<(), CacheError> {
        let removed = cache_repo::clear(&self.db)?;
        log::info!("Cleared {} cached results", removed);
        Ok(())
    }
}
