use moka::sync::Cache;

use super::{CacheKey, ResultCache};
use crate::error::CacheError;

/// In-process cache. Unbounded unless built with [`MemoryCache::bounded`].
pub struct MemoryCache {
    entries: Cache<CacheKey, String>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self {
            entries: Cache::builder().build(),
        }
    }

    /// Caps the entry count. Entries past the cap are evicted, so a `set`
    /// no longer guarantees a later `get` hit.
    pub fn bounded(max_entries: u64) -> Self {
        Self {
            entries: Cache::new(max_entries),
        }
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

impl ResultCache for MemoryCache {
    fn get(&self, key: &CacheKey) -> Result<Option<String>, CacheError> {
        Ok(self.entries.get(key))
    }

    fn set(&self, key: &CacheKey, text: &str) -> Result<(), CacheError> {
        self.entries.insert(*key, text.to_string());
        Ok(())
    }

    fn clear_all(&self) -> Result<(), CacheError> {
        self.entries.invalidate_all();
        // invalidate_all is lazy; flush so a following get observes the clear
        self.entries.run_pending_tasks();
        Ok(())
    }
}
