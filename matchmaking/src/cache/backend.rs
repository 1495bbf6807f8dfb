//! Storage behind the entity cache.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};

use super::entry::{CacheEntry, CacheKey};
use super::versions::VersionSnapshot;
use super::CacheError;

/// Key/value storage for cache entries.
///
/// Every method is atomic with respect to a single key: readers never see a
/// partially written entry, and concurrent writers to the same key resolve
/// last-write-wins.
pub trait CacheBackend: Send + Sync {
    /// Short backend name for logs.
    fn name(&self) -> &'static str;

    fn load(&self, key: &CacheKey) -> Result<Option<CacheEntry>, CacheError>;

    /// Insert or wholesale replace.
    fn store(&self, entry: CacheEntry) -> Result<(), CacheError>;

    /// Set `invalidated_at` on every not-yet-invalidated entry whose key
    /// satisfies `matches`. Returns the keys that changed.
    fn invalidate_where(
        &self,
        matches: &(dyn Fn(&CacheKey) -> bool + Sync),
        at: DateTime<Utc>,
        reason: &str,
    ) -> Result<Vec<CacheKey>, CacheError>;

    /// Delete entries for which `dead` holds. Returns how many were removed.
    fn remove_where(
        &self,
        dead: &(dyn Fn(&CacheEntry) -> bool + Sync),
    ) -> Result<usize, CacheError>;

    /// Every stored entry, in no particular order.
    fn entries(&self) -> Result<Vec<CacheEntry>, CacheError>;

    /// Last persisted version counters, if this backend keeps them.
    fn load_versions(&self) -> Result<Option<VersionSnapshot>, CacheError> {
        Ok(None)
    }

    /// Persist version counters. No-op for volatile backends.
    fn store_versions(&self, _versions: &VersionSnapshot) -> Result<(), CacheError> {
        Ok(())
    }
}

/// Process-local backend over a `RwLock<HashMap>`.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    entries: RwLock<HashMap<CacheKey, CacheEntry>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CacheBackend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn load(&self, key: &CacheKey) -> Result<Option<CacheEntry>, CacheError> {
        let entries = self
            .entries
            .read()
            .map_err(|_| CacheError::LockPoisoned("memory backend"))?;
        Ok(entries.get(key).cloned())
    }

    fn store(&self, entry: CacheEntry) -> Result<(), CacheError> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| CacheError::LockPoisoned("memory backend"))?;
        entries.insert(entry.key.clone(), entry);
        Ok(())
    }

    fn invalidate_where(
        &self,
        matches: &(dyn Fn(&CacheKey) -> bool + Sync),
        at: DateTime<Utc>,
        reason: &str,
    ) -> Result<Vec<CacheKey>, CacheError> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| CacheError::LockPoisoned("memory backend"))?;
        let mut changed = Vec::new();
        for (key, entry) in entries.iter_mut() {
            if entry.invalidated_at.is_none() && matches(key) {
                entry.mark_invalidated(at, reason);
                changed.push(key.clone());
            }
        }
        Ok(changed)
    }

    fn remove_where(
        &self,
        dead: &(dyn Fn(&CacheEntry) -> bool + Sync),
    ) -> Result<usize, CacheError> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| CacheError::LockPoisoned("memory backend"))?;
        let before = entries.len();
        entries.retain(|_, e| !dead(e));
        Ok(before - entries.len())
    }

    fn entries(&self) -> Result<Vec<CacheEntry>, CacheError> {
        let entries = self
            .entries
            .read()
            .map_err(|_| CacheError::LockPoisoned("memory backend"))?;
        Ok(entries.values().cloned().collect())
    }
}
