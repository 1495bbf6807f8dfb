//! RocksDB-backed cache storage.
//!
//! Entries live in the `cache_entries` column family under
//! `type/entity_id/key`; version counters live in `cache_meta`. Values are
//! JSON-encoded so entries stay readable with `ldb`.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rocksdb::{ColumnFamilyDescriptor, IteratorMode, Options, WriteBatch, DB};

use super::backend::CacheBackend;
use super::entry::{CacheEntry, CacheKey};
use super::versions::VersionSnapshot;
use super::CacheError;

/// Column family for cache entries.
pub const CF_ENTRIES: &str = "cache_entries";
/// Column family for version counters.
pub const CF_META: &str = "cache_meta";

const VERSIONS_KEY: &[u8] = b"versions";

impl From<rocksdb::Error> for CacheError {
    fn from(e: rocksdb::Error) -> Self {
        CacheError::Backend(e.to_string())
    }
}

/// Persistent cache backend.
pub struct RocksBackend {
    db: DB,
    path: PathBuf,
    // Serialises read-modify-write scans against concurrent stores.
    write_lock: Mutex<()>,
}

impl RocksBackend {
    /// Open or create a store at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, CacheError> {
        let path = path.as_ref().to_path_buf();
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cfs = [CF_ENTRIES, CF_META]
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Options::default()));
        let db = DB::open_cf_descriptors(&opts, &path, cfs)?;

        Ok(Self {
            db,
            path,
            write_lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn cf(&self, name: &str) -> Result<&rocksdb::ColumnFamily, CacheError> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| CacheError::Backend(format!("column family not found: {name}")))
    }

    fn encode<T: serde::Serialize>(value: &T) -> Result<Vec<u8>, CacheError> {
        serde_json::to_vec(value).map_err(|e| CacheError::Serialization(e.to_string()))
    }

    fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T, CacheError> {
        serde_json::from_slice(bytes).map_err(|e| CacheError::Serialization(e.to_string()))
    }

    fn guard(&self) -> Result<std::sync::MutexGuard<'_, ()>, CacheError> {
        self.write_lock
            .lock()
            .map_err(|_| CacheError::LockPoisoned("rocks backend"))
    }
}

impl CacheBackend for RocksBackend {
    fn name(&self) -> &'static str {
        "rocksdb"
    }

    fn load(&self, key: &CacheKey) -> Result<Option<CacheEntry>, CacheError> {
        let cf = self.cf(CF_ENTRIES)?;
        match self.db.get_cf(cf, key.storage_key().as_bytes())? {
            Some(bytes) => Ok(Some(Self::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    fn store(&self, entry: CacheEntry) -> Result<(), CacheError> {
        let bytes = Self::encode(&entry)?;
        let _guard = self.guard()?;
        let cf = self.cf(CF_ENTRIES)?;
        self.db
            .put_cf(cf, entry.key.storage_key().as_bytes(), bytes)?;
        Ok(())
    }

    fn invalidate_where(
        &self,
        matches: &(dyn Fn(&CacheKey) -> bool + Sync),
        at: DateTime<Utc>,
        reason: &str,
    ) -> Result<Vec<CacheKey>, CacheError> {
        let _guard = self.guard()?;
        let cf = self.cf(CF_ENTRIES)?;
        let mut batch = WriteBatch::default();
        let mut changed = Vec::new();

        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (key, bytes) = item?;
            let mut entry: CacheEntry = Self::decode(&bytes)?;
            if entry.invalidated_at.is_none() && matches(&entry.key) {
                entry.mark_invalidated(at, reason);
                batch.put_cf(cf, key, Self::encode(&entry)?);
                changed.push(entry.key);
            }
        }

        if !changed.is_empty() {
            self.db.write(batch)?;
        }
        Ok(changed)
    }

    fn remove_where(
        &self,
        dead: &(dyn Fn(&CacheEntry) -> bool + Sync),
    ) -> Result<usize, CacheError> {
        let _guard = self.guard()?;
        let cf = self.cf(CF_ENTRIES)?;
        let mut batch = WriteBatch::default();
        let mut removed = 0;

        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (key, bytes) = item?;
            let entry: CacheEntry = Self::decode(&bytes)?;
            if dead(&entry) {
                batch.delete_cf(cf, key);
                removed += 1;
            }
        }

        if removed > 0 {
            self.db.write(batch)?;
        }
        Ok(removed)
    }

    fn entries(&self) -> Result<Vec<CacheEntry>, CacheError> {
        let cf = self.cf(CF_ENTRIES)?;
        self.db
            .iterator_cf(cf, IteratorMode::Start)
            .map(|item| {
                let (_, bytes) = item?;
                Self::decode(&bytes)
            })
            .collect()
    }

    fn load_versions(&self) -> Result<Option<VersionSnapshot>, CacheError> {
        let cf = self.cf(CF_META)?;
        match self.db.get_cf(cf, VERSIONS_KEY)? {
            Some(bytes) => Ok(Some(Self::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    fn store_versions(&self, versions: &VersionSnapshot) -> Result<(), CacheError> {
        let cf = self.cf(CF_META)?;
        self.db.put_cf(cf, VERSIONS_KEY, Self::encode(versions)?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::EntityType;
    use tempfile::TempDir;

    fn entry(id: &str) -> CacheEntry {
        CacheEntry {
            key: CacheKey::new(EntityType::Pair, id, "debate"),
            value: serde_json::json!({"score": 64}),
            valid_from: Utc::now(),
            valid_until: None,
            invalidated_at: None,
            invalidation_reason: None,
            dependency_versions: [(EntityType::Offer, 2), (EntityType::Demand, 3)]
                .into_iter()
                .collect(),
        }
    }

    #[test]
    fn test_entries_survive_reopen() {
        let dir = TempDir::new().unwrap();
        let original = entry("f1:a1");
        {
            let backend = RocksBackend::open(dir.path()).unwrap();
            backend.store(original.clone()).unwrap();
            backend
                .store_versions(&[(EntityType::Offer, 2)].into_iter().collect())
                .unwrap();
        }
        let backend = RocksBackend::open(dir.path()).unwrap();
        assert_eq!(backend.load(&original.key).unwrap(), Some(original));
        assert_eq!(
            backend.load_versions().unwrap().unwrap().get(&EntityType::Offer),
            Some(&2)
        );
    }

    #[test]
    fn test_invalidate_and_purge() {
        let dir = TempDir::new().unwrap();
        let backend = RocksBackend::open(dir.path()).unwrap();
        backend.store(entry("f1:a1")).unwrap();
        backend.store(entry("f2:a2")).unwrap();

        let changed = backend
            .invalidate_where(&|k| k.references(EntityType::Offer, "f1"), Utc::now(), "offer updated")
            .unwrap();
        assert_eq!(changed.len(), 1);

        let removed = backend
            .remove_where(&|e| e.invalidated_at.is_some())
            .unwrap();
        assert_eq!(removed, 1);
        assert_eq!(backend.entries().unwrap().len(), 1);
    }
}
