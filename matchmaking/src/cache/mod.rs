//! Versioned entity cache.
//!
//! Entries are keyed by `(entity_type, entity_id, cache_key)` and carry the
//! version of every tracked entity type at write time. A read is a hit only
//! when the entry is not invalidated, not expired, and every stored version
//! still equals the current one.
//!
//! ```text
//! mutation ──► bump_version(type) ──► invalidate(type, id)
//!                    │
//! get(.., current) ──┴─► invalidated? expired? any version moved? ──► miss
//!                                                                 └──► hit
//! ```
//!
//! Version reads are atomic loads. Backend locks are held only for the
//! duration of one map operation and never across a model call.

pub mod backend;
pub mod entry;
#[cfg(feature = "persistent-cache")]
pub mod rocks;
pub mod versions;

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

pub use backend::{CacheBackend, MemoryBackend};
pub use entry::{CacheEntry, CacheKey, EntryStatus};
#[cfg(feature = "persistent-cache")]
pub use rocks::RocksBackend;
pub use versions::{VersionCounters, VersionSnapshot};

use crate::entities::EntityType;
use crate::events::{EngineEvent, EventBus};

/// Cache failures. Any of these means the store is unusable.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache lock poisoned: {0}")]
    LockPoisoned(&'static str),

    #[error("cache backend error: {0}")]
    Backend(String),

    #[error("cache serialization error: {0}")]
    Serialization(String),
}

/// Counts for observability.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub total_live: usize,
    pub per_type: BTreeMap<EntityType, usize>,
    pub invalidated: usize,
    pub expired: usize,
    /// Not invalidated or expired, but a dependency version moved.
    pub stale: usize,
}

/// Entity cache over a pluggable backend.
pub struct EntityCache {
    backend: Arc<dyn CacheBackend>,
    versions: VersionCounters,
    // Orders version persistence so the newest snapshot lands last.
    persist: Mutex<()>,
    events: Option<EventBus>,
}

impl std::fmt::Debug for EntityCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityCache")
            .field("backend", &self.backend.name())
            .field("versions", &self.versions.snapshot())
            .finish()
    }
}

impl EntityCache {
    /// Open a cache over `backend`, restoring persisted version counters.
    pub fn new(backend: Arc<dyn CacheBackend>) -> Result<Self, CacheError> {
        let versions = match backend.load_versions()? {
            Some(snapshot) => {
                let mut restored = VersionCounters::default().snapshot();
                restored.extend(snapshot);
                VersionCounters::from_snapshot(&restored)
            }
            None => VersionCounters::default(),
        };
        debug!(backend = backend.name(), versions = ?versions.snapshot(), "entity cache opened");
        Ok(Self {
            backend,
            versions,
            persist: Mutex::new(()),
            events: None,
        })
    }

    /// Volatile cache for tests and single-process runs.
    pub fn in_memory() -> Self {
        Self {
            backend: Arc::new(MemoryBackend::new()),
            versions: VersionCounters::default(),
            persist: Mutex::new(()),
            events: None,
        }
    }

    /// Publish invalidations on `bus`.
    pub fn with_events(mut self, bus: EventBus) -> Self {
        self.events = Some(bus);
        self
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub fn versions(&self) -> &VersionCounters {
        &self.versions
    }

    /// Current versions of every tracked type.
    pub fn current_versions(&self) -> VersionSnapshot {
        self.versions.snapshot()
    }

    /// Increment hook for the entity-mutation path. Call once per committed
    /// create/update/delete, before returning to the mutator's caller.
    pub fn bump_version(&self, entity_type: EntityType) -> Result<Option<u64>, CacheError> {
        let Some(version) = self.versions.bump(entity_type) else {
            return Ok(None);
        };
        let _guard = self
            .persist
            .lock()
            .map_err(|_| CacheError::LockPoisoned("version persistence"))?;
        self.backend.store_versions(&self.versions.snapshot())?;
        debug!(entity_type = %entity_type, version, "version bumped");
        Ok(Some(version))
    }

    /// Value for the key if live against `current`.
    pub fn get(
        &self,
        entity_type: EntityType,
        entity_id: &str,
        key: &str,
        current: &VersionSnapshot,
    ) -> Result<Option<serde_json::Value>, CacheError> {
        self.get_at(entity_type, entity_id, key, current, Utc::now())
    }

    /// [`get`](Self::get) evaluated at an explicit instant.
    pub fn get_at(
        &self,
        entity_type: EntityType,
        entity_id: &str,
        key: &str,
        current: &VersionSnapshot,
        now: DateTime<Utc>,
    ) -> Result<Option<serde_json::Value>, CacheError> {
        let cache_key = CacheKey::new(entity_type, entity_id, key);
        let Some(entry) = self.backend.load(&cache_key)? else {
            return Ok(None);
        };
        match entry.status(now, current) {
            EntryStatus::Live => Ok(Some(entry.value)),
            status => {
                debug!(key = %cache_key, ?status, "cache miss");
                Ok(None)
            }
        }
    }

    /// [`get`](Self::get) against this cache's own counters.
    pub fn get_current(
        &self,
        entity_type: EntityType,
        entity_id: &str,
        key: &str,
    ) -> Result<Option<serde_json::Value>, CacheError> {
        self.get(entity_type, entity_id, key, &self.current_versions())
    }

    /// Typed read against this cache's own counters.
    pub fn get_typed<T: DeserializeOwned>(
        &self,
        entity_type: EntityType,
        entity_id: &str,
        key: &str,
    ) -> Result<Option<T>, CacheError> {
        match self.get_current(entity_type, entity_id, key)? {
            Some(value) => serde_json::from_value(value)
                .map(Some)
                .map_err(|e| CacheError::Serialization(e.to_string())),
            None => Ok(None),
        }
    }

    /// Whether a live entry exists for the key right now.
    pub fn is_live(
        &self,
        entity_type: EntityType,
        entity_id: &str,
        key: &str,
    ) -> Result<bool, CacheError> {
        Ok(self.get_current(entity_type, entity_id, key)?.is_some())
    }

    /// Replace any prior entry for the key. `ttl = None` never expires.
    pub fn set(
        &self,
        entity_type: EntityType,
        entity_id: &str,
        key: &str,
        value: serde_json::Value,
        dependency_versions: VersionSnapshot,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        let now = Utc::now();
        let entry = CacheEntry {
            key: CacheKey::new(entity_type, entity_id, key),
            value,
            valid_from: now,
            valid_until: ttl.map(|ttl| now + ttl),
            invalidated_at: None,
            invalidation_reason: None,
            dependency_versions,
        };
        debug!(key = %entry.key, "cache set");
        self.backend.store(entry)
    }

    /// Typed write.
    pub fn set_typed<T: Serialize>(
        &self,
        entity_type: EntityType,
        entity_id: &str,
        key: &str,
        value: &T,
        dependency_versions: VersionSnapshot,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        let value =
            serde_json::to_value(value).map_err(|e| CacheError::Serialization(e.to_string()))?;
        self.set(entity_type, entity_id, key, value, dependency_versions, ttl)
    }

    /// Invalidate every entry keyed by `entity_id`.
    ///
    /// Reaches entries of `entity_type` with that exact id, and composite
    /// pair entries where the id is the half on `entity_type`'s side. Returns the number of
    /// entries newly invalidated.
    pub fn invalidate(
        &self,
        entity_type: EntityType,
        entity_id: &str,
        reason: &str,
    ) -> Result<usize, CacheError> {
        let now = Utc::now();
        let matches = |key: &CacheKey| key.references(entity_type, entity_id);
        let changed = self.backend.invalidate_where(&matches, now, reason)?;

        info!(
            entity_type = %entity_type,
            entity_id,
            entries = changed.len(),
            reason,
            "cache invalidated"
        );
        if let Some(bus) = &self.events {
            bus.publish(EngineEvent::CacheInvalidated {
                entity_type,
                entity_id: entity_id.to_string(),
                entries: changed.len(),
                reason: reason.to_string(),
                timestamp: now,
            });
        }
        Ok(changed.len())
    }

    /// Delete invalidated and expired entries. Stale entries are kept: a
    /// stale entry is already a miss, and is replaced on the next write.
    pub fn purge_dead(&self) -> Result<usize, CacheError> {
        let now = Utc::now();
        let removed = self.backend.remove_where(&|e| e.is_dead(now))?;
        if removed > 0 {
            info!(removed, "purged dead cache entries");
        }
        Ok(removed)
    }

    pub fn stats(&self) -> Result<CacheStats, CacheError> {
        let now = Utc::now();
        let current = self.current_versions();
        let mut stats = CacheStats::default();
        for entry in self.backend.entries()? {
            match entry.status(now, &current) {
                EntryStatus::Live => {
                    stats.total_live += 1;
                    *stats.per_type.entry(entry.key.entity_type).or_default() += 1;
                }
                EntryStatus::Invalidated => stats.invalidated += 1,
                EntryStatus::Expired => stats.expired += 1,
                EntryStatus::Stale => stats.stale += 1,
            }
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn snapshot(v: &[(EntityType, u64)]) -> VersionSnapshot {
        v.iter().cloned().collect()
    }

    #[test]
    fn test_version_mismatch_is_miss() {
        let cache = EntityCache::in_memory();
        let written = snapshot(&[(EntityType::Offer, 4), (EntityType::Demand, 7)]);
        cache
            .set(EntityType::Offer, "f1", "score", json!(81), written.clone(), None)
            .unwrap();

        assert_eq!(
            cache.get(EntityType::Offer, "f1", "score", &written).unwrap(),
            Some(json!(81))
        );
        let bumped = snapshot(&[(EntityType::Offer, 4), (EntityType::Demand, 8)]);
        assert_eq!(
            cache.get(EntityType::Offer, "f1", "score", &bumped).unwrap(),
            None
        );
    }

    #[test]
    fn test_bump_makes_current_reads_miss() {
        let cache = EntityCache::in_memory();
        cache
            .set(
                EntityType::Pair,
                "f1:a1",
                "debate",
                json!({"score": 70}),
                cache.current_versions(),
                None,
            )
            .unwrap();
        assert!(cache.is_live(EntityType::Pair, "f1:a1", "debate").unwrap());

        assert_eq!(cache.bump_version(EntityType::Demand).unwrap(), Some(1));
        assert!(!cache.is_live(EntityType::Pair, "f1:a1", "debate").unwrap());
        assert_eq!(cache.bump_version(EntityType::Pair).unwrap(), None);
    }

    #[test]
    fn test_invalidated_entry_misses_regardless_of_versions() {
        let cache = EntityCache::in_memory();
        let versions = cache.current_versions();
        cache
            .set(EntityType::Pair, "f1:a1", "debate", json!(1), versions.clone(), None)
            .unwrap();
        cache
            .set(EntityType::Pair, "f2:a1", "debate", json!(2), versions.clone(), None)
            .unwrap();
        cache
            .set(EntityType::Pair, "f2:a2", "debate", json!(3), versions.clone(), None)
            .unwrap();

        let n = cache
            .invalidate(EntityType::Demand, "a1", "demand updated")
            .unwrap();
        assert_eq!(n, 2);
        assert_eq!(
            cache.get(EntityType::Pair, "f1:a1", "debate", &versions).unwrap(),
            None
        );
        assert_eq!(
            cache.get(EntityType::Pair, "f2:a2", "debate", &versions).unwrap(),
            Some(json!(3))
        );
    }

    #[test]
    fn test_invalidate_exact_id_only_for_same_type() {
        let cache = EntityCache::in_memory();
        let v = cache.current_versions();
        cache
            .set(EntityType::Offer, "f1", "profile", json!(1), v.clone(), None)
            .unwrap();
        cache
            .set(EntityType::Demand, "f1", "profile", json!(2), v.clone(), None)
            .unwrap();
        cache
            .invalidate(EntityType::Offer, "f1", "offer deleted")
            .unwrap();
        assert!(!cache.is_live(EntityType::Offer, "f1", "profile").unwrap());
        assert!(cache.is_live(EntityType::Demand, "f1", "profile").unwrap());
    }

    #[test]
    fn test_set_twice_last_write_wins() {
        let cache = EntityCache::in_memory();
        let v = cache.current_versions();
        cache
            .set(EntityType::Pair, "f1:a1", "debate", json!(10), v.clone(), None)
            .unwrap();
        cache
            .set(EntityType::Pair, "f1:a1", "debate", json!(10), v.clone(), None)
            .unwrap();
        assert_eq!(cache.stats().unwrap().total_live, 1);
        assert_eq!(
            cache.get(EntityType::Pair, "f1:a1", "debate", &v).unwrap(),
            Some(json!(10))
        );
    }

    #[test]
    fn test_ttl_expiry_and_purge() {
        let cache = EntityCache::in_memory();
        let v = cache.current_versions();
        cache
            .set(
                EntityType::Pair,
                "f1:a1",
                "debate",
                json!(1),
                v.clone(),
                Some(Duration::days(90)),
            )
            .unwrap();
        cache
            .set(EntityType::Pair, "f2:a1", "debate", json!(2), v.clone(), None)
            .unwrap();

        let later = Utc::now() + Duration::days(91);
        assert_eq!(
            cache
                .get_at(EntityType::Pair, "f1:a1", "debate", &v, later)
                .unwrap(),
            None
        );
        assert!(cache
            .get_at(EntityType::Pair, "f2:a1", "debate", &v, later)
            .unwrap()
            .is_some());

        cache
            .invalidate(EntityType::Offer, "f2", "offer updated")
            .unwrap();
        let stats = cache.stats().unwrap();
        assert_eq!(stats.invalidated, 1);
        assert_eq!(stats.total_live, 1);
        assert_eq!(cache.purge_dead().unwrap(), 1);
        assert_eq!(cache.stats().unwrap().invalidated, 0);
    }

    #[test]
    fn test_stats_per_type_and_stale() {
        let cache = EntityCache::in_memory();
        let v = cache.current_versions();
        cache
            .set(EntityType::Pair, "f1:a1", "debate", json!(1), v.clone(), None)
            .unwrap();
        cache
            .set(EntityType::Offer, "f1", "profile", json!(1), v.clone(), None)
            .unwrap();
        let stats = cache.stats().unwrap();
        assert_eq!(stats.total_live, 2);
        assert_eq!(stats.per_type.get(&EntityType::Pair), Some(&1));

        cache.bump_version(EntityType::Offer).unwrap();
        let stats = cache.stats().unwrap();
        assert_eq!(stats.total_live, 0);
        assert_eq!(stats.stale, 2);
    }

    #[test]
    fn test_typed_roundtrip() {
        #[derive(Debug, PartialEq, Serialize, Deserialize)]
        struct Score {
            value: f64,
        }
        let cache = EntityCache::in_memory();
        cache
            .set_typed(
                EntityType::Pair,
                "f1:a1",
                "debate",
                &Score { value: 66.5 },
                cache.current_versions(),
                None,
            )
            .unwrap();
        let read: Option<Score> = cache
            .get_typed(EntityType::Pair, "f1:a1", "debate")
            .unwrap();
        assert_eq!(read, Some(Score { value: 66.5 }));
    }

    #[tokio::test]
    async fn test_invalidation_publishes_event() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        let cache = EntityCache::in_memory().with_events(bus);
        cache
            .set(
                EntityType::Pair,
                "f1:a1",
                "debate",
                json!(1),
                cache.current_versions(),
                None,
            )
            .unwrap();
        cache
            .invalidate(EntityType::Offer, "f1", "offer updated")
            .unwrap();
        match rx.recv().await.unwrap() {
            EngineEvent::CacheInvalidated { entries, .. } => assert_eq!(entries, 1),
            other => panic!("unexpected event {other:?}"),
        }
    }
}
