//! Per-entity-type version counters.
//!
//! The counter map is built once and never resized, so every read is a
//! single atomic load and every bump a single `fetch_add`. No lock is ever
//! taken on this path.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::entities::EntityType;

/// Versions of every tracked entity type at one instant.
pub type VersionSnapshot = BTreeMap<EntityType, u64>;

/// Monotonic counters, one per tracked entity type.
#[derive(Debug)]
pub struct VersionCounters {
    counters: HashMap<EntityType, AtomicU64>,
}

impl Default for VersionCounters {
    fn default() -> Self {
        Self::new(EntityType::tracked())
    }
}

impl VersionCounters {
    /// Counters for the given types, all starting at zero.
    pub fn new(types: &[EntityType]) -> Self {
        Self {
            counters: types.iter().map(|t| (*t, AtomicU64::new(0))).collect(),
        }
    }

    /// Counters seeded from a persisted snapshot.
    pub fn from_snapshot(snapshot: &VersionSnapshot) -> Self {
        Self {
            counters: snapshot
                .iter()
                .map(|(t, v)| (*t, AtomicU64::new(*v)))
                .collect(),
        }
    }

    /// Whether mutations of `entity_type` are versioned.
    pub fn tracks(&self, entity_type: EntityType) -> bool {
        self.counters.contains_key(&entity_type)
    }

    /// Current version; untracked types read as zero.
    pub fn current(&self, entity_type: EntityType) -> u64 {
        self.counters
            .get(&entity_type)
            .map(|c| c.load(Ordering::Acquire))
            .unwrap_or(0)
    }

    /// Increment after one committed create/update/delete. Returns the new
    /// version, or `None` when the type is not tracked.
    pub fn bump(&self, entity_type: EntityType) -> Option<u64> {
        self.counters
            .get(&entity_type)
            .map(|c| c.fetch_add(1, Ordering::AcqRel) + 1)
    }

    /// Current versions of every tracked type.
    pub fn snapshot(&self) -> VersionSnapshot {
        self.counters
            .iter()
            .map(|(t, c)| (*t, c.load(Ordering::Acquire)))
            .collect()
    }
}
