//! Cache keys, entries and liveness rules.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::versions::VersionSnapshot;
use crate::entities::{pair_has_demand, pair_has_offer, EntityType};

/// `(entity_type, entity_id, cache_key)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CacheKey {
    pub entity_type: EntityType,
    pub entity_id: String,
    pub key: String,
}

impl CacheKey {
    pub fn new(entity_type: EntityType, entity_id: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            entity_type,
            entity_id: entity_id.into(),
            key: key.into(),
        }
    }

    /// Flat storage key: `type/entity_id/key`.
    pub fn storage_key(&self) -> String {
        format!("{}/{}/{}", self.entity_type, self.entity_id, self.key)
    }

    /// Whether an invalidation of `entity_type`/`id` reaches this key.
    ///
    /// Matches the exact id of the same type, and composite pair ids whose
    /// offer half (for offers) or demand half (for demands) is `id`. Pair
    /// ids are matched by prefix and suffix, never by splitting, so an id
    /// containing the separator can only widen the match.
    pub fn references(&self, entity_type: EntityType, id: &str) -> bool {
        if self.entity_type == entity_type {
            return self.entity_id == id;
        }
        match (self.entity_type, entity_type) {
            (EntityType::Pair, EntityType::Offer) => pair_has_offer(&self.entity_id, id),
            (EntityType::Pair, EntityType::Demand) => pair_has_demand(&self.entity_id, id),
            _ => false,
        }
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.storage_key())
    }
}

/// Why a stored entry is not served.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    Live,
    Invalidated,
    Expired,
    /// A dependency version moved since the entry was written.
    Stale,
}

/// One cached value with its validity window and dependency versions.
///
/// Entries are replaced wholesale; the only in-place change is setting
/// `invalidated_at`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: CacheKey,
    pub value: serde_json::Value,
    pub valid_from: DateTime<Utc>,
    /// `None` means no expiry.
    pub valid_until: Option<DateTime<Utc>>,
    pub invalidated_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invalidation_reason: Option<String>,
    /// Versions of every tracked type at write time.
    pub dependency_versions: VersionSnapshot,
}

impl CacheEntry {
    /// Liveness against `now` and the caller's current versions.
    ///
    /// Checked in order: invalidation, expiry, then every stored dependency
    /// version. A dependency missing from `current` counts as stale.
    pub fn status(&self, now: DateTime<Utc>, current: &VersionSnapshot) -> EntryStatus {
        if self.invalidated_at.is_some() {
            return EntryStatus::Invalidated;
        }
        if let Some(until) = self.valid_until {
            if until <= now {
                return EntryStatus::Expired;
            }
        }
        let fresh = self
            .dependency_versions
            .iter()
            .all(|(t, v)| current.get(t) == Some(v));
        if fresh {
            EntryStatus::Live
        } else {
            EntryStatus::Stale
        }
    }

    /// Invalidated or expired: can never become live again.
    pub fn is_dead(&self, now: DateTime<Utc>) -> bool {
        self.invalidated_at.is_some() || self.valid_until.is_some_and(|u| u <= now)
    }

    pub(crate) fn mark_invalidated(&mut self, at: DateTime<Utc>, reason: &str) {
        if self.invalidated_at.is_none() {
            self.invalidated_at = Some(at);
            self.invalidation_reason = Some(reason.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn entry(versions: &[(EntityType, u64)]) -> CacheEntry {
        CacheEntry {
            key: CacheKey::new(EntityType::Offer, "f1", "score"),
            value: serde_json::json!({"score": 72}),
            valid_from: Utc::now(),
            valid_until: None,
            invalidated_at: None,
            invalidation_reason: None,
            dependency_versions: versions.iter().cloned().collect(),
        }
    }

    fn versions(v: &[(EntityType, u64)]) -> VersionSnapshot {
        v.iter().cloned().collect()
    }

    #[test]
    fn test_dependency_bump_is_stale() {
        let e = entry(&[(EntityType::Offer, 4), (EntityType::Demand, 7)]);
        let now = Utc::now();
        assert_eq!(
            e.status(now, &versions(&[(EntityType::Offer, 4), (EntityType::Demand, 7)])),
            EntryStatus::Live
        );
        assert_eq!(
            e.status(now, &versions(&[(EntityType::Offer, 4), (EntityType::Demand, 8)])),
            EntryStatus::Stale
        );
        assert_eq!(
            e.status(now, &versions(&[(EntityType::Offer, 4)])),
            EntryStatus::Stale
        );
    }

    #[test]
    fn test_invalidation_beats_everything() {
        let mut e = entry(&[(EntityType::Offer, 1)]);
        e.mark_invalidated(Utc::now(), "offer updated");
        let current = versions(&[(EntityType::Offer, 1)]);
        assert_eq!(e.status(Utc::now(), &current), EntryStatus::Invalidated);
        assert!(e.is_dead(Utc::now()));

        let first = e.invalidated_at;
        e.mark_invalidated(Utc::now() + Duration::seconds(5), "again");
        assert_eq!(e.invalidated_at, first);
        assert_eq!(e.invalidation_reason.as_deref(), Some("offer updated"));
    }

    #[test]
    fn test_expiry_boundary() {
        let mut e = entry(&[]);
        let now = Utc::now();
        e.valid_until = Some(now);
        assert_eq!(e.status(now, &VersionSnapshot::new()), EntryStatus::Expired);
        e.valid_until = Some(now + Duration::seconds(1));
        assert_eq!(e.status(now, &VersionSnapshot::new()), EntryStatus::Live);
    }

    #[test]
    fn test_references_composite_halves() {
        let key = CacheKey::new(EntityType::Pair, "f1:a7", "debate");
        assert!(key.references(EntityType::Offer, "f1"));
        assert!(key.references(EntityType::Demand, "a7"));
        assert!(key.references(EntityType::Pair, "f1:a7"));
        assert!(!key.references(EntityType::Offer, "f"));
        assert!(!key.references(EntityType::Offer, "a7"));
        let offer = CacheKey::new(EntityType::Offer, "f10", "score");
        assert!(!offer.references(EntityType::Offer, "f1"));
        assert!(!offer.references(EntityType::Demand, "f10"));
    }

    #[test]
    fn test_references_ids_containing_separator() {
        let key = CacheKey::new(EntityType::Pair, "fund:eu:a1", "debate");
        assert!(key.references(EntityType::Offer, "fund:eu"));
        assert!(key.references(EntityType::Demand, "a1"));
        let key = CacheKey::new(EntityType::Pair, "f1:desk:a1", "debate");
        assert!(key.references(EntityType::Demand, "desk:a1"));
    }

    #[test]
    fn test_entry_json_roundtrip_keeps_versions() {
        let e = entry(&[(EntityType::Offer, 4), (EntityType::Demand, 7)]);
        let json = serde_json::to_string(&e).unwrap();
        let back: CacheEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(back, e);
    }
}
