//! Core entity types consumed by the matching engine
//!
//! Offer and demand profiles are owned by the external profile-management
//! collaborator. The engine only reads them; the only mutation it observes is
//! the version bump that follows a committed change.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;

/// Identifier of an offer or demand entity
pub type EntityId = String;

/// Entity kinds tracked by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    /// Supply side (e.g. an investment fund)
    Offer,
    /// Demand side (e.g. a capital allocator)
    Demand,
    /// Derived offer/demand combination; keyed by a composite id
    Pair,
}

impl EntityType {
    /// Entity types whose mutations are versioned
    pub fn tracked() -> &'static [EntityType] {
        &[EntityType::Offer, EntityType::Demand]
    }

    /// The opposite side of the market, if any
    pub fn opposite(&self) -> Option<EntityType> {
        match self {
            EntityType::Offer => Some(EntityType::Demand),
            EntityType::Demand => Some(EntityType::Offer),
            EntityType::Pair => None,
        }
    }
}

impl std::fmt::Display for EntityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntityType::Offer => write!(f, "offer"),
            EntityType::Demand => write!(f, "demand"),
            EntityType::Pair => write!(f, "pair"),
        }
    }
}

impl std::str::FromStr for EntityType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "offer" | "fund" => Ok(EntityType::Offer),
            "demand" | "allocator" => Ok(EntityType::Demand),
            "pair" => Ok(EntityType::Pair),
            other => Err(format!("unknown entity type: {other}")),
        }
    }
}

/// A verifiable track-record fact attached to an offer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackRecordFact {
    pub label: String,
    pub value: String,
}

/// Structured attributes of an offer
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OfferAttributes {
    /// Strategy tags (e.g. "growth", "buyout")
    #[serde(default)]
    pub strategies: BTreeSet<String>,
    /// Target raise or fund size, in millions
    pub size: f64,
    /// Geography tags
    #[serde(default)]
    pub geographies: BTreeSet<String>,
    #[serde(default)]
    pub track_record: Vec<TrackRecordFact>,
}

/// Supply-side profile (e.g. a fund)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OfferEntity {
    pub id: EntityId,
    pub name: String,
    pub attributes: OfferAttributes,
    /// Free-text investment thesis
    #[serde(default)]
    pub thesis: String,
    /// Externally computed embedding of the thesis
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    /// Whether the offer currently participates in matching
    #[serde(default = "default_active")]
    pub active: bool,
    pub updated_at: DateTime<Utc>,
}

/// Inclusive size range accepted by a demand entity, in millions
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SizeRange {
    pub min: f64,
    pub max: f64,
}

impl SizeRange {
    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }

    pub fn midpoint(&self) -> f64 {
        (self.min + self.max) / 2.0
    }
}

/// Structured attributes of a demand entity
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DemandAttributes {
    #[serde(default)]
    pub strategy_preferences: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_range: Option<SizeRange>,
    #[serde(default)]
    pub geography_preferences: BTreeSet<String>,
    /// Hard exclusions: strategy tags, geography tags or offer ids
    #[serde(default)]
    pub exclusions: BTreeSet<String>,
}

/// Demand-side profile (e.g. a capital allocator)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DemandEntity {
    pub id: EntityId,
    pub name: String,
    pub attributes: DemandAttributes,
    /// Free-text mandate
    #[serde(default)]
    pub mandate: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    #[serde(default = "default_active")]
    pub active: bool,
    pub updated_at: DateTime<Utc>,
}

fn default_active() -> bool {
    true
}

/// An offer/demand combination in flight through the pipeline.
///
/// Holds shared snapshots of both profiles so stages never re-read the
/// source mid-flight. Never persisted beyond the cache entry it produces.
#[derive(Debug, Clone)]
pub struct CandidatePair {
    pub offer: Arc<OfferEntity>,
    pub demand: Arc<DemandEntity>,
}

impl CandidatePair {
    pub fn new(offer: Arc<OfferEntity>, demand: Arc<DemandEntity>) -> Self {
        Self { offer, demand }
    }

    pub fn offer_id(&self) -> &str {
        &self.offer.id
    }

    pub fn demand_id(&self) -> &str {
        &self.demand.id
    }

    /// Composite id (`offerId:demandId`) used as the cache entity id
    pub fn key(&self) -> String {
        pair_key(&self.offer.id, &self.demand.id)
    }
}

/// Joins the two halves of a composite pair id
pub const PAIR_KEY_SEPARATOR: char = ':';

/// Build a composite pair id
pub fn pair_key(offer_id: &str, demand_id: &str) -> String {
    format!("{}{}{}", offer_id, PAIR_KEY_SEPARATOR, demand_id)
}

/// Whether `id` can name an offer or demand.
///
/// Ids are non-empty and never contain [`PAIR_KEY_SEPARATOR`], so a pair id
/// always splits back into the two ids it was built from.
pub fn is_valid_entity_id(id: &str) -> bool {
    !id.is_empty() && !id.contains(PAIR_KEY_SEPARATOR)
}

/// Whether the composite `pair_id` was built with `offer_id` on the left
pub fn pair_has_offer(pair_id: &str, offer_id: &str) -> bool {
    pair_id
        .strip_prefix(offer_id)
        .is_some_and(|rest| rest.starts_with(PAIR_KEY_SEPARATOR))
}

/// Whether the composite `pair_id` was built with `demand_id` on the right
pub fn pair_has_demand(pair_id: &str, demand_id: &str) -> bool {
    pair_id
        .strip_suffix(demand_id)
        .is_some_and(|rest| rest.ends_with(PAIR_KEY_SEPARATOR))
}
