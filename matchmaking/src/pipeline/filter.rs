//! Hard filter: cheap, deterministic pruning of the offer × demand universe.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::entities::{CandidatePair, DemandEntity, OfferEntity};

/// Which rules the filter enforces.
///
/// An empty preference set on the demand side means "no preference" and
/// never rejects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    pub require_strategy_overlap: bool,
    pub require_geography_overlap: bool,
    pub enforce_size_range: bool,
    /// Let inactive entities through (normally only active ones match).
    pub include_inactive: bool,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            require_strategy_overlap: true,
            require_geography_overlap: true,
            enforce_size_range: true,
            include_inactive: false,
        }
    }
}

/// First rule a pair failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum FilterRejection {
    InactiveOffer,
    InactiveDemand,
    /// The demand's exclusion list names the offer or one of its tags.
    Excluded { matched: String },
    NoStrategyOverlap,
    NoGeographyOverlap,
    SizeOutOfRange { size: f64, min: f64, max: f64 },
}

impl FilterRejection {
    pub fn rule(&self) -> &'static str {
        match self {
            Self::InactiveOffer => "inactive_offer",
            Self::InactiveDemand => "inactive_demand",
            Self::Excluded { .. } => "excluded",
            Self::NoStrategyOverlap => "no_strategy_overlap",
            Self::NoGeographyOverlap => "no_geography_overlap",
            Self::SizeOutOfRange { .. } => "size_out_of_range",
        }
    }
}

impl std::fmt::Display for FilterRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Excluded { matched } => write!(f, "excluded by '{}'", matched),
            Self::SizeOutOfRange { size, min, max } => {
                write!(f, "size {} outside {}..={}", size, min, max)
            }
            other => write!(f, "{}", other.rule()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum FilterVerdict {
    Pass,
    Reject(FilterRejection),
}

impl FilterVerdict {
    pub fn is_pass(&self) -> bool {
        matches!(self, Self::Pass)
    }
}

fn normalized(tags: &BTreeSet<String>) -> BTreeSet<String> {
    tags.iter().map(|t| t.trim().to_lowercase()).collect()
}

fn overlaps(offered: &BTreeSet<String>, wanted: &BTreeSet<String>) -> bool {
    wanted.is_empty() || !normalized(offered).is_disjoint(&normalized(wanted))
}

/// Pure predicate over one offer/demand combination. No I/O, no model calls.
#[derive(Debug, Clone, Default)]
pub struct HardFilter {
    config: FilterConfig,
}

impl HardFilter {
    pub fn new(config: FilterConfig) -> Self {
        Self { config }
    }

    /// Evaluate every rule, stopping at the first failure.
    pub fn evaluate(&self, offer: &OfferEntity, demand: &DemandEntity) -> FilterVerdict {
        if !self.config.include_inactive {
            if !offer.active {
                return FilterVerdict::Reject(FilterRejection::InactiveOffer);
            }
            if !demand.active {
                return FilterVerdict::Reject(FilterRejection::InactiveDemand);
            }
        }

        if let Some(matched) = exclusion_hit(offer, demand) {
            return FilterVerdict::Reject(FilterRejection::Excluded { matched });
        }

        let wanted = &demand.attributes;
        if self.config.require_strategy_overlap
            && !overlaps(&offer.attributes.strategies, &wanted.strategy_preferences)
        {
            return FilterVerdict::Reject(FilterRejection::NoStrategyOverlap);
        }
        if self.config.require_geography_overlap
            && !overlaps(&offer.attributes.geographies, &wanted.geography_preferences)
        {
            return FilterVerdict::Reject(FilterRejection::NoGeographyOverlap);
        }
        if self.config.enforce_size_range {
            if let Some(range) = wanted.size_range {
                if !range.contains(offer.attributes.size) {
                    return FilterVerdict::Reject(FilterRejection::SizeOutOfRange {
                        size: offer.attributes.size,
                        min: range.min,
                        max: range.max,
                    });
                }
            }
        }

        FilterVerdict::Pass
    }

    pub fn passes(&self, offer: &OfferEntity, demand: &DemandEntity) -> bool {
        self.evaluate(offer, demand).is_pass()
    }

    /// Cross product of `offers` × `demands`, keeping survivors.
    pub fn survivors(
        &self,
        offers: &[Arc<OfferEntity>],
        demands: &[Arc<DemandEntity>],
    ) -> Vec<CandidatePair> {
        offers
            .iter()
            .flat_map(|o| demands.iter().map(move |d| (o, d)))
            .filter(|(o, d)| self.passes(o, d))
            .map(|(o, d)| CandidatePair::new(Arc::clone(o), Arc::clone(d)))
            .collect()
    }
}

fn exclusion_hit(offer: &OfferEntity, demand: &DemandEntity) -> Option<String> {
    let exclusions = normalized(&demand.attributes.exclusions);
    if exclusions.is_empty() {
        return None;
    }
    let offer_id = offer.id.trim().to_lowercase();
    if exclusions.contains(&offer_id) {
        return Some(offer.id.clone());
    }
    normalized(&offer.attributes.strategies)
        .into_iter()
        .chain(normalized(&offer.attributes.geographies))
        .find(|tag| exclusions.contains(tag))
}
