//! Preliminary scoring signals.
//!
//! Used only to order candidates for debate, never as the final score.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::entities::{pair_key, CandidatePair, DemandEntity, OfferEntity};

/// Weights of the attribute-overlap sub-scores.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AttributeWeights {
    pub strategy: f64,
    pub geography: f64,
    pub size: f64,
}

impl Default for AttributeWeights {
    fn default() -> Self {
        Self {
            strategy: 0.5,
            geography: 0.25,
            size: 0.25,
        }
    }
}

/// Independently computed signals for one pair, each 0–100.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SignalScores {
    pub rule_based: f64,
    /// Embedding similarity; absent when either side has no embedding.
    pub semantic: Option<f64>,
    /// Debate score, once a debate has completed.
    pub llm: Option<f64>,
    /// Externally supplied affinity.
    pub collaborative: Option<f64>,
}

/// Computes [`SignalScores`] for candidate pairs.
#[derive(Debug, Clone, Default)]
pub struct Scorer {
    weights: AttributeWeights,
    affinities: HashMap<String, f64>,
}

impl Scorer {
    pub fn new(weights: AttributeWeights) -> Self {
        Self {
            weights,
            affinities: HashMap::new(),
        }
    }

    /// Attach collaborative affinities (0–100) keyed by `offerId:demandId`.
    pub fn with_affinities(mut self, affinities: HashMap<String, f64>) -> Self {
        self.affinities = affinities;
        self
    }

    pub fn set_affinity(&mut self, offer_id: &str, demand_id: &str, affinity: f64) {
        self.affinities
            .insert(pair_key(offer_id, demand_id), affinity.clamp(0.0, 100.0));
    }

    pub fn score(&self, pair: &CandidatePair) -> SignalScores {
        SignalScores {
            rule_based: self.attribute_score(&pair.offer, &pair.demand),
            semantic: semantic_score(&pair.offer, &pair.demand),
            llm: None,
            collaborative: self.affinities.get(&pair.key()).copied(),
        }
    }

    /// Weighted attribute overlap, 0–100.
    pub fn attribute_score(&self, offer: &OfferEntity, demand: &DemandEntity) -> f64 {
        let w = self.weights;
        let total = w.strategy + w.geography + w.size;
        if total <= 0.0 {
            return 0.0;
        }
        let strategy = coverage(
            &offer.attributes.strategies,
            &demand.attributes.strategy_preferences,
        );
        let geography = coverage(
            &offer.attributes.geographies,
            &demand.attributes.geography_preferences,
        );
        let size = size_fit(offer, demand);
        100.0 * (w.strategy * strategy + w.geography * geography + w.size * size) / total
    }
}

/// Share of the demand's preferences the offer covers; 1.0 when open.
fn coverage(
    offered: &std::collections::BTreeSet<String>,
    wanted: &std::collections::BTreeSet<String>,
) -> f64 {
    if wanted.is_empty() {
        return 1.0;
    }
    let offered: std::collections::BTreeSet<String> =
        offered.iter().map(|t| t.trim().to_lowercase()).collect();
    let hits = wanted
        .iter()
        .filter(|t| offered.contains(&t.trim().to_lowercase()))
        .count();
    hits as f64 / wanted.len() as f64
}

/// 1.0 at the midpoint of the range, 0.5 at its edges, 0 outside.
fn size_fit(offer: &OfferEntity, demand: &DemandEntity) -> f64 {
    let Some(range) = demand.attributes.size_range else {
        return 1.0;
    };
    let size = offer.attributes.size;
    if !range.contains(size) {
        return 0.0;
    }
    let half = (range.max - range.min) / 2.0;
    if half <= 0.0 {
        return 1.0;
    }
    1.0 - 0.5 * ((size - range.midpoint()).abs() / half)
}

/// Cosine similarity of the two embeddings, clamped to 0–100.
fn semantic_score(offer: &OfferEntity, demand: &DemandEntity) -> Option<f64> {
    let (a, b) = (offer.embedding.as_ref()?, demand.embedding.as_ref()?);
    cosine_similarity(a, b).map(|c| (c.max(0.0) * 100.0).min(100.0))
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Option<f64> {
    if a.len() != b.len() || a.is_empty() {
        return None;
    }
    let (mut dot, mut na, mut nb) = (0.0f64, 0.0f64, 0.0f64);
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (*x as f64, *y as f64);
        dot += x * y;
        na += x * x;
        nb += y * y;
    }
    if na == 0.0 || nb == 0.0 {
        return None;
    }
    Some(dot / (na.sqrt() * nb.sqrt()))
}
