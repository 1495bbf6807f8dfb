//! Stages around the debate engine.
//!
//! ```text
//! offers × demands ──► HardFilter ──► Scorer ──► EnsembleRanker ──► top-N
//!                                                                    │
//!                              debate (batch) ◄──────────────────────┘
//!                                    │
//!                                    ▼
//!                            ExplanationStage
//! ```
//!
//! Everything here is synchronous and pure. Model calls happen only inside
//! the debate engine.

pub mod explanation;
pub mod filter;
pub mod rank;
pub mod scoring;

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

pub use explanation::{ExplainedRisk, ExplanationStage, MatchExplanation};
pub use filter::{FilterConfig, FilterRejection, FilterVerdict, HardFilter};
pub use rank::{EnsembleRanker, EnsembleWeights, ScoredPair};
pub use scoring::{cosine_similarity, AttributeWeights, Scorer, SignalScores};

use crate::entities::{CandidatePair, DemandEntity, OfferEntity};

/// Scoring and selection settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ScoringConfig {
    pub attributes: AttributeWeights,
    pub ensemble: EnsembleWeights,
    /// Submit only the best N pairs to debate; `None` debates every survivor.
    pub top_n: Option<usize>,
}

/// Outcome of filtering and ranking one scope.
#[derive(Debug, Clone, Default)]
pub struct PreparedPairs {
    /// Size of the offer × demand product examined.
    pub universe: usize,
    /// Rejections per filter rule.
    pub rejections: BTreeMap<&'static str, usize>,
    /// Survivors, best first, after the top-N cut.
    pub ranked: Vec<ScoredPair>,
}

impl PreparedPairs {
    pub fn filtered(&self) -> usize {
        self.rejections.values().sum()
    }
}

/// Filter, score and rank in one pass.
#[derive(Debug, Clone, Default)]
pub struct MatchPipeline {
    filter: HardFilter,
    scorer: Scorer,
    ranker: EnsembleRanker,
    top_n: Option<usize>,
}

impl MatchPipeline {
    pub fn new(filter: FilterConfig, scoring: ScoringConfig) -> Self {
        Self {
            filter: HardFilter::new(filter),
            scorer: Scorer::new(scoring.attributes),
            ranker: EnsembleRanker::new(scoring.ensemble),
            top_n: scoring.top_n,
        }
    }

    pub fn with_scorer(mut self, scorer: Scorer) -> Self {
        self.scorer = scorer;
        self
    }

    pub fn filter(&self) -> &HardFilter {
        &self.filter
    }

    pub fn scorer(&self) -> &Scorer {
        &self.scorer
    }

    pub fn explanation_stage(&self) -> ExplanationStage {
        ExplanationStage::new(*self.ranker.weights())
    }

    /// Score one pair that already passed the filter.
    pub fn score_pair(&self, pair: CandidatePair) -> ScoredPair {
        let signals = self.scorer.score(&pair);
        self.ranker.score(pair, signals)
    }

    /// Run the cross product through every stage.
    pub fn prepare(
        &self,
        offers: &[Arc<OfferEntity>],
        demands: &[Arc<DemandEntity>],
    ) -> PreparedPairs {
        let candidates = offers.iter().flat_map(|offer| {
            demands
                .iter()
                .map(move |demand| CandidatePair::new(Arc::clone(offer), Arc::clone(demand)))
        });
        self.prepare_candidates(candidates)
    }

    /// Run an arbitrary set of unfiltered pairs through every stage.
    pub fn prepare_candidates<I>(&self, candidates: I) -> PreparedPairs
    where
        I: IntoIterator<Item = CandidatePair>,
    {
        let mut prepared = PreparedPairs::default();
        let mut scored = Vec::new();

        for pair in candidates {
            prepared.universe += 1;
            match self.filter.evaluate(&pair.offer, &pair.demand) {
                FilterVerdict::Pass => scored.push(self.score_pair(pair)),
                FilterVerdict::Reject(rejection) => {
                    *prepared.rejections.entry(rejection.rule()).or_default() += 1;
                }
            }
        }

        prepared.ranked = self.ranker.rank_and_select(scored, self.top_n);
        debug!(
            universe = prepared.universe,
            filtered = prepared.filtered(),
            selected = prepared.ranked.len(),
            "pipeline prepared"
        );
        prepared
    }
}
