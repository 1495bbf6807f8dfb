//! Ensemble ranking and top-N selection.

use serde::{Deserialize, Serialize};

use super::scoring::SignalScores;
use crate::entities::CandidatePair;

/// Relative weight of each signal. Caller-configurable; weights of absent
/// signals are redistributed over the present ones.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnsembleWeights {
    pub rule_based: f64,
    pub semantic: f64,
    pub llm: f64,
    pub collaborative: f64,
}

impl Default for EnsembleWeights {
    fn default() -> Self {
        Self {
            rule_based: 0.4,
            semantic: 0.3,
            llm: 0.2,
            collaborative: 0.1,
        }
    }
}

impl EnsembleWeights {
    pub fn total(&self) -> f64 {
        self.rule_based + self.semantic + self.llm + self.collaborative
    }

    pub fn is_valid(&self) -> bool {
        let all = [self.rule_based, self.semantic, self.llm, self.collaborative];
        all.iter().all(|w| w.is_finite() && *w >= 0.0) && self.total() > 0.0
    }

    /// Weighted mean over the signals that are present.
    ///
    /// Falls back to the rule-based score when every present signal has
    /// zero weight.
    pub fn combine(&self, signals: &SignalScores) -> f64 {
        let parts = [
            (Some(signals.rule_based), self.rule_based),
            (signals.semantic, self.semantic),
            (signals.llm, self.llm),
            (signals.collaborative, self.collaborative),
        ];
        let (sum, weight) = parts
            .iter()
            .filter_map(|(score, w)| score.map(|s| (s * w, *w)))
            .fold((0.0, 0.0), |(s, w), (ds, dw)| (s + ds, w + dw));
        if weight <= 0.0 {
            return signals.rule_based.clamp(0.0, 100.0);
        }
        (sum / weight).clamp(0.0, 100.0)
    }
}

/// A surviving pair with its signals and preliminary score.
#[derive(Debug, Clone)]
pub struct ScoredPair {
    pub pair: CandidatePair,
    pub signals: SignalScores,
    pub preliminary_score: f64,
}

#[derive(Debug, Clone, Default)]
pub struct EnsembleRanker {
    weights: EnsembleWeights,
}

impl EnsembleRanker {
    pub fn new(weights: EnsembleWeights) -> Self {
        Self { weights }
    }

    pub fn weights(&self) -> &EnsembleWeights {
        &self.weights
    }

    pub fn score(&self, pair: CandidatePair, signals: SignalScores) -> ScoredPair {
        ScoredPair {
            preliminary_score: self.weights.combine(&signals),
            pair,
            signals,
        }
    }

    /// Sort by preliminary score descending and keep the top `limit`
    /// (`None` keeps everything). Ties order by pair key.
    pub fn rank_and_select(
        &self,
        mut scored: Vec<ScoredPair>,
        limit: Option<usize>,
    ) -> Vec<ScoredPair> {
        scored.sort_by(|a, b| {
            b.preliminary_score
                .total_cmp(&a.preliminary_score)
                .then_with(|| a.pair.key().cmp(&b.pair.key()))
        });
        if let Some(limit) = limit {
            scored.truncate(limit);
        }
        scored
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::fixtures::{demand, offer, pair};

    fn signals(rule: f64, semantic: Option<f64>) -> SignalScores {
        SignalScores {
            rule_based: rule,
            semantic,
            llm: None,
            collaborative: None,
        }
    }

    #[test]
    fn test_renormalises_over_present_signals() {
        let w = EnsembleWeights::default();
        assert!((w.combine(&signals(80.0, None)) - 80.0).abs() < 1e-9);
        // (0.4*80 + 0.3*40) / 0.7
        let expected = (0.4 * 80.0 + 0.3 * 40.0) / 0.7;
        assert!((w.combine(&signals(80.0, Some(40.0))) - expected).abs() < 1e-9);
    }

    #[test]
    fn test_all_four_signals() {
        let w = EnsembleWeights::default();
        let s = SignalScores {
            rule_based: 100.0,
            semantic: Some(50.0),
            llm: Some(80.0),
            collaborative: Some(0.0),
        };
        assert!((w.combine(&s) - 71.0).abs() < 1e-9);
    }

    #[test]
    fn test_zero_weight_falls_back_to_rule_based() {
        let w = EnsembleWeights {
            rule_based: 0.0,
            semantic: 0.0,
            llm: 1.0,
            collaborative: 0.0,
        };
        assert!(w.is_valid());
        assert_eq!(w.combine(&signals(42.0, Some(90.0))), 42.0);
        assert!(!EnsembleWeights {
            rule_based: 0.0,
            semantic: 0.0,
            llm: 0.0,
            collaborative: 0.0
        }
        .is_valid());
    }

    #[test]
    fn test_rank_and_select_orders_and_limits() {
        let ranker = EnsembleRanker::default();
        let mk = |o: &str, score: f64| {
            ranker.score(
                pair(
                    offer(o, &["growth"], &["us"], 100.0),
                    demand("a1", &["growth"], &["us"], None),
                ),
                signals(score, None),
            )
        };
        let ranked = ranker.rank_and_select(vec![mk("f1", 40.0), mk("f2", 90.0), mk("f3", 65.0)], None);
        let order: Vec<&str> = ranked.iter().map(|s| s.pair.offer_id()).collect();
        assert_eq!(order, vec!["f2", "f3", "f1"]);

        let top = ranker.rank_and_select(ranked, Some(2));
        assert_eq!(top.len(), 2);
        assert_eq!(top[1].pair.offer_id(), "f3");
    }
}
