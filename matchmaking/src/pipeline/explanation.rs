//! Caller-facing view of a debate result.
//!
//! Pure reshaping of fields already present in the result. No model call.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::rank::EnsembleWeights;
use super::scoring::SignalScores;
use crate::debate::{DebateResult, Recommendation, Severity};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExplainedRisk {
    pub topic: String,
    pub detail: String,
    pub severity: Severity,
    pub confirmed: bool,
    /// Advocate's answer, if any.
    pub mitigation: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchExplanation {
    pub offer_id: String,
    pub demand_id: String,
    pub headline: String,
    pub score: f64,
    pub confidence: f64,
    pub recommendation: Recommendation,
    /// Debate score blended with the preliminary signals, when supplied.
    pub ensemble_score: Option<f64>,
    pub strengths: Vec<String>,
    /// Unresolved concerns, most severe first.
    pub risks: Vec<ExplainedRisk>,
    /// Topics raised and later dropped by the skeptic.
    pub resolved_topics: Vec<String>,
    pub advocate_summary: String,
    pub skeptic_summary: String,
    pub iterations: u32,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct ExplanationStage {
    weights: EnsembleWeights,
}

impl ExplanationStage {
    pub fn new(weights: EnsembleWeights) -> Self {
        Self { weights }
    }

    pub fn explain(
        &self,
        result: &DebateResult,
        signals: Option<&SignalScores>,
    ) -> MatchExplanation {
        let ensemble_score = signals.map(|s| {
            let mut with_llm = *s;
            with_llm.llm = Some(result.score);
            self.weights.combine(&with_llm)
        });

        let headline = match &result.hard_exclusion {
            Some(reason) => format!("Excluded: {}", reason),
            None => format!(
                "{} ({:.0}/100, {:.0}% confidence)",
                headline_verb(result.recommendation),
                result.score,
                result.confidence * 100.0
            ),
        };

        let risks = result
            .unresolved()
            .map(|d| ExplainedRisk {
                topic: d.topic.clone(),
                detail: d.skeptic_view.clone(),
                severity: d.severity,
                confirmed: d.confirmed,
                mitigation: d.advocate_view.clone(),
            })
            .collect();

        MatchExplanation {
            offer_id: result.offer_id.clone(),
            demand_id: result.demand_id.clone(),
            headline,
            score: result.score,
            confidence: result.confidence,
            recommendation: result.recommendation,
            ensemble_score,
            strengths: result.talking_points.iter().map(|t| t.text.clone()).collect(),
            risks,
            resolved_topics: result
                .disagreements
                .iter()
                .filter(|d| d.resolved)
                .map(|d| d.topic.clone())
                .collect(),
            advocate_summary: result.advocate_reasoning.clone(),
            skeptic_summary: result.skeptic_reasoning.clone(),
            iterations: result.iterations,
            generated_at: Utc::now(),
        }
    }
}

fn headline_verb(recommendation: Recommendation) -> &'static str {
    match recommendation {
        Recommendation::Pursue => "Strong fit",
        Recommendation::Investigate => "Worth investigating",
        Recommendation::Deprioritize => "Weak fit",
        Recommendation::Avoid => "Poor fit",
    }
}
