//! Convergence, confidence and time guardrails for debates.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::escalation::EscalationReason;
use super::result::RecommendationThresholds;
use super::synthesis::Synthesis;

/// Configuration for debate guardrails.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DebateConfig {
    /// Maximum Debating rounds.
    pub max_iterations: u32,
    /// Disagreement at or below this converges.
    pub disagreement_threshold: f64,
    /// Confidence difference beyond which weighting follows confidence.
    pub confidence_gap: f64,
    /// Synthesis confidence below this escalates.
    pub min_confidence: f64,
    /// Per model call, in seconds.
    pub call_timeout_secs: u64,
    /// Whole debate including all iterations, in seconds.
    pub debate_timeout_secs: u64,
    pub recommendations: RecommendationThresholds,
}

impl Default for DebateConfig {
    fn default() -> Self {
        Self {
            max_iterations: 3,
            disagreement_threshold: 20.0,
            confidence_gap: 0.2,
            min_confidence: 0.5,
            call_timeout_secs: 30,
            debate_timeout_secs: 300,
            recommendations: RecommendationThresholds::default(),
        }
    }
}

impl DebateConfig {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }

    pub fn debate_timeout(&self) -> Duration {
        Duration::from_secs(self.debate_timeout_secs)
    }
}

/// What happens after a Synthesizing step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum RoundDecision {
    /// Produce a result; `excluded` forces `avoid`.
    Complete { excluded: bool },
    /// Loop back to Debating with cross-feedback.
    Regenerate,
    Escalate { reason: EscalationReason },
}

impl std::fmt::Display for RoundDecision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Complete { excluded: true } => write!(f, "complete (hard exclusion)"),
            Self::Complete { excluded: false } => write!(f, "complete"),
            Self::Regenerate => write!(f, "regenerate"),
            Self::Escalate { reason } => write!(f, "escalate ({})", reason),
        }
    }
}

/// Evaluates the transition rule after each synthesis.
#[derive(Debug, Clone)]
pub struct GuardrailEngine {
    config: DebateConfig,
}

impl GuardrailEngine {
    pub fn new(config: DebateConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &DebateConfig {
        &self.config
    }

    /// Decide the next phase for `iteration` (1-indexed).
    ///
    /// Precedence: hard exclusion, low confidence, convergence, remaining
    /// budget, then escalation.
    pub fn decide(&self, synthesis: &Synthesis, iteration: u32) -> RoundDecision {
        if synthesis.hard_exclusion.is_some() {
            return RoundDecision::Complete { excluded: true };
        }
        if synthesis.confidence < self.config.min_confidence {
            return RoundDecision::Escalate {
                reason: EscalationReason::LowConfidence,
            };
        }
        if synthesis.disagreement <= self.config.disagreement_threshold {
            return RoundDecision::Complete { excluded: false };
        }
        if iteration < self.config.max_iterations {
            return RoundDecision::Regenerate;
        }
        RoundDecision::Escalate {
            reason: EscalationReason::Disagreement,
        }
    }

    /// Whether `elapsed` has used up the per-debate budget.
    pub fn timed_out(&self, elapsed: Duration) -> bool {
        elapsed >= self.config.debate_timeout()
    }
}
