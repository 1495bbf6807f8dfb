//! Completed debate results.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::roles::{Concern, RoleAssessment, Severity, TalkingPoint};
use super::state::DebateRound;

/// What the caller should do with a matched pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Recommendation {
    Pursue,
    Investigate,
    Deprioritize,
    Avoid,
}

impl std::fmt::Display for Recommendation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pursue => write!(f, "pursue"),
            Self::Investigate => write!(f, "investigate"),
            Self::Deprioritize => write!(f, "deprioritize"),
            Self::Avoid => write!(f, "avoid"),
        }
    }
}

/// Score floors for each recommendation; anything lower is `Avoid`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecommendationThresholds {
    pub pursue: f64,
    pub investigate: f64,
    pub deprioritize: f64,
}

impl Default for RecommendationThresholds {
    fn default() -> Self {
        Self {
            pursue: 75.0,
            investigate: 55.0,
            deprioritize: 35.0,
        }
    }
}

impl RecommendationThresholds {
    pub fn classify(&self, score: f64) -> Recommendation {
        if score >= self.pursue {
            Recommendation::Pursue
        } else if score >= self.investigate {
            Recommendation::Investigate
        } else if score >= self.deprioritize {
            Recommendation::Deprioritize
        } else {
            Recommendation::Avoid
        }
    }
}

/// A topic the skeptic raised at some point in the debate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisagreementPoint {
    pub topic: String,
    /// Latest skeptic detail for the topic.
    pub skeptic_view: String,
    /// Advocate's answer on the same topic in the final round, if any.
    pub advocate_view: Option<String>,
    pub severity: Severity,
    pub confirmed: bool,
    /// Dropped by the skeptic before the final round.
    pub resolved: bool,
}

/// Output of a debate that reached `Complete`. Immutable; a later recompute
/// supersedes it wholesale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DebateResult {
    pub id: String,
    pub offer_id: String,
    pub demand_id: String,
    /// 0–100.
    pub score: f64,
    /// 0–1.
    pub confidence: f64,
    pub recommendation: Recommendation,
    pub disagreements: Vec<DisagreementPoint>,
    /// Advocate points not contradicted by a confirmed skeptic concern.
    pub talking_points: Vec<TalkingPoint>,
    /// Skeptic concerns from the final round.
    pub concerns: Vec<Concern>,
    pub hard_exclusion: Option<String>,
    pub iterations: u32,
    pub final_disagreement: f64,
    pub advocate_reasoning: String,
    pub skeptic_reasoning: String,
    pub preliminary_score: f64,
    pub tokens_used: u64,
    pub transcript: Vec<DebateRound>,
    pub completed_at: DateTime<Utc>,
}

impl DebateResult {
    pub fn pair_key(&self) -> String {
        crate::entities::pair_key(&self.offer_id, &self.demand_id)
    }

    pub fn unresolved(&self) -> impl Iterator<Item = &DisagreementPoint> {
        self.disagreements.iter().filter(|d| !d.resolved)
    }
}

fn topic_key(topic: &str) -> String {
    topic.trim().to_lowercase()
}

/// Advocate points whose topic the skeptic has not confirmed a concern on.
pub(crate) fn surviving_talking_points(
    advocate: &RoleAssessment,
    skeptic: &RoleAssessment,
) -> Vec<TalkingPoint> {
    let contradicted: Vec<String> = skeptic
        .confirmed_concerns()
        .map(|c| topic_key(&c.topic))
        .collect();
    advocate
        .talking_points
        .iter()
        .filter(|p| !contradicted.contains(&topic_key(&p.topic)))
        .cloned()
        .collect()
}

/// Every skeptic topic across the transcript, marked resolved when absent
/// from the final round.
pub(crate) fn disagreement_points(rounds: &[DebateRound]) -> Vec<DisagreementPoint> {
    let Some(last) = rounds.last() else {
        return Vec::new();
    };

    let mut points: BTreeMap<String, DisagreementPoint> = BTreeMap::new();
    for round in rounds {
        for concern in &round.skeptic.assessment.concerns {
            points.insert(
                topic_key(&concern.topic),
                DisagreementPoint {
                    topic: concern.topic.clone(),
                    skeptic_view: concern.detail.clone(),
                    advocate_view: None,
                    severity: concern.severity,
                    confirmed: concern.confirmed,
                    resolved: true,
                },
            );
        }
    }

    for concern in &last.skeptic.assessment.concerns {
        if let Some(point) = points.get_mut(&topic_key(&concern.topic)) {
            point.resolved = false;
        }
    }
    for tp in &last.advocate.assessment.talking_points {
        if let Some(point) = points.get_mut(&topic_key(&tp.topic)) {
            point.advocate_view = Some(tp.text.clone());
        }
    }

    let mut points: Vec<DisagreementPoint> = points.into_values().collect();
    points.sort_by(|a, b| {
        a.resolved
            .cmp(&b.resolved)
            .then(b.severity.cmp(&a.severity))
            .then(a.topic.cmp(&b.topic))
    });
    points
}
