//! Combining advocate and skeptic assessments into one score.

use serde::{Deserialize, Serialize};

use super::roles::RoleAssessment;

/// Result of one Synthesizing step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Synthesis {
    pub score: f64,
    /// Weighted mean of role confidences.
    pub confidence: f64,
    /// `|advocate.score - skeptic.score|`.
    pub disagreement: f64,
    pub advocate_weight: f64,
    pub skeptic_weight: f64,
    /// First exclusion signalled by either role.
    pub hard_exclusion: Option<String>,
}

/// Weighting: equal unless confidences differ by more than `confidence_gap`,
/// then proportional to confidence.
pub fn synthesize(
    advocate: &RoleAssessment,
    skeptic: &RoleAssessment,
    confidence_gap: f64,
) -> Synthesis {
    let (ca, cs) = (advocate.confidence, skeptic.confidence);
    let (wa, ws) = if (ca - cs).abs() > confidence_gap && ca + cs > 0.0 {
        (ca / (ca + cs), cs / (ca + cs))
    } else {
        (0.5, 0.5)
    };

    Synthesis {
        score: (wa * advocate.score + ws * skeptic.score).clamp(0.0, 100.0),
        confidence: (wa * ca + ws * cs).clamp(0.0, 1.0),
        disagreement: (advocate.score - skeptic.score).abs(),
        advocate_weight: wa,
        skeptic_weight: ws,
        hard_exclusion: advocate
            .hard_exclusion
            .clone()
            .or_else(|| skeptic.hard_exclusion.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assessment(score: f64, confidence: f64) -> RoleAssessment {
        RoleAssessment {
            score,
            confidence,
            reasoning: "r".into(),
            talking_points: vec![],
            concerns: vec![],
            hard_exclusion: None,
        }
    }

    #[test]
    fn test_equal_weights_within_gap() {
        let s = synthesize(&assessment(80.0, 0.9), &assessment(55.0, 0.9), 0.2);
        assert_eq!(s.advocate_weight, 0.5);
        assert!((s.score - 67.5).abs() < 1e-9);
        assert!((s.disagreement - 25.0).abs() < 1e-9);
        assert!((s.confidence - 0.9).abs() < 1e-9);
    }

    #[test]
    fn test_gap_exactly_at_threshold_keeps_equal_weights() {
        let s = synthesize(&assessment(80.0, 0.7), &assessment(60.0, 0.5), 0.2 + 1e-12);
        assert_eq!(s.skeptic_weight, 0.5);
    }

    #[test]
    fn test_confidence_weighting_beyond_gap() {
        let s = synthesize(&assessment(90.0, 0.9), &assessment(30.0, 0.3), 0.2);
        assert!((s.advocate_weight - 0.75).abs() < 1e-9);
        assert!((s.score - 75.0).abs() < 1e-9);
        assert!((s.confidence - 0.75).abs() < 1e-9);
    }

    #[test]
    fn test_exclusion_from_either_role() {
        let mut skeptic = assessment(10.0, 0.9);
        skeptic.hard_exclusion = Some("allocator excludes crypto".into());
        let s = synthesize(&assessment(70.0, 0.8), &skeptic, 0.2);
        assert_eq!(s.hard_exclusion.as_deref(), Some("allocator excludes crypto"));
    }

    #[test]
    fn test_zero_confidences() {
        let s = synthesize(&assessment(50.0, 0.0), &assessment(50.0, 0.0), 0.2);
        assert_eq!(s.confidence, 0.0);
        assert_eq!(s.advocate_weight, 0.5);
    }
}
