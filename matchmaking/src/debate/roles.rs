//! Debate roles and their typed assessments.

use serde::{Deserialize, Serialize};

use crate::model::{parse_structured, ModelError, TokenUsage, ADVOCATE_PROMPT, SKEPTIC_PROMPT};

/// Opposing positions in a debate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DebateRole {
    /// Argues for the match.
    Advocate,
    /// Argues against the match.
    Skeptic,
}

impl DebateRole {
    pub fn prompt_name(self) -> &'static str {
        match self {
            Self::Advocate => ADVOCATE_PROMPT,
            Self::Skeptic => SKEPTIC_PROMPT,
        }
    }

    pub fn opponent(self) -> Self {
        match self {
            Self::Advocate => Self::Skeptic,
            Self::Skeptic => Self::Advocate,
        }
    }
}

impl std::fmt::Display for DebateRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Advocate => write!(f, "advocate"),
            Self::Skeptic => write!(f, "skeptic"),
        }
    }
}

/// A point in favour of the match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TalkingPoint {
    /// Short tag used to line points up against concerns.
    pub topic: String,
    pub text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Minor,
    Major,
    Dealbreaker,
}

/// A reason the match could fail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Concern {
    pub topic: String,
    pub detail: String,
    pub severity: Severity,
    /// Verified against profile data rather than speculated.
    #[serde(default)]
    pub confirmed: bool,
}

/// Structured output of one role for one round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoleAssessment {
    /// 0–100.
    pub score: f64,
    /// 0–1.
    pub confidence: f64,
    pub reasoning: String,
    #[serde(default)]
    pub talking_points: Vec<TalkingPoint>,
    #[serde(default)]
    pub concerns: Vec<Concern>,
    /// Reason the pair violates an absolute restriction, if any.
    #[serde(default)]
    pub hard_exclusion: Option<String>,
}

impl RoleAssessment {
    /// Strictly parse and validate raw model output.
    pub fn parse(raw: &str) -> Result<Self, ModelError> {
        let assessment: RoleAssessment = parse_structured(raw)?;
        assessment.validate()?;
        Ok(assessment)
    }

    /// Reject out-of-range numbers and empty reasoning.
    pub fn validate(&self) -> Result<(), ModelError> {
        if !self.score.is_finite() || !(0.0..=100.0).contains(&self.score) {
            return Err(ModelError::Parse(format!(
                "score {} outside 0..=100",
                self.score
            )));
        }
        if !self.confidence.is_finite() || !(0.0..=1.0).contains(&self.confidence) {
            return Err(ModelError::Parse(format!(
                "confidence {} outside 0..=1",
                self.confidence
            )));
        }
        if self.reasoning.trim().is_empty() {
            return Err(ModelError::Parse("empty reasoning".to_string()));
        }
        if let Some(reason) = &self.hard_exclusion {
            if reason.trim().is_empty() {
                return Err(ModelError::Parse(
                    "hard_exclusion must be null or a reason".to_string(),
                ));
            }
        }
        Ok(())
    }

    /// Concerns the role verified against the profile data.
    pub fn confirmed_concerns(&self) -> impl Iterator<Item = &Concern> {
        self.concerns.iter().filter(|c| c.confirmed)
    }
}

/// One role's parsed output plus call accounting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoleOutput {
    pub role: DebateRole,
    pub assessment: RoleAssessment,
    pub prompt_version: u32,
    pub model: String,
    pub usage: TokenUsage,
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID: &str = r#"{
        "score": 82,
        "confidence": 0.85,
        "reasoning": "Strategy and size line up with the mandate.",
        "talking_points": [{"topic": "strategy", "text": "Growth equity matches preference"}],
        "concerns": [{"topic": "team", "detail": "Key person risk", "severity": "minor", "confirmed": false}],
        "hard_exclusion": null
    }"#;

    #[test]
    fn test_parse_valid_assessment() {
        let a = RoleAssessment::parse(VALID).unwrap();
        assert_eq!(a.score, 82.0);
        assert_eq!(a.talking_points[0].topic, "strategy");
        assert_eq!(a.concerns[0].severity, Severity::Minor);
        assert!(a.hard_exclusion.is_none());
        assert_eq!(a.confirmed_concerns().count(), 0);
    }

    #[test]
    fn test_parse_fenced_with_optional_fields_missing() {
        let raw = "```json\n{\"score\": 40, \"confidence\": 0.6, \"reasoning\": \"Thin record.\"}\n```";
        let a = RoleAssessment::parse(raw).unwrap();
        assert!(a.concerns.is_empty());
    }

    #[test]
    fn test_out_of_range_is_parse_error() {
        let raw = r#"{"score": 140, "confidence": 0.6, "reasoning": "x"}"#;
        assert!(matches!(
            RoleAssessment::parse(raw),
            Err(ModelError::Parse(_))
        ));
        let raw = r#"{"score": 40, "confidence": 1.6, "reasoning": "x"}"#;
        assert!(matches!(
            RoleAssessment::parse(raw),
            Err(ModelError::Parse(_))
        ));
    }

    #[test]
    fn test_missing_score_is_parse_error() {
        let raw = r#"{"confidence": 0.6, "reasoning": "x"}"#;
        let err = RoleAssessment::parse(raw).unwrap_err();
        assert!(err.is_retryable());
    }

    #[test]
    fn test_unknown_severity_is_parse_error() {
        let raw = r#"{"score": 50, "confidence": 0.6, "reasoning": "x",
            "concerns": [{"topic": "t", "detail": "d", "severity": "catastrophic"}]}"#;
        assert!(RoleAssessment::parse(raw).is_err());
    }

    #[test]
    fn test_role_prompts() {
        assert_eq!(DebateRole::Advocate.prompt_name(), "debate.advocate");
        assert_eq!(DebateRole::Skeptic.opponent(), DebateRole::Advocate);
        assert_eq!(DebateRole::Skeptic.to_string(), "skeptic");
    }
}
