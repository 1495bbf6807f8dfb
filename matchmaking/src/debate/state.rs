//! Debate state machine: phases, transitions and session tracking.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::roles::RoleOutput;
use super::synthesis::Synthesis;

/// Phase of a debate over one candidate pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DebatePhase {
    /// Created, no round started.
    Pending,
    /// Both roles are evaluating concurrently.
    Debating,
    /// Combining the two role outputs.
    Synthesizing,
    /// Disagreement too wide; another round follows with cross-feedback.
    Regenerating,
    /// Converged; a result was produced.
    Complete,
    /// Handed to a human reviewer.
    Escalated,
    /// Infrastructure failure; no result, no escalation.
    Failed,
}

impl DebatePhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Escalated | Self::Failed)
    }

    /// Valid transitions from this phase.
    pub fn valid_transitions(self) -> &'static [DebatePhase] {
        match self {
            Self::Pending => &[Self::Debating, Self::Escalated, Self::Failed],
            Self::Debating => &[Self::Synthesizing, Self::Escalated, Self::Failed],
            Self::Synthesizing => &[
                Self::Complete,
                Self::Regenerating,
                Self::Escalated,
                Self::Failed,
            ],
            Self::Regenerating => &[Self::Debating, Self::Escalated, Self::Failed],
            Self::Complete | Self::Escalated | Self::Failed => &[],
        }
    }
}

impl std::fmt::Display for DebatePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Debating => write!(f, "debating"),
            Self::Synthesizing => write!(f, "synthesizing"),
            Self::Regenerating => write!(f, "regenerating"),
            Self::Complete => write!(f, "complete"),
            Self::Escalated => write!(f, "escalated"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// One Debating + Synthesizing pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DebateRound {
    /// 1-indexed.
    pub iteration: u32,
    pub advocate: RoleOutput,
    pub skeptic: RoleOutput,
    pub synthesis: Synthesis,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
}

/// A phase transition record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DebateTransition {
    pub from: DebatePhase,
    pub to: DebatePhase,
    pub timestamp: DateTime<Utc>,
    pub reason: String,
}

/// Error for invalid state transitions.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid transition {from} → {to}: {reason}")]
pub struct TransitionError {
    pub from: DebatePhase,
    pub to: DebatePhase,
    pub reason: String,
}

/// State and history of one debate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebateSession {
    pub id: String,
    /// Composite pair id being debated.
    pub pair_key: String,
    pub phase: DebatePhase,
    /// Debating rounds entered so far.
    pub iteration: u32,
    pub max_iterations: u32,
    pub rounds: Vec<DebateRound>,
    pub transitions: Vec<DebateTransition>,
    pub created_at: DateTime<Utc>,
}

impl DebateSession {
    pub fn new(pair_key: &str, max_iterations: u32) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            pair_key: pair_key.to_string(),
            phase: DebatePhase::Pending,
            iteration: 0,
            max_iterations,
            rounds: Vec::new(),
            transitions: Vec::new(),
            created_at: Utc::now(),
        }
    }

    /// Transition to a new phase with a reason.
    ///
    /// Entering `Debating` starts a new iteration; entering it past
    /// `max_iterations` is rejected.
    pub fn transition(&mut self, to: DebatePhase, reason: &str) -> Result<(), TransitionError> {
        if !self.phase.valid_transitions().contains(&to) {
            return Err(TransitionError {
                from: self.phase,
                to,
                reason: format!(
                    "not a valid transition (allowed: {:?})",
                    self.phase.valid_transitions()
                ),
            });
        }
        if to == DebatePhase::Debating && self.iteration >= self.max_iterations {
            return Err(TransitionError {
                from: self.phase,
                to,
                reason: format!("iteration budget of {} spent", self.max_iterations),
            });
        }

        self.transitions.push(DebateTransition {
            from: self.phase,
            to,
            timestamp: Utc::now(),
            reason: reason.to_string(),
        });
        self.phase = to;

        if to == DebatePhase::Debating {
            self.iteration += 1;
        }
        Ok(())
    }

    pub fn record_round(&mut self, round: DebateRound) {
        self.rounds.push(round);
    }

    pub fn last_round(&self) -> Option<&DebateRound> {
        self.rounds.last()
    }

    pub fn can_iterate(&self) -> bool {
        self.iteration < self.max_iterations
    }

    pub fn is_terminal(&self) -> bool {
        self.phase.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path() {
        let mut session = DebateSession::new("f1:a1", 3);
        session.transition(DebatePhase::Debating, "start").unwrap();
        assert_eq!(session.iteration, 1);
        session
            .transition(DebatePhase::Synthesizing, "roles joined")
            .unwrap();
        session
            .transition(DebatePhase::Complete, "converged")
            .unwrap();
        assert!(session.is_terminal());
        assert_eq!(session.transitions.len(), 3);
    }

    #[test]
    fn test_regenerate_loop_increments_iteration() {
        let mut session = DebateSession::new("f1:a1", 3);
        session.transition(DebatePhase::Debating, "start").unwrap();
        for _ in 0..2 {
            session.transition(DebatePhase::Synthesizing, "").unwrap();
            session.transition(DebatePhase::Regenerating, "").unwrap();
            session.transition(DebatePhase::Debating, "").unwrap();
        }
        assert_eq!(session.iteration, 3);
        assert!(!session.can_iterate());
    }

    #[test]
    fn test_iteration_budget_enforced() {
        let mut session = DebateSession::new("f1:a1", 1);
        session.transition(DebatePhase::Debating, "").unwrap();
        session.transition(DebatePhase::Synthesizing, "").unwrap();
        session.transition(DebatePhase::Regenerating, "").unwrap();
        let err = session.transition(DebatePhase::Debating, "").unwrap_err();
        assert!(err.reason.contains("budget"));
        assert_eq!(session.phase, DebatePhase::Regenerating);
    }

    #[test]
    fn test_invalid_transition() {
        let mut session = DebateSession::new("f1:a1", 3);
        let err = session
            .transition(DebatePhase::Complete, "skip ahead")
            .unwrap_err();
        assert_eq!(err.from, DebatePhase::Pending);
        assert!(err.to_string().contains("pending → complete"));
    }

    #[test]
    fn test_terminal_phases_have_no_exits() {
        for phase in [
            DebatePhase::Complete,
            DebatePhase::Escalated,
            DebatePhase::Failed,
        ] {
            assert!(phase.is_terminal());
            assert!(phase.valid_transitions().is_empty());
        }
    }
}
