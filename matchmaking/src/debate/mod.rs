//! Adversarial debate over a single candidate pair.
//!
//! An advocate and a skeptic evaluate the pair concurrently; their scores are
//! synthesized and the guardrails decide whether to finish, run another
//! round with cross-feedback, or hand the pair to a human.
//!
//! ```text
//! Pending → Debating → Synthesizing ─┬→ Complete
//!              ↑                     ├→ Regenerating → Debating …
//!              │                     └→ Escalated
//!              └── any model failure ──→ Failed
//! ```
//!
//! # Termination
//!
//! - **Complete**: disagreement ≤ threshold, or a role signalled a hard
//!   exclusion (recommendation forced to `avoid`).
//! - **Escalated**: disagreement never converged within `max_iterations`,
//!   synthesis confidence fell below the floor, or the debate ran out of
//!   time. Carries the full transcript.
//! - **Failed**: a model call failed after its retry budget. Infrastructure,
//!   not business disagreement.

pub mod engine;
pub mod escalation;
pub mod guardrails;
pub mod result;
pub mod roles;
pub mod state;
pub mod synthesis;

pub use engine::{
    DebateEngine, DebateError, DebateFailure, DebateOutcome, DebateRequest, PairEvaluator,
};
pub use escalation::{
    EscalationError, EscalationLog, EscalationPriority, EscalationReason, EscalationRecord,
    EscalationSink,
};
pub use guardrails::{DebateConfig, GuardrailEngine, RoundDecision};
pub use result::{DebateResult, DisagreementPoint, Recommendation, RecommendationThresholds};
pub use roles::{Concern, DebateRole, RoleAssessment, RoleOutput, Severity, TalkingPoint};
pub use state::{DebatePhase, DebateRound, DebateSession, DebateTransition, TransitionError};
pub use synthesis::{synthesize, Synthesis};
