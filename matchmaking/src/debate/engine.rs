//! Debate engine: drives one candidate pair through the state machine.
//!
//! Each round runs the advocate and skeptic concurrently and joins on both
//! before synthesizing. From the second round on, each role receives the
//! other role's previous assessment as cross-feedback.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::escalation::{EscalationPriority, EscalationReason, EscalationRecord};
use super::guardrails::{DebateConfig, GuardrailEngine, RoundDecision};
use super::result::{disagreement_points, surviving_talking_points, DebateResult, Recommendation};
use super::roles::{DebateRole, RoleAssessment, RoleOutput};
use super::state::{DebatePhase, DebateRound, DebateSession, TransitionError};
use super::synthesis::synthesize;
use crate::entities::{CandidatePair, DemandEntity, OfferEntity};
use crate::model::{
    call_with_retry, ModelClient, ModelError, ModelRequest, ModelSettings, PromptRegistry,
    PromptVariables, RetryPolicy,
};
use crate::rate_limit::RateLimiter;

/// One pair to debate plus the caller's context.
#[derive(Debug, Clone)]
pub struct DebateRequest {
    pub pair: CandidatePair,
    /// Ranking score from the pipeline, shown to both roles.
    pub preliminary_score: f64,
    /// Business value (0–100) used to prioritise escalations.
    pub value_score: f64,
}

/// Why a debate ended in `Failed`.
#[derive(Debug, Clone, Error)]
pub enum DebateError {
    #[error(transparent)]
    Model(#[from] ModelError),

    #[error(transparent)]
    Transition(#[from] TransitionError),
}

impl DebateError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Model(e) => e.kind(),
            Self::Transition(_) => "transition",
        }
    }
}

/// Terminal `Failed` state details.
#[derive(Debug, Clone)]
pub struct DebateFailure {
    pub offer_id: String,
    pub demand_id: String,
    pub error: DebateError,
    pub iterations: u32,
    pub tokens_used: u64,
    pub transcript: Vec<DebateRound>,
}

/// Terminal outcome of one debate.
#[derive(Debug, Clone)]
pub enum DebateOutcome {
    Complete(Box<DebateResult>),
    Escalated(Box<EscalationRecord>),
    Failed(DebateFailure),
}

impl DebateOutcome {
    pub fn phase(&self) -> DebatePhase {
        match self {
            Self::Complete(_) => DebatePhase::Complete,
            Self::Escalated(_) => DebatePhase::Escalated,
            Self::Failed(_) => DebatePhase::Failed,
        }
    }

    pub fn tokens_used(&self) -> u64 {
        match self {
            Self::Complete(r) => r.tokens_used,
            Self::Escalated(r) => r.tokens_used,
            Self::Failed(f) => f.tokens_used,
        }
    }

    pub fn iterations(&self) -> u32 {
        match self {
            Self::Complete(r) => r.iterations,
            Self::Escalated(r) => r.iterations,
            Self::Failed(f) => f.iterations,
        }
    }
}

/// Anything that can turn a candidate pair into a terminal outcome.
///
/// The batch processor depends on this seam rather than on
/// [`DebateEngine`] directly.
#[async_trait]
pub trait PairEvaluator: Send + Sync {
    async fn evaluate(&self, request: DebateRequest) -> DebateOutcome;
}

/// Advocate/skeptic debate over one pair.
pub struct DebateEngine {
    client: Arc<dyn ModelClient>,
    prompts: Arc<PromptRegistry>,
    guardrails: GuardrailEngine,
    retry: RetryPolicy,
    settings: ModelSettings,
    limiter: Option<Arc<RateLimiter>>,
}

impl DebateEngine {
    pub fn new(
        client: Arc<dyn ModelClient>,
        prompts: Arc<PromptRegistry>,
        config: DebateConfig,
    ) -> Self {
        Self {
            client,
            prompts,
            guardrails: GuardrailEngine::new(config),
            retry: RetryPolicy::default(),
            settings: ModelSettings::default(),
            limiter: None,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_settings(mut self, settings: ModelSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Take one limiter token before every model call attempt.
    pub fn with_rate_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.limiter = Some(limiter);
        self
    }

    pub fn config(&self) -> &DebateConfig {
        self.guardrails.config()
    }

    /// Run the debate to a terminal outcome. Never panics on model failure.
    pub async fn run(&self, request: &DebateRequest) -> DebateOutcome {
        let pair_key = request.pair.key();
        let mut session = DebateSession::new(&pair_key, self.config().max_iterations);

        match self.drive(request, &mut session).await {
            Ok(outcome) => outcome,
            Err(error) => {
                if let Err(e) = session.transition(DebatePhase::Failed, &error.to_string()) {
                    debug!(pair = %pair_key, error = %e, "failed transition rejected");
                }
                warn!(
                    pair = %pair_key,
                    kind = error.kind(),
                    iteration = session.iteration,
                    error = %error,
                    "debate failed"
                );
                DebateOutcome::Failed(DebateFailure {
                    offer_id: request.pair.offer_id().to_string(),
                    demand_id: request.pair.demand_id().to_string(),
                    error,
                    iterations: session.iteration,
                    tokens_used: transcript_tokens(&session.rounds),
                    transcript: session.rounds,
                })
            }
        }
    }

    async fn drive(
        &self,
        request: &DebateRequest,
        session: &mut DebateSession,
    ) -> Result<DebateOutcome, DebateError> {
        let started = Instant::now();
        let budget = self.config().debate_timeout();
        session.transition(DebatePhase::Debating, "debate started")?;

        loop {
            let iteration = session.iteration;
            let remaining = budget.saturating_sub(started.elapsed());
            if remaining.is_zero() {
                return self.escalate(request, session, EscalationReason::Timeout);
            }

            debug!(pair = %session.pair_key, iteration, "round started");
            let round_started = Utc::now();
            let round_clock = Instant::now();
            let joined = tokio::time::timeout(
                remaining,
                self.run_round(request, iteration, session.last_round()),
            )
            .await;

            let (advocate, skeptic) = match joined {
                Ok(outputs) => outputs?,
                Err(_) => return self.escalate(request, session, EscalationReason::Timeout),
            };

            session.transition(DebatePhase::Synthesizing, "both roles returned")?;
            let synthesis = synthesize(
                &advocate.assessment,
                &skeptic.assessment,
                self.config().confidence_gap,
            );
            let decision = self.guardrails.decide(&synthesis, iteration);
            debug!(
                pair = %session.pair_key,
                iteration,
                advocate = advocate.assessment.score,
                skeptic = skeptic.assessment.score,
                disagreement = synthesis.disagreement,
                confidence = synthesis.confidence,
                %decision,
                "round synthesized"
            );

            session.record_round(DebateRound {
                iteration,
                advocate,
                skeptic,
                synthesis,
                started_at: round_started,
                duration_ms: round_clock.elapsed().as_millis() as u64,
            });

            match decision {
                RoundDecision::Complete { excluded } => {
                    session.transition(DebatePhase::Complete, &decision.to_string())?;
                    return Ok(DebateOutcome::Complete(Box::new(
                        self.complete(request, session, excluded),
                    )));
                }
                RoundDecision::Escalate { reason } => {
                    return self.escalate(request, session, reason);
                }
                RoundDecision::Regenerate => {
                    session.transition(DebatePhase::Regenerating, "disagreement above threshold")?;
                    if self.guardrails.timed_out(started.elapsed()) {
                        return self.escalate(request, session, EscalationReason::Timeout);
                    }
                    session.transition(DebatePhase::Debating, "cross-feedback round")?;
                }
            }
        }
    }

    async fn run_round(
        &self,
        request: &DebateRequest,
        iteration: u32,
        previous: Option<&DebateRound>,
    ) -> Result<(RoleOutput, RoleOutput), DebateError> {
        let advocate_request = self.role_request(
            DebateRole::Advocate,
            request,
            iteration,
            previous.map(|r| &r.skeptic.assessment),
        )?;
        let skeptic_request = self.role_request(
            DebateRole::Skeptic,
            request,
            iteration,
            previous.map(|r| &r.advocate.assessment),
        )?;

        let (advocate, skeptic) = tokio::join!(
            self.call_role(DebateRole::Advocate, advocate_request),
            self.call_role(DebateRole::Skeptic, skeptic_request),
        );
        Ok((advocate?, skeptic?))
    }

    fn role_request(
        &self,
        role: DebateRole,
        request: &DebateRequest,
        iteration: u32,
        feedback: Option<&RoleAssessment>,
    ) -> Result<ModelRequest, ModelError> {
        let feedback = match feedback {
            Some(assessment) => serde_json::to_value(assessment)
                .map_err(|e| ModelError::Prompt(format!("feedback not serializable: {e}")))?,
            None => Value::String("None. This is the opening round.".to_string()),
        };

        let mut variables = PromptVariables::new();
        variables.insert("offer".into(), offer_view(&request.pair.offer));
        variables.insert("demand".into(), demand_view(&request.pair.demand));
        variables.insert("iteration".into(), json!(iteration));
        variables.insert("feedback".into(), feedback);
        variables.insert(
            "preliminary_score".into(),
            json!((request.preliminary_score * 10.0).round() / 10.0),
        );

        self.prompts
            .build_request(role.prompt_name(), variables, &self.settings)
    }

    /// One role call. Unparseable output is retried under the same policy
    /// as transport errors.
    async fn call_role(
        &self,
        role: DebateRole,
        request: ModelRequest,
    ) -> Result<RoleOutput, ModelError> {
        let attempts = self.retry.max_attempts.max(1);
        let mut usage = crate::model::TokenUsage::default();
        let mut attempt = 1;
        loop {
            let response = call_with_retry(
                self.client.as_ref(),
                &request,
                &self.retry,
                self.config().call_timeout(),
                self.limiter.as_deref(),
            )
            .await?;
            usage.add(response.usage);

            match RoleAssessment::parse(&response.content) {
                Ok(assessment) => {
                    return Ok(RoleOutput {
                        role,
                        assessment,
                        prompt_version: request.prompt_version,
                        model: response.model,
                        usage,
                    })
                }
                Err(err) if attempt < attempts => {
                    warn!(%role, attempt, error = %err, "unparseable role output, retrying");
                    tokio::time::sleep(self.retry.delay_after(attempt)).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn complete(
        &self,
        request: &DebateRequest,
        session: &DebateSession,
        excluded: bool,
    ) -> DebateResult {
        let rounds = &session.rounds;
        // drive() records the round before deciding, so there is always one
        let (score, confidence, disagreement, exclusion, advocate, skeptic) = match rounds.last() {
            Some(last) => (
                last.synthesis.score,
                last.synthesis.confidence,
                last.synthesis.disagreement,
                last.synthesis.hard_exclusion.clone(),
                Some(&last.advocate.assessment),
                Some(&last.skeptic.assessment),
            ),
            None => (0.0, 0.0, 0.0, None, None, None),
        };

        let recommendation = if excluded {
            Recommendation::Avoid
        } else {
            self.config().recommendations.classify(score)
        };

        let result = DebateResult {
            id: uuid::Uuid::new_v4().to_string(),
            offer_id: request.pair.offer_id().to_string(),
            demand_id: request.pair.demand_id().to_string(),
            score,
            confidence,
            recommendation,
            disagreements: disagreement_points(rounds),
            talking_points: match (advocate, skeptic) {
                (Some(a), Some(s)) => surviving_talking_points(a, s),
                _ => Vec::new(),
            },
            concerns: skeptic.map(|s| s.concerns.clone()).unwrap_or_default(),
            hard_exclusion: exclusion,
            iterations: session.iteration,
            final_disagreement: disagreement,
            advocate_reasoning: advocate.map(|a| a.reasoning.clone()).unwrap_or_default(),
            skeptic_reasoning: skeptic.map(|s| s.reasoning.clone()).unwrap_or_default(),
            preliminary_score: request.preliminary_score,
            tokens_used: transcript_tokens(rounds),
            transcript: rounds.clone(),
            completed_at: Utc::now(),
        };

        info!(
            pair = %session.pair_key,
            score = result.score,
            confidence = result.confidence,
            recommendation = %result.recommendation,
            iterations = result.iterations,
            "debate complete"
        );
        result
    }

    fn escalate(
        &self,
        request: &DebateRequest,
        session: &mut DebateSession,
        reason: EscalationReason,
    ) -> Result<DebateOutcome, DebateError> {
        let config = self.config();
        let last = session.last_round();
        let disagreement = last.map(|r| r.synthesis.disagreement).unwrap_or(0.0);
        let detail = match reason {
            EscalationReason::Disagreement => format!(
                "disagreement {:.1} still above {:.1} after {} iterations",
                disagreement, config.disagreement_threshold, session.iteration
            ),
            EscalationReason::LowConfidence => format!(
                "synthesis confidence {:.2} below {:.2}",
                last.map(|r| r.synthesis.confidence).unwrap_or(0.0),
                config.min_confidence
            ),
            EscalationReason::Timeout => format!(
                "debate exceeded {}s budget with {} completed rounds",
                config.debate_timeout_secs,
                session.rounds.len()
            ),
        };

        session.transition(DebatePhase::Escalated, &detail)?;

        let priority_score = EscalationPriority::score(request.value_score, disagreement);
        let record = EscalationRecord {
            id: uuid::Uuid::new_v4().to_string(),
            offer_id: request.pair.offer_id().to_string(),
            demand_id: request.pair.demand_id().to_string(),
            reason,
            detail,
            priority: EscalationPriority::from_score(priority_score),
            priority_score,
            value_score: request.value_score,
            final_disagreement: disagreement,
            iterations: session.iteration,
            tokens_used: transcript_tokens(&session.rounds),
            transcript: session.rounds.clone(),
            created_at: Utc::now(),
        };

        info!(
            pair = %session.pair_key,
            %reason,
            priority = %record.priority,
            rounds = record.transcript.len(),
            "debate escalated"
        );
        Ok(DebateOutcome::Escalated(Box::new(record)))
    }
}

#[async_trait]
impl PairEvaluator for DebateEngine {
    async fn evaluate(&self, request: DebateRequest) -> DebateOutcome {
        self.run(&request).await
    }
}

fn transcript_tokens(rounds: &[DebateRound]) -> u64 {
    rounds
        .iter()
        .map(|r| r.advocate.usage.total() + r.skeptic.usage.total())
        .sum()
}

fn offer_view(offer: &OfferEntity) -> Value {
    json!({
        "id": offer.id,
        "name": offer.name,
        "strategies": offer.attributes.strategies,
        "size_millions": offer.attributes.size,
        "geographies": offer.attributes.geographies,
        "track_record": offer.attributes.track_record,
        "thesis": offer.thesis,
    })
}

fn demand_view(demand: &DemandEntity) -> Value {
    json!({
        "id": demand.id,
        "name": demand.name,
        "strategy_preferences": demand.attributes.strategy_preferences,
        "size_range_millions": demand.attributes.size_range,
        "geography_preferences": demand.attributes.geography_preferences,
        "exclusions": demand.attributes.exclusions,
        "mandate": demand.mandate,
    })
}
