//! Bounded, rate-limited, priority-ordered debate fan-out.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::queue::{BatchQueue, QueuedPair};
use super::report::{BatchReport, ItemError};
use crate::cache::{CacheError, EntityCache};
use crate::debate::{
    DebateOutcome, DebateRequest, EscalationPriority, EscalationReason, EscalationSink,
    PairEvaluator, Recommendation,
};
use crate::entities::EntityType;
use crate::events::{EngineEvent, EventBus};
use crate::model::RetryPolicy;
use crate::rate_limit::RateLimiter;

/// Longest accepted result validity window.
pub const MAX_VALIDITY_DAYS: i64 = 36_500;

/// Cache key under which a completed debate result is stored.
pub const DEBATE_RESULT_KEY: &str = "debate";

/// Cache key marking a pair handed to human review. Shares the result's
/// versions and validity window, so an entity change reopens the pair.
pub const ESCALATION_MARKER_KEY: &str = "escalation";

/// Value stored under [`ESCALATION_MARKER_KEY`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EscalationMarker {
    pub escalation_id: String,
    pub reason: EscalationReason,
    pub escalated_at: chrono::DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Upper bound on debates in flight.
    pub max_concurrent: usize,
    /// Extra attempts for a pair whose debate ends in `Failed`.
    pub item_retries: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    /// How long a cached result stays valid.
    pub validity_days: i64,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 10,
            item_retries: 2,
            retry_base_delay_ms: 2_000,
            retry_max_delay_ms: 30_000,
            validity_days: 90,
        }
    }
}

impl BatchConfig {
    fn item_backoff(&self) -> RetryPolicy {
        RetryPolicy {
            base_delay_ms: self.retry_base_delay_ms,
            max_delay_ms: self.retry_max_delay_ms,
            max_attempts: self.item_retries + 1,
        }
    }

    /// Validity window of a cached result, `1..=MAX_VALIDITY_DAYS` days.
    pub fn validity(&self) -> Result<chrono::Duration, BatchError> {
        if !(1..=MAX_VALIDITY_DAYS).contains(&self.validity_days) {
            return Err(BatchError::InvalidValidity(self.validity_days));
        }
        chrono::Duration::try_days(self.validity_days)
            .ok_or(BatchError::InvalidValidity(self.validity_days))
    }
}

/// Conditions that abort a whole batch. Item failures never do.
#[derive(Debug, Error)]
pub enum BatchError {
    #[error("cache store unreachable: {0}")]
    Cache(#[from] CacheError),

    #[error("concurrency limit must be at least 1")]
    ZeroConcurrency,

    #[error("validity window of {0} days is outside 1..=36500")]
    InvalidValidity(i64),

    #[error("dispatch semaphore closed")]
    SemaphoreClosed,
}

/// Terminal state of one queued pair.
#[derive(Debug)]
enum ItemOutcome {
    Completed {
        tokens: u64,
    },
    Escalated {
        tokens: u64,
    },
    Failed {
        error: ItemError,
        tokens: u64,
    },
}

/// Everything a spawned item needs, cloned per task.
#[derive(Clone)]
struct ItemContext {
    batch_id: String,
    evaluator: Arc<dyn PairEvaluator>,
    limiter: Arc<RateLimiter>,
    cache: Arc<EntityCache>,
    escalations: Arc<dyn EscalationSink>,
    events: Option<EventBus>,
    backoff: RetryPolicy,
    validity: chrono::Duration,
    cancel: CancellationToken,
}

impl ItemContext {
    fn publish(&self, event: EngineEvent) {
        if let Some(bus) = &self.events {
            bus.publish(event);
        }
    }

    /// Run one pair to a terminal state. The first attempt's rate-limit
    /// token was taken by the dispatcher.
    async fn run(self, request: DebateRequest, priority: f64) -> Result<ItemOutcome, BatchError> {
        let key = request.pair.key();
        let max_attempts = self.backoff.max_attempts.max(1);
        let mut tokens = 0u64;
        let mut attempt = 1u32;

        loop {
            let outcome = self.evaluator.evaluate(request.clone()).await;
            tokens += outcome.tokens_used();

            match outcome {
                DebateOutcome::Complete(result) => {
                    self.cache.set_typed(
                        EntityType::Pair,
                        &key,
                        DEBATE_RESULT_KEY,
                        result.as_ref(),
                        self.cache.current_versions(),
                        Some(self.validity),
                    )?;
                    info!(
                        pair = %key,
                        score = result.score,
                        recommendation = %result.recommendation,
                        iterations = result.iterations,
                        "debate complete"
                    );
                    self.completed(&key, result.score, result.recommendation, result.iterations);
                    return Ok(ItemOutcome::Completed { tokens });
                }
                DebateOutcome::Escalated(record) => {
                    let (reason, level) = (record.reason, record.priority);
                    let marker = EscalationMarker {
                        escalation_id: record.id.clone(),
                        reason,
                        escalated_at: record.created_at,
                    };
                    return match self.escalations.submit(*record).await {
                        Ok(()) => {
                            self.cache.set_typed(
                                EntityType::Pair,
                                &key,
                                ESCALATION_MARKER_KEY,
                                &marker,
                                self.cache.current_versions(),
                                Some(self.validity),
                            )?;
                            info!(pair = %key, %reason, priority = %level, "debate escalated");
                            self.escalated(&key, reason, level);
                            Ok(ItemOutcome::Escalated { tokens })
                        }
                        Err(e) => {
                            warn!(pair = %key, error = %e, "escalation sink rejected record");
                            let error = ItemError {
                                pair: key.clone(),
                                kind: "escalation_sink".into(),
                                message: e.to_string(),
                                attempts: attempt,
                            };
                            self.failed(&key, &error.message, attempt, true);
                            Ok(ItemOutcome::Failed { error, tokens })
                        }
                    };
                }
                DebateOutcome::Failed(failure) => {
                    let message = failure.error.to_string();
                    let permanent = attempt >= max_attempts || self.cancel.is_cancelled();
                    self.failed(&key, &message, attempt, permanent);

                    if permanent {
                        warn!(pair = %key, attempt, error = %message, "debate failed permanently");
                        return Ok(ItemOutcome::Failed {
                            error: ItemError {
                                pair: key,
                                kind: failure.error.kind().to_string(),
                                message,
                                attempts: attempt,
                            },
                            tokens,
                        });
                    }

                    let delay = self.backoff.delay_after(attempt);
                    warn!(pair = %key, attempt, ?delay, error = %message, "debate failed, retrying pair");
                    tokio::time::sleep(delay).await;
                    self.limiter.acquire().await;
                    attempt += 1;
                    self.publish(EngineEvent::ItemDispatched {
                        batch_id: self.batch_id.clone(),
                        pair: key.clone(),
                        priority,
                        attempt,
                        timestamp: Utc::now(),
                    });
                }
            }
        }
    }

    fn completed(&self, key: &str, score: f64, recommendation: Recommendation, iterations: u32) {
        self.publish(EngineEvent::ItemCompleted {
            batch_id: self.batch_id.clone(),
            pair: key.to_string(),
            score,
            recommendation,
            iterations,
            timestamp: Utc::now(),
        });
    }

    fn escalated(&self, key: &str, reason: EscalationReason, priority: EscalationPriority) {
        self.publish(EngineEvent::ItemEscalated {
            batch_id: self.batch_id.clone(),
            pair: key.to_string(),
            reason,
            priority,
            timestamp: Utc::now(),
        });
    }

    fn failed(&self, key: &str, error: &str, attempt: u32, permanent: bool) {
        self.publish(EngineEvent::ItemFailed {
            batch_id: self.batch_id.clone(),
            pair: key.to_string(),
            error: error.to_string(),
            attempt,
            permanent,
            timestamp: Utc::now(),
        });
    }
}

/// Drives queued pairs through a [`PairEvaluator`].
///
/// Dispatch follows queue priority. A slot is claimed before the rate
/// limiter is consulted, so when slots are scarce the highest remaining
/// priority always goes next.
pub struct BatchProcessor {
    evaluator: Arc<dyn PairEvaluator>,
    limiter: Arc<RateLimiter>,
    cache: Arc<EntityCache>,
    escalations: Arc<dyn EscalationSink>,
    events: Option<EventBus>,
    config: BatchConfig,
    validity: chrono::Duration,
}

impl BatchProcessor {
    pub fn new(
        evaluator: Arc<dyn PairEvaluator>,
        limiter: Arc<RateLimiter>,
        cache: Arc<EntityCache>,
        escalations: Arc<dyn EscalationSink>,
        config: BatchConfig,
    ) -> Result<Self, BatchError> {
        if config.max_concurrent == 0 {
            return Err(BatchError::ZeroConcurrency);
        }
        let validity = config.validity()?;
        Ok(Self {
            evaluator,
            limiter,
            cache,
            escalations,
            events: None,
            config,
            validity,
        })
    }

    pub fn with_events(mut self, bus: EventBus) -> Self {
        self.events = Some(bus);
        self
    }

    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<EntityCache> {
        &self.cache
    }

    fn publish(&self, event: EngineEvent) {
        if let Some(bus) = &self.events {
            bus.publish(event);
        }
    }

    /// Process every queued pair.
    ///
    /// Returns a report even when items fail. Cancelling `cancel` stops
    /// dispatch; debates already in flight run to completion. Only a cache
    /// write failure aborts the batch.
    pub async fn process(
        &self,
        queue: BatchQueue,
        cancel: &CancellationToken,
    ) -> Result<BatchReport, BatchError> {
        let started = Instant::now();
        let batch_id = uuid::Uuid::new_v4().to_string();
        let items = queue.into_dispatch_order();
        let total = items.len();
        let mut report = BatchReport::new(&batch_id);

        info!(batch_id = %batch_id, total, max_concurrent = self.config.max_concurrent, "batch started");
        self.publish(EngineEvent::BatchStarted {
            batch_id: batch_id.clone(),
            total,
            timestamp: Utc::now(),
        });

        let ctx = ItemContext {
            batch_id: batch_id.clone(),
            evaluator: Arc::clone(&self.evaluator),
            limiter: Arc::clone(&self.limiter),
            cache: Arc::clone(&self.cache),
            escalations: Arc::clone(&self.escalations),
            events: self.events.clone(),
            backoff: self.config.item_backoff(),
            validity: self.validity,
            cancel: cancel.clone(),
        };

        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent));
        let mut join_set: JoinSet<Result<ItemOutcome, BatchError>> = JoinSet::new();
        let mut pending = items.into_iter().peekable();
        let mut fatal: Option<BatchError> = None;

        while pending.peek().is_some() {
            if fatal.is_some() {
                break;
            }
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    report.cancelled = true;
                    break;
                }
                Some(joined) = join_set.join_next(), if !join_set.is_empty() => {
                    if let Err(e) = self.absorb(joined, &mut report, total) {
                        fatal.get_or_insert(e);
                    }
                }
                permit = Arc::clone(&semaphore).acquire_owned() => {
                    let permit = permit.map_err(|_| BatchError::SemaphoreClosed)?;
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => {
                            report.cancelled = true;
                            break;
                        }
                        _ = self.limiter.acquire() => {}
                    }
                    let Some(QueuedPair { request, priority, .. }) = pending.next() else {
                        break;
                    };
                    let key = request.pair.key();
                    debug!(batch_id = %batch_id, pair = %key, priority, "dispatching pair");
                    self.publish(EngineEvent::ItemDispatched {
                        batch_id: batch_id.clone(),
                        pair: key,
                        priority,
                        attempt: 1,
                        timestamp: Utc::now(),
                    });
                    let ctx = ctx.clone();
                    join_set.spawn(async move {
                        let _permit = permit;
                        ctx.run(request, priority).await
                    });
                }
            }
        }

        report.skipped = pending.count();
        if report.cancelled {
            info!(batch_id = %batch_id, undispatched = report.skipped, "batch cancelled, draining in-flight debates");
            self.publish(EngineEvent::BatchCancelled {
                batch_id: batch_id.clone(),
                undispatched: report.skipped,
                timestamp: Utc::now(),
            });
        }

        while let Some(joined) = join_set.join_next().await {
            if let Err(e) = self.absorb(joined, &mut report, total) {
                fatal.get_or_insert(e);
            }
        }

        report.duration_ms = started.elapsed().as_millis() as u64;
        report.finished_at = Some(Utc::now());

        if let Some(e) = fatal {
            warn!(
                batch_id = %batch_id,
                error = %e,
                undispatched = report.skipped,
                summary = %report.summary(),
                "batch aborted"
            );
            self.publish(EngineEvent::BatchAborted {
                batch_id,
                error: e.to_string(),
                processed: report.processed,
                failed: report.failed,
                escalated: report.escalated,
                undispatched: report.skipped,
                timestamp: Utc::now(),
            });
            return Err(e);
        }

        info!(batch_id = %batch_id, summary = %report.summary(), "batch finished");
        self.publish(EngineEvent::BatchFinished {
            batch_id,
            processed: report.processed,
            failed: report.failed,
            escalated: report.escalated,
            tokens_used: report.tokens_used,
            duration_ms: report.duration_ms,
            timestamp: Utc::now(),
        });
        Ok(report)
    }

    /// Fold one finished task into the report and publish progress.
    fn absorb(
        &self,
        joined: Result<Result<ItemOutcome, BatchError>, tokio::task::JoinError>,
        report: &mut BatchReport,
        total: usize,
    ) -> Result<(), BatchError> {
        match joined {
            Ok(Ok(ItemOutcome::Completed { tokens })) => {
                report.processed += 1;
                report.tokens_used += tokens;
            }
            Ok(Ok(ItemOutcome::Escalated { tokens })) => {
                report.escalated += 1;
                report.tokens_used += tokens;
            }
            Ok(Ok(ItemOutcome::Failed { error, tokens })) => {
                report.failed += 1;
                report.tokens_used += tokens;
                report.errors.push(error);
            }
            Ok(Err(e)) => return Err(e),
            Err(e) => {
                warn!(batch_id = %report.batch_id, error = %e, "debate task aborted");
                report.failed += 1;
                report.errors.push(ItemError {
                    pair: "unknown".into(),
                    kind: "panic".into(),
                    message: e.to_string(),
                    attempts: 1,
                });
            }
        }

        self.publish(EngineEvent::Progress {
            batch_id: report.batch_id.clone(),
            done: report.finished_items(),
            total,
            processed: report.processed,
            failed: report.failed,
            escalated: report.escalated,
            timestamp: Utc::now(),
        });
        Ok(())
    }
}
