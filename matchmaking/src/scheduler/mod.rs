//! Decides what to debate.
//!
//! Three triggers share one path: gather candidate pairs, run them through
//! the [`MatchPipeline`], skip pairs whose cached result or escalation
//! marker is still live, and hand the rest to the [`BatchProcessor`].
//!
//! - full: all offers × all demands, invalidates nothing.
//! - incremental: changed offers × all demands plus all offers × changed
//!   demands, invalidates the changed entities first.
//! - entity: one entity × the opposite side, invalidates that entity first.

pub mod source;

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub use source::{ChangedEntities, EntitySource, InMemoryEntitySource, SourceError};

use crate::batch::{
    BatchError, BatchProcessor, BatchQueue, BatchReport, DEBATE_RESULT_KEY, ESCALATION_MARKER_KEY,
};
use crate::cache::{CacheError, EntityCache};
use crate::debate::DebateRequest;
use crate::entities::{CandidatePair, EntityType};
use crate::events::{EngineEvent, EventBus};
use crate::pipeline::{MatchPipeline, PreparedPairs};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Skip pairs that already have a live cached result or are awaiting
    /// human review.
    pub cache_aware: bool,
    /// Period of the background re-scan driven by [`Scheduler::run_periodic`].
    pub rescan_interval_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            cache_aware: true,
            rescan_interval_secs: 3_600,
        }
    }
}

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Batch(#[from] BatchError),

    #[error("cannot schedule by entity type {0}")]
    UnsupportedEntityType(EntityType),
}

/// What started a schedule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Trigger {
    Full,
    Incremental {
        since: DateTime<Utc>,
    },
    Entity {
        entity_type: EntityType,
        entity_id: String,
    },
}

impl std::fmt::Display for Trigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Full => write!(f, "full"),
            Self::Incremental { since } => write!(f, "incremental since {}", since.to_rfc3339()),
            Self::Entity {
                entity_type,
                entity_id,
            } => write!(f, "entity {}/{}", entity_type, entity_id),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedPair {
    pub pair: String,
    pub priority: f64,
}

/// Planning summary for one trigger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulePlan {
    pub trigger: Trigger,
    /// Pairs examined before filtering.
    pub universe: usize,
    /// Pairs dropped by the hard filter.
    pub filtered: usize,
    pub rejections: BTreeMap<String, usize>,
    /// Survivors skipped because a live result or escalation marker is
    /// cached.
    pub cache_hits: usize,
    /// The part of `cache_hits` skipped as awaiting human review.
    #[serde(default)]
    pub awaiting_review: usize,
    /// Cache entries invalidated while planning.
    pub invalidated: usize,
    /// Pairs handed to the batch processor, in dispatch order.
    pub enqueued: Vec<PlannedPair>,
    pub built_at: DateTime<Utc>,
}

/// A finished trigger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerRun {
    pub plan: SchedulePlan,
    pub report: BatchReport,
}

pub struct Scheduler {
    source: Arc<dyn EntitySource>,
    pipeline: MatchPipeline,
    processor: BatchProcessor,
    config: SchedulerConfig,
    events: Option<EventBus>,
}

impl Scheduler {
    pub fn new(
        source: Arc<dyn EntitySource>,
        pipeline: MatchPipeline,
        processor: BatchProcessor,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            source,
            pipeline,
            processor,
            config,
            events: None,
        }
    }

    pub fn with_events(mut self, bus: EventBus) -> Self {
        self.events = Some(bus);
        self
    }

    pub fn cache(&self) -> &Arc<EntityCache> {
        self.processor.cache()
    }

    pub fn pipeline(&self) -> &MatchPipeline {
        &self.pipeline
    }

    /// Recompute every eligible pair.
    pub async fn trigger_full(&self, cancel: &CancellationToken) -> Result<SchedulerRun, SchedulerError> {
        let (plan, queue) = self.plan_full().await?;
        self.execute(plan, queue, cancel).await
    }

    /// Recompute pairs touching entities changed after `since`.
    pub async fn trigger_incremental(
        &self,
        since: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Result<SchedulerRun, SchedulerError> {
        let (plan, queue) = self.plan_incremental(since).await?;
        self.execute(plan, queue, cancel).await
    }

    /// Invalidate one entity's results and recompute its pairs.
    pub async fn trigger_entity(
        &self,
        entity_type: EntityType,
        entity_id: &str,
        cancel: &CancellationToken,
    ) -> Result<SchedulerRun, SchedulerError> {
        let (plan, queue) = self.plan_entity(entity_type, entity_id).await?;
        self.execute(plan, queue, cancel).await
    }

    /// Hook for the entity mutation path, called after each committed
    /// create/update/delete. Bumps the type's version counter, then
    /// invalidates every entry keyed by the id.
    pub fn record_mutation(
        &self,
        entity_type: EntityType,
        entity_id: &str,
    ) -> Result<Option<u64>, SchedulerError> {
        let version = self.cache().bump_version(entity_type)?;
        self.cache()
            .invalidate(entity_type, entity_id, "entity mutated")?;
        Ok(version)
    }

    pub async fn plan_full(&self) -> Result<(SchedulePlan, BatchQueue), SchedulerError> {
        let offers = self.source.offers().await?;
        let demands = self.source.demands().await?;
        let prepared = self.pipeline.prepare(&offers, &demands);
        self.build_plan(Trigger::Full, prepared, 0)
    }

    pub async fn plan_incremental(
        &self,
        since: DateTime<Utc>,
    ) -> Result<(SchedulePlan, BatchQueue), SchedulerError> {
        let changed = self.source.changed_since(since).await?;
        let trigger = Trigger::Incremental { since };
        if changed.is_empty() {
            return self.build_plan(trigger, PreparedPairs::default(), 0);
        }

        // Changed records may not have gone through `record_mutation`.
        let reason = format!("changed since {}", since.to_rfc3339());
        let mut invalidated = 0;
        for offer in &changed.offers {
            invalidated += self.cache().invalidate(EntityType::Offer, &offer.id, &reason)?;
        }
        for demand in &changed.demands {
            invalidated += self.cache().invalidate(EntityType::Demand, &demand.id, &reason)?;
        }

        let offers = self.source.offers().await?;
        let demands = self.source.demands().await?;
        let mut seen = HashSet::new();
        let mut candidates = Vec::new();
        let changed_offers = changed.offers.iter().flat_map(|o| {
            demands
                .iter()
                .map(move |d| CandidatePair::new(Arc::clone(o), Arc::clone(d)))
        });
        let changed_demands = changed.demands.iter().flat_map(|d| {
            offers
                .iter()
                .map(move |o| CandidatePair::new(Arc::clone(o), Arc::clone(d)))
        });
        for pair in changed_offers.chain(changed_demands) {
            if seen.insert(pair.key()) {
                candidates.push(pair);
            }
        }

        let prepared = self.pipeline.prepare_candidates(candidates);
        self.build_plan(trigger, prepared, invalidated)
    }

    pub async fn plan_entity(
        &self,
        entity_type: EntityType,
        entity_id: &str,
    ) -> Result<(SchedulePlan, BatchQueue), SchedulerError> {
        let trigger = Trigger::Entity {
            entity_type,
            entity_id: entity_id.to_string(),
        };
        if entity_type == EntityType::Pair {
            return Err(SchedulerError::UnsupportedEntityType(entity_type));
        }

        let invalidated = self
            .cache()
            .invalidate(entity_type, entity_id, "entity trigger")?;

        let prepared = match entity_type {
            EntityType::Offer => match self.source.offer(entity_id).await? {
                Some(offer) => {
                    let demands = self.source.demands().await?;
                    self.pipeline.prepare(&[offer], &demands)
                }
                None => PreparedPairs::default(),
            },
            _ => match self.source.demand(entity_id).await? {
                Some(demand) => {
                    let offers = self.source.offers().await?;
                    self.pipeline.prepare(&offers, &[demand])
                }
                None => PreparedPairs::default(),
            },
        };
        if prepared.universe == 0 {
            info!(%entity_type, entity_id, invalidated, "entity not found or nothing opposite; only invalidated");
        }
        self.build_plan(trigger, prepared, invalidated)
    }

    /// Re-scan on a fixed period until cancelled.
    ///
    /// The first tick recomputes everything; later ticks are incremental
    /// from the start of the previous one. A source outage skips the tick.
    /// Returns how many ticks ran.
    pub async fn run_periodic(&self, cancel: &CancellationToken) -> Result<usize, SchedulerError> {
        let mut ticker =
            tokio::time::interval(Duration::from_secs(self.config.rescan_interval_secs.max(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last_start: Option<DateTime<Utc>> = None;
        let mut ticks = 0;

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(ticks),
                _ = ticker.tick() => {}
            }

            let started = Utc::now();
            let result = match last_start {
                None => self.trigger_full(cancel).await,
                Some(since) => self.trigger_incremental(since, cancel).await,
            };
            ticks += 1;
            match result {
                Ok(run) => {
                    last_start = Some(started);
                    info!(trigger = %run.plan.trigger, summary = %run.report.summary(), "periodic rescan finished");
                }
                Err(SchedulerError::Source(e)) => {
                    warn!(error = %e, "periodic rescan skipped");
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn build_plan(
        &self,
        trigger: Trigger,
        prepared: PreparedPairs,
        invalidated: usize,
    ) -> Result<(SchedulePlan, BatchQueue), SchedulerError> {
        let mut queue = BatchQueue::new();
        let mut enqueued = Vec::new();
        let mut cache_hits = 0;
        let mut awaiting_review = 0;
        let filtered = prepared.filtered();

        for scored in prepared.ranked {
            let key = scored.pair.key();
            if self.config.cache_aware {
                let cache = self.cache();
                if cache.is_live(EntityType::Pair, &key, DEBATE_RESULT_KEY)? {
                    cache_hits += 1;
                    continue;
                }
                if cache.is_live(EntityType::Pair, &key, ESCALATION_MARKER_KEY)? {
                    cache_hits += 1;
                    awaiting_review += 1;
                    continue;
                }
            }
            enqueued.push(PlannedPair {
                pair: key,
                priority: scored.preliminary_score,
            });
            queue.enqueue_request(
                DebateRequest {
                    pair: scored.pair,
                    preliminary_score: scored.preliminary_score,
                    value_score: scored.preliminary_score,
                },
                scored.preliminary_score,
            );
        }

        let plan = SchedulePlan {
            trigger,
            universe: prepared.universe,
            filtered,
            rejections: prepared
                .rejections
                .into_iter()
                .map(|(rule, n)| (rule.to_string(), n))
                .collect(),
            cache_hits,
            awaiting_review,
            invalidated,
            enqueued,
            built_at: Utc::now(),
        };

        info!(
            trigger = %plan.trigger,
            universe = plan.universe,
            filtered = plan.filtered,
            cache_hits = plan.cache_hits,
            awaiting_review = plan.awaiting_review,
            invalidated = plan.invalidated,
            enqueued = plan.enqueued.len(),
            "schedule built"
        );
        if let Some(bus) = &self.events {
            bus.publish(EngineEvent::ScheduleBuilt {
                trigger: plan.trigger.to_string(),
                universe: plan.universe,
                filtered: plan.filtered,
                cache_hits: plan.cache_hits,
                enqueued: plan.enqueued.len(),
                timestamp: plan.built_at,
            });
        }
        Ok((plan, queue))
    }

    async fn execute(
        &self,
        plan: SchedulePlan,
        queue: BatchQueue,
        cancel: &CancellationToken,
    ) -> Result<SchedulerRun, SchedulerError> {
        let report = self.processor.process(queue, cancel).await?;
        Ok(SchedulerRun { plan, report })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::BatchConfig;
    use crate::debate::{DebateOutcome, DebateResult, EscalationLog, PairEvaluator, Recommendation};
    use crate::entities::fixtures::{demand, offer};
    use crate::pipeline::{FilterConfig, ScoringConfig};
    use crate::rate_limit::RateLimiter;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recording {
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl PairEvaluator for Recording {
        async fn evaluate(&self, request: DebateRequest) -> DebateOutcome {
            self.seen.lock().unwrap().push(request.pair.key());
            DebateOutcome::Complete(Box::new(DebateResult {
                id: "r".into(),
                offer_id: request.pair.offer_id().into(),
                demand_id: request.pair.demand_id().into(),
                score: 70.0,
                confidence: 0.9,
                recommendation: Recommendation::Investigate,
                disagreements: vec![],
                talking_points: vec![],
                concerns: vec![],
                hard_exclusion: None,
                iterations: 1,
                final_disagreement: 0.0,
                advocate_reasoning: String::new(),
                skeptic_reasoning: String::new(),
                preliminary_score: request.preliminary_score,
                tokens_used: 10,
                transcript: vec![],
                completed_at: Utc::now(),
            }))
        }
    }

    impl Recording {
        fn take(&self) -> Vec<String> {
            let mut seen = std::mem::take(&mut *self.seen.lock().unwrap());
            seen.sort();
            seen
        }
    }

    fn scheduler(source: Arc<InMemoryEntitySource>) -> (Scheduler, Arc<Recording>) {
        let evaluator = Arc::new(Recording::default());
        let processor = BatchProcessor::new(
            Arc::clone(&evaluator) as Arc<dyn PairEvaluator>,
            Arc::new(RateLimiter::per_minute(10_000).unwrap()),
            Arc::new(EntityCache::in_memory()),
            Arc::new(EscalationLog::new()),
            BatchConfig::default(),
        )
        .unwrap();
        let scheduler = Scheduler::new(
            source,
            MatchPipeline::new(FilterConfig::default(), ScoringConfig::default()),
            processor,
            SchedulerConfig::default(),
        );
        (scheduler, evaluator)
    }

    fn source() -> Arc<InMemoryEntitySource> {
        Arc::new(InMemoryEntitySource::with_entities(
            vec![
                offer("f1", &["growth"], &["us"], 100.0),
                offer("f2", &["growth"], &["eu"], 100.0),
                offer("f3", &["venture"], &["us"], 100.0),
            ],
            vec![
                demand("a1", &["growth"], &["us", "eu"], None),
                demand("a2", &["venture"], &["us"], None),
            ],
        ))
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_then_warm_cache() {
        let (scheduler, evaluator) = scheduler(source());
        let cancel = CancellationToken::new();

        let first = scheduler.trigger_full(&cancel).await.unwrap();
        assert_eq!(first.plan.universe, 6);
        assert_eq!(first.plan.filtered, 3);
        assert_eq!(first.plan.enqueued.len(), 3);
        assert_eq!(first.report.processed, 3);
        assert_eq!(evaluator.take(), vec!["f1:a1", "f2:a1", "f3:a2"]);

        let second = scheduler.trigger_full(&cancel).await.unwrap();
        assert_eq!(second.plan.cache_hits, 3);
        assert!(second.plan.enqueued.is_empty());
        assert!(evaluator.take().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_entity_trigger_recomputes_only_that_entity() {
        let (scheduler, evaluator) = scheduler(source());
        let cancel = CancellationToken::new();
        scheduler.trigger_full(&cancel).await.unwrap();
        evaluator.take();

        let run = scheduler
            .trigger_entity(EntityType::Demand, "a1", &cancel)
            .await
            .unwrap();
        assert_eq!(run.plan.invalidated, 2);
        assert_eq!(run.plan.universe, 3);
        assert_eq!(evaluator.take(), vec!["f1:a1", "f2:a1"]);
        assert!(scheduler
            .cache()
            .is_live(EntityType::Pair, "f3:a2", DEBATE_RESULT_KEY)
            .unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_entity_trigger_for_missing_entity_only_invalidates() {
        let source = source();
        let (scheduler, evaluator) = scheduler(Arc::clone(&source));
        let cancel = CancellationToken::new();
        scheduler.trigger_full(&cancel).await.unwrap();
        evaluator.take();

        source.remove_offer("f1").await;
        let run = scheduler
            .trigger_entity(EntityType::Offer, "f1", &cancel)
            .await
            .unwrap();
        assert_eq!(run.plan.invalidated, 1);
        assert_eq!(run.plan.universe, 0);
        assert!(evaluator.take().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_pair_entity_type_rejected() {
        let (scheduler, _) = scheduler(source());
        let err = scheduler
            .trigger_entity(EntityType::Pair, "f1:a1", &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, SchedulerError::UnsupportedEntityType(EntityType::Pair)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_incremental_skips_unrelated_pairs() {
        let source = source();
        let (scheduler, evaluator) = scheduler(Arc::clone(&source));
        let cancel = CancellationToken::new();
        scheduler.trigger_full(&cancel).await.unwrap();
        evaluator.take();

        let since = Utc::now();
        let mut updated = offer("f2", &["growth"], &["eu"], 120.0);
        updated.updated_at = since + chrono::Duration::seconds(5);
        source.upsert_offer(updated).await;

        let run = scheduler.trigger_incremental(since, &cancel).await.unwrap();
        assert_eq!(run.plan.universe, 2);
        assert_eq!(run.plan.invalidated, 1);
        assert_eq!(evaluator.take(), vec!["f2:a1"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_record_mutation_bumps_and_invalidates() {
        let (scheduler, evaluator) = scheduler(source());
        let cancel = CancellationToken::new();
        scheduler.trigger_full(&cancel).await.unwrap();
        evaluator.take();

        let before = scheduler.cache().versions().current(EntityType::Offer);
        let version = scheduler.record_mutation(EntityType::Offer, "f1").unwrap();
        assert_eq!(version, Some(before + 1));

        // Every pair depended on the offer version, so all recompute.
        let run = scheduler.trigger_full(&cancel).await.unwrap();
        assert_eq!(run.plan.cache_hits, 0);
        assert_eq!(evaluator.take().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_periodic_full_then_incremental() {
        let (scheduler, evaluator) = scheduler(source());
        let cancel = CancellationToken::new();
        let stop = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(3_600 * 2 + 60)).await;
            stop.cancel();
        });

        let ticks = scheduler.run_periodic(&cancel).await.unwrap();
        assert_eq!(ticks, 3);
        // Only the first, full tick had anything to do.
        assert_eq!(evaluator.take().len(), 3);
    }
}
