//! Matchmaking engine
//!
//! Pairs offers (e.g. funds) with demands (e.g. allocators) in stages:
//!
//! - `pipeline`: cheap hard filter, attribute and ensemble scoring, top-N
//! - `debate`: an advocate and a skeptic model role argue each surviving
//!   pair until they converge, or the pair is escalated to human review
//! - `batch`: bounded, rate-limited, priority-ordered fan-out of debates
//! - `cache`: results keyed by entity with per-type version counters, so a
//!   mutation invalidates in O(1) per dependency type
//! - `scheduler`: full, incremental and single-entity recompute triggers
//!
//! # Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use matchmaking::{
//!     EngineConfig, EscalationLog, HttpModelClient, InMemoryEntitySource,
//! };
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run() -> matchmaking::EngineResult<()> {
//! let config = EngineConfig::load(None)?;
//! let client = Arc::new(HttpModelClient::new(config.model.endpoint.clone())?);
//! let scheduler = config.build_scheduler(
//!     client,
//!     Arc::new(InMemoryEntitySource::new()),
//!     Arc::new(EscalationLog::new()),
//!     None,
//! )?;
//! let run = scheduler.trigger_full(&CancellationToken::new()).await?;
//! println!("{}", run.report.summary());
//! # Ok(())
//! # }
//! ```

#![allow(clippy::uninlined_format_args)]

pub mod batch;
pub mod cache;
pub mod config;
pub mod debate;
pub mod entities;
pub mod error;
pub mod events;
pub mod model;
pub mod pipeline;
pub mod rate_limit;
pub mod scheduler;

// Re-export key configuration types
pub use config::{
    CacheBackendKind, CacheConfig, ConfigError, EngineConfig, ModelConfig, RateLimitConfig,
    RetryConfig,
};
pub use error::{EngineError, EngineResult};

// Re-export entity types
pub use entities::{
    is_valid_entity_id, pair_key, CandidatePair, DemandEntity, EntityId, EntityType, OfferEntity,
};

// Re-export model types
pub use model::{
    EndpointConfig, HttpModelClient, ModelClient, ModelError, ModelRequest, ModelResponse,
    ModelSettings, PromptRegistry, PromptTemplate, RetryPolicy, TokenUsage,
};

// Re-export cache types
pub use cache::{CacheBackend, CacheError, CacheStats, EntityCache, MemoryBackend};

// Re-export debate types
pub use debate::{
    DebateConfig, DebateEngine, DebateOutcome, DebatePhase, DebateRequest, DebateResult,
    EscalationLog, EscalationPriority, EscalationReason, EscalationRecord, EscalationSink,
    PairEvaluator, Recommendation,
};

// Re-export pipeline types
pub use pipeline::{
    EnsembleWeights, ExplanationStage, FilterConfig, HardFilter, MatchExplanation, MatchPipeline,
    ScoringConfig,
};

// Re-export batch and scheduling types
pub use batch::{BatchConfig, BatchError, BatchProcessor, BatchQueue, BatchReport, ItemError};
pub use rate_limit::{RateLimitError, RateLimiter};
pub use scheduler::{
    EntitySource, InMemoryEntitySource, SchedulePlan, Scheduler, SchedulerConfig, SchedulerError,
    SchedulerRun, Trigger,
};

// Re-export event types
pub use events::{EngineEvent, EventBus, EventFilter};
