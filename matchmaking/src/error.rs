//! Crate-level error type.
//!
//! Each concern has its own error enum; [`EngineError`] wraps them for
//! callers that drive the whole engine.

use thiserror::Error;

use crate::batch::BatchError;
use crate::cache::CacheError;
use crate::config::ConfigError;
use crate::debate::{EscalationError, TransitionError};
use crate::model::ModelError;
use crate::rate_limit::RateLimitError;
use crate::scheduler::{SchedulerError, SourceError};

/// Result type alias for engine operations
pub type EngineResult<T> = Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    RateLimit(#[from] RateLimitError),

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error(transparent)]
    Escalation(#[from] EscalationError),

    #[error(transparent)]
    Batch(#[from] BatchError),

    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
}

impl EngineError {
    /// Machine-readable code for logs and monitoring.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Config(_) => "CONFIG_INVALID",
            Self::RateLimit(_) => "RATE_LIMIT_MISCONFIGURED",
            Self::Model(e) if e.is_retryable() => "MODEL_TRANSIENT",
            Self::Model(_) => "MODEL_FATAL",
            Self::Cache(_) | Self::Batch(BatchError::Cache(_)) => "CACHE_UNAVAILABLE",
            Self::Scheduler(SchedulerError::Cache(_))
            | Self::Scheduler(SchedulerError::Batch(BatchError::Cache(_))) => "CACHE_UNAVAILABLE",
            Self::Transition(_) => "INVALID_TRANSITION",
            Self::Escalation(_) => "ESCALATION_SINK",
            Self::Batch(_) => "BATCH_ABORTED",
            Self::Source(_) | Self::Scheduler(SchedulerError::Source(_)) => "SOURCE_UNAVAILABLE",
            Self::Scheduler(_) => "SCHEDULER",
        }
    }

    /// Whether retrying the same operation later could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self.code(), "MODEL_TRANSIENT" | "CACHE_UNAVAILABLE" | "SOURCE_UNAVAILABLE")
    }
}
