//! Engine event types
//!
//! Published on the [`EventBus`](super::EventBus) so a long-running batch is
//! observable while it runs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::debate::{EscalationPriority, EscalationReason, Recommendation};
use crate::entities::EntityType;

/// Identifier of one `BatchProcessor::process` call
pub type BatchId = String;

/// Everything the engine reports while it runs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    /// A scheduler trigger finished planning
    ScheduleBuilt {
        trigger: String,
        universe: usize,
        filtered: usize,
        cache_hits: usize,
        enqueued: usize,
        timestamp: DateTime<Utc>,
    },

    /// A batch began dispatching
    BatchStarted {
        batch_id: BatchId,
        total: usize,
        timestamp: DateTime<Utc>,
    },

    /// A pair was handed to the debate engine
    ItemDispatched {
        batch_id: BatchId,
        pair: String,
        priority: f64,
        attempt: u32,
        timestamp: DateTime<Utc>,
    },

    /// A debate completed and its result was cached
    ItemCompleted {
        batch_id: BatchId,
        pair: String,
        score: f64,
        recommendation: Recommendation,
        iterations: u32,
        timestamp: DateTime<Utc>,
    },

    /// A debate escalated to human review
    ItemEscalated {
        batch_id: BatchId,
        pair: String,
        reason: EscalationReason,
        priority: EscalationPriority,
        timestamp: DateTime<Utc>,
    },

    /// A debate attempt failed; `permanent` once item retries are spent
    ItemFailed {
        batch_id: BatchId,
        pair: String,
        error: String,
        attempt: u32,
        permanent: bool,
        timestamp: DateTime<Utc>,
    },

    /// Running counters after each finished item
    Progress {
        batch_id: BatchId,
        done: usize,
        total: usize,
        processed: usize,
        failed: usize,
        escalated: usize,
        timestamp: DateTime<Utc>,
    },

    /// Cancellation stopped dispatch; in-flight items still finish
    BatchCancelled {
        batch_id: BatchId,
        undispatched: usize,
        timestamp: DateTime<Utc>,
    },

    /// A cache write failure stopped the batch; no report is returned
    BatchAborted {
        batch_id: BatchId,
        error: String,
        processed: usize,
        failed: usize,
        escalated: usize,
        undispatched: usize,
        timestamp: DateTime<Utc>,
    },

    /// A batch finished
    BatchFinished {
        batch_id: BatchId,
        processed: usize,
        failed: usize,
        escalated: usize,
        tokens_used: u64,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// Cache entries were invalidated for an entity
    CacheInvalidated {
        entity_type: EntityType,
        entity_id: String,
        entries: usize,
        reason: String,
        timestamp: DateTime<Utc>,
    },
}

impl EngineEvent {
    /// Short event name for logs and filtering
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::ScheduleBuilt { .. } => "schedule_built",
            Self::BatchStarted { .. } => "batch_started",
            Self::ItemDispatched { .. } => "item_dispatched",
            Self::ItemCompleted { .. } => "item_completed",
            Self::ItemEscalated { .. } => "item_escalated",
            Self::ItemFailed { .. } => "item_failed",
            Self::Progress { .. } => "progress",
            Self::BatchCancelled { .. } => "batch_cancelled",
            Self::BatchAborted { .. } => "batch_aborted",
            Self::BatchFinished { .. } => "batch_finished",
            Self::CacheInvalidated { .. } => "cache_invalidated",
        }
    }

    /// Batch this event belongs to, if any
    pub fn batch_id(&self) -> Option<&str> {
        match self {
            Self::BatchStarted { batch_id, .. }
            | Self::ItemDispatched { batch_id, .. }
            | Self::ItemCompleted { batch_id, .. }
            | Self::ItemEscalated { batch_id, .. }
            | Self::ItemFailed { batch_id, .. }
            | Self::Progress { batch_id, .. }
            | Self::BatchCancelled { batch_id, .. }
            | Self::BatchAborted { batch_id, .. }
            | Self::BatchFinished { batch_id, .. } => Some(batch_id),
            Self::ScheduleBuilt { .. } | Self::CacheInvalidated { .. } => None,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::ScheduleBuilt { timestamp, .. }
            | Self::BatchStarted { timestamp, .. }
            | Self::ItemDispatched { timestamp, .. }
            | Self::ItemCompleted { timestamp, .. }
            | Self::ItemEscalated { timestamp, .. }
            | Self::ItemFailed { timestamp, .. }
            | Self::Progress { timestamp, .. }
            | Self::BatchCancelled { timestamp, .. }
            | Self::BatchAborted { timestamp, .. }
            | Self::BatchFinished { timestamp, .. }
            | Self::CacheInvalidated { timestamp, .. } => *timestamp,
        }
    }
}
