//! Batch execution of queued candidate pairs.
//!
//! [`BatchQueue`] orders pairs by priority, [`BatchProcessor`] fans them out
//! to a [`PairEvaluator`](crate::debate::PairEvaluator) under a concurrency
//! bound and the shared rate limiter, and [`BatchReport`] summarises the run.

pub mod processor;
pub mod queue;
pub mod report;

pub use processor::{
    BatchConfig, BatchError, BatchProcessor, EscalationMarker, DEBATE_RESULT_KEY,
    ESCALATION_MARKER_KEY, MAX_VALIDITY_DAYS,
};
pub use queue::{BatchQueue, QueuedPair};
pub use report::{BatchReport, ItemError};
