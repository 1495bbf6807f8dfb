//! Escalation records for debates that need a human decision.
//!
//! The engine creates records and hands them to an [`EscalationSink`]. It
//! never resolves one.

use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::state::DebateRound;

/// Why a debate stopped without a usable result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationReason {
    /// Roles never converged within the iteration budget.
    Disagreement,
    /// Synthesis confidence fell below the floor.
    LowConfidence,
    /// The per-debate time budget ran out.
    Timeout,
}

impl std::fmt::Display for EscalationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disagreement => write!(f, "disagreement"),
            Self::LowConfidence => write!(f, "low_confidence"),
            Self::Timeout => write!(f, "timeout"),
        }
    }
}

/// Review priority for an escalation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationPriority {
    Low,
    Medium,
    High,
    Critical,
}

impl EscalationPriority {
    /// Priority score in `[0, 1]`: half from the caller's value score
    /// (0–100), half from disagreement saturating at 50 points.
    pub fn score(value_score: f64, disagreement: f64) -> f64 {
        let value = (value_score / 100.0).clamp(0.0, 1.0);
        let spread = (disagreement / 50.0).clamp(0.0, 1.0);
        0.5 * value + 0.5 * spread
    }

    pub fn from_score(score: f64) -> Self {
        if score >= 0.75 {
            Self::Critical
        } else if score >= 0.5 {
            Self::High
        } else if score >= 0.25 {
            Self::Medium
        } else {
            Self::Low
        }
    }
}

impl std::fmt::Display for EscalationPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

/// A debate awaiting human review, with its full transcript.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EscalationRecord {
    pub id: String,
    pub offer_id: String,
    pub demand_id: String,
    pub reason: EscalationReason,
    /// Human-readable explanation.
    pub detail: String,
    pub priority: EscalationPriority,
    pub priority_score: f64,
    pub value_score: f64,
    /// Disagreement of the last completed round (0 if none completed).
    pub final_disagreement: f64,
    pub iterations: u32,
    pub tokens_used: u64,
    pub transcript: Vec<DebateRound>,
    pub created_at: DateTime<Utc>,
}

impl EscalationRecord {
    pub fn pair_key(&self) -> String {
        crate::entities::pair_key(&self.offer_id, &self.demand_id)
    }
}

#[derive(Debug, Error)]
pub enum EscalationError {
    #[error("escalation sink I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("escalation serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("escalation sink unavailable: {0}")]
    Unavailable(String),
}

/// Destination for escalation records.
#[async_trait]
pub trait EscalationSink: Send + Sync {
    async fn submit(&self, record: EscalationRecord) -> Result<(), EscalationError>;
}

/// In-memory sink, newest last.
#[derive(Debug, Default)]
pub struct EscalationLog {
    records: Mutex<Vec<EscalationRecord>>,
}

impl EscalationLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<EscalationRecord> {
        self.records
            .lock()
            .map(|r| r.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }

    pub fn len(&self) -> usize {
        self.records().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Records ordered for review: highest priority first, oldest first
    /// within a priority.
    pub fn review_queue(&self) -> Vec<EscalationRecord> {
        let mut records = self.records();
        records.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then(a.created_at.cmp(&b.created_at))
        });
        records
    }
}

#[async_trait]
impl EscalationSink for EscalationLog {
    async fn submit(&self, record: EscalationRecord) -> Result<(), EscalationError> {
        self.records
            .lock()
            .map_err(|_| EscalationError::Unavailable("escalation log lock poisoned".into()))?
            .push(record);
        Ok(())
    }
}
