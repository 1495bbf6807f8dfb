//! Batch outcome summary.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Why one item did not produce a result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemError {
    pub pair: String,
    /// Machine-readable class, e.g. `fatal`, `timeout`, `escalation_sink`.
    pub kind: String,
    pub message: String,
    pub attempts: u32,
}

/// Always produced, even when items fail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchReport {
    pub batch_id: String,
    /// Items that completed and were cached.
    pub processed: usize,
    /// Items that permanently failed.
    pub failed: usize,
    /// Items handed to human review.
    pub escalated: usize,
    /// Items never dispatched because the batch was cancelled.
    pub skipped: usize,
    pub cancelled: bool,
    pub tokens_used: u64,
    pub duration_ms: u64,
    pub errors: Vec<ItemError>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl BatchReport {
    pub fn new(batch_id: &str) -> Self {
        Self {
            batch_id: batch_id.to_string(),
            processed: 0,
            failed: 0,
            escalated: 0,
            skipped: 0,
            cancelled: false,
            tokens_used: 0,
            duration_ms: 0,
            errors: Vec::new(),
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    /// Items that reached a terminal state.
    pub fn finished_items(&self) -> usize {
        self.processed + self.failed + self.escalated
    }

    pub fn is_clean(&self) -> bool {
        self.failed == 0 && !self.cancelled
    }

    pub fn summary(&self) -> String {
        format!(
            "{} processed, {} escalated, {} failed, {} skipped, {} tokens in {}ms",
            self.processed,
            self.escalated,
            self.failed,
            self.skipped,
            self.tokens_used,
            self.duration_ms
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_and_counts() {
        let mut report = BatchReport::new("b1");
        report.processed = 3;
        report.escalated = 1;
        report.failed = 1;
        report.errors.push(ItemError {
            pair: "f1:a1".into(),
            kind: "fatal".into(),
            message: "401".into(),
            attempts: 3,
        });
        assert_eq!(report.finished_items(), 5);
        assert!(!report.is_clean());
        assert!(report.summary().starts_with("3 processed, 1 escalated, 1 failed"));
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["errors"][0]["kind"], "fatal");
    }
}
