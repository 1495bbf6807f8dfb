//! Run telemetry for the matchmaking runner.
//!
//! Two outputs:
//! - tracing to stderr, filtered by `RUST_LOG` (default `info`)
//! - an append-only JSONL run log, one [`RunRecord`] per scheduler run

use std::path::Path;

use chrono::{DateTime, Utc};
use matchmaking::{EngineEvent, EventBus, SchedulerRun};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Install the global tracing subscriber.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();
}

/// One scheduler run, flattened for the run log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub batch_id: String,
    pub trigger: String,
    pub universe: usize,
    pub filtered: usize,
    pub cache_hits: usize,
    pub invalidated: usize,
    pub enqueued: usize,
    pub processed: usize,
    pub escalated: usize,
    pub failed: usize,
    pub skipped: usize,
    pub cancelled: bool,
    pub tokens_used: u64,
    pub duration_ms: u64,
    pub recorded_at: DateTime<Utc>,
}

impl RunRecord {
    pub fn from_run(run: &SchedulerRun) -> Self {
        let (plan, report) = (&run.plan, &run.report);
        Self {
            batch_id: report.batch_id.clone(),
            trigger: plan.trigger.to_string(),
            universe: plan.universe,
            filtered: plan.filtered,
            cache_hits: plan.cache_hits,
            invalidated: plan.invalidated,
            enqueued: plan.enqueued.len(),
            processed: report.processed,
            escalated: report.escalated,
            failed: report.failed,
            skipped: report.skipped,
            cancelled: report.cancelled,
            tokens_used: report.tokens_used,
            duration_ms: report.duration_ms,
            recorded_at: Utc::now(),
        }
    }
}

/// Append a record to the JSONL run log. Failures are logged, never fatal.
pub fn append_run_log(record: &RunRecord, path: &Path) {
    match serde_json::to_string(record) {
        Ok(json) => {
            use std::io::Write;
            match std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
            {
                Ok(mut file) => {
                    if let Err(e) = writeln!(file, "{json}") {
                        warn!("Failed to append run log: {e}");
                    } else {
                        info!(path = %path.display(), "Appended run record");
                    }
                }
                Err(e) => warn!("Failed to open run log: {e}"),
            }
        }
        Err(e) => warn!("Failed to serialize run record: {e}"),
    }
}

/// Totals across every run in a log.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunTotals {
    pub runs: usize,
    pub processed: usize,
    pub escalated: usize,
    pub failed: usize,
    pub cache_hits: usize,
    pub tokens_used: u64,
    /// Share of planned pairs answered from cache.
    pub cache_hit_rate: f64,
    /// Share of finished debates that escalated.
    pub escalation_rate: f64,
}

/// Reads a JSONL run log.
pub struct RunLogReader {
    runs: Vec<RunRecord>,
}

impl RunLogReader {
    pub fn read_from_file(path: &Path) -> std::io::Result<Self> {
        use std::fs::File;
        use std::io::{BufRead, BufReader};

        let reader = BufReader::new(File::open(path)?);
        let mut runs = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let run: RunRecord = serde_json::from_str(&line)
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
            runs.push(run);
        }
        Ok(Self { runs })
    }

    pub fn runs(&self) -> &[RunRecord] {
        &self.runs
    }

    pub fn totals(&self) -> RunTotals {
        let mut totals = RunTotals {
            runs: self.runs.len(),
            ..Default::default()
        };
        let mut planned = 0usize;
        for run in &self.runs {
            totals.processed += run.processed;
            totals.escalated += run.escalated;
            totals.failed += run.failed;
            totals.cache_hits += run.cache_hits;
            totals.tokens_used += run.tokens_used;
            planned += run.cache_hits + run.enqueued;
        }
        if planned > 0 {
            totals.cache_hit_rate = totals.cache_hits as f64 / planned as f64;
        }
        let finished = totals.processed + totals.escalated + totals.failed;
        if finished > 0 {
            totals.escalation_rate = totals.escalated as f64 / finished as f64;
        }
        totals
    }
}

/// Log batch progress from the event bus until the bus closes.
pub fn spawn_progress_logger(bus: &EventBus) -> JoinHandle<()> {
    let mut rx = bus.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => log_event(&event),
                Err(RecvError::Lagged(missed)) => warn!(missed, "progress logger lagged"),
                Err(RecvError::Closed) => break,
            }
        }
    })
}

fn log_event(event: &EngineEvent) {
    match event {
        EngineEvent::Progress {
            done,
            total,
            processed,
            escalated,
            failed,
            ..
        } => info!(done, total, processed, escalated, failed, "batch progress"),
        EngineEvent::ItemEscalated {
            pair,
            reason,
            priority,
            ..
        } => info!(%pair, %reason, %priority, "escalated to review"),
        EngineEvent::ItemFailed {
            pair,
            error,
            attempt,
            permanent: true,
            ..
        } => warn!(%pair, attempt, %error, "pair failed"),
        EngineEvent::BatchCancelled { undispatched, .. } => {
            warn!(undispatched, "batch cancelled")
        }
        EngineEvent::BatchAborted {
            error,
            undispatched,
            ..
        } => warn!(%error, undispatched, "batch aborted"),
        _ => {}
    }
}
