//! Append-only JSONL escalation queue on disk.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use matchmaking::debate::EscalationError;
use matchmaking::{EscalationRecord, EscalationSink};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::debug;

/// Writes one escalation record per line.
///
/// Writes are serialized so concurrent debates never interleave lines.
pub struct JsonlEscalationSink {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonlEscalationSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read every record back, skipping blank lines.
    pub fn read_all(path: &Path) -> Result<Vec<EscalationRecord>, EscalationError> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        text.lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| serde_json::from_str(line).map_err(EscalationError::from))
            .collect()
    }
}

#[async_trait]
impl EscalationSink for JsonlEscalationSink {
    async fn submit(&self, record: EscalationRecord) -> Result<(), EscalationError> {
        let mut line = serde_json::to_string(&record)?;
        line.push('\n');

        let _guard = self.write_lock.lock().await;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        debug!(path = %self.path.display(), pair = %record.pair_key(), "escalation written");
        Ok(())
    }
}
