//! Append-only feedback log.
//!
//! Each thumbs-up / thumbs-down becomes one JSON object on its own line.
//! The log is telemetry only; nothing in the pipeline reads it back.

use chrono::Utc;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::PersistenceError;
use crate::models::{FeedbackRecord, Sentiment};

#[derive(Debug, Clone)]
pub struct FeedbackLog {
    path: PathBuf,
}

impl FeedbackLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record and return it.
    pub fn record(&self, sentiment: Sentiment, answer: &str) -> Result<FeedbackRecord, PersistenceError> {
        let record = FeedbackRecord {
            sentiment,
            answer: answer.to_string(),
            recorded_at: Utc::now(),
        };
        self.append(&record)?;
        Ok(record)
    }

    pub fn append(&self, record: &FeedbackRecord) -> Result<(), PersistenceError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let mut line =
            serde_json::to_vec(record).map_err(|e| PersistenceError::Corrupt(e.to_string()))?;
        line.push(b'\n');

        // One write per record so concurrent appenders never interleave lines.
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(&line)?;
        tracing::debug!(path = %self.path.display(), sentiment = ?record.sentiment, "recorded feedback");
        Ok(())
    }
}
