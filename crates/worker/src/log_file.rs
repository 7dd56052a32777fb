//! Per-job log files.
//!
//! Every line appended to a job's in-memory log is mirrored to
//! `{dir}/{job_id}.log`. Write failures are traced and otherwise ignored.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use thinkion_core::types::JobId;
use tokio::io::AsyncWriteExt;

#[derive(Debug, Clone)]
pub struct JobLogWriter {
    dir: PathBuf,
}

impl JobLogWriter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path(&self, job_id: JobId) -> PathBuf {
        self.dir.join(format!("{job_id}.log"))
    }

    /// `2024-01-02 03:04:05 - [job_id=<id>] <message>`
    pub fn format_line(job_id: JobId, at: DateTime<Utc>, message: &str) -> String {
        format!(
            "{} - [job_id={job_id}] {message}\n",
            at.format("%Y-%m-%d %H:%M:%S")
        )
    }

    pub async fn append(&self, job_id: JobId, message: &str) {
        if let Err(e) = self.try_append(job_id, message).await {
            tracing::warn!(%job_id, error = %e, "Failed to write job log file");
        }
    }

    async fn try_append(&self, job_id: JobId, message: &str) -> std::io::Result<()> {
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.path(job_id))
            .await?;
        file.write_all(Self::format_line(job_id, Utc::now(), message).as_bytes())
            .await?;
        file.flush().await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
