//! In-memory job registry.
//!
//! [`JobStore`] is the single source of truth for job status, logs and
//! results. Every mutation goes through its methods; a whole-store
//! `RwLock` serialises writers while readers always see the latest
//! committed snapshot. Records live for the lifetime of the store.

use std::collections::HashMap;

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::RwLock;

use crate::error::CoreError;
use crate::job::{Job, JobStatus, JobSummary, JobTransition, LogLine};
use crate::types::JobId;

/// Number of jobs per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub queued: usize,
    pub running: usize,
    pub succeeded: usize,
    pub failed: usize,
}

/// Thread-safe registry of job records keyed by id.
///
/// Designed to be wrapped in `Arc` and shared by the supervisor and the
/// HTTP handlers.
#[derive(Default)]
pub struct JobStore {
    jobs: RwLock<HashMap<JobId, Job>>,
}

impl JobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a new `queued` job and return its freshly allocated id.
    pub async fn create(&self, parameters: Value) -> JobId {
        let mut jobs = self.jobs.write().await;
        let mut id = JobId::new_v4();
        while jobs.contains_key(&id) {
            id = JobId::new_v4();
        }
        jobs.insert(id, Job::new(id, parameters, Utc::now()));
        id
    }

    /// Snapshot of a single job.
    pub async fn get(&self, id: JobId) -> Result<Job, CoreError> {
        self.jobs
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| CoreError::job_not_found(id))
    }

    /// Current status of a job without cloning its log or result.
    pub async fn status(&self, id: JobId) -> Result<JobStatus, CoreError> {
        self.jobs
            .read()
            .await
            .get(&id)
            .map(|job| job.status)
            .ok_or_else(|| CoreError::job_not_found(id))
    }

    /// Append a timestamped line to a job's log.
    ///
    /// Accepted in every status, terminal ones included; status, result and
    /// error are never touched.
    pub async fn append_log(&self, id: JobId, line: impl Into<String>) -> Result<(), CoreError> {
        let mut jobs = self.jobs.write().await;
        let job = jobs.get_mut(&id).ok_or_else(|| CoreError::job_not_found(id))?;
        job.log.push(LogLine {
            timestamp: Utc::now(),
            message: line.into(),
        });
        Ok(())
    }

    /// Move a job through the state machine.
    pub async fn transition(&self, id: JobId, transition: JobTransition) -> Result<(), CoreError> {
        let mut jobs = self.jobs.write().await;
        let job = jobs.get_mut(&id).ok_or_else(|| CoreError::job_not_found(id))?;
        job.apply(transition, Utc::now())
    }

    /// Log lines of a job from `offset` onwards.
    pub async fn log_since(&self, id: JobId, offset: usize) -> Result<Vec<LogLine>, CoreError> {
        let jobs = self.jobs.read().await;
        let job = jobs.get(&id).ok_or_else(|| CoreError::job_not_found(id))?;
        Ok(job.log.iter().skip(offset).cloned().collect())
    }

    /// Summaries of all jobs, oldest first.
    pub async fn list(&self) -> Vec<JobSummary> {
        let jobs = self.jobs.read().await;
        let mut summaries: Vec<JobSummary> = jobs.values().map(Job::summary).collect();
        summaries.sort_by_key(|s| s.created_at);
        summaries
    }

    pub async fn count_by_status(&self) -> StatusCounts {
        let jobs = self.jobs.read().await;
        let mut counts = StatusCounts::default();
        for job in jobs.values() {
            match job.status {
                JobStatus::Queued => counts.queued += 1,
                JobStatus::Running => counts.running += 1,
                JobStatus::Succeeded => counts.succeeded += 1,
                JobStatus::Failed => counts.failed += 1,
            }
        }
        counts
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
