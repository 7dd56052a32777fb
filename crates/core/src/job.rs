//! Job record, lifecycle state machine and failure taxonomy.
//!
//! A [`Job`] moves `queued -> running -> {succeeded, failed}`. Terminal
//! transitions carry either a result or an error (never both), so the
//! "exactly one of result/error" invariant holds by construction.
//! Log lines may still be appended after a job is terminal.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::CoreError;
use crate::types::{JobId, Timestamp};

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Lifecycle status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
}

impl JobStatus {
    /// All statuses in lifecycle order.
    pub const ALL: [JobStatus; 4] = [
        JobStatus::Queued,
        JobStatus::Running,
        JobStatus::Succeeded,
        JobStatus::Failed,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }

    /// `succeeded` and `failed` are terminal; no further status change occurs.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }

    /// Whether the state machine allows moving from `self` to `next`.
    ///
    /// `queued -> failed` covers jobs cancelled before a worker picked them up.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (Self::Queued, Self::Running)
                | (Self::Queued, Self::Failed)
                | (Self::Running, Self::Succeeded)
                | (Self::Running, Self::Failed)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Failures
// ---------------------------------------------------------------------------

/// Why a job failed.
///
/// The first five kinds come from the automation runner; `Timeout` and
/// `InternalError` are assigned by the supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Bad or expired portal credentials.
    AuthenticationFailed,
    /// Expected page elements were absent.
    NavigationFailed,
    /// The report file never appeared, or was empty.
    DownloadFailed,
    /// The downloaded file could not be parsed into the report schema.
    ConversionFailed,
    /// The run observed its cancellation token.
    Cancelled,
    /// The run exceeded the configured wall-clock timeout.
    Timeout,
    /// The runner faulted without a structured failure.
    InternalError,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::AuthenticationFailed => "AuthenticationFailed",
            Self::NavigationFailed => "NavigationFailed",
            Self::DownloadFailed => "DownloadFailed",
            Self::ConversionFailed => "ConversionFailed",
            Self::Cancelled => "Cancelled",
            Self::Timeout => "Timeout",
            Self::InternalError => "InternalError",
        };
        f.write_str(s)
    }
}

/// Failure description stored on a failed job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobError {
    pub kind: ErrorKind,
    pub message: String,
}

impl JobError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Log lines
// ---------------------------------------------------------------------------

/// One timestamped progress line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogLine {
    pub timestamp: Timestamp,
    pub message: String,
}

// ---------------------------------------------------------------------------
// Job
// ---------------------------------------------------------------------------

/// A requested state change.
#[derive(Debug, Clone)]
pub enum JobTransition {
    /// `queued -> running`.
    Start,
    /// `running -> succeeded` with the structured result.
    Succeed(Value),
    /// `{queued, running} -> failed`.
    Fail(JobError),
}

impl JobTransition {
    pub fn target(&self) -> JobStatus {
        match self {
            Self::Start => JobStatus::Running,
            Self::Succeed(_) => JobStatus::Succeeded,
            Self::Fail(_) => JobStatus::Failed,
        }
    }
}

/// Full job record as held by the store.
#[derive(Debug, Clone, Serialize)]
pub struct Job {
    pub id: JobId,
    pub status: JobStatus,
    pub created_at: Timestamp,
    pub started_at: Option<Timestamp>,
    pub finished_at: Option<Timestamp>,
    pub parameters: Value,
    pub log: Vec<LogLine>,
    pub result: Option<Value>,
    pub error: Option<JobError>,
}

impl Job {
    pub(crate) fn new(id: JobId, parameters: Value, now: Timestamp) -> Self {
        Self {
            id,
            status: JobStatus::Queued,
            created_at: now,
            started_at: None,
            finished_at: None,
            parameters,
            log: Vec::new(),
            result: None,
            error: None,
        }
    }

    /// Apply `transition`, stamping the matching timestamp with `now`.
    pub(crate) fn apply(&mut self, transition: JobTransition, now: Timestamp) -> Result<(), CoreError> {
        let target = transition.target();
        if !self.status.can_transition_to(target) {
            return Err(CoreError::InvalidTransition {
                id: self.id.to_string(),
                from: self.status,
                to: target,
            });
        }

        match transition {
            JobTransition::Start => {
                self.started_at = Some(now);
            }
            JobTransition::Succeed(result) => {
                self.result = Some(result);
                self.finished_at = Some(now);
            }
            JobTransition::Fail(error) => {
                self.error = Some(error);
                self.finished_at = Some(now);
            }
        }
        self.status = target;
        Ok(())
    }

    pub fn summary(&self) -> JobSummary {
        JobSummary {
            id: self.id,
            status: self.status,
            created_at: self.created_at,
            started_at: self.started_at,
            finished_at: self.finished_at,
            parameters: self.parameters.clone(),
            error: self.error.clone(),
        }
    }
}

/// Status view of a job without its log and result payload.
#[derive(Debug, Clone, Serialize)]
pub struct JobSummary {
    pub id: JobId,
    pub status: JobStatus,
    pub created_at: Timestamp,
    pub started_at: Option<Timestamp>,
    pub finished_at: Option<Timestamp>,
    pub parameters: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JobError>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
