//! Automation runner interface and shared types.
//!
//! Defines [`AutomationRunner`], the trait every report-download backend
//! implements, along with [`LogSink`], [`RunOutput`] and [`RunFailure`].

use std::path::PathBuf;

use serde_json::Value;
use thinkion_core::job::{ErrorKind, JobError};
use thinkion_core::report::JobParameters;
use thinkion_core::types::JobId;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Structured result of a successful run.
#[derive(Debug, Clone)]
pub struct RunOutput {
    /// Converted report rows (a JSON array of row objects).
    pub result: Value,
    /// Files the run left on disk.
    pub artifacts: Vec<PathBuf>,
}

/// A structured, expected failure of a run.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct RunFailure {
    pub kind: ErrorKind,
    pub message: String,
}

impl RunFailure {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn authentication(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::AuthenticationFailed, message)
    }

    pub fn navigation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NavigationFailed, message)
    }

    pub fn download(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::DownloadFailed, message)
    }

    pub fn conversion(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ConversionFailed, message)
    }

    pub fn cancelled() -> Self {
        Self::new(ErrorKind::Cancelled, "Run cancelled")
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InternalError, message)
    }
}

impl From<RunFailure> for JobError {
    fn from(failure: RunFailure) -> Self {
        JobError::new(failure.kind, failure.message)
    }
}

/// Return `Cancelled` if the token has fired.
///
/// Runners call this at their checkpoints (before navigation, before the
/// download wait, before conversion).
pub fn checkpoint(cancel: &CancellationToken) -> Result<(), RunFailure> {
    if cancel.is_cancelled() {
        Err(RunFailure::cancelled())
    } else {
        Ok(())
    }
}

/// Receives human-readable progress lines from a run, in order.
///
/// Cheap to clone; lines sent after the receiving side is gone are dropped.
#[derive(Debug, Clone)]
pub struct LogSink {
    tx: mpsc::UnboundedSender<String>,
}

impl LogSink {
    /// Create a sink and the receiver that drains it.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn log(&self, line: impl Into<String>) {
        let _ = self.tx.send(line.into());
    }
}

/// One login/navigate/download/convert cycle against the POS portal.
///
/// Implementations must observe `cancel` cooperatively and return
/// [`RunFailure::cancelled`] once it fires.
#[async_trait::async_trait]
pub trait AutomationRunner: Send + Sync {
    async fn run(
        &self,
        job_id: JobId,
        params: &JobParameters,
        log: LogSink,
        cancel: CancellationToken,
    ) -> Result<RunOutput, RunFailure>;
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
