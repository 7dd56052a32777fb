use std::sync::Arc;

use thinkion_core::downloads::DownloadArea;
use thinkion_core::report::{AccountDefaults, ReportCatalog};
use thinkion_core::store::JobStore;
use thinkion_worker::JobSupervisor;

use crate::environment::Environment;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// This is cheaply cloneable (inner data is behind `Arc` or is already `Clone`).
#[derive(Clone)]
pub struct AppState {
    /// Registry of all jobs of this process.
    pub store: Arc<JobStore>,
    /// Admission point for new jobs.
    pub supervisor: Arc<JobSupervisor>,
    /// Known reports, replaceable at runtime.
    pub catalog: Arc<ReportCatalog>,
    /// Per-job download directories.
    pub downloads: DownloadArea,
    /// Account id and group selector used when a request omits them.
    pub account: Arc<AccountDefaults>,
    /// Directories and driver checked by `/health`.
    pub environment: Arc<Environment>,
}
