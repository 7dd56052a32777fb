//! Background execution of report jobs: the [`JobSupervisor`] worker pool
//! and the per-job log files it mirrors progress into.

pub mod log_file;
pub mod supervisor;

pub use log_file::JobLogWriter;
pub use supervisor::{JobSupervisor, SupervisorConfig};
