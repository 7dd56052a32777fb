//! Domain types shared by the runner, the supervisor and the HTTP API:
//! the job model and its state machine, the in-memory job store, the
//! report catalog and the per-job download area.

pub mod downloads;
pub mod error;
pub mod job;
pub mod report;
pub mod store;
pub mod types;
