//! Report automation: the [`AutomationRunner`] contract and the
//! driver-process implementation that logs into the POS portal, exports a
//! report and converts the download into JSON rows.

pub mod convert;
pub mod download;
pub mod driver;
pub mod runner;

pub use driver::{BrowserDriverRunner, DriverConfig, PortalCredentials};
pub use runner::{checkpoint, AutomationRunner, LogSink, RunFailure, RunOutput};
