//! Runtime environment checks reported by `/health`.
//!
//! Startup creates the download and log directories; both are probed for
//! writability and the driver executable is looked up. Problems never stop
//! the service, they are listed as `environment_issues`.

use std::path::{Path, PathBuf};

use serde::Serialize;

#[derive(Debug, Clone)]
pub struct Environment {
    pub downloads_dir: PathBuf,
    pub logs_dir: PathBuf,
    pub driver_command: String,
}

/// Snapshot of the environment as seen by `/health`.
#[derive(Debug, Clone, Serialize)]
pub struct EnvironmentReport {
    pub downloads_directory: String,
    pub downloads_writable: bool,
    pub logs_directory: String,
    pub logs_writable: bool,
    pub driver_command: String,
    pub driver_found: bool,
}

impl Environment {
    /// Create the data directories and return any problems found.
    pub async fn prepare(&self) -> Vec<String> {
        for dir in [&self.downloads_dir, &self.logs_dir] {
            if let Err(e) = tokio::fs::create_dir_all(dir).await {
                tracing::warn!(dir = %dir.display(), error = %e, "Failed to create directory");
            }
        }
        let (_, issues) = self.inspect().await;
        for issue in &issues {
            tracing::warn!(issue = %issue, "Environment issue");
        }
        issues
    }

    pub async fn inspect(&self) -> (EnvironmentReport, Vec<String>) {
        let downloads_writable = is_writable(&self.downloads_dir).await;
        let logs_writable = is_writable(&self.logs_dir).await;
        let driver_found = find_program(&self.driver_command).await.is_some();

        let mut issues = Vec::new();
        if !downloads_writable {
            issues.push(format!(
                "Downloads directory {} is not writable",
                self.downloads_dir.display()
            ));
        }
        if !logs_writable {
            issues.push(format!(
                "Logs directory {} is not writable",
                self.logs_dir.display()
            ));
        }
        if !driver_found {
            issues.push(format!("Driver command '{}' not found", self.driver_command));
        }

        let report = EnvironmentReport {
            downloads_directory: self.downloads_dir.display().to_string(),
            downloads_writable,
            logs_directory: self.logs_dir.display().to_string(),
            logs_writable,
            driver_command: self.driver_command.clone(),
            driver_found,
        };
        (report, issues)
    }
}

/// Write and remove a probe file.
async fn is_writable(dir: &Path) -> bool {
    let probe = dir.join(".write-probe");
    if tokio::fs::write(&probe, b"").await.is_err() {
        return false;
    }
    let _ = tokio::fs::remove_file(&probe).await;
    true
}

/// Resolve a program the way a shell would: paths are taken as-is, bare
/// names are searched in `PATH`.
async fn find_program(command: &str) -> Option<PathBuf> {
    if command.contains(std::path::MAIN_SEPARATOR) || command.contains('/') {
        let path = PathBuf::from(command);
        return is_file(&path).await.then_some(path);
    }
    let paths = std::env::var_os("PATH")?;
    for dir in std::env::split_paths(&paths) {
        let candidate = dir.join(command);
        if is_file(&candidate).await {
            return Some(candidate);
        }
    }
    None
}

async fn is_file(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .is_ok_and(|meta| meta.is_file())
}
