//! Download stabilization and file naming.
//!
//! The browser writes report files into the job's download directory
//! asynchronously. A download counts as finished once every report file is
//! non-empty, no partial file remains, and sizes are unchanged between two
//! consecutive polls.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::runner::RunFailure;

/// Extensions of finished report files.
pub const REPORT_EXTENSIONS: &[&str] = &["xls", "xlsx", "csv", "html"];

/// Extensions browsers use for in-progress downloads.
const PARTIAL_EXTENSIONS: &[&str] = &["crdownload", "part", "tmp"];

/// How long and how often to poll the download directory.
#[derive(Debug, Clone, Copy)]
pub struct DownloadWait {
    pub timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for DownloadWait {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            poll_interval: Duration::from_millis(500),
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
struct Snapshot {
    files: Vec<(PathBuf, u64)>,
    partial: bool,
}

impl Snapshot {
    fn settled(&self) -> bool {
        !self.files.is_empty() && !self.partial && self.files.iter().all(|(_, size)| *size > 0)
    }
}

fn extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

async fn scan(dir: &Path) -> std::io::Result<Snapshot> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut files = Vec::new();
    let mut partial = false;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let Some(ext) = extension(&path) else {
            continue;
        };
        if PARTIAL_EXTENSIONS.contains(&ext.as_str()) {
            partial = true;
        } else if REPORT_EXTENSIONS.contains(&ext.as_str()) {
            let meta = entry.metadata().await?;
            if meta.is_file() {
                files.push((path, meta.len()));
            }
        }
    }
    files.sort();
    Ok(Snapshot { files, partial })
}

/// Wait until the report files in `dir` are complete and stable.
///
/// Returns their paths sorted by name. Fails with `DownloadFailed` when
/// nothing stable appears within `wait.timeout`, and with `Cancelled` when
/// `cancel` fires first.
pub async fn wait_for_downloads(
    dir: &Path,
    wait: DownloadWait,
    cancel: &CancellationToken,
) -> Result<Vec<PathBuf>, RunFailure> {
    let deadline = Instant::now() + wait.timeout;
    let mut last: Option<Snapshot> = None;

    loop {
        let snapshot = scan(dir).await.map_err(|e| {
            RunFailure::download(format!("Failed to inspect {}: {e}", dir.display()))
        })?;

        if snapshot.settled() && last.as_ref() == Some(&snapshot) {
            return Ok(snapshot.files.into_iter().map(|(path, _)| path).collect());
        }

        if Instant::now() >= deadline {
            let reason = if snapshot.files.is_empty() {
                "no report file appeared"
            } else if snapshot.files.iter().any(|(_, size)| *size == 0) {
                "downloaded file is empty"
            } else {
                "file size did not stabilize"
            };
            return Err(RunFailure::download(format!(
                "Download timeout after {}s: {reason}",
                wait.timeout.as_secs()
            )));
        }
        last = Some(snapshot);

        tokio::select! {
            _ = cancel.cancelled() => return Err(RunFailure::cancelled()),
            _ = tokio::time::sleep(wait.poll_interval) => {}
        }
    }
}

fn sanitize(name: &str) -> String {
    let cleaned: String = name
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "report".to_string()
    } else {
        cleaned
    }
}

/// Target name for a downloaded report:
/// `account-{account_id}_{report}_{YYYYmmdd_HHMMSS}[_{n}].{ext}`.
pub fn report_file_name(
    account_id: i64,
    report_name: &str,
    at: DateTime<Utc>,
    index: usize,
    ext: &str,
) -> String {
    let stamp = at.format("%Y%m%d_%H%M%S");
    let report = sanitize(report_name);
    if index == 0 {
        format!("account-{account_id}_{report}_{stamp}.{ext}")
    } else {
        format!("account-{account_id}_{report}_{stamp}_{}.{ext}", index + 1)
    }
}

/// Rename downloaded files to their report names, in order.
pub async fn rename_downloads(
    files: &[PathBuf],
    account_id: i64,
    report_name: &str,
    at: DateTime<Utc>,
) -> Result<Vec<PathBuf>, RunFailure> {
    let mut renamed = Vec::with_capacity(files.len());
    for (index, file) in files.iter().enumerate() {
        let ext = extension(file).unwrap_or_else(|| "xls".to_string());
        let target = file.with_file_name(report_file_name(account_id, report_name, at, index, &ext));
        tokio::fs::rename(file, &target).await.map_err(|e| {
            RunFailure::download(format!("Failed to rename {}: {e}", file.display()))
        })?;
        renamed.push(target);
    }
    Ok(renamed)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
