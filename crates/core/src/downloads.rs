//! Per-job download directories.
//!
//! Every job writes its report files under `{root}/{job_id}/`. This module
//! resolves those paths, lists and deletes files, and rejects file names
//! that would escape the job directory.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::CoreError;
use crate::types::JobId;

/// Metadata of one downloaded file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DownloadedFile {
    pub name: String,
    /// Path relative to the downloads root, e.g. `"<job_id>/sales.xls"`.
    pub path: String,
    pub size: u64,
    pub modified: Option<DateTime<Utc>>,
}

/// Root of all job download directories.
#[derive(Debug, Clone)]
pub struct DownloadArea {
    root: PathBuf,
}

/// Validate a client-supplied file name: a single, plain path component.
pub fn validate_file_name(name: &str) -> Result<(), CoreError> {
    let invalid = name.is_empty()
        || name == "."
        || name == ".."
        || name.contains('/')
        || name.contains('\\')
        || name.contains('\0');
    if invalid {
        return Err(CoreError::Validation(format!("Invalid file name: '{name}'")));
    }
    Ok(())
}

impl DownloadArea {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn job_dir(&self, job_id: JobId) -> PathBuf {
        self.root.join(job_id.to_string())
    }

    /// Create (if needed) and return the job's download directory.
    pub async fn prepare(&self, job_id: JobId) -> std::io::Result<PathBuf> {
        let dir = self.job_dir(job_id);
        tokio::fs::create_dir_all(&dir).await?;
        Ok(dir)
    }

    /// Resolve an existing file inside the job directory.
    pub async fn file_path(&self, job_id: JobId, name: &str) -> Result<PathBuf, CoreError> {
        validate_file_name(name)?;
        let path = self.job_dir(job_id).join(name);
        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => Ok(path),
            _ => Err(CoreError::NotFound {
                entity: "File",
                id: format!("{job_id}/{name}"),
            }),
        }
    }

    /// List regular files of a job, sorted by name.
    ///
    /// `NotFound` when the job has no download directory.
    pub async fn list(&self, job_id: JobId) -> Result<Vec<DownloadedFile>, CoreError> {
        let dir = self.job_dir(job_id);
        let mut entries = tokio::fs::read_dir(&dir).await.map_err(|_| CoreError::NotFound {
            entity: "Job files",
            id: job_id.to_string(),
        })?;

        let mut files = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| CoreError::Internal(format!("Failed to read {}: {e}", dir.display())))?
        {
            let meta = match entry.metadata().await {
                Ok(meta) if meta.is_file() => meta,
                _ => continue,
            };
            let name = entry.file_name().to_string_lossy().into_owned();
            files.push(DownloadedFile {
                path: format!("{job_id}/{name}"),
                name,
                size: meta.len(),
                modified: meta.modified().ok().map(DateTime::<Utc>::from),
            });
        }
        files.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(files)
    }

    /// Delete a single file of a job.
    pub async fn delete_file(&self, job_id: JobId, name: &str) -> Result<(), CoreError> {
        let path = self.file_path(job_id, name).await?;
        tokio::fs::remove_file(&path)
            .await
            .map_err(|e| CoreError::Internal(format!("Failed to delete {name}: {e}")))
    }

    /// Delete the whole job directory.
    pub async fn delete_all(&self, job_id: JobId) -> Result<(), CoreError> {
        let dir = self.job_dir(job_id);
        if !tokio::fs::try_exists(&dir).await.unwrap_or(false) {
            return Err(CoreError::NotFound {
                entity: "Job files",
                id: job_id.to_string(),
            });
        }
        tokio::fs::remove_dir_all(&dir)
            .await
            .map_err(|e| CoreError::Internal(format!("Failed to delete files of {job_id}: {e}")))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
