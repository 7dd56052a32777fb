//! Runner backed by an external browser-driver process.
//!
//! The driver owns the browser session: it logs in, opens the report page,
//! applies the date range and group filter and triggers the export into the
//! job's download directory. It receives one JSON document on stdin and
//! reports back one event per stdout line. Everything after the export
//! (waiting for the file, renaming, conversion, retention) happens here.

use std::fmt;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thinkion_core::downloads::DownloadArea;
use thinkion_core::report::JobParameters;
use thinkion_core::types::JobId;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;

use crate::convert::convert_file;
use crate::download::{rename_downloads, wait_for_downloads, DownloadWait};
use crate::runner::{checkpoint, AutomationRunner, LogSink, RunFailure, RunOutput};

/// Portal login. Never stored on jobs or written to logs.
#[derive(Clone)]
pub struct PortalCredentials {
    pub login_url: String,
    pub username: String,
    pub password: String,
}

impl fmt::Debug for PortalCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PortalCredentials")
            .field("login_url", &self.login_url)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// How to launch the driver and what to do with its downloads.
#[derive(Debug, Clone)]
pub struct DriverConfig {
    pub program: String,
    pub args: Vec<String>,
    pub downloads: DownloadArea,
    pub download_wait: DownloadWait,
    /// Keep report files after a successful conversion.
    pub retain_downloads: bool,
}

/// Report page URL for a page slug.
///
/// `https://host/app/login.html` + `report_sales` ->
/// `https://host/app/report_sales.html`
pub fn build_report_url(login_url: &str, url_param: &str) -> String {
    let base = login_url.trim().trim_end_matches('/');
    let base = base.strip_suffix("/login.html").unwrap_or(base);
    let slug = url_param.trim().trim_start_matches('/');
    let slug = slug.strip_suffix(".html").unwrap_or(slug);
    format!("{base}/{slug}.html")
}

/// Document written to the driver's stdin.
#[derive(Serialize)]
struct DriverInput<'a> {
    job_id: JobId,
    login_url: &'a str,
    report_url: String,
    username: &'a str,
    password: &'a str,
    web_group_selector: &'a str,
    account_id: i64,
    date_from: NaiveDate,
    date_to: NaiveDate,
    download_dir: PathBuf,
    report_name: &'a str,
}

#[derive(Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
enum FailureKind {
    Authentication,
    Navigation,
    Download,
    Conversion,
}

/// One structured stdout line of the driver.
#[derive(Debug, Deserialize, PartialEq, Eq)]
#[serde(tag = "event", rename_all = "snake_case")]
enum DriverEvent {
    Progress {
        message: String,
    },
    Failure {
        kind: FailureKind,
        message: String,
    },
    NoData {
        #[serde(default)]
        message: Option<String>,
    },
}

impl From<(FailureKind, String)> for RunFailure {
    fn from((kind, message): (FailureKind, String)) -> Self {
        match kind {
            FailureKind::Authentication => RunFailure::authentication(message),
            FailureKind::Navigation => RunFailure::navigation(message),
            FailureKind::Download => RunFailure::download(message),
            FailureKind::Conversion => RunFailure::conversion(message),
        }
    }
}

/// What the driver reported before exiting.
#[derive(Debug, Default)]
struct DriverReport {
    failure: Option<RunFailure>,
    no_data: bool,
}

/// [`AutomationRunner`] that delegates the browser session to a driver
/// process and post-processes its downloads.
pub struct BrowserDriverRunner {
    config: DriverConfig,
    credentials: PortalCredentials,
}

impl BrowserDriverRunner {
    pub fn new(config: DriverConfig, credentials: PortalCredentials) -> Self {
        Self {
            config,
            credentials,
        }
    }

    fn spawn(&self) -> Result<Child, RunFailure> {
        Command::new(&self.config.program)
            .args(&self.config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                RunFailure::internal(format!(
                    "Failed to launch driver '{}': {e}",
                    self.config.program
                ))
            })
    }

    /// Run the driver to completion, forwarding its output to `log`.
    async fn drive(
        &self,
        input: &DriverInput<'_>,
        log: &LogSink,
        cancel: &CancellationToken,
    ) -> Result<DriverReport, RunFailure> {
        let mut child = self.spawn()?;

        if let Some(mut stdin) = child.stdin.take() {
            let payload = serde_json::to_vec(input)
                .map_err(|e| RunFailure::internal(format!("Failed to encode driver input: {e}")))?;
            // The driver may exit without reading its input.
            let _ = stdin.write_all(&payload).await;
            drop(stdin);
        }

        let stderr_task = child.stderr.take().map(|stderr| {
            let log = log.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    if !line.trim().is_empty() {
                        log.log(format!("driver: {line}"));
                    }
                }
            })
        });

        let mut report = DriverReport::default();
        if let Some(stdout) = child.stdout.take() {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                let line = tokio::select! {
                    _ = cancel.cancelled() => {
                        let _ = child.start_kill();
                        return Err(RunFailure::cancelled());
                    }
                    line = lines.next_line() => line,
                };
                match line {
                    Ok(Some(line)) => handle_line(&line, log, &mut report),
                    Ok(None) => break,
                    Err(e) => {
                        tracing::warn!(error = %e, "Failed to read driver output");
                        break;
                    }
                }
            }
        }

        // Dropping `child` on cancellation kills the driver.
        let status = tokio::select! {
            _ = cancel.cancelled() => return Err(RunFailure::cancelled()),
            status = child.wait() => status
                .map_err(|e| RunFailure::internal(format!("Failed to wait for driver: {e}")))?,
        };
        if let Some(task) = stderr_task {
            let _ = task.await;
        }

        finish(report, status)
    }
}

fn handle_line(line: &str, log: &LogSink, report: &mut DriverReport) {
    let line = line.trim();
    if line.is_empty() {
        return;
    }
    match serde_json::from_str::<DriverEvent>(line) {
        Ok(DriverEvent::Progress { message }) => log.log(message),
        Ok(DriverEvent::Failure { kind, message }) => {
            log.log(message.clone());
            // The first failure reported wins.
            if report.failure.is_none() {
                report.failure = Some((kind, message).into());
            }
        }
        Ok(DriverEvent::NoData { message }) => {
            log.log(message.unwrap_or_else(|| "Report has no data for the range".to_string()));
            report.no_data = true;
        }
        Err(_) => log.log(line),
    }
}

fn finish(mut report: DriverReport, status: ExitStatus) -> Result<DriverReport, RunFailure> {
    if let Some(failure) = report.failure.take() {
        return Err(failure);
    }
    if !status.success() {
        return Err(RunFailure::internal(format!(
            "Driver exited with {status} without reporting a failure"
        )));
    }
    Ok(report)
}

#[async_trait::async_trait]
impl AutomationRunner for BrowserDriverRunner {
    async fn run(
        &self,
        job_id: JobId,
        params: &JobParameters,
        log: LogSink,
        cancel: CancellationToken,
    ) -> Result<RunOutput, RunFailure> {
        let report = &params.report;

        let dir = self.config.downloads.prepare(job_id).await.map_err(|e| {
            RunFailure::internal(format!("Failed to create download directory: {e}"))
        })?;

        checkpoint(&cancel)?;
        let input = DriverInput {
            job_id,
            login_url: &self.credentials.login_url,
            report_url: build_report_url(&self.credentials.login_url, &report.url_param),
            username: &self.credentials.username,
            password: &self.credentials.password,
            web_group_selector: &params.web_group_selector,
            account_id: params.account_id,
            date_from: params.date_from,
            date_to: params.date_to,
            download_dir: dir.clone(),
            report_name: &report.report_name,
        };
        log.log(format!(
            "Starting browser driver for report '{}' ({} to {})",
            report.report_name, params.date_from, params.date_to
        ));
        tracing::debug!(%job_id, report_url = %input.report_url, "Launching driver");

        let outcome = self.drive(&input, &log, &cancel).await?;
        if outcome.no_data {
            return Ok(RunOutput {
                result: Value::Array(Vec::new()),
                artifacts: Vec::new(),
            });
        }

        checkpoint(&cancel)?;
        log.log("Waiting for download to complete");
        let files = wait_for_downloads(&dir, self.config.download_wait, &cancel).await?;
        let files = rename_downloads(&files, params.account_id, &report.report_name, Utc::now()).await?;
        for file in &files {
            if let Some(name) = file.file_name() {
                log.log(format!("File downloaded: {}", name.to_string_lossy()));
            }
        }

        checkpoint(&cancel)?;
        let mut rows = Vec::new();
        for file in &files {
            rows.extend(convert_file(file, &report.columns).await?);
        }
        log.log(format!("Converted {} rows", rows.len()));

        let artifacts = if self.config.retain_downloads {
            files
        } else {
            for file in &files {
                if let Err(e) = tokio::fs::remove_file(file).await {
                    tracing::warn!(%job_id, file = %file.display(), error = %e, "Failed to remove download");
                }
            }
            Vec::new()
        };

        Ok(RunOutput {
            result: Value::Array(rows.into_iter().map(Value::Object).collect()),
            artifacts,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
