#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Method, Request, Response};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

use thinkion_api::config::ServerConfig;
use thinkion_api::environment::Environment;
use thinkion_api::router::build_app_router;
use thinkion_api::state::AppState;
use thinkion_core::downloads::DownloadArea;
use thinkion_core::job::{Job, JobStatus};
use thinkion_core::report::{AccountDefaults, JobParameters, ReportCatalog};
use thinkion_core::store::JobStore;
use thinkion_core::types::JobId;
use thinkion_runner::{AutomationRunner, LogSink, RunFailure, RunOutput};
use thinkion_worker::{JobSupervisor, SupervisorConfig};

/// Build a test `ServerConfig` with safe defaults.
pub fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:5173".to_string()],
        request_timeout_secs: 30,
        shutdown_timeout_secs: 30,
    }
}

/// Stand-in for the browser driver.
///
/// Writes `<report>.csv` into the job's download directory and returns two
/// rows. A report named `bad-login` fails with `AuthenticationFailed`, one
/// named `slow` waits until cancelled.
pub struct FakeRunner {
    downloads: DownloadArea,
}

#[async_trait::async_trait]
impl AutomationRunner for FakeRunner {
    async fn run(
        &self,
        job_id: JobId,
        params: &JobParameters,
        log: LogSink,
        cancel: CancellationToken,
    ) -> Result<RunOutput, RunFailure> {
        log.log("Logging in to portal");
        match params.report.report_name.as_str() {
            "bad-login" => return Err(RunFailure::authentication("Login rejected")),
            "slow" => {
                cancel.cancelled().await;
                return Err(RunFailure::cancelled());
            }
            _ => {}
        }

        let dir = self
            .downloads
            .prepare(job_id)
            .await
            .map_err(|e| RunFailure::download(e.to_string()))?;
        let path = dir.join(format!("{}.csv", params.report.report_name));
        tokio::fs::write(&path, "Fecha,Total\n2024-01-01,10\n2024-01-02,20\n")
            .await
            .map_err(|e| RunFailure::download(e.to_string()))?;
        log.log(format!("File downloaded: {}", path.display()));

        Ok(RunOutput {
            result: json!([
                {"Fecha": "2024-01-01", "Total": "10"},
                {"Fecha": "2024-01-02", "Total": "20"}
            ]),
            artifacts: vec![path],
        })
    }
}

pub struct TestApp {
    pub router: Router,
    pub store: Arc<JobStore>,
    pub supervisor: Arc<JobSupervisor>,
    pub catalog: Arc<ReportCatalog>,
    pub downloads: DownloadArea,
    _tmp: TempDir,
}

impl TestApp {
    /// A fresh router sharing this app's state (`oneshot` consumes it).
    pub fn app(&self) -> Router {
        self.router.clone()
    }

    /// Poll the store until the job leaves `queued`/`running`.
    pub async fn wait_terminal(&self, id: JobId) -> Job {
        for _ in 0..200 {
            let job = self.store.get(id).await.unwrap();
            if job.status.is_terminal() {
                return job;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job {id} did not finish");
    }
}

/// Build the full application router over a fake runner and temporary
/// directories.
///
/// Uses the same [`build_app_router`] as `main.rs`, so tests exercise the
/// production middleware stack.
pub fn build_test_app() -> TestApp {
    let tmp = tempfile::tempdir().unwrap();
    let downloads_dir = tmp.path().join("downloads");
    let downloads = DownloadArea::new(&downloads_dir);
    let config = test_config();

    let store = Arc::new(JobStore::new());
    let runner = Arc::new(FakeRunner {
        downloads: downloads.clone(),
    });
    let supervisor = JobSupervisor::start(
        Arc::clone(&store),
        runner,
        SupervisorConfig {
            max_concurrent: 2,
            job_timeout: Duration::from_secs(5),
            cancel_grace: Duration::from_millis(200),
        },
        None,
    );
    let catalog = Arc::new(ReportCatalog::new());

    let state = AppState {
        store: Arc::clone(&store),
        supervisor: Arc::clone(&supervisor),
        catalog: Arc::clone(&catalog),
        downloads: downloads.clone(),
        account: Arc::new(AccountDefaults {
            account_id: 1,
            web_group_selector: "#group_all".to_string(),
        }),
        environment: Arc::new(Environment {
            downloads_dir,
            logs_dir: tmp.path().to_path_buf(),
            driver_command: "sh".to_string(),
        }),
    };

    TestApp {
        router: build_app_router(state, &config),
        store,
        supervisor,
        catalog,
        downloads,
        _tmp: tmp,
    }
}

// ---------------------------------------------------------------------------
// Request helpers
// ---------------------------------------------------------------------------

pub async fn get(app: Router, uri: &str) -> Response<Body> {
    send(app, Method::GET, uri, Body::empty(), None).await
}

pub async fn delete(app: Router, uri: &str) -> Response<Body> {
    send(app, Method::DELETE, uri, Body::empty(), None).await
}

pub async fn post_json(app: Router, uri: &str, body: Value) -> Response<Body> {
    send(
        app,
        Method::POST,
        uri,
        Body::from(body.to_string()),
        Some("application/json"),
    )
    .await
}

async fn send(
    app: Router,
    method: Method,
    uri: &str,
    body: Body,
    content_type: Option<&str>,
) -> Response<Body> {
    let mut request = Request::builder().method(method).uri(uri);
    if let Some(content_type) = content_type {
        request = request.header("content-type", content_type);
    }
    app.oneshot(request.body(body).unwrap()).await.unwrap()
}

pub async fn body_bytes(response: Response<Body>) -> Vec<u8> {
    response
        .into_body()
        .collect()
        .await
        .unwrap()
        .to_bytes()
        .to_vec()
}

pub async fn body_json(response: Response<Body>) -> Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

/// Submit a download for `report` and return the job id.
pub async fn start_download(app: &TestApp, report: &str) -> JobId {
    let response = post_json(
        app.app(),
        "/download",
        json!({"report": report, "date": "2024-01-01"}),
    )
    .await;
    assert_eq!(response.status(), 202);
    let json = body_json(response).await;
    assert_eq!(json["status"], JobStatus::Queued.as_str());
    json["job_id"].as_str().unwrap().parse().unwrap()
}
