use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use thinkion_api::config::AppConfig;
use thinkion_api::environment::Environment;
use thinkion_api::router::build_app_router;
use thinkion_api::state::AppState;
use thinkion_core::downloads::DownloadArea;
use thinkion_core::report::{ReportCatalog, ReportDefinition};
use thinkion_core::store::JobStore;
use thinkion_runner::BrowserDriverRunner;
use thinkion_worker::{JobLogWriter, JobSupervisor};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "thinkion_api=debug,thinkion_worker=debug,thinkion_runner=debug,tower_http=debug"
                    .into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Configuration ---
    let config = AppConfig::from_env().expect("Invalid configuration");
    tracing::info!(
        host = %config.server.host,
        port = config.server.port,
        max_concurrent_jobs = config.jobs.max_concurrent_jobs,
        job_timeout_secs = config.jobs.job_timeout_secs,
        portal = ?config.portal,
        "Loaded configuration"
    );

    // --- Environment ---
    let environment = Arc::new(Environment {
        downloads_dir: config.storage.downloads_dir.clone(),
        logs_dir: config.storage.logs_dir.clone(),
        driver_command: config.driver.command.clone(),
    });
    let issues = environment.prepare().await;
    tracing::info!(issues = issues.len(), "Environment checked");

    // --- Report catalog ---
    let catalog = Arc::new(ReportCatalog::new());
    if let Some(path) = &config.reports_config_path {
        let reports = load_reports(path).await.expect("Failed to load report catalog");
        catalog
            .replace(reports)
            .await
            .expect("Invalid report catalog");
        tracing::info!(path = %path.display(), reports = catalog.list().await.len(), "Report catalog loaded");
    }

    // --- Job supervisor ---
    let store = Arc::new(JobStore::new());
    let runner = Arc::new(BrowserDriverRunner::new(
        config.driver_config(),
        config.credentials(),
    ));
    let supervisor = JobSupervisor::start(
        Arc::clone(&store),
        runner,
        config.supervisor_config(),
        Some(JobLogWriter::new(&config.storage.logs_dir)),
    );

    let state = AppState {
        store,
        supervisor: Arc::clone(&supervisor),
        catalog,
        downloads: DownloadArea::new(&config.storage.downloads_dir),
        account: Arc::new(config.account_defaults()),
        environment,
    };
    let app = build_app_router(state, &config.server);

    // --- Start server ---
    let addr = SocketAddr::new(
        config.server.host.parse().expect("Invalid HOST address"),
        config.server.port,
    );
    tracing::info!(%addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    // --- Post-shutdown cleanup ---
    tracing::info!(
        running = supervisor.running_count(),
        queued = supervisor.queued_count(),
        "Server stopped accepting connections, stopping jobs"
    );
    let grace = Duration::from_secs(config.server.shutdown_timeout_secs);
    if tokio::time::timeout(grace, supervisor.shutdown()).await.is_err() {
        tracing::warn!(?grace, "Job supervisor did not stop in time");
    }

    tracing::info!("Graceful shutdown complete");
}

/// Read the initial report catalog from a JSON array file.
async fn load_reports(path: &Path) -> Result<Vec<ReportDefinition>, String> {
    let raw = tokio::fs::read(path)
        .await
        .map_err(|e| format!("{}: {e}", path.display()))?;
    serde_json::from_slice(&raw).map_err(|e| format!("{}: {e}", path.display()))
}

/// Wait for SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
