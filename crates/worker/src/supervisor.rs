//! Job supervisor.
//!
//! Owns admission control for report jobs: submitted jobs are created in
//! the [`JobStore`] and pushed onto a FIFO queue consumed by a fixed pool of
//! worker tasks, so at most `max_concurrent` runs are active at once. Each
//! run executes on its own task, bounded by the job timeout and observed
//! through a per-job cancellation token derived from the shutdown token.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use thinkion_core::error::CoreError;
use thinkion_core::job::{ErrorKind, JobError, JobTransition};
use thinkion_core::report::JobParameters;
use thinkion_core::store::JobStore;
use thinkion_core::types::JobId;
use thinkion_runner::{AutomationRunner, LogSink, RunFailure, RunOutput};
use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;

use crate::log_file::JobLogWriter;

/// Default wall-clock limit of one run.
const DEFAULT_JOB_TIMEOUT: Duration = Duration::from_secs(300);

/// Default time a cancelled run gets to clean up before it is aborted.
const DEFAULT_CANCEL_GRACE: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy)]
pub struct SupervisorConfig {
    /// Number of worker tasks, i.e. the maximum number of concurrent runs.
    pub max_concurrent: usize,
    pub job_timeout: Duration,
    pub cancel_grace: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 1,
            job_timeout: DEFAULT_JOB_TIMEOUT,
            cancel_grace: DEFAULT_CANCEL_GRACE,
        }
    }
}

struct QueuedJob {
    id: JobId,
    params: JobParameters,
}

/// Bookkeeping for a job that has not finished yet.
struct Slot {
    cancel: CancellationToken,
    running: bool,
}

enum Claim {
    Run(CancellationToken),
    /// Cancelled by shutdown while still queued.
    Abandon,
    /// Already failed by `cancel` while queued.
    Skip,
}

enum Outcome {
    Finished(Result<Result<RunOutput, RunFailure>, JoinError>),
    Cancelled,
    TimedOut,
}

/// Drains a run's [`LogSink`] into the store and the job log file until
/// every sender is gone, so lines arriving after the terminal transition
/// are still kept.
struct LogForwarder {
    flush: mpsc::UnboundedSender<oneshot::Sender<()>>,
}

impl LogForwarder {
    /// Wait until every line sent so far has been appended.
    async fn flush(&self) {
        let (ack, done) = oneshot::channel();
        if self.flush.send(ack).is_ok() {
            let _ = done.await;
        }
    }
}

pub struct JobSupervisor {
    store: Arc<JobStore>,
    runner: Arc<dyn AutomationRunner>,
    config: SupervisorConfig,
    log_writer: Option<JobLogWriter>,
    queue: mpsc::UnboundedSender<QueuedJob>,
    shutdown: CancellationToken,
    active: Mutex<HashMap<JobId, Slot>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl JobSupervisor {
    /// Create the supervisor and spawn its worker pool.
    pub fn start(
        store: Arc<JobStore>,
        runner: Arc<dyn AutomationRunner>,
        config: SupervisorConfig,
        log_writer: Option<JobLogWriter>,
    ) -> Arc<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        let supervisor = Arc::new(Self {
            store,
            runner,
            config,
            log_writer,
            queue: tx,
            shutdown: CancellationToken::new(),
            active: Mutex::new(HashMap::new()),
            workers: Mutex::new(Vec::new()),
        });

        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        let worker_count = config.max_concurrent.max(1);
        let handles: Vec<_> = (0..worker_count)
            .map(|worker| tokio::spawn(Arc::clone(&supervisor).worker_loop(worker, Arc::clone(&rx))))
            .collect();
        lock(&supervisor.workers).extend(handles);

        tracing::info!(
            workers = worker_count,
            job_timeout_secs = config.job_timeout.as_secs(),
            "Job supervisor started",
        );
        supervisor
    }

    /// Register a job and enqueue it. Never waits for the run.
    pub async fn submit(&self, params: JobParameters) -> Result<JobId, CoreError> {
        if self.shutdown.is_cancelled() {
            return Err(CoreError::Conflict("Service is shutting down".to_string()));
        }
        let parameters = serde_json::to_value(&params)
            .map_err(|e| CoreError::Internal(format!("Failed to encode job parameters: {e}")))?;

        let id = self.store.create(parameters).await;
        lock(&self.active).insert(
            id,
            Slot {
                cancel: self.shutdown.child_token(),
                running: false,
            },
        );

        let report = params.report.report_name.clone();
        if self.queue.send(QueuedJob { id, params }).is_err() {
            lock(&self.active).remove(&id);
            let message = "Job queue is closed";
            self.resolve(id, Err(JobError::new(ErrorKind::InternalError, message)))
                .await;
            return Err(CoreError::Internal(message.to_string()));
        }

        tracing::info!(job_id = %id, report = %report, "Job queued");
        Ok(id)
    }

    /// Cancel a queued or running job.
    ///
    /// A queued job is failed right away and never started; a running job
    /// has its token triggered and fails once the run stops. `Conflict`
    /// once the job is terminal.
    pub async fn cancel(&self, id: JobId) -> Result<(), CoreError> {
        // A timed-out run still holds its slot during the cleanup grace.
        let status = self.store.status(id).await?;
        if status.is_terminal() {
            return Err(CoreError::Conflict(format!("Job {id} is already {status}")));
        }

        let was_queued = {
            let mut active = lock(&self.active);
            match active.get(&id).map(|slot| slot.running) {
                None => None,
                Some(true) => {
                    if let Some(slot) = active.get(&id) {
                        slot.cancel.cancel();
                    }
                    Some(false)
                }
                Some(false) => {
                    if let Some(slot) = active.remove(&id) {
                        slot.cancel.cancel();
                    }
                    Some(true)
                }
            }
        };

        match was_queued {
            Some(true) => {
                self.resolve(
                    id,
                    Err(JobError::new(ErrorKind::Cancelled, "Job cancelled before start")),
                )
                .await;
                Ok(())
            }
            Some(false) => {
                tracing::info!(job_id = %id, "Cancellation requested");
                Ok(())
            }
            None => {
                let status = self.store.status(id).await?;
                Err(CoreError::Conflict(format!("Job {id} is already {status}")))
            }
        }
    }

    pub fn running_count(&self) -> usize {
        lock(&self.active).values().filter(|slot| slot.running).count()
    }

    pub fn queued_count(&self) -> usize {
        lock(&self.active).values().filter(|slot| !slot.running).count()
    }

    /// Stop the pool: cancel running jobs, fail queued ones and wait for
    /// the workers (bounded by the cancel grace period).
    pub async fn shutdown(&self) {
        tracing::info!("Job supervisor shutting down");
        self.shutdown.cancel();

        let abandoned: Vec<JobId> = {
            let mut active = lock(&self.active);
            let ids: Vec<JobId> = active
                .iter()
                .filter(|(_, slot)| !slot.running)
                .map(|(id, _)| *id)
                .collect();
            for id in &ids {
                active.remove(id);
            }
            ids
        };
        for id in abandoned {
            self.abandon(id).await;
        }

        let workers = std::mem::take(&mut *lock(&self.workers));
        let deadline = tokio::time::Instant::now() + self.config.cancel_grace + Duration::from_secs(1);
        for handle in workers {
            let abort = handle.abort_handle();
            if tokio::time::timeout_at(deadline, handle).await.is_err() {
                tracing::warn!("Job worker did not stop in time; aborting");
                abort.abort();
            }
        }
        tracing::info!("Job supervisor stopped");
    }

    // -----------------------------------------------------------------------
    // Workers
    // -----------------------------------------------------------------------

    async fn worker_loop(
        self: Arc<Self>,
        worker: usize,
        queue: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<QueuedJob>>>,
    ) {
        tracing::debug!(worker, "Job worker started");
        loop {
            let next = {
                let mut rx = queue.lock().await;
                tokio::select! {
                    biased;
                    _ = self.shutdown.cancelled() => None,
                    job = rx.recv() => job,
                }
            };
            let Some(job) = next else {
                break;
            };
            self.execute(job).await;
        }
        tracing::debug!(worker, "Job worker stopped");
    }

    fn claim(&self, id: JobId) -> Claim {
        let mut active = lock(&self.active);
        let claim = match active.get_mut(&id) {
            None => Claim::Skip,
            Some(slot) if slot.cancel.is_cancelled() => Claim::Abandon,
            Some(slot) => {
                slot.running = true;
                Claim::Run(slot.cancel.clone())
            }
        };
        if matches!(claim, Claim::Abandon) {
            active.remove(&id);
        }
        claim
    }

    async fn execute(&self, job: QueuedJob) {
        let QueuedJob { id, params } = job;
        let cancel = match self.claim(id) {
            Claim::Run(cancel) => cancel,
            Claim::Abandon => return self.abandon(id).await,
            Claim::Skip => return,
        };

        if let Err(e) = self.store.transition(id, JobTransition::Start).await {
            tracing::error!(job_id = %id, error = %e, "Failed to start job");
            lock(&self.active).remove(&id);
            return;
        }
        tracing::info!(job_id = %id, report = %params.report.report_name, "Job started");
        self.record(
            id,
            format!(
                "Job started: report '{}' from {} to {}",
                params.report.report_name, params.date_from, params.date_to
            ),
        )
        .await;

        let (sink, rx) = LogSink::channel();
        let forwarder = self.forward_logs(id, rx);

        let runner = Arc::clone(&self.runner);
        let run_cancel = cancel.clone();
        let mut handle =
            tokio::spawn(async move { runner.run(id, &params, sink, run_cancel).await });

        let outcome = tokio::select! {
            joined = &mut handle => Outcome::Finished(joined),
            _ = cancel.cancelled() => Outcome::Cancelled,
            _ = tokio::time::sleep(self.config.job_timeout) => Outcome::TimedOut,
        };

        match outcome {
            Outcome::Finished(joined) => {
                forwarder.flush().await;
                self.resolve(id, outcome_of(joined)).await;
            }
            Outcome::Cancelled => {
                let result = match tokio::time::timeout(self.config.cancel_grace, &mut handle).await {
                    Ok(joined) => outcome_of(joined),
                    Err(_) => {
                        handle.abort();
                        tracing::warn!(job_id = %id, "Runner ignored cancellation; aborted");
                        Err(JobError::new(ErrorKind::Cancelled, "Run cancelled"))
                    }
                };
                forwarder.flush().await;
                self.resolve(id, result).await;
            }
            Outcome::TimedOut => {
                forwarder.flush().await;
                let message = format!("Job exceeded timeout of {:?}", self.config.job_timeout);
                self.resolve(id, Err(JobError::new(ErrorKind::Timeout, message)))
                    .await;

                cancel.cancel();
                if tokio::time::timeout(self.config.cancel_grace, &mut handle)
                    .await
                    .is_err()
                {
                    handle.abort();
                    tracing::warn!(job_id = %id, "Runner did not stop after timeout; aborted");
                }
            }
        }

        lock(&self.active).remove(&id);
    }

    fn forward_logs(&self, id: JobId, mut rx: mpsc::UnboundedReceiver<String>) -> LogForwarder {
        let (flush, mut flush_rx) = mpsc::unbounded_channel::<oneshot::Sender<()>>();
        let store = Arc::clone(&self.store);
        let writer = self.log_writer.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    line = rx.recv() => match line {
                        Some(line) => append_line(&store, writer.as_ref(), id, line).await,
                        None => break,
                    },
                    Some(ack) = flush_rx.recv() => {
                        while let Ok(line) = rx.try_recv() {
                            append_line(&store, writer.as_ref(), id, line).await;
                        }
                        let _ = ack.send(());
                    }
                }
            }
            // Senders are gone; answer any pending flush.
            while let Ok(ack) = flush_rx.try_recv() {
                let _ = ack.send(());
            }
        });
        LogForwarder { flush }
    }

    async fn record(&self, id: JobId, line: String) {
        append_line(&self.store, self.log_writer.as_ref(), id, line).await;
    }

    async fn abandon(&self, id: JobId) {
        self.resolve(
            id,
            Err(JobError::new(ErrorKind::Cancelled, "Service shutting down")),
        )
        .await;
    }

    /// Log the outcome, then apply the terminal transition.
    async fn resolve(&self, id: JobId, outcome: Result<RunOutput, JobError>) {
        let transition = match outcome {
            Ok(RunOutput { result, artifacts }) => {
                if !artifacts.is_empty() {
                    let names: Vec<String> = artifacts
                        .iter()
                        .filter_map(|path| path.file_name())
                        .map(|name| name.to_string_lossy().into_owned())
                        .collect();
                    self.record(id, format!("Retained files: {}", names.join(", ")))
                        .await;
                }
                self.record(id, "Job completed successfully".to_string())
                    .await;
                tracing::info!(job_id = %id, "Job succeeded");
                JobTransition::Succeed(result)
            }
            Err(error) => {
                self.record(id, format!("Job failed: {}: {}", error.kind, error.message))
                    .await;
                tracing::warn!(job_id = %id, kind = %error.kind, message = %error.message, "Job failed");
                JobTransition::Fail(error)
            }
        };
        if let Err(e) = self.store.transition(id, transition).await {
            tracing::error!(job_id = %id, error = %e, "Failed to record job outcome");
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

async fn append_line(store: &JobStore, writer: Option<&JobLogWriter>, id: JobId, line: String) {
    if let Some(writer) = writer {
        writer.append(id, &line).await;
    }
    if let Err(e) = store.append_log(id, line).await {
        tracing::warn!(job_id = %id, error = %e, "Failed to append job log");
    }
}

fn outcome_of(joined: Result<Result<RunOutput, RunFailure>, JoinError>) -> Result<RunOutput, JobError> {
    match joined {
        Ok(Ok(output)) => Ok(output),
        Ok(Err(failure)) => Err(failure.into()),
        Err(e) => Err(JobError::new(ErrorKind::InternalError, panic_message(e))),
    }
}

fn panic_message(err: JoinError) -> String {
    if !err.is_panic() {
        return "Runner task was aborted".to_string();
    }
    let payload = err.into_panic();
    let detail = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    format!("Runner panicked: {detail}")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use assert_matches::assert_matches;
    use serde_json::json;
    use thinkion_core::job::{Job, JobStatus};
    use thinkion_core::report::ReportDefinition;

    use super::*;

    #[derive(Clone, Copy)]
    enum Behavior {
        Succeed,
        FailLogin,
        Panic,
        /// Waits for cancellation, then stops.
        Hang,
        /// Never observes cancellation.
        Stubborn,
        /// Keeps logging from a detached task after returning.
        LateLog,
        /// Succeeds and reports the files it kept on disk.
        Retain,
    }

    struct FakeRunner {
        behavior: Behavior,
        delay: Duration,
        started: Mutex<Vec<String>>,
        active: AtomicUsize,
        peak: AtomicUsize,
    }

    impl FakeRunner {
        fn new(behavior: Behavior, delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                behavior,
                delay,
                started: Mutex::new(Vec::new()),
                active: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            })
        }

        fn started(&self) -> Vec<String> {
            self.started.lock().unwrap().clone()
        }
    }

    #[async_trait::async_trait]
    impl AutomationRunner for FakeRunner {
        async fn run(
            &self,
            _job_id: JobId,
            params: &JobParameters,
            log: LogSink,
            cancel: CancellationToken,
        ) -> Result<RunOutput, RunFailure> {
            self.started
                .lock()
                .unwrap()
                .push(params.report.report_name.clone());
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            log.log("logged in");

            let outcome = match self.behavior {
                Behavior::Succeed => tokio::select! {
                    _ = cancel.cancelled() => Err(RunFailure::cancelled()),
                    _ = tokio::time::sleep(self.delay) => Ok(RunOutput {
                        result: json!([{"Total": "10"}]),
                        artifacts: Vec::new(),
                    }),
                },
                Behavior::FailLogin => Err(RunFailure::authentication("Login rejected")),
                Behavior::Panic => panic!("driver exploded"),
                Behavior::Hang => {
                    cancel.cancelled().await;
                    Err(RunFailure::cancelled())
                }
                Behavior::Stubborn => {
                    tokio::time::sleep(Duration::from_secs(30)).await;
                    Ok(RunOutput {
                        result: json!([]),
                        artifacts: Vec::new(),
                    })
                }
                Behavior::Retain => Ok(RunOutput {
                    result: json!([]),
                    artifacts: vec![
                        PathBuf::from("downloads/job/account-1_ventas_20240101_000000.xls"),
                        PathBuf::from("downloads/job/account-1_ventas_20240101_000000_2.xls"),
                    ],
                }),
                Behavior::LateLog => {
                    let late = log.clone();
                    tokio::spawn(async move {
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        late.log("late line");
                    });
                    Ok(RunOutput {
                        result: json!([]),
                        artifacts: Vec::new(),
                    })
                }
            };

            log.log("report exported");
            self.active.fetch_sub(1, Ordering::SeqCst);
            outcome
        }
    }

    fn params(report: &str) -> JobParameters {
        JobParameters {
            report: ReportDefinition::ad_hoc(report),
            date_from: "2024-01-01".parse().unwrap(),
            date_to: "2024-01-01".parse().unwrap(),
            account_id: 1,
            web_group_selector: "#group_all".to_string(),
        }
    }

    fn config(max_concurrent: usize) -> SupervisorConfig {
        SupervisorConfig {
            max_concurrent,
            job_timeout: Duration::from_secs(5),
            cancel_grace: Duration::from_millis(200),
        }
    }

    fn start(runner: Arc<FakeRunner>, config: SupervisorConfig) -> (Arc<JobStore>, Arc<JobSupervisor>) {
        let store = Arc::new(JobStore::new());
        let supervisor = JobSupervisor::start(Arc::clone(&store), runner, config, None);
        (store, supervisor)
    }

    async fn wait_terminal(store: &JobStore, id: JobId) -> Job {
        for _ in 0..500 {
            let job = store.get(id).await.unwrap();
            if job.status.is_terminal() {
                return job;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job {id} did not finish");
    }

    fn messages(job: &Job) -> Vec<&str> {
        job.log.iter().map(|l| l.message.as_str()).collect()
    }

    #[tokio::test]
    async fn submit_returns_before_run() {
        let runner = FakeRunner::new(Behavior::Succeed, Duration::from_millis(300));
        let (store, supervisor) = start(runner, config(1));

        let first = supervisor.submit(params("a")).await.unwrap();
        let second = supervisor.submit(params("b")).await.unwrap();

        assert!(!store.status(first).await.unwrap().is_terminal());
        assert_eq!(store.status(second).await.unwrap(), JobStatus::Queued);
    }

    #[tokio::test]
    async fn successful_run_records_result_and_log() {
        let runner = FakeRunner::new(Behavior::Succeed, Duration::from_millis(10));
        let (store, supervisor) = start(runner, config(1));

        let id = supervisor.submit(params("daily_sales")).await.unwrap();
        let job = wait_terminal(&store, id).await;

        assert_eq!(job.status, JobStatus::Succeeded);
        assert_eq!(job.result, Some(json!([{"Total": "10"}])));
        assert!(job.error.is_none());
        assert!(job.started_at.is_some() && job.finished_at.is_some());
        let log = messages(&job);
        assert!(log[0].starts_with("Job started: report 'daily_sales'"));
        assert_eq!(&log[1..], ["logged in", "report exported", "Job completed successfully"]);
    }

    #[tokio::test]
    async fn failure_is_recorded_with_reason() {
        let runner = FakeRunner::new(Behavior::FailLogin, Duration::ZERO);
        let (store, supervisor) = start(runner, config(1));

        let id = supervisor.submit(params("daily_sales")).await.unwrap();
        let job = wait_terminal(&store, id).await;

        assert_eq!(job.status, JobStatus::Failed);
        let error = job.error.clone().unwrap();
        assert_eq!(error.kind, ErrorKind::AuthenticationFailed);
        assert_eq!(error.message, "Login rejected");
        assert_eq!(
            messages(&job).last().copied(),
            Some("Job failed: AuthenticationFailed: Login rejected")
        );
        assert!(job.result.is_none());
    }

    #[tokio::test]
    async fn concurrency_is_bounded() {
        let runner = FakeRunner::new(Behavior::Succeed, Duration::from_millis(80));
        let (store, supervisor) = start(Arc::clone(&runner), config(2));

        let mut ids = Vec::new();
        for i in 0..5 {
            ids.push(supervisor.submit(params(&format!("r{i}"))).await.unwrap());
        }
        for id in ids {
            assert_eq!(wait_terminal(&store, id).await.status, JobStatus::Succeeded);
        }
        assert_eq!(runner.peak.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn pool_holds_extra_job_in_queue() {
        let runner = FakeRunner::new(Behavior::Hang, Duration::ZERO);
        let mut cfg = config(3);
        cfg.job_timeout = Duration::from_secs(30);
        let (store, supervisor) = start(runner, cfg);

        for i in 0..4 {
            supervisor.submit(params(&format!("r{i}"))).await.unwrap();
        }
        while supervisor.running_count() < 3 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        while store.count_by_status().await.running < 3 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;

        let counts = store.count_by_status().await;
        assert_eq!(counts.running, 3);
        assert_eq!(counts.queued, 1);
        assert_eq!(supervisor.running_count(), 3);
        assert_eq!(supervisor.queued_count(), 1);

        supervisor.shutdown().await;
    }

    #[tokio::test]
    async fn jobs_start_in_submission_order() {
        let runner = FakeRunner::new(Behavior::Succeed, Duration::from_millis(5));
        let (store, supervisor) = start(Arc::clone(&runner), config(1));

        let mut last = None;
        for i in 0..5 {
            last = Some(supervisor.submit(params(&format!("r{i}"))).await.unwrap());
        }
        wait_terminal(&store, last.unwrap()).await;
        assert_eq!(runner.started(), ["r0", "r1", "r2", "r3", "r4"]);
    }

    #[tokio::test]
    async fn timeout_fails_job() {
        let runner = FakeRunner::new(Behavior::Hang, Duration::ZERO);
        let mut cfg = config(1);
        cfg.job_timeout = Duration::from_millis(100);
        let (store, supervisor) = start(runner, cfg);

        let id = supervisor.submit(params("slow")).await.unwrap();
        let job = wait_terminal(&store, id).await;
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error.unwrap().kind, ErrorKind::Timeout);
    }

    #[tokio::test]
    async fn stubborn_runner_is_aborted_and_slot_freed() {
        let runner = FakeRunner::new(Behavior::Stubborn, Duration::ZERO);
        let mut cfg = config(1);
        cfg.job_timeout = Duration::from_millis(100);
        let (store, supervisor) = start(Arc::clone(&runner), cfg);

        let first = supervisor.submit(params("first")).await.unwrap();
        let second = supervisor.submit(params("second")).await.unwrap();

        assert_eq!(wait_terminal(&store, first).await.error.unwrap().kind, ErrorKind::Timeout);
        assert_eq!(wait_terminal(&store, second).await.error.unwrap().kind, ErrorKind::Timeout);
        assert_eq!(runner.started(), ["first", "second"]);
    }

    #[tokio::test]
    async fn cancel_after_timeout_is_conflict() {
        let runner = FakeRunner::new(Behavior::Stubborn, Duration::ZERO);
        let mut cfg = config(1);
        cfg.job_timeout = Duration::from_millis(100);
        cfg.cancel_grace = Duration::from_secs(5);
        let (store, supervisor) = start(runner, cfg);

        let id = supervisor.submit(params("slow")).await.unwrap();
        let job = wait_terminal(&store, id).await;
        assert_eq!(job.error.unwrap().kind, ErrorKind::Timeout);

        // Still inside the cleanup grace: the slot is held.
        assert_eq!(supervisor.running_count(), 1);
        assert_matches!(supervisor.cancel(id).await, Err(CoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn retained_files_are_logged() {
        let runner = FakeRunner::new(Behavior::Retain, Duration::ZERO);
        let (store, supervisor) = start(runner, config(1));

        let id = supervisor.submit(params("ventas")).await.unwrap();
        let job = wait_terminal(&store, id).await;

        assert_eq!(job.status, JobStatus::Succeeded);
        assert_eq!(
            &messages(&job)[1..],
            [
                "logged in",
                "report exported",
                "Retained files: account-1_ventas_20240101_000000.xls, account-1_ventas_20240101_000000_2.xls",
                "Job completed successfully",
            ]
        );
    }

    #[tokio::test]
    async fn panic_becomes_internal_error() {
        let runner = FakeRunner::new(Behavior::Panic, Duration::ZERO);
        let (store, supervisor) = start(runner, config(1));

        let id = supervisor.submit(params("boom")).await.unwrap();
        let job = wait_terminal(&store, id).await;
        let error = job.error.unwrap();
        assert_eq!(error.kind, ErrorKind::InternalError);
        assert!(error.message.contains("driver exploded"), "{}", error.message);

        // The pool survives the panic.
        let next = supervisor.submit(params("after")).await.unwrap();
        assert_eq!(wait_terminal(&store, next).await.status, JobStatus::Failed);
    }

    #[tokio::test]
    async fn cancel_running_job() {
        let runner = FakeRunner::new(Behavior::Hang, Duration::ZERO);
        let (store, supervisor) = start(runner, config(1));

        let id = supervisor.submit(params("slow")).await.unwrap();
        while store.status(id).await.unwrap() != JobStatus::Running {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(supervisor.running_count(), 1);

        supervisor.cancel(id).await.unwrap();
        let job = wait_terminal(&store, id).await;
        assert_eq!(job.error.unwrap().kind, ErrorKind::Cancelled);
        while supervisor.running_count() > 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_matches!(supervisor.cancel(id).await, Err(CoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn cancel_queued_job_never_runs_it() {
        let runner = FakeRunner::new(Behavior::Succeed, Duration::from_millis(150));
        let (store, supervisor) = start(Arc::clone(&runner), config(1));

        let first = supervisor.submit(params("first")).await.unwrap();
        let second = supervisor.submit(params("second")).await.unwrap();
        supervisor.cancel(second).await.unwrap();

        let job = store.get(second).await.unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error.unwrap().kind, ErrorKind::Cancelled);
        assert!(job.started_at.is_none());

        assert_eq!(wait_terminal(&store, first).await.status, JobStatus::Succeeded);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(runner.started(), ["first"]);
    }

    #[tokio::test]
    async fn cancel_unknown_job() {
        let runner = FakeRunner::new(Behavior::Succeed, Duration::ZERO);
        let (_store, supervisor) = start(runner, config(1));
        assert_matches!(
            supervisor.cancel(JobId::new_v4()).await,
            Err(CoreError::NotFound { .. })
        );
    }

    #[tokio::test]
    async fn shutdown_cancels_running_and_queued() {
        let runner = FakeRunner::new(Behavior::Hang, Duration::ZERO);
        let (store, supervisor) = start(runner, config(1));

        let running = supervisor.submit(params("running")).await.unwrap();
        let queued = supervisor.submit(params("queued")).await.unwrap();
        while store.status(running).await.unwrap() != JobStatus::Running {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(supervisor.queued_count(), 1);

        supervisor.shutdown().await;

        let job = store.get(running).await.unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error.unwrap().kind, ErrorKind::Cancelled);

        let job = store.get(queued).await.unwrap();
        let error = job.error.unwrap();
        assert_eq!(error.kind, ErrorKind::Cancelled);
        assert_eq!(error.message, "Service shutting down");

        assert_eq!(supervisor.running_count() + supervisor.queued_count(), 0);
        assert_matches!(
            supervisor.submit(params("late")).await,
            Err(CoreError::Conflict(_))
        );
    }

    #[tokio::test]
    async fn late_lines_are_appended_after_completion() {
        let runner = FakeRunner::new(Behavior::LateLog, Duration::ZERO);
        let (store, supervisor) = start(runner, config(1));

        let id = supervisor.submit(params("late")).await.unwrap();
        wait_terminal(&store, id).await;
        tokio::time::sleep(Duration::from_millis(150)).await;

        let job = store.get(id).await.unwrap();
        assert_eq!(job.status, JobStatus::Succeeded);
        assert_eq!(job.result, Some(json!([])));
        assert_eq!(
            &messages(&job)[1..],
            ["logged in", "report exported", "Job completed successfully", "late line"]
        );
    }

    #[tokio::test]
    async fn log_lines_are_mirrored_to_file() {
        let tmp = tempfile::tempdir().unwrap();
        let writer = JobLogWriter::new(tmp.path());
        let store = Arc::new(JobStore::new());
        let supervisor = JobSupervisor::start(
            Arc::clone(&store),
            FakeRunner::new(Behavior::Succeed, Duration::ZERO),
            config(1),
            Some(writer.clone()),
        );

        let id = supervisor.submit(params("daily_sales")).await.unwrap();
        wait_terminal(&store, id).await;

        let content = std::fs::read_to_string(writer.path(id)).unwrap();
        let lines: Vec<_> = content.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(lines[1].ends_with(&format!("[job_id={id}] logged in")));
        assert!(lines[3].ends_with("Job completed successfully"));
    }
}
