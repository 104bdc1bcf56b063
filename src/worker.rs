//! Scheduler that drives the pipeline for one tenant.
//!
//! A [`Worker`] owns a single cron job and a background reconciler. The job
//! and manual triggers both funnel into one in-flight-guarded entry point:
//! while a run is in progress, further triggers are dropped rather than
//! queued.
//!
//! ```text
//! cron tick ──┐
//!             ├──► in-flight guard ──► Orchestrator::run ──► workerLastRun
//! manual  ────┘         │
//!                       └── busy: skip
//! ```
//!
//! Lifecycle is explicit: the hosting process calls [`Worker::ensure_running`]
//! once at startup and [`Worker::stop`] on shutdown.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, Weak};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tokio_cron_scheduler::{Job, JobScheduler};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::BoxError;
use crate::config::AgentConfigPatch;
use crate::models::{AgentRunLog, RunStatus};
use crate::pipeline::{Orchestrator, PipelineProgress, RunOutcome};
use crate::store::{SettingsStore, update_agent_config};

/// Settings-store key holding the last run's [`LastRun`].
pub const WORKER_LAST_RUN_KEY: &str = "workerLastRun";

#[derive(Debug, Error)]
pub enum ScheduleError {
    #[error("invalid cron expression `{expr}`: {reason}")]
    InvalidCron { expr: String, reason: String },
    #[error("scheduler error: {0}")]
    Scheduler(String),
    #[error("settings store error: {0}")]
    Store(#[source] BoxError),
}

/// When the last run finished and how it went.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LastRun {
    pub at: DateTime<Utc>,
    pub result: String,
}

/// What a manual trigger caller gets back.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub status: RunStatus,
    pub processed: usize,
    pub published: usize,
    pub article_ids: Vec<String>,
    pub errors: Vec<String>,
}

impl From<&RunOutcome> for RunSummary {
    fn from(outcome: &RunOutcome) -> Self {
        Self {
            status: outcome.log.status,
            processed: outcome.log.items_processed,
            published: outcome.published.len(),
            article_ids: outcome
                .published
                .iter()
                .map(|p| p.article_id.clone())
                .collect(),
            errors: outcome.log.errors.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub enum TriggerOutcome {
    Started(RunSummary),
    /// Another run was in flight; nothing was started.
    AlreadyRunning,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerStatus {
    /// Whether the cron job is armed.
    pub active: bool,
    /// Whether a run is in flight.
    pub running: bool,
    pub schedule: Option<String>,
    pub last_run: Option<DateTime<Utc>>,
    pub last_result: Option<String>,
    pub progress: PipelineProgress,
}

#[derive(Debug, Clone)]
pub struct WorkerOptions {
    pub tenant_id: String,
    pub reconcile_interval: Duration,
}

#[derive(Default)]
struct Armed {
    scheduler: Option<JobScheduler>,
    job_id: Option<Uuid>,
    schedule: Option<String>,
    reconciler: Option<JoinHandle<()>>,
}

struct WorkerInner {
    options: WorkerOptions,
    orchestrator: Orchestrator,
    in_flight: AtomicBool,
    /// Signalled whenever the in-flight flag clears.
    idle: Notify,
    armed: Mutex<Armed>,
    last_run: StdMutex<Option<LastRun>>,
    /// Cancelled by `stop`; replaced on the next start.
    shutdown: StdMutex<CancellationToken>,
}

/// Clears the in-flight flag when the run ends, however it ends, and
/// wakes anyone waiting in [`Worker::stop`].
struct InFlight<'a>(&'a WorkerInner);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.in_flight.store(false, Ordering::Release);
        self.0.idle.notify_waiters();
    }
}

/// Cheap handle; clones share one scheduler.
#[derive(Clone)]
pub struct Worker {
    inner: Arc<WorkerInner>,
}

impl Worker {
    pub fn new(orchestrator: Orchestrator, options: WorkerOptions) -> Self {
        Self {
            inner: Arc::new(WorkerInner {
                options,
                orchestrator,
                in_flight: AtomicBool::new(false),
                idle: Notify::new(),
                armed: Mutex::new(Armed::default()),
                last_run: StdMutex::new(None),
                shutdown: StdMutex::new(CancellationToken::new()),
            }),
        }
    }

    pub fn tenant_id(&self) -> &str {
        &self.inner.options.tenant_id
    }

    pub fn is_running(&self) -> bool {
        self.inner.in_flight.load(Ordering::Acquire)
    }

    /// Arm the cron job and start reconciliation.
    ///
    /// The schedule comes from the tenant's persisted `agentConfig`; when
    /// that is unreadable or invalid, the default schedule is armed instead.
    /// The persisted `workerLastRun` is loaded so status survives restarts.
    /// Calling it again while active does nothing.
    ///
    /// # Errors
    ///
    /// [`ScheduleError::InvalidCron`] when the default schedule itself is
    /// invalid, [`ScheduleError::Scheduler`] when the job cannot be armed.
    #[instrument(level = "info", skip(self), fields(tenant = %self.tenant_id()))]
    pub async fn ensure_running(&self) -> Result<(), ScheduleError> {
        let mut armed = self.inner.armed.lock().await;
        if armed.scheduler.is_some() {
            debug!("Worker already running");
            return Ok(());
        }

        let token = {
            let mut shutdown = lock(&self.inner.shutdown);
            if shutdown.is_cancelled() {
                *shutdown = CancellationToken::new();
            }
            shutdown.clone()
        };

        self.load_last_run().await;

        let fallback = normalize_cron(&self.inner.orchestrator.defaults().cron_schedule)?;
        let schedule = match self.persisted_schedule().await {
            Ok(expr) => expr,
            Err(e) => {
                warn!(error = %e, "Could not read persisted schedule; using default");
                fallback.clone()
            }
        };
        let (schedule, job) = match self.build_job(&schedule) {
            Ok(job) => (schedule, job),
            Err(e) => {
                warn!(error = %e, "Persisted schedule is invalid; using default");
                let job = self.build_job(&fallback)?;
                (fallback, job)
            }
        };

        let scheduler = JobScheduler::new().await.map_err(scheduler_error)?;
        let job_id = scheduler.add(job).await.map_err(scheduler_error)?;
        scheduler.start().await.map_err(scheduler_error)?;

        armed.reconciler = Some(spawn_reconciler(
            Arc::downgrade(&self.inner),
            self.inner.options.reconcile_interval,
            token,
        ));
        armed.scheduler = Some(scheduler);
        armed.job_id = Some(job_id);
        info!(%schedule, "Worker started");
        armed.schedule = Some(schedule);
        Ok(())
    }

    /// Disarm the job, stop reconciliation and cancel any in-flight run.
    ///
    /// Cancellation takes effect at the run's next stage boundary, so this
    /// waits for the current stage to finish. When it returns, no run is in
    /// flight and the cancelled run's log has been persisted.
    ///
    /// Runs triggered after `stop` are cancelled before their first stage
    /// until [`Worker::ensure_running`] is called again.
    #[instrument(level = "info", skip(self), fields(tenant = %self.tenant_id()))]
    pub async fn stop(&self) {
        lock(&self.inner.shutdown).cancel();

        {
            let mut armed = self.inner.armed.lock().await;
            if let Some(handle) = armed.reconciler.take() {
                handle.abort();
            }
            if let Some(mut scheduler) = armed.scheduler.take()
                && let Err(e) = scheduler.shutdown().await
            {
                warn!(error = %e, "Scheduler shutdown reported an error");
            }
            armed.job_id = None;
            armed.schedule = None;
        }

        self.wait_idle().await;
        info!("Worker stopped");
    }

    async fn wait_idle(&self) {
        loop {
            let idle = self.inner.idle.notified();
            tokio::pin!(idle);
            // Register before checking, so a run ending in between still wakes us.
            idle.as_mut().enable();
            if !self.is_running() {
                return;
            }
            debug!("Waiting for the in-flight run to reach a stage boundary");
            idle.await;
        }
    }

    /// Run the pipeline now, unless a run is already in flight.
    ///
    /// Bypasses the timer but not the in-flight guard: a concurrent trigger
    /// is dropped, never queued.
    ///
    /// # Returns
    ///
    /// [`TriggerOutcome::Started`] with the finished run's summary, or
    /// [`TriggerOutcome::AlreadyRunning`] when nothing was started.
    #[instrument(level = "info", skip(self, overrides), fields(tenant = %self.tenant_id()))]
    pub async fn trigger_manual_run(&self, overrides: Option<AgentConfigPatch>) -> TriggerOutcome {
        match self.run_guarded(overrides).await {
            Some(outcome) => TriggerOutcome::Started(RunSummary::from(&outcome)),
            None => {
                info!("Manual trigger ignored; a run is already in flight");
                TriggerOutcome::AlreadyRunning
            }
        }
    }

    /// Validate `expr`, persist it into `agentConfig.cronSchedule` and re-arm
    /// the job.
    ///
    /// # Arguments
    ///
    /// * `expr` - 5-field (minute-first) or 6/7-field (seconds-first) cron
    ///
    /// # Returns
    ///
    /// The normalised, seconds-first expression now armed.
    ///
    /// # Errors
    ///
    /// [`ScheduleError::InvalidCron`] for a malformed expression,
    /// [`ScheduleError::Store`] when persisting fails. On any error the
    /// current schedule stays armed.
    #[instrument(level = "info", skip(self), fields(tenant = %self.tenant_id()))]
    pub async fn update_schedule(&self, expr: &str) -> Result<String, ScheduleError> {
        let schedule = normalize_cron(expr)?;
        let job = self.build_job(&schedule)?;

        let mut armed = self.inner.armed.lock().await;
        let patch = AgentConfigPatch {
            cron_schedule: Some(schedule.clone()),
            ..Default::default()
        };
        update_agent_config(
            self.inner.orchestrator.settings().as_ref(),
            self.tenant_id(),
            &patch,
        )
        .await
        .map_err(ScheduleError::Store)?;

        if armed.scheduler.is_some() {
            rearm(&mut armed, job, schedule.clone()).await?;
        }
        info!(%schedule, "Schedule updated");
        Ok(schedule)
    }

    /// Re-read the persisted schedule and re-arm when it changed.
    /// Returns whether the job was re-armed.
    pub async fn reconcile(&self) -> Result<bool, ScheduleError> {
        let desired = self
            .persisted_schedule()
            .await
            .map_err(ScheduleError::Store)?;

        let mut armed = self.inner.armed.lock().await;
        if armed.scheduler.is_none() || armed.schedule.as_deref() == Some(desired.as_str()) {
            return Ok(false);
        }

        let job = self.build_job(&desired)?;
        info!(from = ?armed.schedule, to = %desired, "Persisted schedule changed; re-arming");
        rearm(&mut armed, job, desired).await?;
        Ok(true)
    }

    /// Never fails; reflects the last known terminal result.
    pub async fn status(&self) -> WorkerStatus {
        let (active, schedule) = {
            let armed = self.inner.armed.lock().await;
            (armed.scheduler.is_some(), armed.schedule.clone())
        };
        let last = lock(&self.inner.last_run).clone();
        WorkerStatus {
            active,
            running: self.is_running(),
            schedule,
            last_run: last.as_ref().map(|l| l.at),
            last_result: last.map(|l| l.result),
            progress: self.inner.orchestrator.progress().snapshot(),
        }
    }

    async fn tick(&self) {
        if self.is_running() {
            info!("Scheduled tick skipped; a run is already in flight");
            return;
        }
        match self
            .inner
            .orchestrator
            .resolve_config(self.tenant_id(), None)
            .await
        {
            Ok(config) if !config.enabled => {
                info!("Scheduled tick skipped; agent disabled");
                return;
            }
            Err(e) => {
                warn!(error = %e, "Scheduled tick skipped; configuration unreadable");
                return;
            }
            Ok(_) => {}
        }
        if self.run_guarded(None).await.is_none() {
            info!("Scheduled tick lost the race to another run");
        }
    }

    async fn run_guarded(&self, overrides: Option<AgentConfigPatch>) -> Option<RunOutcome> {
        if self
            .inner
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return None;
        }
        let _flight = InFlight(&self.inner);

        let cancel = lock(&self.inner.shutdown).child_token();
        let outcome = self
            .inner
            .orchestrator
            .run(self.tenant_id(), overrides, &cancel)
            .await;
        self.record_last_run(&outcome.log).await;
        Some(outcome)
    }

    async fn record_last_run(&self, log: &AgentRunLog) {
        let last = LastRun {
            at: log.completed_at.unwrap_or_else(Utc::now),
            result: describe(log),
        };
        *lock(&self.inner.last_run) = Some(last.clone());

        let persisted = match serde_json::to_value(&last) {
            Ok(value) => {
                self.inner
                    .orchestrator
                    .settings()
                    .set(self.tenant_id(), WORKER_LAST_RUN_KEY, value)
                    .await
            }
            Err(e) => Err(e.into()),
        };
        if let Err(e) = persisted {
            warn!(error = %e, "Failed to persist last run");
        }
    }

    async fn load_last_run(&self) {
        let stored = self
            .inner
            .orchestrator
            .settings()
            .get(self.tenant_id(), WORKER_LAST_RUN_KEY)
            .await;
        match stored {
            Ok(Some(value)) => match serde_json::from_value::<LastRun>(value) {
                Ok(last) => *lock(&self.inner.last_run) = Some(last),
                Err(e) => warn!(error = %e, "Ignoring unreadable last run record"),
            },
            Ok(None) => {}
            Err(e) => warn!(error = %e, "Failed to load last run"),
        }
    }

    async fn persisted_schedule(&self) -> Result<String, BoxError> {
        let config = self
            .inner
            .orchestrator
            .resolve_config(self.tenant_id(), None)
            .await?;
        Ok(normalize_cron(&config.cron_schedule)?)
    }

    fn build_job(&self, schedule: &str) -> Result<Job, ScheduleError> {
        let weak = Arc::downgrade(&self.inner);
        Job::new_async(schedule, move |_uuid, _lock| {
            let weak = weak.clone();
            Box::pin(async move {
                if let Some(inner) = weak.upgrade() {
                    Worker { inner }.tick().await;
                }
            })
        })
        .map_err(|e| ScheduleError::InvalidCron {
            expr: schedule.to_string(),
            reason: e.to_string(),
        })
    }
}

/// Accept 5-field (minute-first) and 6/7-field (seconds-first) forms;
/// 5-field expressions get a `0` seconds field.
pub fn normalize_cron(expr: &str) -> Result<String, ScheduleError> {
    let fields: Vec<&str> = expr.split_whitespace().collect();
    match fields.len() {
        5 => Ok(format!("0 {}", fields.join(" "))),
        6 | 7 => Ok(fields.join(" ")),
        n => Err(ScheduleError::InvalidCron {
            expr: expr.to_string(),
            reason: format!("expected 5, 6 or 7 fields, found {n}"),
        }),
    }
}

/// Arm `job` then drop the previous one, so a failure leaves the old job armed.
async fn rearm(armed: &mut Armed, job: Job, schedule: String) -> Result<(), ScheduleError> {
    let Some(scheduler) = armed.scheduler.as_ref() else {
        return Ok(());
    };
    let new_id = scheduler.add(job).await.map_err(scheduler_error)?;
    if let Some(old_id) = armed.job_id.replace(new_id)
        && let Err(e) = scheduler.remove(&old_id).await
    {
        error!(error = %e, %old_id, "Failed to remove previous job");
    }
    armed.schedule = Some(schedule);
    Ok(())
}

fn spawn_reconciler(
    worker: Weak<WorkerInner>,
    interval: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }
            let Some(inner) = worker.upgrade() else { break };
            if let Err(e) = (Worker { inner }).reconcile().await {
                warn!(error = %e, "Schedule reconciliation failed");
            }
        }
        debug!("Reconciler stopped");
    })
}

fn describe(log: &AgentRunLog) -> String {
    match log.status {
        RunStatus::Completed if log.metadata.contains_key("skipped") => {
            "completed: skipped (agent disabled)".to_string()
        }
        RunStatus::Completed => format!(
            "completed: {} published of {} topics",
            log.items_successful, log.items_processed
        ),
        RunStatus::Failed => format!("failed: {}", log.errors.join("; ")),
        RunStatus::Cancelled => "cancelled".to_string(),
        RunStatus::Running => "running".to_string(),
    }
}

fn scheduler_error(e: impl std::fmt::Display) -> ScheduleError {
    ScheduleError::Scheduler(e.to_string())
}

fn lock<T>(m: &StdMutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
