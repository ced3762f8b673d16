//! In-process task scheduler.
//!
//! Jobs are registered once at startup. The timetable maps each job name to
//! its next run time; a job seen for the first time is only scheduled, not
//! run. Due jobs are rescheduled before they execute, so a failed run is
//! retried at the next occurrence rather than on the next tick.
//!
//! The timetable is read from its [`TimetableStore`] on the first tick and
//! every reschedule is written back, so a job that fell due while the
//! process was down runs on the first tick after a restart.

use std::{fmt, sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use super::{
    descriptor::{JobError, JobPriority, Plugin, ScheduledJob},
    timetable::{MemoryTimetable, Timetable, TimetableStore},
};
use crate::observability::metrics;

/// Result of executing one job.
#[derive(Debug)]
pub struct JobRun {
    pub job: String,
    pub priority: JobPriority,
    pub outcome: Result<String, JobError>,
    pub elapsed: Duration,
}

impl JobRun {
    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }
}

pub struct TaskScheduler {
    /// Kept sorted by priority; registration order breaks ties.
    jobs: Vec<ScheduledJob>,
    store: Arc<dyn TimetableStore>,
    /// `None` until loaded from `store`.
    timetable: Mutex<Option<Timetable>>,
}

impl fmt::Debug for TaskScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskScheduler")
            .field("jobs", &self.jobs)
            .finish_non_exhaustive()
    }
}

impl Default for TaskScheduler {
    fn default() -> Self {
        Self::with_timetable(Arc::new(MemoryTimetable::new()))
    }
}

impl TaskScheduler {
    /// Scheduler with a process-local timetable.
    pub fn new() -> Self {
        Self::default()
    }

    /// Scheduler whose timetable survives restarts through `store`.
    pub fn with_timetable(store: Arc<dyn TimetableStore>) -> Self {
        Self {
            jobs: Vec::new(),
            store,
            timetable: Mutex::new(None),
        }
    }

    /// Register every job a plugin contributes.
    pub fn register_plugin(&mut self, plugin: &dyn Plugin) {
        let jobs = plugin.scheduled_jobs();
        tracing::debug!(plugin = plugin.name(), jobs = jobs.len(), "Registering plugin jobs");
        for job in jobs {
            self.register(job);
        }
    }

    /// Register a single job. A second job with the same name is ignored.
    pub fn register(&mut self, job: ScheduledJob) {
        let name = job.name();
        if self.jobs.iter().any(|j| j.name() == name) {
            tracing::warn!(job = %name, "Job already registered, ignoring duplicate");
            return;
        }
        self.jobs.push(job);
        self.jobs.sort_by_key(|j| j.priority());
    }

    pub fn jobs(&self) -> &[ScheduledJob] {
        &self.jobs
    }

    /// Next run time of `job`, if it has been scheduled.
    pub async fn next_run(&self, job: &str) -> Option<DateTime<Utc>> {
        let mut slot = self.timetable.lock().await;
        self.loaded(&mut slot).await.get(job).copied()
    }

    /// Run every job due at `now`, one after another in priority order.
    pub async fn run_due_jobs(&self, now: DateTime<Utc>) -> Vec<JobRun> {
        let mut due = Vec::new();
        let mut rescheduled = Vec::new();
        {
            let mut slot = self.timetable.lock().await;
            let timetable = self.loaded(&mut slot).await;
            for job in &self.jobs {
                let name = job.name();
                let next = job.schedule().next_run_after(now);
                match timetable.get(&name) {
                    None => {
                        tracing::debug!(job = %name, next_run = %next, "Scheduled job");
                    }
                    Some(scheduled) if now >= *scheduled => due.push(job),
                    Some(_) => continue,
                }
                timetable.insert(name.clone(), next);
                rescheduled.push((name, next));
            }
        }

        self.persist(&rescheduled).await;

        let mut runs = Vec::with_capacity(due.len());
        for job in due {
            runs.push(execute(job).await);
        }
        runs
    }

    /// Run every registered job now, in priority order, and reschedule each.
    pub async fn run_all_now(&self, now: DateTime<Utc>) -> Vec<JobRun> {
        let mut rescheduled = Vec::with_capacity(self.jobs.len());
        {
            let mut slot = self.timetable.lock().await;
            let timetable = self.loaded(&mut slot).await;
            for job in &self.jobs {
                let next = job.schedule().next_run_after(now);
                timetable.insert(job.name(), next);
                rescheduled.push((job.name(), next));
            }
        }

        self.persist(&rescheduled).await;

        let mut runs = Vec::with_capacity(self.jobs.len());
        for job in &self.jobs {
            runs.push(execute(job).await);
        }
        runs
    }

    async fn loaded<'a>(&self, slot: &'a mut Option<Timetable>) -> &'a mut Timetable {
        if slot.is_none() {
            let timetable = match self.store.load().await {
                Ok(timetable) => {
                    tracing::debug!(entries = timetable.len(), "Loaded job timetable");
                    timetable
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to load job timetable, starting empty");
                    Timetable::new()
                }
            };
            *slot = Some(timetable);
        }
        slot.get_or_insert_with(Timetable::new)
    }

    async fn persist(&self, rescheduled: &[(String, DateTime<Utc>)]) {
        for (job, next_run) in rescheduled {
            if let Err(e) = self.store.save(job, *next_run).await {
                tracing::warn!(job = %job, error = %e, "Failed to persist job timetable");
            }
        }
    }
}

async fn execute(job: &ScheduledJob) -> JobRun {
    let name = job.name();
    let started = std::time::Instant::now();
    let outcome = job.handler().run().await;
    let elapsed = started.elapsed();

    match &outcome {
        Ok(summary) => tracing::info!(
            job = %name,
            priority = job.priority().as_str(),
            elapsed_ms = elapsed.as_millis() as u64,
            summary = %summary,
            "Scheduled job complete"
        ),
        Err(e) => tracing::error!(
            job = %name,
            priority = job.priority().as_str(),
            elapsed_ms = elapsed.as_millis() as u64,
            error = %e,
            "Scheduled job failed"
        ),
    }
    metrics::record_job_run(&name, outcome.is_ok());

    JobRun {
        job: name,
        priority: job.priority(),
        outcome,
        elapsed,
    }
}

/// Starts the scheduler as a background task.
///
/// Wakes up every `tick` to run due jobs until `shutdown` is cancelled.
pub async fn start_scheduler_worker(
    scheduler: Arc<TaskScheduler>,
    tick: Duration,
    shutdown: CancellationToken,
) {
    if scheduler.jobs().is_empty() {
        tracing::info!("Scheduler worker has no jobs registered");
        return;
    }

    tracing::info!(
        jobs = scheduler.jobs().len(),
        tick_secs = tick.as_secs(),
        "Starting scheduler worker"
    );

    loop {
        let runs = scheduler.run_due_jobs(Utc::now()).await;
        if !runs.is_empty() {
            let failed = runs.iter().filter(|r| !r.is_success()).count();
            tracing::debug!(ran = runs.len(), failed, "Scheduler tick complete");
        }

        tokio::select! {
            _ = shutdown.cancelled() => {
                tracing::info!("Scheduler worker shutting down");
                break;
            }
            _ = tokio::time::sleep(tick) => {}
        }
    }
}
