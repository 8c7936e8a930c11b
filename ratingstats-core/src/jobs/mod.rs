//! Cache regeneration
//!
//! A master job clears the cache and fans out into one batch job per
//! (form, rating field, date range, grouping) cell. Batches are computed by
//! [`Worker`]s pulling from a [`JobQueue`]; [`RegenerationTicker`] feeds
//! master jobs on the configured [`Schedule`].

mod queue;
mod schedule;

pub use queue::{JobQueue, JobStatus, MemoryQueue, QueuedJob};
pub use schedule::Schedule;

use crate::error::Result;
use crate::service::StatisticsService;
use crate::types::DateRange;
use chrono::{Local, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// A unit of regeneration work
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CacheRegenerationJob {
    /// Clear the cache and enqueue one batch per cell
    Master {
        form_id: Option<i64>,
        reschedule: bool,
    },
    /// Compute and cache a single cell
    Batch {
        form_id: i64,
        field_handle: String,
        date_range: DateRange,
        group_by: Option<String>,
        current_batch: usize,
        total_batches: usize,
    },
}

impl CacheRegenerationJob {
    pub fn master(form_id: Option<i64>, reschedule: bool) -> Self {
        CacheRegenerationJob::Master {
            form_id,
            reschedule,
        }
    }

    pub fn is_master(&self) -> bool {
        matches!(self, CacheRegenerationJob::Master { .. })
    }

    /// Human-readable description shown in queue listings
    pub fn description(&self, plugin_name: &str) -> String {
        match self {
            CacheRegenerationJob::Master { .. } => {
                format!("{}: Generating statistics cache", plugin_name)
            }
            CacheRegenerationJob::Batch {
                field_handle,
                current_batch,
                total_batches,
                ..
            } => format!(
                "{}: Generating statistics for {} ({}/{})",
                plugin_name, field_handle, current_batch, total_batches
            ),
        }
    }

    /// Run the job against `ctx`
    pub fn execute(&self, ctx: &JobContext<'_>) -> Result<JobOutcome> {
        match self {
            CacheRegenerationJob::Master {
                form_id,
                reschedule,
            } => execute_master(ctx, *form_id, *reschedule),
            CacheRegenerationJob::Batch {
                form_id,
                field_handle,
                date_range,
                group_by,
                current_batch,
                total_batches,
            } => execute_batch(
                ctx,
                *form_id,
                field_handle,
                *date_range,
                group_by.as_deref(),
                *current_batch,
                *total_batches,
            ),
        }
    }
}

/// What executing a job did
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    /// A master job enqueued `batches` batch jobs
    Enqueued { batches: usize, rescheduled: bool },
    /// A batch job computed its cell
    Computed { progress: f64 },
    /// A batch job whose form or field no longer exists
    Skipped,
}

/// Collaborators available to a running job
pub struct JobContext<'a> {
    pub service: &'a StatisticsService,
    pub queue: &'a dyn JobQueue,
    pub schedule: Schedule,
    /// Queue id of the running job, for progress reports
    pub job_id: Option<i64>,
}

impl JobContext<'_> {
    fn progress(&self, progress: f64, label: Option<&str>) {
        let Some(id) = self.job_id else { return };
        if let Err(e) = self.queue.set_progress(id, progress, label) {
            tracing::debug!(job_id = id, error = %e, "Failed to record job progress");
        }
    }
}

fn execute_master(ctx: &JobContext<'_>, form_id: Option<i64>, reschedule: bool) -> Result<JobOutcome> {
    ctx.service.clear_all_cache();
    tracing::info!("Cleared all statistics cache before regeneration");

    let forms: Vec<_> = ctx
        .service
        .forms_with_rating_fields()?
        .into_iter()
        .filter(|o| form_id.map_or(true, |id| o.form.id == id))
        .collect();

    let mut cells = Vec::new();
    for overview in &forms {
        let form = &overview.form;
        let groupable = form.groupable_fields();
        for field in form.rating_fields() {
            for range in DateRange::REGENERATED {
                cells.push((form.id, field.handle.clone(), range, None));
                for group in &groupable {
                    cells.push((form.id, field.handle.clone(), range, Some(group.handle.clone())));
                }
            }
        }
    }

    let total_batches = cells.len();
    for (index, (form_id, field_handle, date_range, group_by)) in cells.into_iter().enumerate() {
        let batch = CacheRegenerationJob::Batch {
            form_id,
            field_handle,
            date_range,
            group_by,
            current_batch: index + 1,
            total_batches,
        };
        ctx.queue.push(&batch, None)?;
    }

    tracing::info!(
        forms = forms.len(),
        batches = total_batches,
        "Queued statistics cache batches"
    );

    let mut rescheduled = false;
    if reschedule {
        if let Some(delay) = ctx.schedule.next_run_delay(&Local::now()) {
            ctx.queue
                .push(&CacheRegenerationJob::master(None, true), Some(delay))?;
            rescheduled = true;
            tracing::info!(
                schedule = %ctx.schedule,
                delay_secs = delay.num_seconds(),
                "Scheduled next cache regeneration"
            );
        }
    }

    Ok(JobOutcome::Enqueued {
        batches: total_batches,
        rescheduled,
    })
}

fn execute_batch(
    ctx: &JobContext<'_>,
    form_id: i64,
    field_handle: &str,
    date_range: DateRange,
    group_by: Option<&str>,
    current_batch: usize,
    total_batches: usize,
) -> Result<JobOutcome> {
    let Some(form) = ctx.service.source().form(form_id)? else {
        tracing::debug!(form_id, batch = current_batch, "Form gone, skipping batch");
        return Ok(JobOutcome::Skipped);
    };
    let Some(field) = form.rating_field(field_handle) else {
        tracing::debug!(form_id, field = field_handle, "Field gone, skipping batch");
        return Ok(JobOutcome::Skipped);
    };
    if let Some(group_by) = group_by {
        if form.field(group_by).is_none() {
            tracing::debug!(form_id, group_by, "Grouping field gone, skipping batch");
            return Ok(JobOutcome::Skipped);
        }
    }

    ctx.progress(0.0, Some(&format!("Processing {}...", form.title)));
    ctx.service
        .field_statistics(&form, &field, date_range, group_by)?;

    let progress = if total_batches == 0 {
        1.0
    } else {
        current_batch as f64 / total_batches as f64
    };
    ctx.progress(progress, None);

    tracing::debug!(
        form_id,
        field = field_handle,
        date_range = %date_range,
        batch = current_batch,
        total = total_batches,
        "Computed statistics batch"
    );

    Ok(JobOutcome::Computed { progress })
}

// ============================================
// Worker
// ============================================

/// Result of running one queued job
#[derive(Debug, Clone)]
pub struct JobReport {
    pub id: i64,
    pub job: CacheRegenerationJob,
    pub result: std::result::Result<JobOutcome, String>,
}

/// Totals from a worker run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerSummary {
    pub completed: usize,
    pub failed: usize,
}

/// Pulls jobs off a queue and executes them one at a time
pub struct Worker {
    service: Arc<StatisticsService>,
    queue: Arc<dyn JobQueue>,
    schedule: Schedule,
    stale_after: chrono::Duration,
}

impl Worker {
    pub fn new(service: Arc<StatisticsService>, queue: Arc<dyn JobQueue>, schedule: Schedule) -> Self {
        Self {
            service,
            queue,
            schedule,
            stale_after: chrono::Duration::minutes(15),
        }
    }

    /// How long a reservation may go unfinished before the job is retried
    pub fn with_stale_after(mut self, stale_after: chrono::Duration) -> Self {
        self.stale_after = stale_after;
        self
    }

    /// Reserve and execute the next runnable job. `None` when the queue has
    /// nothing runnable.
    pub fn run_once(&self) -> Result<Option<JobReport>> {
        let now = Utc::now();
        let released = self.queue.release_stale(now - self.stale_after)?;
        if released > 0 {
            tracing::warn!(released, "Returned stale jobs to the queue");
        }

        let Some(queued) = self.queue.reserve(now)? else {
            return Ok(None);
        };

        let ctx = JobContext {
            service: &self.service,
            queue: self.queue.as_ref(),
            schedule: self.schedule,
            job_id: Some(queued.id),
        };

        let result = match queued.job.execute(&ctx) {
            Ok(outcome) => {
                self.queue.complete(queued.id)?;
                Ok(outcome)
            }
            Err(e) => {
                tracing::error!(job_id = queued.id, error = %e, "Job failed");
                self.queue.fail(queued.id, &e.to_string())?;
                Err(e.to_string())
            }
        };

        Ok(Some(JobReport {
            id: queued.id,
            job: queued.job,
            result,
        }))
    }

    /// Run jobs until nothing is runnable
    pub fn drain<F>(&self, mut on_job: F) -> Result<WorkerSummary>
    where
        F: FnMut(&JobReport),
    {
        let mut summary = WorkerSummary::default();
        while let Some(report) = self.run_once()? {
            match report.result {
                Ok(_) => summary.completed += 1,
                Err(_) => summary.failed += 1,
            }
            on_job(&report);
        }
        Ok(summary)
    }

    /// Poll the queue until `running` is cleared
    pub fn run(&self, poll: std::time::Duration, running: &AtomicBool) -> Result<WorkerSummary> {
        let mut total = WorkerSummary::default();
        while running.load(Ordering::SeqCst) {
            let summary = self.drain(|_| {})?;
            if summary.completed + summary.failed > 0 {
                tracing::info!(
                    completed = summary.completed,
                    failed = summary.failed,
                    "Worker drained queue"
                );
            }
            total.completed += summary.completed;
            total.failed += summary.failed;
            thread::sleep(poll);
        }
        Ok(total)
    }
}

// ============================================
// Scheduling
// ============================================

/// Background thread that enqueues a master job each time the schedule's
/// delay elapses. Dropping or stopping the ticker cancels future runs.
pub struct RegenerationTicker {
    stop: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl RegenerationTicker {
    /// Start ticking on `schedule`; `None` for `manual`.
    pub fn start(queue: Arc<dyn JobQueue>, schedule: Schedule) -> Option<Self> {
        if schedule.is_manual() {
            return None;
        }
        Some(Self::spawn_with(queue, move || {
            schedule
                .next_run_delay(&Local::now())
                .and_then(|d| d.to_std().ok())
        }))
    }

    /// Start ticking with a custom delay source. The thread exits when
    /// `next_delay` returns `None`.
    pub fn spawn_with<F>(queue: Arc<dyn JobQueue>, next_delay: F) -> Self
    where
        F: Fn() -> Option<std::time::Duration> + Send + 'static,
    {
        let (tx, rx) = mpsc::channel::<()>();
        let handle = thread::spawn(move || {
            while let Some(delay) = next_delay() {
                match rx.recv_timeout(delay) {
                    Err(RecvTimeoutError::Timeout) => {
                        match queue.push(&CacheRegenerationJob::master(None, false), None) {
                            Ok(id) => tracing::info!(job_id = id, "Queued scheduled cache regeneration"),
                            Err(e) => tracing::error!(error = %e, "Failed to queue cache regeneration"),
                        }
                    }
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            }
        });
        Self {
            stop: Some(tx),
            handle: Some(handle),
        }
    }

    /// Cancel future runs and wait for the thread to exit
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if let Some(tx) = self.stop.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for RegenerationTicker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Queue the first self-rescheduling master job for a non-manual schedule,
/// unless a master job is already pending.
pub fn schedule_initial(queue: &dyn JobQueue, schedule: Schedule) -> Result<Option<i64>> {
    let Some(delay) = schedule.next_run_delay(&Local::now()) else {
        return Ok(None);
    };
    if queue.has_pending_master()? {
        return Ok(None);
    }
    let id = queue.push(&CacheRegenerationJob::master(None, true), Some(delay))?;
    tracing::info!(job_id = id, schedule = %schedule, "Scheduled initial cache regeneration");
    Ok(Some(id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::StatisticsCache;
    use crate::field::{RatingFieldConfig, RatingType};
    use crate::source::MemorySource;
    use crate::types::{FieldDescriptor, FieldValue, Form, Submission};
    use std::collections::BTreeMap;
    use std::time::Duration as StdDuration;

    fn form(id: i64, handle: &str, extra: Vec<FieldDescriptor>) -> Form {
        let mut fields = vec![FieldDescriptor::rating(
            "score",
            "Score",
            RatingFieldConfig::new(RatingType::Star, 1, 5),
        )];
        fields.extend(extra);
        Form {
            id,
            handle: handle.to_string(),
            title: handle.to_string(),
            fields,
        }
    }

    fn setup() -> (Arc<MemorySource>, Arc<StatisticsService>, Arc<MemoryQueue>) {
        let source = Arc::new(MemorySource::new());
        source.add_form(form(1, "one", vec![]));
        source.add_form(form(2, "two", vec![]));
        let mut values = BTreeMap::new();
        values.insert("score".to_string(), FieldValue::Number(4.0));
        source.add_submission(Submission {
            id: 1,
            form_id: 1,
            created_at: Utc::now(),
            values,
        });

        let service = Arc::new(StatisticsService::new(
            source.clone(),
            Arc::new(StatisticsCache::in_memory()),
        ));
        (source, service, Arc::new(MemoryQueue::new()))
    }

    fn batches(queue: &MemoryQueue) -> Vec<CacheRegenerationJob> {
        queue
            .all()
            .into_iter()
            .map(|q| q.job)
            .filter(|j| !j.is_master())
            .collect()
    }

    #[test]
    fn test_master_enqueues_batches() {
        let (_, service, queue) = setup();
        let ctx = JobContext {
            service: &service,
            queue: queue.as_ref(),
            schedule: Schedule::Manual,
            job_id: None,
        };

        let outcome = CacheRegenerationJob::master(None, false).execute(&ctx).unwrap();
        assert_eq!(
            outcome,
            JobOutcome::Enqueued {
                batches: 8,
                rescheduled: false
            }
        );

        let batches = batches(&queue);
        assert_eq!(batches.len(), 8);
        for (i, job) in batches.iter().enumerate() {
            match job {
                CacheRegenerationJob::Batch {
                    current_batch,
                    total_batches,
                    ..
                } => {
                    assert_eq!(*current_batch, i + 1);
                    assert_eq!(*total_batches, 8);
                }
                other => panic!("unexpected job: {other:?}"),
            }
        }
        // Master never computes
        assert_eq!(service.cache_count(), 0);
    }

    #[test]
    fn test_master_includes_groupable_fields() {
        let source = Arc::new(MemorySource::new());
        source.add_form(form(
            7,
            "survey",
            vec![FieldDescriptor::plain("store", "Store", "dropdown")],
        ));
        let service = StatisticsService::new(source, Arc::new(StatisticsCache::in_memory()));
        let queue = MemoryQueue::new();
        let ctx = JobContext {
            service: &service,
            queue: &queue,
            schedule: Schedule::Manual,
            job_id: None,
        };

        CacheRegenerationJob::master(Some(7), false).execute(&ctx).unwrap();
        let grouped = batches(&queue)
            .into_iter()
            .filter(|j| matches!(j, CacheRegenerationJob::Batch { group_by: Some(_), .. }))
            .count();
        assert_eq!(queue.all().len(), 8);
        assert_eq!(grouped, 4);
    }

    #[test]
    fn test_master_reschedules() {
        let (_, service, queue) = setup();
        let ctx = JobContext {
            service: &service,
            queue: queue.as_ref(),
            schedule: Schedule::Daily,
            job_id: None,
        };

        let outcome = CacheRegenerationJob::master(Some(1), true).execute(&ctx).unwrap();
        assert_eq!(
            outcome,
            JobOutcome::Enqueued {
                batches: 4,
                rescheduled: true
            }
        );

        let next = queue.all().into_iter().find(|q| q.job.is_master()).unwrap();
        assert_eq!(next.job, CacheRegenerationJob::master(None, true));
        assert!(next.available_at > Utc::now() + chrono::Duration::hours(23));
    }

    #[test]
    fn test_batch_for_deleted_form_is_noop() {
        let (source, service, queue) = setup();
        let ctx = JobContext {
            service: &service,
            queue: queue.as_ref(),
            schedule: Schedule::Manual,
            job_id: None,
        };
        let batch = CacheRegenerationJob::Batch {
            form_id: 1,
            field_handle: "score".to_string(),
            date_range: DateRange::All,
            group_by: None,
            current_batch: 1,
            total_batches: 2,
        };

        source.remove_form(1);
        assert_eq!(batch.execute(&ctx).unwrap(), JobOutcome::Skipped);
        assert_eq!(service.cache_count(), 0);
    }

    #[test]
    fn test_worker_drains_and_reports_progress() {
        let (_, service, queue) = setup();
        queue.push(&CacheRegenerationJob::master(None, false), None).unwrap();

        let worker = Worker::new(service.clone(), queue.clone(), Schedule::Manual);
        let mut seen = 0;
        let summary = worker.drain(|_| seen += 1).unwrap();

        assert_eq!(summary, WorkerSummary { completed: 9, failed: 0 });
        assert_eq!(seen, 9);
        assert_eq!(service.cache_count(), 8);
        assert!(queue.all().iter().all(|q| q.status == JobStatus::Done));
        assert_eq!(queue.all().last().unwrap().progress, 1.0);
    }

    /// Source whose form lookup fails for one id
    struct FlakySource {
        inner: MemorySource,
        broken: i64,
    }

    impl crate::source::FormRegistry for FlakySource {
        fn forms(&self) -> Result<Vec<Form>> {
            self.inner.forms()
        }

        fn form(&self, id: i64) -> Result<Option<Form>> {
            if id == self.broken {
                return Err(crate::error::Error::Queue("lookup failed".to_string()));
            }
            self.inner.form(id)
        }

        fn count_submissions(&self, form_id: i64) -> Result<usize> {
            self.inner.count_submissions(form_id)
        }
    }

    impl crate::source::SubmissionReader for FlakySource {
        fn submissions(
            &self,
            form_id: i64,
            since: Option<chrono::DateTime<Utc>>,
        ) -> Result<Vec<Submission>> {
            self.inner.submissions(form_id, since)
        }
    }

    #[test]
    fn test_worker_continues_after_failure() {
        let inner = MemorySource::new();
        inner.add_form(form(2, "two", vec![]));
        let source = Arc::new(FlakySource { inner, broken: 99 });
        let service = Arc::new(StatisticsService::new(
            source,
            Arc::new(StatisticsCache::in_memory()),
        ));
        let queue = Arc::new(MemoryQueue::new());

        let failing = CacheRegenerationJob::Batch {
            form_id: 99,
            field_handle: "score".to_string(),
            date_range: DateRange::All,
            group_by: None,
            current_batch: 1,
            total_batches: 1,
        };
        let failing_id = queue.push(&failing, None).unwrap();
        queue.push(&CacheRegenerationJob::master(Some(2), false), None).unwrap();

        let worker = Worker::new(service.clone(), queue.clone(), Schedule::Manual);
        let summary = worker.drain(|_| {}).unwrap();
        assert_eq!(summary, WorkerSummary { completed: 5, failed: 1 });
        assert_eq!(service.cache_count(), 4);

        let failed = queue.all().into_iter().find(|q| q.id == failing_id).unwrap();
        assert_eq!(failed.status, JobStatus::Failed);
        assert!(failed.error.unwrap().contains("lookup failed"));
    }

    #[test]
    fn test_ticker_pushes_until_stopped() {
        let queue = Arc::new(MemoryQueue::new());
        let ticker = RegenerationTicker::spawn_with(queue.clone(), || {
            Some(StdDuration::from_millis(10))
        });
        thread::sleep(StdDuration::from_millis(100));
        ticker.stop();

        let pushed = queue.all().len();
        assert!(pushed >= 1);
        assert!(queue
            .all()
            .iter()
            .all(|q| q.job == CacheRegenerationJob::master(None, false)));

        thread::sleep(StdDuration::from_millis(50));
        assert_eq!(queue.all().len(), pushed);
    }

    #[test]
    fn test_manual_schedule_has_no_ticker() {
        let queue: Arc<dyn JobQueue> = Arc::new(MemoryQueue::new());
        assert!(RegenerationTicker::start(queue.clone(), Schedule::Manual).is_none());
        assert_eq!(schedule_initial(queue.as_ref(), Schedule::Manual).unwrap(), None);
    }

    #[test]
    fn test_schedule_initial_once() {
        let queue = MemoryQueue::new();
        assert!(schedule_initial(&queue, Schedule::Every6Hours).unwrap().is_some());
        assert!(schedule_initial(&queue, Schedule::Every6Hours).unwrap().is_none());
        assert_eq!(queue.pending().unwrap(), 1);
    }

    #[test]
    fn test_job_serde_shape() {
        let job = CacheRegenerationJob::Batch {
            form_id: 3,
            field_handle: "score".to_string(),
            date_range: DateRange::Last30Days,
            group_by: None,
            current_batch: 2,
            total_batches: 4,
        };
        let json = serde_json::to_value(&job).unwrap();
        assert_eq!(json["kind"], "batch");
        assert_eq!(json["date_range"], "last30days");
        let back: CacheRegenerationJob = serde_json::from_value(json).unwrap();
        assert_eq!(back, job);
        assert_eq!(
            CacheRegenerationJob::master(None, false).description("Rating Field"),
            "Rating Field: Generating statistics cache"
        );
    }
}
