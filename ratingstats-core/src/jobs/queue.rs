//! Job queue
//!
//! At-least-once delivery: a worker reserves a job, runs it, then completes
//! or fails it. Jobs reserved by a worker that died are handed out again by
//! [`JobQueue::release_stale`].

use super::CacheRegenerationJob;
use crate::error::Result;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::sync::Mutex;

/// Lifecycle state of a queued job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Waiting,
    Reserved,
    Done,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Waiting => "waiting",
            JobStatus::Reserved => "reserved",
            JobStatus::Done => "done",
            JobStatus::Failed => "failed",
        }
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "waiting" => Ok(JobStatus::Waiting),
            "reserved" => Ok(JobStatus::Reserved),
            "done" => Ok(JobStatus::Done),
            "failed" => Ok(JobStatus::Failed),
            _ => Err(format!("unknown job status: {}", s)),
        }
    }
}

/// A job as held by a queue
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedJob {
    pub id: i64,
    pub job: CacheRegenerationJob,
    pub status: JobStatus,
    pub available_at: DateTime<Utc>,
    pub attempts: u32,
    pub progress: f64,
    pub progress_label: Option<String>,
    pub error: Option<String>,
}

pub trait JobQueue: Send + Sync {
    /// Enqueue a job, runnable after `delay`. Returns the job id.
    fn push(&self, job: &CacheRegenerationJob, delay: Option<Duration>) -> Result<i64>;

    /// Take the oldest runnable job, if any
    fn reserve(&self, now: DateTime<Utc>) -> Result<Option<QueuedJob>>;

    fn complete(&self, id: i64) -> Result<()>;

    fn fail(&self, id: i64, error: &str) -> Result<()>;

    /// Record progress in `0.0..=1.0`
    fn set_progress(&self, id: i64, progress: f64, label: Option<&str>) -> Result<()>;

    /// Jobs not yet reserved, runnable or delayed, oldest first
    fn waiting(&self) -> Result<Vec<QueuedJob>>;

    /// Number of waiting jobs
    fn pending(&self) -> Result<usize> {
        Ok(self.waiting()?.len())
    }

    /// Whether a master job is waiting or running
    fn has_pending_master(&self) -> Result<bool>;

    /// Return jobs reserved before `older_than` to the queue
    fn release_stale(&self, older_than: DateTime<Utc>) -> Result<usize>;
}

// ============================================
// In-memory queue
// ============================================

#[derive(Debug, Clone)]
struct Entry {
    queued: QueuedJob,
    reserved_at: Option<DateTime<Utc>>,
}

#[derive(Default)]
struct MemoryQueueState {
    next_id: i64,
    entries: Vec<Entry>,
}

/// Queue held in process memory
#[derive(Default)]
pub struct MemoryQueue {
    state: Mutex<MemoryQueueState>,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every job ever pushed, in push order
    pub fn all(&self) -> Vec<QueuedJob> {
        let state = self.state.lock().unwrap();
        state.entries.iter().map(|e| e.queued.clone()).collect()
    }

    fn with_entry<F>(&self, id: i64, f: F) -> Result<()>
    where
        F: FnOnce(&mut Entry),
    {
        let mut state = self.state.lock().unwrap();
        match state.entries.iter_mut().find(|e| e.queued.id == id) {
            Some(entry) => {
                f(entry);
                Ok(())
            }
            None => Err(crate::error::Error::Queue(format!("job {} not found", id))),
        }
    }
}

impl JobQueue for MemoryQueue {
    fn push(&self, job: &CacheRegenerationJob, delay: Option<Duration>) -> Result<i64> {
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        let id = state.next_id;
        state.entries.push(Entry {
            queued: QueuedJob {
                id,
                job: job.clone(),
                status: JobStatus::Waiting,
                available_at: Utc::now() + delay.unwrap_or_else(Duration::zero),
                attempts: 0,
                progress: 0.0,
                progress_label: None,
                error: None,
            },
            reserved_at: None,
        });
        Ok(id)
    }

    fn reserve(&self, now: DateTime<Utc>) -> Result<Option<QueuedJob>> {
        let mut state = self.state.lock().unwrap();
        let next = state
            .entries
            .iter_mut()
            .filter(|e| e.queued.status == JobStatus::Waiting && e.queued.available_at <= now)
            .min_by_key(|e| (e.queued.available_at, e.queued.id));

        Ok(next.map(|entry| {
            entry.queued.status = JobStatus::Reserved;
            entry.queued.attempts += 1;
            entry.reserved_at = Some(now);
            entry.queued.clone()
        }))
    }

    fn complete(&self, id: i64) -> Result<()> {
        self.with_entry(id, |e| {
            e.queued.status = JobStatus::Done;
            e.queued.progress = 1.0;
        })
    }

    fn fail(&self, id: i64, error: &str) -> Result<()> {
        self.with_entry(id, |e| {
            e.queued.status = JobStatus::Failed;
            e.queued.error = Some(error.to_string());
        })
    }

    fn set_progress(&self, id: i64, progress: f64, label: Option<&str>) -> Result<()> {
        self.with_entry(id, |e| {
            e.queued.progress = progress.clamp(0.0, 1.0);
            e.queued.progress_label = label.map(str::to_string);
        })
    }

    fn waiting(&self) -> Result<Vec<QueuedJob>> {
        let state = self.state.lock().unwrap();
        let mut waiting: Vec<QueuedJob> = state
            .entries
            .iter()
            .filter(|e| e.queued.status == JobStatus::Waiting)
            .map(|e| e.queued.clone())
            .collect();
        waiting.sort_by_key(|j| (j.available_at, j.id));
        Ok(waiting)
    }

    fn has_pending_master(&self) -> Result<bool> {
        let state = self.state.lock().unwrap();
        Ok(state.entries.iter().any(|e| {
            matches!(e.queued.status, JobStatus::Waiting | JobStatus::Reserved)
                && e.queued.job.is_master()
        }))
    }

    fn release_stale(&self, older_than: DateTime<Utc>) -> Result<usize> {
        let mut state = self.state.lock().unwrap();
        let mut released = 0;
        for entry in state.entries.iter_mut() {
            if entry.queued.status == JobStatus::Reserved
                && entry.reserved_at.map_or(false, |at| at < older_than)
            {
                entry.queued.status = JobStatus::Waiting;
                entry.reserved_at = None;
                released += 1;
            }
        }
        Ok(released)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn master() -> CacheRegenerationJob {
        CacheRegenerationJob::master(None, false)
    }

    #[test]
    fn test_reserve_fifo_and_delay() {
        let queue = MemoryQueue::new();
        let first = queue.push(&master(), None).unwrap();
        let delayed = queue.push(&master(), Some(Duration::hours(1))).unwrap();
        let second = queue.push(&master(), None).unwrap();
        assert_eq!(queue.pending().unwrap(), 3);

        let now = Utc::now();
        assert_eq!(queue.reserve(now).unwrap().unwrap().id, first);
        assert_eq!(queue.reserve(now).unwrap().unwrap().id, second);
        assert!(queue.reserve(now).unwrap().is_none());

        let later = now + Duration::hours(2);
        assert_eq!(queue.reserve(later).unwrap().unwrap().id, delayed);
    }

    #[test]
    fn test_complete_fail_progress() {
        let queue = MemoryQueue::new();
        let id = queue.push(&master(), None).unwrap();
        let job = queue.reserve(Utc::now()).unwrap().unwrap();
        assert_eq!(job.attempts, 1);

        queue.set_progress(id, 0.5, Some("Processing")).unwrap();
        assert!(queue.has_pending_master().unwrap());
        queue.fail(id, "boom").unwrap();
        assert!(!queue.has_pending_master().unwrap());

        let all = queue.all();
        assert_eq!(all[0].status, JobStatus::Failed);
        assert_eq!(all[0].error.as_deref(), Some("boom"));
        assert!(queue.complete(999).is_err());
    }

    #[test]
    fn test_release_stale() {
        let queue = MemoryQueue::new();
        queue.push(&master(), None).unwrap();
        let reserved_at = Utc::now();
        queue.reserve(reserved_at).unwrap().unwrap();

        assert_eq!(queue.release_stale(reserved_at - Duration::minutes(1)).unwrap(), 0);
        assert_eq!(queue.release_stale(reserved_at + Duration::minutes(1)).unwrap(), 1);

        let again = queue.reserve(Utc::now()).unwrap().unwrap();
        assert_eq!(again.attempts, 2);
    }
}
