//! Job queue boundary and the in-process queue.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use thiserror::Error;

use super::types::{Disposition, Job, JobId, JobOutcome, JobStatus};

#[derive(Debug, Clone, Error)]
pub enum QueueError {
    #[error("job not found: {0}")]
    NotFound(JobId),
    #[error("job already exists: {0}")]
    AlreadyExists(JobId),
    #[error("queue storage error: {0}")]
    Storage(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub queued: usize,
    pub processing: usize,
    pub retrying: usize,
    pub completed: usize,
    pub failed: usize,
}

/// Durable job queue.
///
/// The queue owns the attempts-made counter and the retry policy; workers
/// only ever rewrite a claimed job through [`JobQueue::save`].
#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn enqueue(&self, job: Job) -> Result<JobId, QueueError>;

    async fn get(&self, id: JobId) -> Result<Option<Job>, QueueError>;

    /// Persist mutations of an existing job.
    async fn save(&self, job: &Job) -> Result<(), QueueError>;

    /// Claim the oldest ready job whose type is in `job_types`, marking it
    /// processing and counting the attempt.
    async fn claim_next(&self, job_types: &[String]) -> Result<Option<Job>, QueueError>;

    /// Record the outcome of a claimed job. Retryable failures are requeued
    /// while `attempt < max_attempts`.
    async fn complete(&self, job: &Job, outcome: &JobOutcome) -> Result<Job, QueueError>;

    async fn stats(&self) -> Result<QueueStats, QueueError>;
}

#[async_trait]
impl<Q> JobQueue for Arc<Q>
where
    Q: JobQueue + ?Sized,
{
    async fn enqueue(&self, job: Job) -> Result<JobId, QueueError> {
        (**self).enqueue(job).await
    }

    async fn get(&self, id: JobId) -> Result<Option<Job>, QueueError> {
        (**self).get(id).await
    }

    async fn save(&self, job: &Job) -> Result<(), QueueError> {
        (**self).save(job).await
    }

    async fn claim_next(&self, job_types: &[String]) -> Result<Option<Job>, QueueError> {
        (**self).claim_next(job_types).await
    }

    async fn complete(&self, job: &Job, outcome: &JobOutcome) -> Result<Job, QueueError> {
        (**self).complete(job, outcome).await
    }

    async fn stats(&self) -> Result<QueueStats, QueueError> {
        (**self).stats().await
    }
}

/// In-memory job queue for tests/dev and the stdin-fed binary.
#[derive(Debug, Default)]
pub struct InMemoryJobQueue {
    jobs: RwLock<HashMap<JobId, Job>>,
}

impl InMemoryJobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

fn poisoned() -> QueueError {
    QueueError::Storage("lock poisoned".to_string())
}

#[async_trait]
impl JobQueue for InMemoryJobQueue {
    async fn enqueue(&self, job: Job) -> Result<JobId, QueueError> {
        let mut jobs = self.jobs.write().map_err(|_| poisoned())?;
        if jobs.contains_key(&job.id) {
            return Err(QueueError::AlreadyExists(job.id));
        }
        let id = job.id;
        jobs.insert(id, job);
        Ok(id)
    }

    async fn get(&self, id: JobId) -> Result<Option<Job>, QueueError> {
        let jobs = self.jobs.read().map_err(|_| poisoned())?;
        Ok(jobs.get(&id).cloned())
    }

    async fn save(&self, job: &Job) -> Result<(), QueueError> {
        let mut jobs = self.jobs.write().map_err(|_| poisoned())?;
        let slot = jobs.get_mut(&job.id).ok_or(QueueError::NotFound(job.id))?;
        *slot = job.clone();
        Ok(())
    }

    async fn claim_next(&self, job_types: &[String]) -> Result<Option<Job>, QueueError> {
        let mut jobs = self.jobs.write().map_err(|_| poisoned())?;
        let now = Utc::now();

        let next = jobs
            .values()
            .filter(|j| {
                j.status.is_claimable() && j.is_ready(now) && job_types.contains(&j.job_type)
            })
            .min_by_key(|j| (j.created_at, j.id))
            .map(|j| j.id);

        Ok(next.and_then(|id| jobs.get_mut(&id)).map(|job| {
            job.mark_processing();
            job.clone()
        }))
    }

    async fn complete(&self, job: &Job, outcome: &JobOutcome) -> Result<Job, QueueError> {
        let mut jobs = self.jobs.write().map_err(|_| poisoned())?;
        let stored = jobs.get_mut(&job.id).ok_or(QueueError::NotFound(job.id))?;

        // The worker's view carries any attempt rewrite it made.
        stored.attempt = job.attempt;
        match (&outcome.result, outcome.disposition()) {
            (Ok(value), _) => stored.mark_completed(value.clone()),
            (Err(e), disposition) => {
                stored.mark_failed(e.to_string(), disposition == Disposition::FailedRetryable)
            }
        }
        Ok(stored.clone())
    }

    async fn stats(&self) -> Result<QueueStats, QueueError> {
        let jobs = self.jobs.read().map_err(|_| poisoned())?;
        let mut stats = QueueStats::default();
        for job in jobs.values() {
            match job.status {
                JobStatus::Queued => stats.queued += 1,
                JobStatus::Processing => stats.processing += 1,
                JobStatus::Retrying { .. } => stats.retrying += 1,
                JobStatus::Completed => stats.completed += 1,
                JobStatus::Failed { .. } => stats.failed += 1,
            }
        }
        Ok(stats)
    }
}
