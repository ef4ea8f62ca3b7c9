//! Worker runtime: routes jobs to handlers and classifies their errors.
//!
//! ## Error classification
//!
//! | handler result | disposition | attempt counter |
//! |---|---|---|
//! | `Ok(value)` | `Completed` | untouched |
//! | `Err(AccountError::Failure)` | `FailedTerminal` | untouched |
//! | any other `Err` | `FailedRetryable` | reset to 0 and saved before the outcome is forwarded |
//!
//! Resetting the counter hands the queue a fresh retry budget, so retryable
//! errors are retried until they stop occurring.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::oneshot::{self, error::TryRecvError};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use txmachine_core::{AccountError, AccountResult};

use super::queue::{JobQueue, QueueError};
use super::types::{Disposition, Job, JobOutcome};
use crate::config::WorkerConfig;

/// Business logic bound to one job type.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: &Job) -> AccountResult<Value>;
}

/// Runtime counters of a spawned worker.
#[derive(Debug, Clone, Default, Serialize)]
pub struct WorkerStats {
    pub jobs_processed: u64,
    pub jobs_completed: u64,
    pub jobs_failed_terminal: u64,
    pub jobs_failed_retryable: u64,
    pub uptime_secs: u64,
}

impl WorkerStats {
    fn record(&mut self, disposition: Disposition) {
        self.jobs_processed += 1;
        match disposition {
            Disposition::Completed => self.jobs_completed += 1,
            Disposition::FailedTerminal => self.jobs_failed_terminal += 1,
            Disposition::FailedRetryable => self.jobs_failed_retryable += 1,
        }
    }
}

/// Handle to a worker spawned with [`JobWorker::spawn`].
#[derive(Debug)]
pub struct WorkerHandle {
    shutdown: Option<oneshot::Sender<()>>,
    join: Option<JoinHandle<()>>,
    stats: Arc<Mutex<WorkerStats>>,
}

impl WorkerHandle {
    /// Stop claiming jobs and wait for the in-flight job to finish.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(join) = self.join.take() {
            if let Err(err) = join.await {
                error!(error = %err, "worker task panicked");
            }
        }
    }

    pub fn stats(&self) -> WorkerStats {
        self.stats
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// A claimed job after its outcome was forwarded to the queue.
#[derive(Debug)]
pub struct ProcessedJob {
    /// The queue's record after completion.
    pub job: Job,
    pub outcome: JobOutcome,
}

/// Routes claimed jobs to their handler by `job_type`.
pub struct JobWorker<Q> {
    queue: Q,
    handlers: HashMap<String, Arc<dyn JobHandler>>,
}

impl<Q: JobQueue> JobWorker<Q> {
    pub fn new(queue: Q) -> Self {
        Self {
            queue,
            handlers: HashMap::new(),
        }
    }

    pub fn queue(&self) -> &Q {
        &self.queue
    }

    /// Bind `handler` to `job_type`, replacing any previous binding.
    pub fn register_handler(&mut self, job_type: impl Into<String>, handler: impl JobHandler + 'static) {
        self.handlers.insert(job_type.into(), Arc::new(handler));
    }

    /// Sorted job types with a bound handler.
    pub fn job_types(&self) -> Vec<String> {
        let mut types: Vec<_> = self.handlers.keys().cloned().collect();
        types.sort();
        types
    }

    /// Run one job through its handler and classify the result.
    ///
    /// Retryable failures reset `job.attempt` and save the job before the
    /// outcome is returned. A failed save is logged and never replaces the
    /// handler's error.
    pub async fn process(&self, job: &mut Job) -> JobOutcome {
        debug!(job_id = %job.id, job_type = %job.job_type, attempt = job.attempt, "processing");
        let started = Instant::now();

        let result = match self.handlers.get(&job.job_type) {
            Some(handler) => handler.handle(job).await,
            None => Err(AccountError::failure(format!(
                "no handler registered for job type `{}`",
                job.job_type
            ))),
        };
        let outcome = JobOutcome { result };
        let disposition = outcome.disposition();
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match &outcome.result {
            Ok(_) => {
                info!(job_id = %job.id, job_type = %job.job_type, %disposition, elapsed_ms, "completed");
            }
            Err(err) => {
                if disposition == Disposition::FailedRetryable {
                    job.set_attempts(0);
                    if let Err(save_err) = self.queue.save(job).await {
                        error!(
                            job_id = %job.id,
                            job_type = %job.job_type,
                            error = %save_err,
                            "failed to save attempt reset"
                        );
                    }
                }
                warn!(
                    job_id = %job.id,
                    job_type = %job.job_type,
                    %disposition,
                    error_kind = err.kind(),
                    error = %err,
                    elapsed_ms,
                    "failed"
                );
            }
        }

        outcome
    }

    /// Claim, process and complete at most one job.
    pub async fn run_once(&self) -> Result<Option<ProcessedJob>, QueueError> {
        let Some(mut job) = self.queue.claim_next(&self.job_types()).await? else {
            return Ok(None);
        };

        let outcome = self.process(&mut job).await;
        let job = self.queue.complete(&job, &outcome).await?;
        Ok(Some(ProcessedJob { job, outcome }))
    }
}

impl<Q: JobQueue + 'static> JobWorker<Q> {
    /// Run the claim loop on a tokio task until [`WorkerHandle::shutdown`].
    pub fn spawn(self, config: WorkerConfig) -> WorkerHandle {
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let stats = Arc::new(Mutex::new(WorkerStats::default()));

        let join = tokio::spawn(worker_loop(self, config, shutdown_rx, stats.clone()));

        WorkerHandle {
            shutdown: Some(shutdown_tx),
            join: Some(join),
            stats,
        }
    }
}

async fn worker_loop<Q: JobQueue>(
    worker: JobWorker<Q>,
    config: WorkerConfig,
    mut shutdown_rx: oneshot::Receiver<()>,
    stats: Arc<Mutex<WorkerStats>>,
) {
    info!(worker = %config.name, job_types = ?worker.job_types(), "worker started");
    let start = Instant::now();

    loop {
        if !matches!(shutdown_rx.try_recv(), Err(TryRecvError::Empty)) {
            break;
        }

        let idle = match worker.run_once().await {
            Ok(Some(processed)) => {
                let mut s = stats.lock().unwrap_or_else(PoisonError::into_inner);
                s.record(processed.outcome.disposition());
                false
            }
            Ok(None) => true,
            Err(err) => {
                error!(worker = %config.name, error = %err, "queue error");
                true
            }
        };

        stats
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .uptime_secs = start.elapsed().as_secs();

        if idle {
            tokio::select! {
                biased;
                _ = &mut shutdown_rx => break,
                _ = tokio::time::sleep(config.poll_interval) => {}
            }
        }
    }

    info!(worker = %config.name, "worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::{InMemoryJobQueue, JobId, JobStatus, QueueStats, RetryPolicy};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct Fixed(fn() -> AccountResult<Value>);

    #[async_trait]
    impl JobHandler for Fixed {
        async fn handle(&self, _job: &Job) -> AccountResult<Value> {
            (self.0)()
        }
    }

    /// Queue wrapper recording every `save` with the attempt count it saw.
    struct RecordingQueue {
        inner: InMemoryJobQueue,
        saves: Mutex<Vec<u32>>,
        fail_saves: bool,
    }

    impl RecordingQueue {
        fn new(fail_saves: bool) -> Self {
            Self {
                inner: InMemoryJobQueue::new(),
                saves: Mutex::new(Vec::new()),
                fail_saves,
            }
        }

        fn saves(&self) -> Vec<u32> {
            self.saves.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl JobQueue for RecordingQueue {
        async fn enqueue(&self, job: Job) -> Result<JobId, QueueError> {
            self.inner.enqueue(job).await
        }

        async fn get(&self, id: JobId) -> Result<Option<Job>, QueueError> {
            self.inner.get(id).await
        }

        async fn save(&self, job: &Job) -> Result<(), QueueError> {
            self.saves.lock().unwrap().push(job.attempt);
            if self.fail_saves {
                return Err(QueueError::Storage("disk full".to_string()));
            }
            self.inner.save(job).await
        }

        async fn claim_next(&self, job_types: &[String]) -> Result<Option<Job>, QueueError> {
            self.inner.claim_next(job_types).await
        }

        async fn complete(&self, job: &Job, outcome: &JobOutcome) -> Result<Job, QueueError> {
            self.inner.complete(job, outcome).await
        }

        async fn stats(&self) -> Result<QueueStats, QueueError> {
            self.inner.stats().await
        }
    }

    async fn claimed(worker: &JobWorker<Arc<RecordingQueue>>, job_type: &str) -> Job {
        let job = Job::new(job_type, json!({})).with_retry_policy(RetryPolicy::immediate(5));
        worker.queue().enqueue(job).await.unwrap();
        let mut job = worker
            .queue()
            .claim_next(&[job_type.to_string()])
            .await
            .unwrap()
            .unwrap();
        // Simulate earlier attempts.
        job.attempt = 3;
        job
    }

    #[tokio::test]
    async fn success_is_forwarded_unchanged() {
        let queue = Arc::new(RecordingQueue::new(false));
        let mut worker = JobWorker::new(queue.clone());
        worker.register_handler("ok", Fixed(|| Ok(json!({ "id": 7 }))));

        let mut job = claimed(&worker, "ok").await;
        let outcome = worker.process(&mut job).await;

        assert_eq!(outcome.disposition(), Disposition::Completed);
        assert_eq!(outcome.value(), Some(&json!({ "id": 7 })));
        assert_eq!(job.attempt, 3);
        assert!(queue.saves().is_empty());
    }

    #[tokio::test]
    async fn terminal_failure_keeps_attempts() {
        let queue = Arc::new(RecordingQueue::new(false));
        let mut worker = JobWorker::new(queue.clone());
        worker.register_handler("reject", Fixed(|| Err(AccountError::failure("insufficient funds"))));

        let mut job = claimed(&worker, "reject").await;
        let outcome = worker.process(&mut job).await;

        assert_eq!(outcome.disposition(), Disposition::FailedTerminal);
        assert!(matches!(outcome.error(), Some(AccountError::Failure(m)) if m == "insufficient funds"));
        assert_eq!(job.attempt, 3);
        assert!(queue.saves().is_empty());
    }

    #[tokio::test]
    async fn retryable_failure_resets_and_saves_before_forwarding() {
        let queue = Arc::new(RecordingQueue::new(false));
        let mut worker = JobWorker::new(queue.clone());
        worker.register_handler("flaky", Fixed(|| Err(AccountError::storage("connection reset"))));

        let mut job = claimed(&worker, "flaky").await;
        let outcome = worker.process(&mut job).await;

        assert_eq!(outcome.disposition(), Disposition::FailedRetryable);
        assert!(matches!(outcome.error(), Some(AccountError::Storage(_))));
        assert_eq!(job.attempt, 0);
        assert_eq!(queue.saves(), [0]);
        assert_eq!(queue.get(job.id).await.unwrap().unwrap().attempt, 0);
    }

    #[tokio::test]
    async fn failed_save_keeps_original_error() {
        let queue = Arc::new(RecordingQueue::new(true));
        let mut worker = JobWorker::new(queue.clone());
        worker.register_handler("flaky", Fixed(|| Err(AccountError::not_found("gone"))));

        let mut job = claimed(&worker, "flaky").await;
        let outcome = worker.process(&mut job).await;

        assert!(matches!(outcome.error(), Some(AccountError::NotFound(m)) if m == "gone"));
        assert_eq!(queue.saves(), [0]);
    }

    #[tokio::test]
    async fn missing_handler_is_terminal() {
        let queue = Arc::new(RecordingQueue::new(false));
        let worker = JobWorker::new(queue.clone());

        let mut job = Job::new("unknown", json!({}));
        let outcome = worker.process(&mut job).await;

        assert_eq!(outcome.disposition(), Disposition::FailedTerminal);
        assert!(queue.saves().is_empty());
    }

    #[tokio::test]
    async fn run_once_completes_through_queue() {
        let queue = Arc::new(RecordingQueue::new(false));
        let mut worker = JobWorker::new(queue.clone());
        worker.register_handler("ok", Fixed(|| Ok(json!("done"))));

        assert!(worker.run_once().await.unwrap().is_none());

        queue.enqueue(Job::new("ok", json!({}))).await.unwrap();
        let processed = worker.run_once().await.unwrap().unwrap();

        assert_eq!(processed.job.status, JobStatus::Completed);
        assert_eq!(processed.job.result, Some(json!("done")));
    }

    #[tokio::test]
    async fn retryable_errors_keep_being_retried() {
        static CALLS: AtomicUsize = AtomicUsize::new(0);

        struct FailTwice;

        #[async_trait]
        impl JobHandler for FailTwice {
            async fn handle(&self, _job: &Job) -> AccountResult<Value> {
                match CALLS.fetch_add(1, Ordering::SeqCst) {
                    0 | 1 => Err(AccountError::storage("try later")),
                    _ => Ok(json!("finally")),
                }
            }
        }

        let queue = Arc::new(RecordingQueue::new(false));
        let mut worker = JobWorker::new(queue.clone());
        worker.register_handler("flaky", FailTwice);

        // One attempt of budget: without the reset the first failure would be final.
        queue
            .enqueue(Job::new("flaky", json!({})).with_retry_policy(RetryPolicy::immediate(1)))
            .await
            .unwrap();

        let first = worker.run_once().await.unwrap().unwrap();
        assert!(matches!(first.job.status, JobStatus::Retrying { .. }));
        let second = worker.run_once().await.unwrap().unwrap();
        assert!(matches!(second.job.status, JobStatus::Retrying { .. }));
        let third = worker.run_once().await.unwrap().unwrap();
        assert_eq!(third.job.status, JobStatus::Completed);
        assert_eq!(third.job.history.len(), 3);
    }

    #[tokio::test]
    async fn retryable_failure_backs_off_under_default_policy() {
        let queue = Arc::new(RecordingQueue::new(false));
        let mut worker = JobWorker::new(queue.clone());
        worker.register_handler("flaky", Fixed(|| Err(AccountError::storage("duplicate key"))));

        queue.enqueue(Job::new("flaky", json!({}))).await.unwrap();

        let processed = worker.run_once().await.unwrap().unwrap();
        assert!(matches!(processed.job.status, JobStatus::Retrying { .. }));
        assert_eq!(processed.job.attempt, 0);

        let delay = processed.job.scheduled_at.unwrap() - processed.job.updated_at;
        assert_eq!(delay.num_milliseconds(), 200);

        // Not claimable again until the delay has passed.
        assert!(worker.run_once().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn spawned_worker_drains_queue_and_shuts_down() {
        let queue = InMemoryJobQueue::arc();
        let mut worker = JobWorker::new(queue.clone());
        worker.register_handler("ok", Fixed(|| Ok(json!(true))));
        worker.register_handler("reject", Fixed(|| Err(AccountError::failure("no"))));

        queue.enqueue(Job::new("ok", json!({}))).await.unwrap();
        queue.enqueue(Job::new("reject", json!({}))).await.unwrap();

        let handle = worker.spawn(
            WorkerConfig::default()
                .with_name("test-worker")
                .with_poll_interval(Duration::from_millis(5)),
        );

        for _ in 0..200 {
            if handle.stats().jobs_processed == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let stats = handle.stats();
        assert_eq!(stats.jobs_completed, 1);
        assert_eq!(stats.jobs_failed_terminal, 1);
        handle.shutdown().await;

        let counts = queue.stats().await.unwrap();
        assert_eq!(counts.completed, 1);
        assert_eq!(counts.failed, 1);
    }
}
