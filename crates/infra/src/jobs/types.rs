//! Job records, retry policy and per-job outcomes.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use txmachine_core::{AccountError, AccountResult};

/// Unique job identifier (UUIDv7, so ids sort by enqueue time).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Queue-side lifecycle of a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum JobStatus {
    /// Waiting to be claimed.
    Queued,
    /// Claimed by a worker.
    Processing,
    Completed,
    /// Failed; eligible to be claimed again once `scheduled_at` passes.
    Retrying { error: String },
    /// Terminal failure or attempts exhausted.
    Failed { error: String, attempts: u32 },
}

impl JobStatus {
    pub fn is_finished(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed { .. })
    }

    pub fn is_claimable(&self) -> bool {
        matches!(self, JobStatus::Queued | JobStatus::Retrying { .. })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// No delay before the next claim.
    Immediate,
    Fixed,
    /// `base * 2^(attempt - 1)`, capped at `max_delay`.
    #[default]
    Exponential,
}

/// Queue-owned retry policy: a failed job is retried while
/// `attempt < max_attempts`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub strategy: BackoffStrategy,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(30),
            strategy: BackoffStrategy::Exponential,
        }
    }
}

impl RetryPolicy {
    /// Up to `max_attempts` attempts, no delay in between.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            strategy: BackoffStrategy::Immediate,
        }
    }

    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay: delay,
            max_delay: delay,
            strategy: BackoffStrategy::Fixed,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Delay before the next claim after the `attempt`-th failure.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        match self.strategy {
            BackoffStrategy::Immediate => Duration::ZERO,
            _ if attempt == 0 => Duration::ZERO,
            BackoffStrategy::Fixed => self.base_delay,
            BackoffStrategy::Exponential => {
                let factor = 2u32.saturating_pow(attempt - 1);
                self.base_delay.saturating_mul(factor).min(self.max_delay)
            }
        }
    }

    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

/// One finished processing attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobAttemptRecord {
    pub attempt: u32,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub error: Option<String>,
}

/// A unit of work naming a handler (`job_type`) and its JSON payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub job_type: String,
    pub data: Value,
    pub status: JobStatus,
    pub retry_policy: RetryPolicy,
    /// Attempts counted against the retry budget. Incremented by the queue
    /// on claim; the worker may rewrite it.
    pub attempt: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Earliest time the job may be claimed again.
    pub scheduled_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    /// Value of the last successful attempt.
    pub result: Option<Value>,
    pub history: Vec<JobAttemptRecord>,
}

impl Job {
    pub fn new(job_type: impl Into<String>, data: Value) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            job_type: job_type.into(),
            data,
            status: JobStatus::Queued,
            retry_policy: RetryPolicy::default(),
            attempt: 0,
            created_at: now,
            updated_at: now,
            scheduled_at: None,
            started_at: None,
            result: None,
            history: Vec::new(),
        }
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    pub fn attempts_made(&self) -> u32 {
        self.attempt
    }

    /// Failed attempts in the history. Unlike `attempt`, never rewritten.
    pub fn failures(&self) -> u32 {
        self.history.iter().filter(|r| r.error.is_some()).count() as u32
    }

    pub fn set_attempts(&mut self, attempt: u32) {
        self.attempt = attempt;
        self.updated_at = Utc::now();
    }

    pub fn is_ready(&self, now: DateTime<Utc>) -> bool {
        self.scheduled_at.is_none_or(|at| now >= at)
    }

    pub fn mark_processing(&mut self) {
        let now = Utc::now();
        self.status = JobStatus::Processing;
        self.attempt += 1;
        self.started_at = Some(now);
        self.updated_at = now;
    }

    pub fn mark_completed(&mut self, result: Value) {
        self.record_attempt(None);
        self.status = JobStatus::Completed;
        self.scheduled_at = None;
        self.result = Some(result);
    }

    /// Record a failed attempt. `retryable` failures go back to the queue
    /// while the retry policy allows; anything else fails the job for good.
    ///
    /// The budget check uses `attempt`; the backoff uses [`Job::failures`],
    /// so resetting `attempt` does not reset the delay.
    pub fn mark_failed(&mut self, error: String, retryable: bool) {
        self.record_attempt(Some(error.clone()));

        if retryable && self.retry_policy.should_retry(self.attempt) {
            let delay = self.retry_policy.delay_for_attempt(self.failures());
            self.scheduled_at =
                Some(self.updated_at + chrono::Duration::from_std(delay).unwrap_or_default());
            self.status = JobStatus::Retrying { error };
        } else {
            self.scheduled_at = None;
            self.status = JobStatus::Failed {
                error,
                attempts: self.attempt,
            };
        }
    }

    fn record_attempt(&mut self, error: Option<String>) {
        let now = Utc::now();
        self.history.push(JobAttemptRecord {
            attempt: self.attempt,
            started_at: self.started_at.unwrap_or(now),
            finished_at: now,
            error,
        });
        self.updated_at = now;
    }
}

/// How a processed job resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Disposition {
    Completed,
    FailedTerminal,
    FailedRetryable,
}

impl Disposition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Disposition::Completed => "completed",
            Disposition::FailedTerminal => "failed_terminal",
            Disposition::FailedRetryable => "failed_retryable",
        }
    }
}

impl std::fmt::Display for Disposition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The single resolution of one processed job.
#[derive(Debug)]
pub struct JobOutcome {
    pub result: AccountResult<Value>,
}

impl JobOutcome {
    pub fn completed(value: Value) -> Self {
        Self { result: Ok(value) }
    }

    pub fn failed(error: AccountError) -> Self {
        Self { result: Err(error) }
    }

    pub fn disposition(&self) -> Disposition {
        match &self.result {
            Ok(_) => Disposition::Completed,
            Err(e) if e.is_terminal() => Disposition::FailedTerminal,
            Err(_) => Disposition::FailedRetryable,
        }
    }

    pub fn value(&self) -> Option<&Value> {
        self.result.as_ref().ok()
    }

    pub fn error(&self) -> Option<&AccountError> {
        self.result.as_ref().err()
    }

    pub fn into_result(self) -> AccountResult<Value> {
        self.result
    }
}
