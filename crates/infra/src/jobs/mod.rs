//! Background account jobs.
//!
//! - `Job` / `JobOutcome`: a queued unit of work and its single resolution
//! - `JobQueue`: queue boundary; owns attempts and the retry policy
//! - `JobWorker`: routes jobs to handlers, resets attempts on retryable errors
//! - `handlers`: `create_account`, `get_account`, `update_account`

pub mod handlers;
pub mod queue;
pub mod types;
pub mod worker;

pub use handlers::{
    CREATE_ACCOUNT, CreateAccountHandler, GET_ACCOUNT, GetAccountHandler, UPDATE_ACCOUNT,
    UpdateAccountHandler, register_account_handlers,
};
pub use queue::{InMemoryJobQueue, JobQueue, QueueError, QueueStats};
pub use types::{
    BackoffStrategy, Disposition, Job, JobAttemptRecord, JobId, JobOutcome, JobStatus, RetryPolicy,
};
pub use worker::{JobHandler, JobWorker, ProcessedJob, WorkerHandle, WorkerStats};
