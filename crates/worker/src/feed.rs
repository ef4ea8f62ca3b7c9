//! Job intake from JSON lines.
//!
//! Each non-empty line is `{"type": "<job type>", "data": {...}}`.

use anyhow::Context;
use serde::Deserialize;
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::{info, warn};

use txmachine_infra::jobs::{Job, JobQueue, RetryPolicy};

#[derive(Debug, Deserialize)]
struct JobLine {
    #[serde(rename = "type")]
    job_type: String,
    #[serde(default)]
    data: Value,
}

fn parse_line(line: &str, max_attempts: u32) -> anyhow::Result<Job> {
    let JobLine { job_type, data } =
        serde_json::from_str(line).context("expected {\"type\": ..., \"data\": ...}")?;
    Ok(Job::new(job_type, data)
        .with_retry_policy(RetryPolicy::default().with_max_attempts(max_attempts)))
}

/// Enqueue every job line from `input` until EOF. Returns the number of jobs
/// enqueued; malformed lines are logged and skipped.
pub async fn feed<R, Q>(input: R, queue: &Q, max_attempts: u32) -> anyhow::Result<usize>
where
    R: AsyncBufRead + Unpin,
    Q: JobQueue,
{
    let mut lines = input.lines();
    let mut enqueued = 0;
    let mut line_no = 0usize;

    while let Some(line) = lines.next_line().await.context("reading job lines")? {
        line_no += 1;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match parse_line(line, max_attempts) {
            Ok(job) => {
                let job_type = job.job_type.clone();
                let id = queue.enqueue(job).await?;
                info!(job_id = %id, job_type = %job_type, "enqueued");
                enqueued += 1;
            }
            Err(err) => warn!(line = line_no, error = %format!("{err:#}"), "skipping job line"),
        }
    }

    Ok(enqueued)
}
