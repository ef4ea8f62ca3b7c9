//! Integration tests for the full job pipeline.
//!
//! Tests: Queue → JobWorker → handler → AccountGateway → hooks → AccountStore
//!
//! Verifies:
//! - Job results carry the stored account
//! - Discriminator hooks run inside jobs and terminal failures stay final
//! - Retryable errors get a fresh attempt budget until they clear

use std::sync::Arc;

use serde_json::json;

use txmachine_accounts::{Account, AccountModel, Operation};
use txmachine_core::{AccountError, AccountResult};

use crate::account_store::InMemoryAccountStore;
use crate::gateway::AccountGateway;
use crate::jobs::{
    CREATE_ACCOUNT, Disposition, GET_ACCOUNT, InMemoryJobQueue, Job, JobQueue, JobStatus,
    JobWorker, RetryPolicy, UPDATE_ACCOUNT, register_account_handlers,
};

type Pipeline = (
    Arc<AccountGateway<InMemoryAccountStore>>,
    JobWorker<Arc<InMemoryJobQueue>>,
    Arc<InMemoryJobQueue>,
);

/// Rejects overdrawn prepaid accounts; the rejection is final.
fn no_overdraft(account: &mut Account) -> AccountResult<()> {
    let overdrawn = account.balance()?.is_some_and(|b| b.is_negative());
    if overdrawn && account.postpaid() != Some(true) {
        return Err(AccountError::failure("negative balance on a prepaid account"));
    }
    account.record("balancer:checked");
    Ok(())
}

fn setup() -> Pipeline {
    let model = Arc::new(AccountModel::init());
    let balancer = model.discriminator("Balancer").expect("fresh model");
    balancer.pre(Operation::Insert, no_overdraft);
    balancer.pre(Operation::Update, no_overdraft);

    let gateway = Arc::new(AccountGateway::new(InMemoryAccountStore::new(), model));
    let queue = InMemoryJobQueue::arc();
    let mut worker = JobWorker::new(queue.clone());
    register_account_handlers(&mut worker, gateway.clone());

    (gateway, worker, queue)
}

#[tokio::test]
async fn create_then_get_through_jobs() {
    let (_, worker, queue) = setup();

    queue
        .enqueue(Job::new(
            CREATE_ACCOUNT,
            json!({ "key": "acc-1", "type": "Balancer", "balance": "12.50" }),
        ))
        .await
        .unwrap();
    let created = worker.run_once().await.unwrap().unwrap();
    assert_eq!(created.outcome.disposition(), Disposition::Completed);

    let stored = created.outcome.value().unwrap();
    assert_eq!(stored["type"], "Balancer");
    assert_eq!(stored["balance"], "12.50");
    let id = stored["id"].as_i64().unwrap();

    queue
        .enqueue(Job::new(GET_ACCOUNT, json!({ "id": id })))
        .await
        .unwrap();
    let fetched = worker.run_once().await.unwrap().unwrap();
    assert_eq!(fetched.job.result.as_ref().unwrap()["key"], "acc-1");
}

#[tokio::test]
async fn hook_failure_is_terminal_inside_a_job() {
    let (gateway, worker, queue) = setup();

    let id = queue
        .enqueue(
            Job::new(
                CREATE_ACCOUNT,
                json!({ "key": "overdrawn", "type": "Balancer", "balance": "-5" }),
            )
            .with_retry_policy(RetryPolicy::immediate(3)),
        )
        .await
        .unwrap();

    let processed = worker.run_once().await.unwrap().unwrap();
    assert_eq!(processed.outcome.disposition(), Disposition::FailedTerminal);
    assert!(matches!(processed.job.status, JobStatus::Failed { attempts: 1, .. }));
    assert_eq!(queue.get(id).await.unwrap().unwrap().attempt, 1);

    assert!(worker.run_once().await.unwrap().is_none());
    assert!(gateway.get(&json!({ "key": "overdrawn" })).await.unwrap().is_none());
}

#[tokio::test]
async fn postpaid_accounts_may_go_negative() {
    let (_, worker, queue) = setup();

    queue
        .enqueue(Job::new(
            CREATE_ACCOUNT,
            json!({ "key": "credit", "type": "Balancer", "balance": "-5", "postpaid": true }),
        ))
        .await
        .unwrap();

    let processed = worker.run_once().await.unwrap().unwrap();
    assert_eq!(processed.job.status, JobStatus::Completed);
}

#[tokio::test]
async fn update_waits_for_account_to_exist() {
    let (gateway, worker, queue) = setup();

    queue
        .enqueue(
            Job::new(
                UPDATE_ACCOUNT,
                json!({ "query": { "key": "late" }, "$set": { "status": "frozen" } }),
            )
            .with_retry_policy(RetryPolicy::immediate(1)),
        )
        .await
        .unwrap();

    let first = worker.run_once().await.unwrap().unwrap();
    assert_eq!(first.outcome.disposition(), Disposition::FailedRetryable);
    assert_eq!(
        first.outcome.error().unwrap().to_string(),
        r#"unable to get account by query {"key":"late"}"#
    );
    assert!(matches!(first.job.status, JobStatus::Retrying { .. }));
    assert_eq!(first.job.attempt, 0);

    gateway
        .create(txmachine_accounts::attributes! { "key" => "late" })
        .await
        .unwrap();

    let updated = worker.run_once().await.unwrap().unwrap();
    assert_eq!(updated.job.status, JobStatus::Completed);
    assert_eq!(updated.job.result.as_ref().unwrap()["status"], "frozen");
}

#[tokio::test]
async fn constraint_violation_surfaces_in_job_outcome() {
    let (_, worker, queue) = setup();

    for _ in 0..2 {
        queue
            .enqueue(Job::new(CREATE_ACCOUNT, json!({ "key": "twice" })))
            .await
            .unwrap();
    }

    worker.run_once().await.unwrap().unwrap();
    let duplicate = worker.run_once().await.unwrap().unwrap();

    match duplicate.outcome.error() {
        Some(AccountError::Constraint(v)) => {
            assert!(v.is_unique());
            assert_eq!(v.constraint.as_deref(), Some("account_key_idx"));
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert_eq!(duplicate.outcome.disposition(), Disposition::FailedRetryable);

    // The duplicate keeps being retried, but only after the default backoff.
    assert_eq!(duplicate.job.attempt, 0);
    assert!(duplicate.job.scheduled_at.is_some_and(|at| at > duplicate.job.updated_at));
    assert!(worker.run_once().await.unwrap().is_none());
}

#[tokio::test]
async fn update_through_job_runs_update_hooks() {
    let (gateway, worker, queue) = setup();
    gateway
        .create(txmachine_accounts::attributes! { "key" => "bal", "type" => "Balancer" })
        .await
        .unwrap();

    queue
        .enqueue(
            Job::new(
                UPDATE_ACCOUNT,
                json!({ "query": { "key": "bal" }, "$set": { "balance": "-1" } }),
            )
            .with_retry_policy(RetryPolicy::immediate(2)),
        )
        .await
        .unwrap();

    let processed = worker.run_once().await.unwrap().unwrap();
    assert_eq!(processed.outcome.disposition(), Disposition::FailedTerminal);

    let stored = gateway.get(&json!({ "key": "bal" })).await.unwrap().unwrap();
    assert_eq!(stored.balance().unwrap().unwrap().as_str(), "0");
}
