//! `txmachine-worker`: processes account jobs read as JSON lines from stdin.
//!
//! Storage is Postgres when `DATABASE_URL` is set, otherwise in memory.
//! Runs until Ctrl-C.

mod balancer;
mod feed;

use std::sync::Arc;

use anyhow::Context;
use tokio::io::BufReader;
use tracing::info;

use txmachine_accounts::AccountModel;
use txmachine_infra::jobs::{InMemoryJobQueue, JobWorker, register_account_handlers};
use txmachine_infra::{AccountGateway, AccountStore, InMemoryAccountStore, PostgresAccountStore, WorkerConfig};

async fn account_store(config: &WorkerConfig) -> anyhow::Result<Arc<dyn AccountStore>> {
    match &config.database_url {
        Some(url) => {
            let store = PostgresAccountStore::connect(url, 5)
                .await
                .context("connecting to postgres")?;
            store.migrate().await.context("applying account schema")?;
            info!("using postgres account store");
            Ok(Arc::new(store))
        }
        None => {
            info!("DATABASE_URL not set; using in-memory account store");
            Ok(Arc::new(InMemoryAccountStore::new()))
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    txmachine_observability::init();

    let config = WorkerConfig::from_env();

    let model = Arc::new(AccountModel::init());
    balancer::register(&model)?;

    let gateway = Arc::new(AccountGateway::new(account_store(&config).await?, model));
    let queue = InMemoryJobQueue::arc();

    let mut worker = JobWorker::new(queue.clone());
    register_account_handlers(&mut worker, gateway);
    let handle = worker.spawn(config.clone());

    info!(worker = %config.name, "transaction machine worker is listening for jobs");

    let input = BufReader::new(tokio::io::stdin());
    tokio::select! {
        fed = feed::feed(input, &queue, config.max_attempts) => {
            let enqueued = fed?;
            info!(enqueued, "job input closed; press Ctrl-C to stop");
            tokio::signal::ctrl_c().await.context("waiting for Ctrl-C")?;
        }
        signal = tokio::signal::ctrl_c() => signal.context("waiting for Ctrl-C")?,
    }

    let stats = handle.stats();
    handle.shutdown().await;
    info!(
        processed = stats.jobs_processed,
        completed = stats.jobs_completed,
        failed_terminal = stats.jobs_failed_terminal,
        failed_retryable = stats.jobs_failed_retryable,
        "worker shut down"
    );

    Ok(())
}
