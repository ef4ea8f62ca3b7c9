//! Infrastructure layer: storage engines, the persistence gateway, the job
//! worker runtime and configuration.

pub mod account_store;
pub mod config;
pub mod gateway;
pub mod jobs;

#[cfg(test)]
mod integration_tests;

pub use account_store::{AccountStore, InMemoryAccountStore, PostgresAccountStore, StoreError};
pub use config::WorkerConfig;
pub use gateway::AccountGateway;
