//! Account job handlers.
//!
//! | job type | `data` | result |
//! |---|---|---|
//! | `create_account` | attributes, optionally with `type` | the stored account |
//! | `get_account` | `{key}` or `{id}` | the account, or `null` |
//! | `update_account` | `{query: {key} or {id}, $set: {..}}` | the updated account |

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use txmachine_accounts::{AccountQuery, Attributes};
use txmachine_core::{AccountError, AccountResult};

use super::queue::JobQueue;
use super::types::Job;
use super::worker::{JobHandler, JobWorker};
use crate::account_store::AccountStore;
use crate::gateway::AccountGateway;

pub const CREATE_ACCOUNT: &str = "create_account";
pub const GET_ACCOUNT: &str = "get_account";
pub const UPDATE_ACCOUNT: &str = "update_account";

fn object<'a>(value: Option<&'a Value>, what: &str) -> AccountResult<&'a Attributes> {
    value
        .and_then(Value::as_object)
        .ok_or_else(|| AccountError::validation(format!("{what} must be a JSON object")))
}

pub struct CreateAccountHandler<S> {
    gateway: Arc<AccountGateway<S>>,
}

impl<S> CreateAccountHandler<S> {
    pub fn new(gateway: Arc<AccountGateway<S>>) -> Self {
        Self { gateway }
    }
}

#[async_trait]
impl<S: AccountStore + 'static> JobHandler for CreateAccountHandler<S> {
    async fn handle(&self, job: &Job) -> AccountResult<Value> {
        let attributes = object(Some(&job.data), "create_account data")?.clone();
        let account = self.gateway.create(attributes).await?;
        Ok(account.to_object())
    }
}

pub struct GetAccountHandler<S> {
    gateway: Arc<AccountGateway<S>>,
}

impl<S> GetAccountHandler<S> {
    pub fn new(gateway: Arc<AccountGateway<S>>) -> Self {
        Self { gateway }
    }
}

#[async_trait]
impl<S: AccountStore + 'static> JobHandler for GetAccountHandler<S> {
    async fn handle(&self, job: &Job) -> AccountResult<Value> {
        let account = self.gateway.get(&job.data).await?;
        Ok(account.map_or(Value::Null, |a| a.to_object()))
    }
}

pub struct UpdateAccountHandler<S> {
    gateway: Arc<AccountGateway<S>>,
}

impl<S> UpdateAccountHandler<S> {
    pub fn new(gateway: Arc<AccountGateway<S>>) -> Self {
        Self { gateway }
    }
}

#[async_trait]
impl<S: AccountStore + 'static> JobHandler for UpdateAccountHandler<S> {
    async fn handle(&self, job: &Job) -> AccountResult<Value> {
        let raw_query = job.data.get("query").cloned().unwrap_or_default();
        let query = AccountQuery::from_value(&raw_query)?;
        let changes = object(job.data.get("$set"), "update_account `$set`")?.clone();

        // Not terminal: the account may not have been created yet.
        let mut account = self.gateway.find(&query).await?.ok_or_else(|| {
            AccountError::not_found(format!("unable to get account by query {raw_query}"))
        })?;

        self.gateway.update(&mut account, changes).await?;
        Ok(account.to_object())
    }
}

/// Bind the three account job types to `gateway`.
pub fn register_account_handlers<Q, S>(worker: &mut JobWorker<Q>, gateway: Arc<AccountGateway<S>>)
where
    Q: JobQueue,
    S: AccountStore + 'static,
{
    worker.register_handler(CREATE_ACCOUNT, CreateAccountHandler::new(gateway.clone()));
    worker.register_handler(GET_ACCOUNT, GetAccountHandler::new(gateway.clone()));
    worker.register_handler(UPDATE_ACCOUNT, UpdateAccountHandler::new(gateway));
}
