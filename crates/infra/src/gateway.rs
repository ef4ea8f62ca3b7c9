//! Persistence gateway: account operations against a storage engine.
//!
//! ```text
//! insert / update
//!   ↓
//! 1. Pre-hooks of the resolved type (base chain, then own chain)
//!   ↓
//! 2. Storage call (create / update_by_id)
//!   ↓
//! 3. Post-hooks (same order)
//! ```
//!
//! A post-hook error is returned even though step 2 already persisted the
//! write. `get` runs no hooks.

use std::sync::Arc;

use serde_json::Value;
use tracing::instrument;

use txmachine_accounts::{
    Account, AccountModel, AccountQuery, Attributes, Operation, STORAGE_MANAGED, Stage, run_hooks,
};
use txmachine_core::{AccountError, AccountResult, Entity};

use crate::account_store::AccountStore;

/// Account persistence over any [`AccountStore`].
pub struct AccountGateway<S> {
    store: S,
    model: Arc<AccountModel>,
}

impl<S: AccountStore> AccountGateway<S> {
    pub fn new(store: S, model: Arc<AccountModel>) -> Self {
        Self { store, model }
    }

    pub fn model(&self) -> &AccountModel {
        &self.model
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// In-memory instance of the type named by `attributes["type"]`.
    pub fn build(&self, attributes: Attributes) -> Account {
        self.model.build(attributes)
    }

    /// Build and insert in one step.
    pub async fn create(&self, attributes: Attributes) -> AccountResult<Account> {
        let mut account = self.build(attributes);
        self.insert(&mut account).await?;
        Ok(account)
    }

    /// Persist a new account and assign its storage-generated fields.
    #[instrument(skip_all, fields(account_type = %account.account_type()), err)]
    pub async fn insert(&self, account: &mut Account) -> AccountResult<()> {
        run_hooks(Stage::Pre, Operation::Insert, account).await?;

        account.balance()?;
        let type_name = account.account_type().name().to_string();
        let mut record = account.attributes().clone();
        for field in STORAGE_MANAGED {
            record.remove(field);
        }
        record.insert("type".to_string(), Value::from(type_name.as_str()));

        let created = self.store.create(&record).await?;

        account.set("type", type_name);
        account.set_id(created.id);
        account.set_timestamp("created_at", created.created_at);
        account.set_timestamp("updated_at", created.updated_at);

        run_hooks(Stage::Post, Operation::Insert, account).await
    }

    /// Look up one account by a raw `{key}` / `{id}` query object.
    pub async fn get(&self, query: &Value) -> AccountResult<Option<Account>> {
        let query = AccountQuery::from_value(query)?;
        self.find(&query).await
    }

    /// Look up one account and hydrate it as its stored discriminator type.
    #[instrument(skip_all, fields(query = %query), err)]
    pub async fn find(&self, query: &AccountQuery) -> AccountResult<Option<Account>> {
        let Some(row) = self.store.fetch_one(query).await? else {
            return Ok(None);
        };

        let ty = self.model.resolve_attributes(&row);
        Ok(Some(Account::new(ty, row)))
    }

    /// Merge `changes` into a persisted account and write them.
    #[instrument(skip_all, fields(account_id = ?account.id()), err)]
    pub async fn update(&self, account: &mut Account, changes: Attributes) -> AccountResult<()> {
        let id = account
            .id()
            .ok_or_else(|| AccountError::validation("account is not persisted"))?;

        if let Some(field) = STORAGE_MANAGED.iter().find(|f| changes.contains_key(**f)) {
            return Err(AccountError::validation(format!("`{field}` cannot be changed")));
        }

        account.merge(&changes);
        if changes.contains_key("type") {
            self.model.retype(account);
        }

        run_hooks(Stage::Pre, Operation::Update, account).await?;

        account.balance()?;
        let persisted: Attributes = changes
            .keys()
            .filter_map(|field| account.get(field).map(|v| (field.clone(), v.clone())))
            .collect();

        let updated_at = self.store.update_by_id(id, &persisted).await?;
        account.set_timestamp("updated_at", updated_at);

        run_hooks(Stage::Post, Operation::Update, account).await
    }
}
