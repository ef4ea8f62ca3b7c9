use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use thiserror::Error;

use txmachine_accounts::{AccountQuery, Attributes};
use txmachine_core::{AccountError, AccountId, ConstraintViolation};

/// Table every account row lives in.
pub const ACCOUNT_TABLE: &str = "account";

/// Unique index enforcing `account.key` uniqueness.
pub const ACCOUNT_KEY_INDEX: &str = "account_key_idx";

/// Text form of a value bound to a `TEXT`/`NUMERIC` column; `NULL` stays `None`.
pub(crate) fn column_text(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// Storage-assigned values returned by [`AccountStore::create`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CreatedRecord {
    pub id: AccountId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Storage engine error.
///
/// Integrity violations keep the engine's structured metadata; everything
/// else is an opaque backend failure.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Constraint(#[from] ConstraintViolation),

    #[error("account not found: {0}")]
    NotFound(AccountId),

    #[error("storage backend error: {0}")]
    Backend(String),
}

impl From<StoreError> for AccountError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::Constraint(violation) => AccountError::Constraint(violation),
            StoreError::NotFound(id) => AccountError::not_found(format!("account not found: {id}")),
            StoreError::Backend(msg) => AccountError::Storage(msg),
        }
    }
}

/// Relational storage engine for account rows.
///
/// Implementations enforce the not-null and uniqueness constraints on `key`
/// atomically; callers never pre-check.
#[async_trait]
pub trait AccountStore: Send + Sync {
    /// Insert a row. `record` carries every attribute to persist, including
    /// the resolved `type`.
    async fn create(&self, record: &Attributes) -> Result<CreatedRecord, StoreError>;

    /// Single-row lookup by one unique field.
    async fn fetch_one(&self, query: &AccountQuery) -> Result<Option<Attributes>, StoreError>;

    /// Partial update of the row with `id`. Returns the refreshed
    /// `updated_at`.
    async fn update_by_id(
        &self,
        id: AccountId,
        changes: &Attributes,
    ) -> Result<DateTime<Utc>, StoreError>;
}

#[async_trait]
impl<S> AccountStore for Arc<S>
where
    S: AccountStore + ?Sized,
{
    async fn create(&self, record: &Attributes) -> Result<CreatedRecord, StoreError> {
        (**self).create(record).await
    }

    async fn fetch_one(&self, query: &AccountQuery) -> Result<Option<Attributes>, StoreError> {
        (**self).fetch_one(query).await
    }

    async fn update_by_id(
        &self,
        id: AccountId,
        changes: &Attributes,
    ) -> Result<DateTime<Utc>, StoreError> {
        (**self).update_by_id(id, changes).await
    }
}
