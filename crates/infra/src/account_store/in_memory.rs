use std::collections::BTreeMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;

use txmachine_accounts::{AccountQuery, Attributes, BASE_TYPE};
use txmachine_core::{AccountId, ConstraintViolation};

use super::r#trait::{
    ACCOUNT_KEY_INDEX, ACCOUNT_TABLE, AccountStore, CreatedRecord, StoreError, column_text,
};

#[derive(Debug, Default)]
struct Table {
    last_id: i64,
    rows: BTreeMap<i64, Attributes>,
}

impl Table {
    fn key_taken(&self, key: &Value, except: Option<i64>) -> bool {
        self.rows
            .iter()
            .any(|(id, row)| Some(*id) != except && row.get("key") == Some(key))
    }
}

/// In-memory account table.
///
/// Intended for tests/dev. Emulates the Postgres schema: column defaults,
/// the not-null constraint on `key` and the `account_key_idx` unique index,
/// reported with the same SQLSTATE codes.
#[derive(Debug, Default)]
pub struct InMemoryAccountStore {
    table: RwLock<Table>,
}

impl InMemoryAccountStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored rows.
    pub fn len(&self) -> usize {
        self.table.read().map(|t| t.rows.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn timestamp(at: DateTime<Utc>) -> Value {
    Value::String(at.to_rfc3339_opts(SecondsFormat::Micros, true))
}

fn check_key(key: Option<&Value>) -> Result<Value, StoreError> {
    match key {
        None | Some(Value::Null) => Err(ConstraintViolation::not_null(ACCOUNT_TABLE, "key").into()),
        Some(key) => Ok(column_value("key", key)),
    }
}

/// `value` as the matching `account` column stores it: text and numeric
/// columns hold strings, `postpaid` only a boolean.
fn column_value(field: &str, value: &Value) -> Value {
    match field {
        "key" | "type" | "status" | "balance" => {
            column_text(Some(value)).map_or(Value::Null, Value::String)
        }
        "postpaid" => value.as_bool().map_or(Value::Null, Value::Bool),
        _ => value.clone(),
    }
}

fn poisoned() -> StoreError {
    StoreError::Backend("lock poisoned".to_string())
}

#[async_trait]
impl AccountStore for InMemoryAccountStore {
    async fn create(&self, record: &Attributes) -> Result<CreatedRecord, StoreError> {
        let key = check_key(record.get("key"))?;

        let mut table = self.table.write().map_err(|_| poisoned())?;
        if table.key_taken(&key, None) {
            return Err(ConstraintViolation::unique(ACCOUNT_TABLE, ACCOUNT_KEY_INDEX).into());
        }

        table.last_id += 1;
        let id = table.last_id;
        let now = Utc::now();

        let mut row = Attributes::new();
        row.insert("type".to_string(), Value::from(BASE_TYPE));
        row.insert("balance".to_string(), Value::from("0"));
        row.insert("postpaid".to_string(), Value::Bool(false));
        row.insert("status".to_string(), Value::from("active"));
        for (field, value) in record {
            let value = column_value(field, value);
            if !value.is_null() {
                row.insert(field.clone(), value);
            }
        }
        row.insert("id".to_string(), Value::from(id));
        row.insert("created_at".to_string(), timestamp(now));
        row.insert("updated_at".to_string(), timestamp(now));

        table.rows.insert(id, row);

        Ok(CreatedRecord {
            id: AccountId::new(id),
            created_at: now,
            updated_at: now,
        })
    }

    async fn fetch_one(&self, query: &AccountQuery) -> Result<Option<Attributes>, StoreError> {
        let table = self.table.read().map_err(|_| poisoned())?;

        let row = match query {
            AccountQuery::Id(id) => table.rows.get(&id.get()),
            AccountQuery::Key(key) => table
                .rows
                .values()
                .find(|row| row.get("key").and_then(Value::as_str) == Some(key.as_str())),
        };

        Ok(row.cloned())
    }

    async fn update_by_id(
        &self,
        id: AccountId,
        changes: &Attributes,
    ) -> Result<DateTime<Utc>, StoreError> {
        let mut table = self.table.write().map_err(|_| poisoned())?;
        if !table.rows.contains_key(&id.get()) {
            return Err(StoreError::NotFound(id));
        }

        if changes.contains_key("key") {
            let key = check_key(changes.get("key"))?;
            if table.key_taken(&key, Some(id.get())) {
                return Err(ConstraintViolation::unique(ACCOUNT_TABLE, ACCOUNT_KEY_INDEX).into());
            }
        }

        let now = Utc::now();
        let row = table.rows.get_mut(&id.get()).ok_or(StoreError::NotFound(id))?;
        for (field, value) in changes {
            row.insert(field.clone(), column_value(field, value));
        }
        row.insert("updated_at".to_string(), timestamp(now));

        Ok(now)
    }
}
