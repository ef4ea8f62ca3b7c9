//! Postgres-backed account store.
//!
//! Known attributes map onto columns of the `account` table; any other
//! attribute is carried in the `extra` JSONB column and merged back into the
//! attribute map on read.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | StoreError |
//! |------------|----------------------|------------|
//! | Database (not-null violation) | `23502` | `Constraint` (code, table, column) |
//! | Database (unique violation) | `23505` | `Constraint` (code, table, constraint) |
//! | Database (other integrity class) | `23xxx` | `Constraint` |
//! | Database (other) | Any other | `Backend` |
//! | PoolClosed / Io / other | N/A | `Backend` |

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;
use sqlx::postgres::{PgDatabaseError, PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, QueryBuilder, Row};
use tracing::instrument;

use txmachine_accounts::{AccountQuery, Attributes, BASE_TYPE};
use txmachine_core::{AccountId, ConstraintViolation, ViolationCode};

use super::r#trait::{ACCOUNT_TABLE, AccountStore, CreatedRecord, StoreError, column_text};

/// Schema applied by [`PostgresAccountStore::migrate`].
pub const SCHEMA: &str = include_str!("../../migrations/0001_account.sql");

/// Attributes stored in dedicated columns.
const COLUMNS: [&str; 8] = [
    "id",
    "key",
    "type",
    "balance",
    "postpaid",
    "status",
    "created_at",
    "updated_at",
];

/// Postgres-backed account store.
///
/// Uses an SQLx connection pool (Arc + Send + Sync). Key uniqueness and the
/// not-null constraint are enforced by the schema, never pre-checked here.
#[derive(Debug, Clone)]
pub struct PostgresAccountStore {
    pool: Arc<PgPool>,
}

impl PostgresAccountStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Open a pool against `database_url`.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool))
    }

    /// Create the `account` table and its key index if missing.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("migrate", e))?;
        Ok(())
    }
}

/// Attributes without a dedicated column.
fn extra(record: &Attributes) -> Attributes {
    record
        .iter()
        .filter(|(field, _)| !COLUMNS.contains(&field.as_str()))
        .map(|(field, value)| (field.clone(), value.clone()))
        .collect()
}

fn row_to_attributes(row: &PgRow) -> Result<Attributes, StoreError> {
    let get_err = |e: sqlx::Error| map_sqlx_error("decode_account", e);

    let mut attributes = match row
        .try_get::<Option<Json<Value>>, _>("extra")
        .map_err(get_err)?
    {
        Some(Json(Value::Object(map))) => map,
        _ => Attributes::new(),
    };

    let id: i64 = row.try_get("id").map_err(get_err)?;
    let key: String = row.try_get("key").map_err(get_err)?;
    let account_type: String = row.try_get("type").map_err(get_err)?;
    let balance: String = row.try_get("balance").map_err(get_err)?;
    let postpaid: bool = row.try_get("postpaid").map_err(get_err)?;
    let status: String = row.try_get("status").map_err(get_err)?;
    let created_at: DateTime<Utc> = row.try_get("created_at").map_err(get_err)?;
    let updated_at: DateTime<Utc> = row.try_get("updated_at").map_err(get_err)?;

    attributes.insert("id".to_string(), Value::from(id));
    attributes.insert("key".to_string(), Value::from(key));
    attributes.insert("type".to_string(), Value::from(account_type));
    attributes.insert("balance".to_string(), Value::from(balance));
    attributes.insert("postpaid".to_string(), Value::Bool(postpaid));
    attributes.insert("status".to_string(), Value::from(status));
    attributes.insert(
        "created_at".to_string(),
        Value::from(created_at.to_rfc3339_opts(SecondsFormat::Micros, true)),
    );
    attributes.insert(
        "updated_at".to_string(),
        Value::from(updated_at.to_rfc3339_opts(SecondsFormat::Micros, true)),
    );

    Ok(attributes)
}

#[async_trait]
impl AccountStore for PostgresAccountStore {
    #[instrument(skip_all, fields(operation = "create_account"), err)]
    async fn create(&self, record: &Attributes) -> Result<CreatedRecord, StoreError> {
        let extra = extra(record);
        let row = sqlx::query(
            r#"
            INSERT INTO account (key, type, balance, postpaid, status, extra)
            VALUES (
                $1,
                COALESCE($2, $7),
                COALESCE($3::numeric, 0),
                COALESCE($4, false),
                COALESCE($5, 'active'),
                $6
            )
            RETURNING id, created_at, updated_at
            "#,
        )
        .bind(column_text(record.get("key")))
        .bind(column_text(record.get("type")))
        .bind(column_text(record.get("balance")))
        .bind(record.get("postpaid").and_then(Value::as_bool))
        .bind(column_text(record.get("status")))
        .bind((!extra.is_empty()).then(|| Json(Value::Object(extra))))
        .bind(BASE_TYPE)
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("create_account", e))?;

        let id: i64 = row.try_get("id").map_err(|e| map_sqlx_error("create_account", e))?;
        Ok(CreatedRecord {
            id: AccountId::new(id),
            created_at: row
                .try_get("created_at")
                .map_err(|e| map_sqlx_error("create_account", e))?,
            updated_at: row
                .try_get("updated_at")
                .map_err(|e| map_sqlx_error("create_account", e))?,
        })
    }

    #[instrument(skip(self), fields(field = query.field()), err)]
    async fn fetch_one(&self, query: &AccountQuery) -> Result<Option<Attributes>, StoreError> {
        let mut qb = QueryBuilder::<Postgres>::new(
            r#"
            SELECT
                id,
                key,
                type,
                balance::text AS balance,
                postpaid,
                status,
                extra,
                created_at,
                updated_at
            FROM account
            "#,
        );
        match query {
            AccountQuery::Key(key) => qb.push(" WHERE key = ").push_bind(key.clone()),
            AccountQuery::Id(id) => qb.push(" WHERE id = ").push_bind(id.get()),
        };

        let row = qb
            .build()
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("fetch_account", e))?;

        row.as_ref().map(row_to_attributes).transpose()
    }

    #[instrument(skip(self, changes), fields(account_id = %id), err)]
    async fn update_by_id(
        &self,
        id: AccountId,
        changes: &Attributes,
    ) -> Result<DateTime<Utc>, StoreError> {
        let mut qb = QueryBuilder::<Postgres>::new("UPDATE account SET updated_at = now()");

        for (field, value) in changes {
            match field.as_str() {
                "key" | "type" | "status" => {
                    qb.push(format!(", \"{field}\" = "))
                        .push_bind(column_text(Some(value)));
                }
                "balance" => {
                    qb.push(", balance = ")
                        .push_bind(column_text(Some(value)))
                        .push("::numeric");
                }
                "postpaid" => {
                    qb.push(", postpaid = ").push_bind(value.as_bool());
                }
                _ => {}
            }
        }

        let extra = extra(changes);
        if !extra.is_empty() {
            qb.push(", extra = COALESCE(extra, '{}'::jsonb) || ")
                .push_bind(Json(Value::Object(extra)));
        }

        qb.push(" WHERE id = ")
            .push_bind(id.get())
            .push(" RETURNING updated_at");

        let row = qb
            .build()
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("update_account", e))?
            .ok_or(StoreError::NotFound(id))?;

        row.try_get("updated_at")
            .map_err(|e| map_sqlx_error("update_account", e))
    }
}

/// Map SQLx errors into [`StoreError`].
///
/// Integrity violations (SQLSTATE class `23`) keep the table, column and
/// constraint reported by the server.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let code = db_err.code().map(|c| c.into_owned());
            match code {
                Some(code) if code.starts_with("23") => {
                    let (table, column) = match db_err.try_downcast_ref::<PgDatabaseError>() {
                        Some(pg) => (pg.table().map(str::to_owned), pg.column().map(str::to_owned)),
                        None => (db_err.table().map(str::to_owned), None),
                    };

                    StoreError::Constraint(ConstraintViolation {
                        code: ViolationCode::from_sqlstate(&code),
                        table: table.unwrap_or_else(|| ACCOUNT_TABLE.to_string()),
                        column,
                        constraint: db_err.constraint().map(str::to_owned),
                        message: db_err.message().to_string(),
                    })
                }
                _ => StoreError::Backend(format!(
                    "database error in {}: {}",
                    operation,
                    db_err.message()
                )),
            }
        }
        sqlx::Error::PoolClosed => {
            StoreError::Backend(format!("connection pool closed in {}", operation))
        }
        _ => StoreError::Backend(format!("sqlx error in {}: {}", operation, err)),
    }
}
