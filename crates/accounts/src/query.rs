//! Single-field lookup queries.

use serde_json::{Value, json};

use txmachine_core::{AccountError, AccountId, AccountResult};

/// Lookup by exactly one unique field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccountQuery {
    Key(String),
    Id(AccountId),
}

impl AccountQuery {
    /// Validate a raw query object: exactly one of `{key}` (string) or `{id}`
    /// (integer). Anything else is "bad or missing query params".
    pub fn from_value(value: &Value) -> AccountResult<Self> {
        let object = value.as_object().ok_or_else(AccountError::bad_query)?;
        if object.len() != 1 {
            return Err(AccountError::bad_query());
        }

        match object.iter().next() {
            Some((field, Value::String(key))) if field == "key" => Ok(Self::Key(key.clone())),
            Some((field, Value::Number(id))) if field == "id" => id
                .as_i64()
                .map(|id| Self::Id(AccountId::new(id)))
                .ok_or_else(AccountError::bad_query),
            _ => Err(AccountError::bad_query()),
        }
    }

    /// Column the lookup runs against.
    pub fn field(&self) -> &'static str {
        match self {
            AccountQuery::Key(_) => "key",
            AccountQuery::Id(_) => "id",
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            AccountQuery::Key(key) => json!({ "key": key }),
            AccountQuery::Id(id) => json!({ "id": id.get() }),
        }
    }
}

impl core::fmt::Display for AccountQuery {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.to_value())
    }
}
