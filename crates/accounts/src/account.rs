//! The account instance.

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Map, Value};

use txmachine_core::{AccountId, AccountResult, Balance, Entity};

use crate::registry::AccountType;

/// Raw attribute map of an account (known fields plus anything else).
pub type Attributes = Map<String, Value>;

/// Attributes assigned by storage and never accepted as changes.
pub const STORAGE_MANAGED: [&str; 3] = ["id", "created_at", "updated_at"];

/// An account instance of some registered type.
///
/// Attributes are kept as an open map so unknown fields travel through
/// untouched; typed accessors cover the well-known ones.
#[derive(Debug, Clone)]
pub struct Account {
    kind: AccountType,
    attributes: Attributes,
    audit: Vec<String>,
}

impl Account {
    /// Wrap `attributes` as an instance of `kind`, verbatim.
    pub fn new(kind: AccountType, attributes: Attributes) -> Self {
        Self {
            kind,
            attributes,
            audit: Vec::new(),
        }
    }

    pub fn account_type(&self) -> &AccountType {
        &self.kind
    }

    pub(crate) fn set_account_type(&mut self, kind: AccountType) {
        self.kind = kind;
    }

    /// True when the instance's type is `ty` or descends from it.
    pub fn is_a(&self, ty: &AccountType) -> bool {
        self.kind.is_subtype_of(ty)
    }

    /// The `type` tag (the type name when the attribute is unset).
    pub fn type_name(&self) -> &str {
        self.attributes
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or_else(|| self.kind.name())
    }

    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    pub fn attributes_mut(&mut self) -> &mut Attributes {
        &mut self.attributes
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.attributes.get(field)
    }

    pub fn set(&mut self, field: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        self.attributes.insert(field.into(), value.into());
        self
    }

    pub fn remove(&mut self, field: &str) -> Option<Value> {
        self.attributes.remove(field)
    }

    /// Overwrite attributes with `changes`.
    pub fn merge(&mut self, changes: &Attributes) {
        for (field, value) in changes {
            self.attributes.insert(field.clone(), value.clone());
        }
    }

    pub fn key(&self) -> Option<&str> {
        self.attributes.get("key").and_then(Value::as_str)
    }

    /// Parsed `balance`, `None` when unset.
    pub fn balance(&self) -> AccountResult<Option<Balance>> {
        match self.attributes.get("balance") {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) => Balance::parse(s).map(Some),
            Some(Value::Number(n)) => Balance::parse(&n.to_string()).map(Some),
            Some(other) => Balance::parse(&other.to_string()).map(Some),
        }
    }

    pub fn postpaid(&self) -> Option<bool> {
        self.attributes.get("postpaid").and_then(Value::as_bool)
    }

    pub fn status(&self) -> Option<&str> {
        self.attributes.get("status").and_then(Value::as_str)
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.timestamp("created_at")
    }

    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.timestamp("updated_at")
    }

    fn timestamp(&self, field: &str) -> Option<DateTime<Utc>> {
        let raw = self.attributes.get(field)?.as_str()?;
        DateTime::parse_from_rfc3339(raw)
            .ok()
            .map(|dt| dt.with_timezone(&Utc))
    }

    pub fn set_id(&mut self, id: AccountId) {
        self.attributes.insert("id".to_string(), Value::from(id.get()));
    }

    pub fn set_timestamp(&mut self, field: &str, at: DateTime<Utc>) {
        self.attributes.insert(
            field.to_string(),
            Value::String(at.to_rfc3339_opts(SecondsFormat::Micros, true)),
        );
    }

    /// Instance-local log that hooks may append to (never persisted).
    pub fn audit(&self) -> &[String] {
        &self.audit
    }

    pub fn record(&mut self, entry: impl Into<String>) {
        self.audit.push(entry.into());
    }

    /// Plain JSON object of all attributes.
    pub fn to_object(&self) -> Value {
        Value::Object(self.attributes.clone())
    }
}

impl Entity for Account {
    type Id = AccountId;

    fn id(&self) -> Option<AccountId> {
        self.attributes
            .get("id")
            .and_then(Value::as_i64)
            .map(AccountId::new)
    }
}
