//! Account error model.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type used across the account layer.
pub type AccountResult<T> = Result<T, AccountError>;

/// Message of the validation error raised for malformed lookup queries.
pub const BAD_QUERY_PARAMS: &str = "bad or missing query params";

/// Account-level error.
///
/// The worker runtime only distinguishes [`AccountError::Failure`] (terminal)
/// from everything else (retried by resetting the job's attempts).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AccountError {
    /// Malformed input (e.g. lookup query params).
    #[error("{0}")]
    Validation(String),

    /// The storage engine rejected a write with an integrity violation.
    #[error(transparent)]
    Constraint(#[from] ConstraintViolation),

    /// A discriminator name was registered twice under the same base type.
    #[error("account discriminator \"{name}\" is already defined")]
    DuplicateDiscriminator { name: String },

    /// Terminal business failure; never retried by the worker.
    #[error("failure: {0}")]
    Failure(String),

    /// A referenced account does not exist.
    #[error("{0}")]
    NotFound(String),

    /// Unclassified storage/backend error (treated as transient).
    #[error("storage error: {0}")]
    Storage(String),
}

impl AccountError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn bad_query() -> Self {
        Self::Validation(BAD_QUERY_PARAMS.to_string())
    }

    pub fn failure(msg: impl Into<String>) -> Self {
        Self::Failure(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    /// Whether this error belongs to the terminal business failure category.
    pub fn is_terminal(&self) -> bool {
        matches!(self, AccountError::Failure(_))
    }

    /// Short machine-readable category name (used in logs).
    pub fn kind(&self) -> &'static str {
        match self {
            AccountError::Validation(_) => "validation",
            AccountError::Constraint(_) => "constraint_violation",
            AccountError::DuplicateDiscriminator { .. } => "duplicate_discriminator",
            AccountError::Failure(_) => "failure",
            AccountError::NotFound(_) => "not_found",
            AccountError::Storage(_) => "storage",
        }
    }
}

/// SQLSTATE-style code of an integrity violation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationCode {
    /// `23502`
    NotNull,
    /// `23505`
    Unique,
    /// Any other integrity class code reported by the engine.
    Other(String),
}

impl ViolationCode {
    pub fn from_sqlstate(code: &str) -> Self {
        match code {
            "23502" => ViolationCode::NotNull,
            "23505" => ViolationCode::Unique,
            other => ViolationCode::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            ViolationCode::NotNull => "23502",
            ViolationCode::Unique => "23505",
            ViolationCode::Other(code) => code,
        }
    }
}

impl core::fmt::Display for ViolationCode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured integrity violation reported by the storage engine.
///
/// Branch on `code`, `column` and `constraint`; `message` is for humans only.
#[derive(Debug, Error, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("{message}")]
pub struct ConstraintViolation {
    pub code: ViolationCode,
    pub table: String,
    /// Offending column (not-null violations).
    pub column: Option<String>,
    /// Violated constraint name (uniqueness violations).
    pub constraint: Option<String>,
    pub message: String,
}

impl ConstraintViolation {
    pub fn not_null(table: impl Into<String>, column: impl Into<String>) -> Self {
        let table = table.into();
        let column = column.into();
        let message = format!(
            "null value in column \"{column}\" of relation \"{table}\" violates not-null constraint"
        );
        Self {
            code: ViolationCode::NotNull,
            table,
            column: Some(column),
            constraint: None,
            message,
        }
    }

    pub fn unique(table: impl Into<String>, constraint: impl Into<String>) -> Self {
        let constraint = constraint.into();
        let message = format!("duplicate key value violates unique constraint \"{constraint}\"");
        Self {
            code: ViolationCode::Unique,
            table: table.into(),
            column: None,
            constraint: Some(constraint),
            message,
        }
    }

    pub fn is_not_null(&self) -> bool {
        self.code == ViolationCode::NotNull
    }

    pub fn is_unique(&self) -> bool {
        self.code == ViolationCode::Unique
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_failure_is_terminal() {
        assert!(AccountError::failure("insufficient funds").is_terminal());
        assert!(!AccountError::bad_query().is_terminal());
        assert!(!AccountError::storage("connection reset").is_terminal());
        assert!(!AccountError::not_found("nope").is_terminal());
        assert!(!AccountError::from(ConstraintViolation::unique("account", "account_key_idx")).is_terminal());
    }

    #[test]
    fn bad_query_message_is_stable() {
        assert_eq!(AccountError::bad_query().to_string(), "bad or missing query params");
    }

    #[test]
    fn duplicate_discriminator_message() {
        let err = AccountError::DuplicateDiscriminator {
            name: "DuplicatingType".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "account discriminator \"DuplicatingType\" is already defined"
        );
    }

    #[test]
    fn violation_constructors_fill_structured_fields() {
        let nn = ConstraintViolation::not_null("account", "key");
        assert_eq!(nn.code.as_str(), "23502");
        assert_eq!(nn.column.as_deref(), Some("key"));
        assert!(nn.message.contains("not-null constraint"));

        let uq = ConstraintViolation::unique("account", "account_key_idx");
        assert_eq!(uq.code, ViolationCode::from_sqlstate("23505"));
        assert_eq!(uq.constraint.as_deref(), Some("account_key_idx"));
        assert!(uq.message.contains("duplicate key value"));
    }
}
