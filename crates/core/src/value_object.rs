//! Value objects: equality by value, not identity.

use core::str::FromStr;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::AccountError;

/// Account balance: an exact decimal carried as its string encoding.
///
/// Parsing follows `NUMERIC` input rules (`".5"` and `"1."` are fine, exponents
/// are not). The string form is kept verbatim (`"-0.01"` stays `"-0.01"`) so
/// no precision or formatting is lost between the payload, storage and the job
/// result.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Balance {
    raw: String,
    value: Decimal,
}

impl Balance {
    pub fn zero() -> Self {
        Self {
            raw: "0".to_string(),
            value: Decimal::ZERO,
        }
    }

    pub fn parse(s: &str) -> Result<Self, AccountError> {
        Self::try_from(s.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn value(&self) -> Decimal {
        self.value
    }

    /// `-0` and `-0.00` are not negative.
    pub fn is_negative(&self) -> bool {
        self.value.is_sign_negative() && !self.value.is_zero()
    }
}

impl FromStr for Balance {
    type Err = AccountError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Balance {
    type Error = AccountError;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        match Decimal::from_str(&raw) {
            Ok(value) => Ok(Self { raw, value }),
            Err(e) => Err(AccountError::validation(format!(
                "balance must be a decimal string, got {raw:?}: {e}"
            ))),
        }
    }
}

impl From<Balance> for String {
    fn from(value: Balance) -> Self {
        value.raw
    }
}

impl core::fmt::Display for Balance {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.raw)
    }
}
