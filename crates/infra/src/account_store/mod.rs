//! Storage engine boundary for account rows.
//!
//! The gateway only relies on the engine's error-reporting contract:
//! integrity violations come back as structured [`ConstraintViolation`]s,
//! never as bare messages.
//!
//! [`ConstraintViolation`]: txmachine_core::ConstraintViolation

pub mod in_memory;
pub mod postgres;
pub mod r#trait;

pub use in_memory::InMemoryAccountStore;
pub use postgres::PostgresAccountStore;
pub use r#trait::{ACCOUNT_KEY_INDEX, ACCOUNT_TABLE, AccountStore, CreatedRecord, StoreError};
