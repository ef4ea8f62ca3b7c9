//! `txmachine-core`: account domain building blocks.
//!
//! This crate contains **pure domain** primitives (no storage or queue concerns).

pub mod entity;
pub mod error;
pub mod id;
pub mod value_object;

pub use entity::Entity;
pub use error::{AccountError, AccountResult, ConstraintViolation, ViolationCode, BAD_QUERY_PARAMS};
pub use id::AccountId;
pub use value_object::Balance;
