//! `txmachine-accounts`: the polymorphic account model.
//!
//! - [`AccountModel`]: base type + discriminator registry
//! - [`hooks`]: pre/post interceptor chains per (type, operation)
//! - [`Account`]: the instance shape shared by every type
//! - [`AccountQuery`]: validated single-field lookups

pub mod account;
pub mod hooks;
pub mod query;
pub mod registry;

pub use account::{Account, Attributes, STORAGE_MANAGED};
pub use hooks::{AccountHook, Hook, Operation, Stage, run_hooks};
pub use query::AccountQuery;
pub use registry::{AccountModel, AccountType, BASE_TYPE};

#[doc(hidden)]
pub use serde_json as __serde_json;

/// Build an [`Attributes`] map from `"field" => value` pairs.
///
/// ```ignore
/// let attrs = attributes! { "key" => "acc-1", "postpaid" => true };
/// ```
#[macro_export]
macro_rules! attributes {
    () => {
        $crate::Attributes::new()
    };
    ($($field:expr => $value:expr),+ $(,)?) => {{
        let mut attrs = $crate::Attributes::new();
        $(
            attrs.insert(($field).to_string(), $crate::__serde_json::json!($value));
        )+
        attrs
    }};
}
