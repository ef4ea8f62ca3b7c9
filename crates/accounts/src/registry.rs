//! Account types and the discriminator registry.
//!
//! The base type (`account`) and every discriminator registered under it
//! share one instance shape ([`Account`]); what differs is the type tag and
//! the hook chains attached to the type.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use serde_json::Value;
use tracing::debug;

use txmachine_core::{AccountError, AccountResult};

use crate::account::{Account, Attributes};
use crate::hooks::{AccountHook, Hook, HookChains, Operation, Stage};

/// Name of the base account type (also the default `type` tag).
pub const BASE_TYPE: &str = "account";

struct TypeDescriptor {
    name: String,
    parent: Option<AccountType>,
    hooks: RwLock<HookChains>,
}

/// Handle to an account type descriptor (base or discriminator).
///
/// Cheap to clone; two handles are equal when they point at the same
/// descriptor.
#[derive(Clone)]
pub struct AccountType(Arc<TypeDescriptor>);

impl AccountType {
    fn new(name: impl Into<String>, parent: Option<AccountType>) -> Self {
        Self(Arc::new(TypeDescriptor {
            name: name.into(),
            parent,
            hooks: RwLock::new(HookChains::default()),
        }))
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub fn parent(&self) -> Option<&AccountType> {
        self.0.parent.as_ref()
    }

    pub fn is_base(&self) -> bool {
        self.0.parent.is_none()
    }

    /// True when `self` is `other` or descends from it.
    pub fn is_subtype_of(&self, other: &AccountType) -> bool {
        let mut current = Some(self);
        while let Some(ty) = current {
            if ty == other {
                return true;
            }
            current = ty.parent();
        }
        false
    }

    /// Append a synchronous pre-`op` hook to this type's own chain.
    pub fn pre<F>(&self, op: Operation, hook: F) -> &Self
    where
        F: Fn(&mut Account) -> AccountResult<()> + Send + Sync + 'static,
    {
        self.push_hook(Stage::Pre, op, Arc::new(hook))
    }

    /// Append a synchronous post-`op` hook to this type's own chain.
    pub fn post<F>(&self, op: Operation, hook: F) -> &Self
    where
        F: Fn(&mut Account) -> AccountResult<()> + Send + Sync + 'static,
    {
        self.push_hook(Stage::Post, op, Arc::new(hook))
    }

    /// Append a pre-`op` hook that may await.
    pub fn pre_hook(&self, op: Operation, hook: impl AccountHook + 'static) -> &Self {
        self.push_hook(Stage::Pre, op, Arc::new(hook))
    }

    /// Append a post-`op` hook that may await.
    pub fn post_hook(&self, op: Operation, hook: impl AccountHook + 'static) -> &Self {
        self.push_hook(Stage::Post, op, Arc::new(hook))
    }

    fn push_hook(&self, stage: Stage, op: Operation, hook: Hook) -> &Self {
        self.0
            .hooks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(stage, op, hook);
        self
    }

    /// Parent's effective chain followed by this type's own chain.
    pub fn effective_chain(&self, stage: Stage, op: Operation) -> Vec<Hook> {
        let mut chain = self
            .parent()
            .map(|parent| parent.effective_chain(stage, op))
            .unwrap_or_default();

        let own = self.0.hooks.read().unwrap_or_else(PoisonError::into_inner);
        chain.extend(own.chain(stage, op).iter().cloned());
        chain
    }

    fn clear_hooks(&self) {
        self.0
            .hooks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl PartialEq for AccountType {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for AccountType {}

impl core::fmt::Debug for AccountType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let hooks = self.0.hooks.read().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("AccountType")
            .field("name", &self.name())
            .field("parent", &self.parent().map(AccountType::name))
            .field("hooks", &*hooks)
            .finish()
    }
}

impl core::fmt::Display for AccountType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.name())
    }
}

/// Registry of the base account type and its discriminators.
///
/// Create one with [`AccountModel::init`] at startup (or per test) and share
/// it behind an `Arc`. Registration is meant for initialisation only.
#[derive(Debug)]
pub struct AccountModel {
    base: AccountType,
    discriminators: RwLock<HashMap<String, AccountType>>,
}

impl AccountModel {
    /// Fresh registry with only the `account` base type.
    pub fn init() -> Self {
        Self::with_base(BASE_TYPE)
    }

    pub fn with_base(name: impl Into<String>) -> Self {
        Self {
            base: AccountType::new(name, None),
            discriminators: RwLock::new(HashMap::new()),
        }
    }

    pub fn base(&self) -> &AccountType {
        &self.base
    }

    /// Register a named subtype of the base type.
    pub fn discriminator(&self, name: &str) -> AccountResult<AccountType> {
        let mut discriminators = self
            .discriminators
            .write()
            .unwrap_or_else(PoisonError::into_inner);

        if name == self.base.name() || discriminators.contains_key(name) {
            return Err(AccountError::DuplicateDiscriminator {
                name: name.to_string(),
            });
        }

        let ty = AccountType::new(name, Some(self.base.clone()));
        discriminators.insert(name.to_string(), ty.clone());
        debug!(base = %self.base, discriminator = name, "registered account discriminator");
        Ok(ty)
    }

    /// Registered discriminator by exact name.
    pub fn get(&self, name: &str) -> Option<AccountType> {
        self.discriminators
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    /// Type for a `type` tag; the base type when absent or unknown.
    pub fn resolve(&self, type_name: Option<&str>) -> AccountType {
        type_name
            .and_then(|name| self.get(name))
            .unwrap_or_else(|| self.base.clone())
    }

    /// Type named by the `type` attribute of a record.
    pub fn resolve_attributes(&self, attributes: &Attributes) -> AccountType {
        self.resolve(attributes.get("type").and_then(Value::as_str))
    }

    /// Construct an instance in memory (no storage interaction).
    ///
    /// The `type` attribute is normalised to the resolved type's name, so an
    /// unknown tag yields a base instance tagged `account`.
    pub fn build(&self, mut attributes: Attributes) -> Account {
        let ty = self.resolve_attributes(&attributes);
        attributes.insert("type".to_string(), Value::String(ty.name().to_string()));
        Account::new(ty, attributes)
    }

    /// Re-resolve an instance's type from its current `type` attribute.
    pub fn retype(&self, account: &mut Account) {
        let ty = self.resolve_attributes(account.attributes());
        account.set("type", ty.name());
        account.set_account_type(ty);
    }

    /// Sorted names of all registered discriminators.
    pub fn discriminator_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self
            .discriminators
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// Drop every discriminator and every hook (base included).
    pub fn reset(&self) {
        let mut discriminators = self
            .discriminators
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        for ty in discriminators.values() {
            ty.clear_hooks();
        }
        discriminators.clear();
        self.base.clear_hooks();
    }
}

impl Default for AccountModel {
    fn default() -> Self {
        Self::init()
    }
}
