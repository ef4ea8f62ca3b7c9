//! Pre/post interceptor chains around persistence operations.
//!
//! Every account type owns one chain per (stage, operation). The chain that
//! actually runs for an instance is the *effective* chain of its type: the
//! parent's effective chain followed by the type's own hooks, each in
//! registration order.
//!
//! A hook returns `Ok(())` to continue or an error to abort. When a pre-hook
//! fails, the remaining pre-hooks and the operation body are skipped. When a
//! post-hook fails, the write has already happened but the operation still
//! reports the error to its caller.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use txmachine_core::AccountResult;

use crate::account::Account;

/// Persistence operations that can be intercepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Insert,
    Update,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Insert => "insert",
            Operation::Update => "update",
        }
    }
}

impl core::fmt::Display for Operation {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a hook runs before or after the operation body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Pre,
    Post,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Pre => "pre",
            Stage::Post => "post",
        }
    }
}

/// An interceptor. Receives the instance being persisted and may await.
///
/// Any `Fn(&mut Account) -> AccountResult<()>` is a hook; implement the
/// trait directly when the hook needs to await (lookups, timers).
#[async_trait]
pub trait AccountHook: Send + Sync {
    async fn call(&self, account: &mut Account) -> AccountResult<()>;
}

#[async_trait]
impl<F> AccountHook for F
where
    F: Fn(&mut Account) -> AccountResult<()> + Send + Sync,
{
    async fn call(&self, account: &mut Account) -> AccountResult<()> {
        self(account)
    }
}

pub type Hook = Arc<dyn AccountHook>;

/// Hooks registered directly on one account type.
#[derive(Default)]
pub struct HookChains {
    chains: HashMap<(Stage, Operation), Vec<Hook>>,
}

impl HookChains {
    pub fn push(&mut self, stage: Stage, op: Operation, hook: Hook) {
        self.chains.entry((stage, op)).or_default().push(hook);
    }

    pub fn chain(&self, stage: Stage, op: Operation) -> &[Hook] {
        self.chains
            .get(&(stage, op))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.chains.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&mut self) {
        self.chains.clear();
    }
}

impl core::fmt::Debug for HookChains {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let mut counts: Vec<_> = self
            .chains
            .iter()
            .map(|((stage, op), hooks)| (format!("{}:{}", stage.as_str(), op), hooks.len()))
            .collect();
        counts.sort();
        f.debug_map().entries(counts).finish()
    }
}

/// Run the effective `stage` chain of the instance's type for `op`.
///
/// Each hook is awaited before the next one starts. Stops at the first hook
/// that returns an error and returns that error.
pub async fn run_hooks(stage: Stage, op: Operation, account: &mut Account) -> AccountResult<()> {
    let chain = account.account_type().effective_chain(stage, op);
    if chain.is_empty() {
        return Ok(());
    }

    debug!(
        account_type = %account.account_type().name(),
        operation = %op,
        stage = stage.as_str(),
        hooks = chain.len(),
        "running hook chain"
    );

    for (idx, hook) in chain.iter().enumerate() {
        if let Err(err) = hook.call(account).await {
            debug!(
                account_type = %account.account_type().name(),
                operation = %op,
                stage = stage.as_str(),
                position = idx + 1,
                error = %err,
                "hook aborted chain"
            );
            return Err(err);
        }
    }

    Ok(())
}
