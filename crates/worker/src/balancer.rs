//! `Balancer` accounts: prepaid accounts never go below zero.

use txmachine_accounts::{Account, AccountModel, AccountType, Operation};
use txmachine_core::{AccountError, AccountResult};

pub const BALANCER: &str = "Balancer";

/// Register the `Balancer` discriminator and its overdraft guard.
pub fn register(model: &AccountModel) -> AccountResult<AccountType> {
    let balancer = model.discriminator(BALANCER)?;
    balancer
        .pre(Operation::Insert, guard_overdraft)
        .pre(Operation::Update, guard_overdraft);
    Ok(balancer)
}

/// A negative balance is a final rejection unless the account is postpaid.
fn guard_overdraft(account: &mut Account) -> AccountResult<()> {
    let Some(balance) = account.balance()? else {
        return Ok(());
    };
    if balance.is_negative() && account.postpaid() != Some(true) {
        return Err(AccountError::failure(format!(
            "balance {} is negative and account is not postpaid",
            balance.as_str()
        )));
    }
    Ok(())
}
