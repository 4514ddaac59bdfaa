use std::collections::HashMap;

use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

use crate::error::Error;

pub const MONEY_SCALE: u32 = 2;

#[derive(Default)]
pub struct AccountMap {
    accounts: HashMap<String, Account>,
}

impl AccountMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }

    pub fn insert(&mut self, account: Account) {
        self.accounts.insert(account.iban.clone(), account);
    }

    pub fn get(&self, iban: &str) -> Result<&Account, Error> {
        self.accounts
            .get(iban)
            .ok_or_else(|| Error::AccountNotFound(iban.to_string()))
    }

    fn get_mut(&mut self, iban: &str) -> Result<&mut Account, Error> {
        self.accounts
            .get_mut(iban)
            .ok_or_else(|| Error::AccountNotFound(iban.to_string()))
    }

    pub fn balance(&self, iban: &str) -> Result<Decimal, Error> {
        Ok(self.get(iban)?.balance)
    }

    /// Atomic with respect to the balance check: the insufficient-funds guard
    /// and the decrement happen under the same exclusive borrow, so no state
    /// where a partial debit is visible can exist.
    pub fn debit(&mut self, iban: &str, amount: Decimal) -> Result<Decimal, Error> {
        if amount <= Decimal::ZERO {
            return Err(Error::InvalidAmount(amount));
        }
        let account = self.get_mut(iban)?;
        if account.balance < amount {
            return Err(Error::InsufficientFunds {
                iban: iban.to_string(),
                available: account.balance,
                requested: amount,
            });
        }
        account.balance -= amount;
        Ok(account.balance)
    }

    pub fn credit(&mut self, iban: &str, amount: Decimal) -> Result<(), Error> {
        if amount.is_sign_negative() {
            return Err(Error::InvalidAmount(amount));
        }
        let account = self.get_mut(iban)?;
        account.balance += amount;
        Ok(())
    }

    pub fn sorted(&self) -> Vec<Account> {
        let mut accounts: Vec<_> = self.accounts.values().cloned().collect();
        accounts.sort_by(|a, b| a.iban.cmp(&b.iban));
        accounts
    }
}

#[derive(Debug, Clone)]
pub struct Account {
    iban: String,
    customer: Uuid,
    balance: Decimal,
}

impl Account {
    pub fn new(iban: impl Into<String>, customer: Uuid, balance: Decimal) -> Self {
        Self {
            iban: iban.into(),
            customer,
            balance: balance.round_dp(MONEY_SCALE),
        }
    }

    pub fn iban(&self) -> &str {
        &self.iban
    }

    pub fn customer(&self) -> Uuid {
        self.customer
    }

    pub fn balance(&self) -> Decimal {
        self.balance
    }
}

#[derive(Serialize)]
pub struct AccountReport {
    iban: String,
    customer: Uuid,
    balance: String,
}

impl From<Account> for AccountReport {
    fn from(account: Account) -> Self {
        Self {
            iban: account.iban,
            customer: account.customer,
            balance: format!("{:.2}", account.balance),
        }
    }
}
