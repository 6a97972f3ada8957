//! Balance ledger
//!
//! [`BalanceSheet`] is the plain address → balance map shared by the live
//! [`Ledger`] and by challenge replay. [`AccountPolicy`] decides which
//! addresses exist and what they start with.
//!
//! # Example
//!
//! ```
//! use sequencer_core::{AccountPolicy, Address, Ledger};
//!
//! let alice = Address::from_bytes([1u8; 20]);
//! let bob = Address::from_bytes([2u8; 20]);
//! let mut ledger = Ledger::new(AccountPolicy::new(100, vec![alice, bob], false));
//!
//! ledger.apply(&alice, &bob, 30).unwrap();
//! assert_eq!(ledger.balance_of(&alice), 70);
//! assert_eq!(ledger.balance_of(&bob), 130);
//! ```

use crate::config::AccountsConfig;
use crate::types::{Address, Balance, BalanceUpdate};
use crate::{Error, Result};
use std::collections::BTreeMap;

/// Explicit account initialization policy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountPolicy {
    initial_balance: Balance,
    participants: Vec<Address>,
    open_enrollment: bool,
}

impl AccountPolicy {
    /// Create policy
    pub fn new(initial_balance: Balance, participants: Vec<Address>, open_enrollment: bool) -> Self {
        Self {
            initial_balance,
            participants,
            open_enrollment,
        }
    }

    /// Balance a newly seeded account starts with
    pub fn initial_balance(&self) -> Balance {
        self.initial_balance
    }

    /// Whether unknown addresses are seeded on first reference
    pub fn open_enrollment(&self) -> bool {
        self.open_enrollment
    }

    /// Balances before any block
    pub fn genesis(&self) -> BalanceSheet {
        let mut sheet = BalanceSheet::new();
        for participant in &self.participants {
            sheet.seed(*participant, self.initial_balance);
        }
        sheet
    }

    /// Admit an address the sheet does not hold yet
    pub fn admit(&self, address: &Address) -> Result<Balance> {
        if self.open_enrollment || self.participants.contains(address) {
            Ok(self.initial_balance)
        } else {
            Err(Error::InvalidAccount(*address))
        }
    }
}

impl From<&AccountsConfig> for AccountPolicy {
    fn from(config: &AccountsConfig) -> Self {
        Self::new(
            config.initial_balance,
            config.participants.clone(),
            config.open_enrollment,
        )
    }
}

/// Address-ordered balance map
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BalanceSheet {
    accounts: BTreeMap<Address, Balance>,
}

impl BalanceSheet {
    /// Empty sheet
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from `(address, balance)` pairs
    pub fn from_entries(entries: impl IntoIterator<Item = (Address, Balance)>) -> Self {
        Self {
            accounts: entries.into_iter().collect(),
        }
    }

    /// Whether the account exists
    pub fn contains(&self, address: &Address) -> bool {
        self.accounts.contains_key(address)
    }

    /// Balance of an existing account
    pub fn get(&self, address: &Address) -> Option<Balance> {
        self.accounts.get(address).copied()
    }

    /// Insert an account if absent; existing balances are kept
    pub fn seed(&mut self, address: Address, balance: Balance) {
        self.accounts.entry(address).or_insert(balance);
    }

    /// Seed any account the policy admits and the sheet lacks
    pub fn ensure(&mut self, address: &Address, policy: &AccountPolicy) -> Result<()> {
        if !self.contains(address) {
            let initial = policy.admit(address)?;
            self.seed(*address, initial);
        }
        Ok(())
    }

    /// Move `amount` from one existing account to another
    ///
    /// Both accounts must already exist. Nothing changes on error.
    pub fn transfer(&mut self, from: &Address, to: &Address, amount: Balance) -> Result<()> {
        let from_balance = self
            .get(from)
            .ok_or_else(|| Error::InvalidAccount(*from))?;
        let to_balance = self.get(to).ok_or_else(|| Error::InvalidAccount(*to))?;

        if from_balance < amount {
            return Err(Error::InsufficientBalance {
                account: *from,
                balance: from_balance,
                required: amount,
            });
        }
        if from == to {
            return Ok(());
        }
        let credited = to_balance.checked_add(amount).ok_or_else(|| {
            Error::InvariantViolation(format!("balance overflow crediting {}", to))
        })?;

        self.accounts.insert(*from, from_balance - amount);
        self.accounts.insert(*to, credited);
        Ok(())
    }

    /// Undo a transfer: credit `from`, debit `to`
    pub fn revert(&mut self, from: &Address, to: &Address, amount: Balance) -> Result<()> {
        self.transfer(to, from, amount).map_err(|e| match e {
            Error::InsufficientBalance { account, balance, required } => {
                Error::InvariantViolation(format!(
                    "reverting {} from {} would leave {} below zero ({} < {})",
                    amount, from, account, balance, required
                ))
            }
            other => other,
        })
    }

    /// Sum of all balances
    pub fn total_supply(&self) -> Balance {
        self.accounts.values().sum()
    }

    /// Canonical `(address, balance)` sequence
    pub fn snapshot(&self) -> Vec<(Address, Balance)> {
        self.accounts.iter().map(|(a, b)| (*a, *b)).collect()
    }

    /// Number of accounts
    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    /// Whether the sheet holds no accounts
    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }

    /// Seed accounts present in `other` but missing here
    ///
    /// An account that has never been referenced holds its initial balance,
    /// so two sheets covering different account sets compare equal once
    /// aligned this way.
    pub fn align_with(&mut self, other: &BalanceSheet, policy: &AccountPolicy) {
        for address in other.accounts.keys() {
            self.seed(*address, policy.initial_balance());
        }
    }
}

impl From<&BalanceSheet> for BalanceUpdate {
    fn from(sheet: &BalanceSheet) -> Self {
        BalanceUpdate::from_snapshot(&sheet.snapshot())
    }
}

/// Live balance ledger
#[derive(Debug, Clone)]
pub struct Ledger {
    sheet: BalanceSheet,
    policy: AccountPolicy,
}

impl Ledger {
    /// Ledger at genesis
    pub fn new(policy: AccountPolicy) -> Self {
        Self {
            sheet: policy.genesis(),
            policy,
        }
    }

    /// Ledger holding explicit balances (rehydration)
    pub fn with_balances(policy: AccountPolicy, sheet: BalanceSheet) -> Self {
        Self { sheet, policy }
    }

    /// Initialization policy
    pub fn policy(&self) -> &AccountPolicy {
        &self.policy
    }

    /// Apply a transfer: debit `from`, credit `to`
    ///
    /// Validates the transfer, seeds new accounts per policy and requires
    /// `balance(from) >= amount`. The ledger is unchanged on any error.
    pub fn apply(&mut self, from: &Address, to: &Address, amount: Balance) -> Result<()> {
        if amount == 0 {
            return Err(Error::InvalidTransfer("Amount must be positive".to_string()));
        }
        if from == to {
            return Err(Error::InvalidTransfer(format!(
                "Sender and recipient are both {}",
                from
            )));
        }

        // Work on a copy of the touched accounts so a failed check leaves no
        // seeded account behind.
        let mut touched = BalanceSheet::new();
        for address in [from, to] {
            let balance = match self.sheet.get(address) {
                Some(balance) => balance,
                None => self.policy.admit(address)?,
            };
            touched.seed(*address, balance);
        }
        touched.transfer(from, to, amount)?;

        let supply_before = self.sheet.total_supply();
        let seeded: Balance = [from, to]
            .iter()
            .filter(|a| !self.sheet.contains(a))
            .map(|_| self.policy.initial_balance())
            .sum();

        for (address, balance) in touched.snapshot() {
            self.sheet.accounts.insert(address, balance);
        }

        debug_assert_eq!(self.sheet.total_supply(), supply_before + seeded);
        tracing::debug!("Applied transfer {} -> {}: {}", from, to, amount);
        Ok(())
    }

    /// Current balance; unknown accounts read as what they would be seeded with
    pub fn balance_of(&self, address: &Address) -> Balance {
        self.sheet
            .get(address)
            .unwrap_or_else(|| self.policy.admit(address).unwrap_or(0))
    }

    /// Canonical `(address, balance)` sequence for commitment
    pub fn snapshot(&self) -> Vec<(Address, Balance)> {
        self.sheet.snapshot()
    }

    /// Current balance sheet
    pub fn sheet(&self) -> &BalanceSheet {
        &self.sheet
    }

    /// Sum of all balances
    pub fn total_supply(&self) -> Balance {
        self.sheet.total_supply()
    }

    /// Replace every balance (rollback / rehydration)
    pub fn overwrite(&mut self, sheet: BalanceSheet) {
        tracing::info!("Overwriting ledger with {} accounts", sheet.len());
        self.sheet = sheet;
    }
}
