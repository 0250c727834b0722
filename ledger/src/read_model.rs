//! A query-side projection of account events.
//!
//! The read model is fed by subscription and never consults the event store.
//! It is eventually consistent with the write side and can be rebuilt at any
//! time by feeding it every stored event again.
use dashmap::DashMap;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{AccountChange, AccountEvent, Error, Event, EventHandler, Result};

/// Whether a transaction added or removed money.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionKind {
    /// Money paid in.
    Credit,
    /// Money taken out.
    Debit,
}

/// One line of an account statement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// The reference the operation was submitted with.
    pub reference: String,
    /// The amount moved.
    pub amount: Decimal,
    /// Direction of the movement.
    pub kind: TransactionKind,
}

/// The denormalized view of one account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountView {
    /// The account id.
    pub id: Uuid,
    /// Running balance.
    pub balance: Decimal,
    /// Every credit and debit, oldest first.
    pub transactions: Vec<Transaction>,
}

impl AccountView {
    fn new(id: Uuid) -> Self {
        Self {
            id,
            balance: Decimal::ZERO,
            transactions: Vec::new(),
        }
    }

    fn record(&mut self, reference: &str, amount: Decimal, kind: TransactionKind) {
        self.balance = match kind {
            TransactionKind::Credit => self.balance.saturating_add(amount),
            TransactionKind::Debit => self.balance.saturating_sub(amount),
        };
        self.transactions.push(Transaction {
            reference: reference.to_string(),
            amount,
            kind,
        });
    }
}

/// Account statements built from the `account` topic.
#[derive(Debug, Default)]
pub struct AccountReadModel {
    accounts: DashMap<Uuid, AccountView>,
}

impl AccountReadModel {
    /// Creates an empty read model.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of the account's current view.
    pub fn get(&self, account_id: &Uuid) -> Result<AccountView> {
        self.accounts
            .get(account_id)
            .map(|view| view.value().clone())
            .ok_or_else(|| Error::DoesNotExist(format!("account view {account_id}")))
    }

    /// Returns the number of accounts in the view.
    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    /// Returns whether no account has been projected yet.
    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }

    /// Folds one event into the view.
    ///
    /// Movements on accounts the view has never seen created are ignored.
    pub fn handle_event(&self, event: &AccountEvent) {
        let account_id = event.account_id();
        debug!(%account_id, event_type = event.event_type(), "projecting event");

        let (reference, amount, kind) = match event.change() {
            AccountChange::Created => {
                self.accounts.insert(account_id, AccountView::new(account_id));
                return;
            }
            AccountChange::Credited { reference, amount } => {
                (reference, *amount, TransactionKind::Credit)
            }
            AccountChange::Debited { reference, amount } => {
                (reference, *amount, TransactionKind::Debit)
            }
        };

        match self.accounts.get_mut(&account_id) {
            Some(mut view) => view.record(reference, amount, kind),
            None => warn!(
                %account_id,
                event_type = event.event_type(),
                "ignoring event for unknown account"
            ),
        }
    }
}

impl EventHandler<AccountEvent> for AccountReadModel {
    fn handle(&self, event: &AccountEvent) {
        self.handle_event(event);
    }
}
