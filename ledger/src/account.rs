//! The account aggregate and its events.
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Aggregate, Error, Event, EventPayload, Factory, Result};

/// Replays account histories.
pub type AccountFactory = Factory<Account>;

/// The state change an [`AccountEvent`] carries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, EventPayload)]
#[serde(tag = "type")]
pub enum AccountChange {
    /// The account was opened with a zero balance.
    #[event(rename = "AccountCreated")]
    Created,
    /// Money was paid into the account.
    #[event(rename = "AccountCredited")]
    Credited {
        /// Caller-supplied reference, e.g. a payment id.
        reference: String,
        /// Strictly positive amount.
        amount: Decimal,
    },
    /// Money was taken out of the account.
    #[event(rename = "AccountDebited")]
    Debited {
        /// Caller-supplied reference, e.g. a payment id.
        reference: String,
        /// Strictly positive amount.
        amount: Decimal,
    },
}

/// An immutable fact about one account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountEvent {
    account_id: Uuid,
    expected_version: u64,
    change: AccountChange,
}

impl AccountEvent {
    /// Creates a new account event.
    pub fn new(account_id: Uuid, expected_version: u64, change: AccountChange) -> Self {
        Self {
            account_id,
            expected_version,
            change,
        }
    }

    /// The first event of every account history.
    pub fn created(account_id: Uuid) -> Self {
        Self::new(account_id, 1, AccountChange::Created)
    }

    /// Returns the account this event belongs to.
    pub fn account_id(&self) -> Uuid {
        self.account_id
    }

    /// Returns the state change carried by this event.
    pub fn change(&self) -> &AccountChange {
        &self.change
    }
}

impl Event for AccountEvent {
    type Id = Uuid;

    fn aggregate_id(&self) -> &Uuid {
        &self.account_id
    }

    fn expected_version(&self) -> u64 {
        self.expected_version
    }

    fn event_type(&self) -> &'static str {
        self.change.event_type()
    }
}

/// An account whose balance is derived from its events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    id: Option<Uuid>,
    balance: Decimal,
    version: u64,
}

impl Account {
    /// Returns the account's balance.
    pub fn balance(&self) -> Decimal {
        self.balance
    }

    /// Produces the event that credits `amount` to this account.
    ///
    /// `self` is not modified; apply the returned events to advance it.
    pub fn credit(
        &self,
        reference: impl Into<String>,
        amount: Decimal,
    ) -> Result<Vec<AccountEvent>> {
        let id = self.require_id()?;
        validate_amount(amount)?;
        if self.balance.checked_add(amount).is_none() {
            return Err(Error::Validation(format!(
                "crediting {amount} would overflow the balance of {id}"
            )));
        }

        Ok(vec![AccountEvent::new(
            id,
            self.version + 1,
            AccountChange::Credited {
                reference: reference.into(),
                amount,
            },
        )])
    }

    /// Produces the event that debits `amount` from this account.
    ///
    /// The balance is allowed to go negative here; overdraft rules belong to
    /// the caller.
    pub fn debit(
        &self,
        reference: impl Into<String>,
        amount: Decimal,
    ) -> Result<Vec<AccountEvent>> {
        let id = self.require_id()?;
        validate_amount(amount)?;
        if self.balance.checked_sub(amount).is_none() {
            return Err(Error::Validation(format!(
                "debiting {amount} would overflow the balance of {id}"
            )));
        }

        Ok(vec![AccountEvent::new(
            id,
            self.version + 1,
            AccountChange::Debited {
                reference: reference.into(),
                amount,
            },
        )])
    }

    fn require_id(&self) -> Result<Uuid> {
        self.id.ok_or_else(|| Error::Validation("account has not been created".to_string()))
    }
}

fn validate_amount(amount: Decimal) -> Result<()> {
    if amount <= Decimal::ZERO {
        return Err(Error::Validation(format!("amount must be positive, got {amount}")));
    }
    Ok(())
}

impl Aggregate for Account {
    type Id = Uuid;
    type Event = AccountEvent;

    const TOPIC: &'static str = "account";

    fn nil() -> Self {
        Self {
            id: None,
            balance: Decimal::ZERO,
            version: 0,
        }
    }

    fn id(&self) -> Option<&Uuid> {
        self.id.as_ref()
    }

    fn version(&self) -> u64 {
        self.version
    }

    fn set_version(&mut self, version: u64) {
        self.version = version;
    }

    fn apply_changes(&mut self, event: &AccountEvent) {
        match &event.change {
            AccountChange::Created => self.id = Some(event.account_id),
            // Producers reject overflowing amounts; saturate for foreign histories.
            AccountChange::Credited { amount, .. } => {
                self.balance = self.balance.saturating_add(*amount);
            }
            AccountChange::Debited { amount, .. } => {
                self.balance = self.balance.saturating_sub(*amount);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opened() -> Account {
        Account::nil()
            .apply(&AccountEvent::created(Uuid::new_v4()))
            .expect("created applies to nil")
    }

    #[test]
    fn credit_is_stamped_with_next_version() {
        let account = opened();
        let events = account.credit("ref", Decimal::from(5)).expect("credit");

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].expected_version(), 2);
        assert_eq!(events[0].event_type(), "AccountCredited");
        assert_eq!(account.version(), 1, "credit must not mutate the account");
    }

    #[test]
    fn nil_account_cannot_produce_events() {
        let err = Account::nil()
            .debit("ref", Decimal::ONE)
            .expect_err("nil account has no id");
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn overflowing_credit_is_rejected() {
        let account = opened();
        let account = account
            .apply(&account.credit("ref", Decimal::MAX).expect("first credit")[0])
            .expect("apply");

        let err = account
            .credit("ref", Decimal::ONE)
            .expect_err("balance would overflow");
        assert!(matches!(err, Error::Validation(_)));
    }
}
