//! Business operations on accounts.
//!
//! Every operation follows the same cycle: load the history through the
//! repository, replay it into an [`Account`], ask the account for new events,
//! and persist them. The cycle is not atomic. With lazy conflict detection a
//! concurrent writer is only noticed on the next replay of the affected
//! account; with eager detection the store rejects the stale write.
use rust_decimal::Decimal;
use tracing::{instrument, warn};
use uuid::Uuid;

use crate::{Account, AccountEvent, AccountFactory, Error, Result, repository::Repository};

/// Creates, credits, debits and transfers between accounts.
pub struct AccountService<R> {
    repository: R,
    allow_overdraft: bool,
}

impl<R> AccountService<R>
where
    R: Repository<Account>,
{
    /// Creates a service that allows overdrafts.
    pub fn new(repository: R) -> Self {
        Self {
            repository,
            allow_overdraft: true,
        }
    }

    /// Sets whether debits may take a balance below zero.
    pub fn with_overdraft(mut self, allow_overdraft: bool) -> Self {
        self.allow_overdraft = allow_overdraft;
        self
    }

    /// Returns the repository the service persists through.
    pub fn repository(&self) -> &R {
        &self.repository
    }

    /// Opens a new account with a zero balance.
    #[instrument(skip(self))]
    pub async fn create(&self, account_id: Uuid) -> Result<()> {
        if self.repository.exists(&account_id).await? {
            warn!(%account_id, "account already exists");
            return Err(Error::AccountAlreadyExists(account_id));
        }

        self.repository
            .add(vec![AccountEvent::created(account_id)])
            .await
    }

    /// Replays the account's history and returns its current state.
    #[instrument(skip(self))]
    pub async fn account(&self, account_id: Uuid) -> Result<Account> {
        let history = match self.repository.get(&account_id).await {
            Ok(history) => history,
            Err(Error::DoesNotExist(_)) => return Err(Error::AccountNotFound(account_id)),
            Err(err) => return Err(err),
        };

        AccountFactory::replay(&history)
    }

    /// Pays `amount` into an account.
    #[instrument(skip(self, reference), fields(%amount))]
    pub async fn credit(
        &self,
        account_id: Uuid,
        reference: impl Into<String> + Send,
        amount: Decimal,
    ) -> Result<()> {
        let account = self.account(account_id).await?;
        let events = account.credit(reference, amount)?;

        self.repository.add(events).await
    }

    /// Takes `amount` out of an account.
    #[instrument(skip(self, reference), fields(%amount))]
    pub async fn debit(
        &self,
        account_id: Uuid,
        reference: impl Into<String> + Send,
        amount: Decimal,
    ) -> Result<()> {
        let account = self.account(account_id).await?;
        let events = self.debit_events(account_id, &account, reference.into(), amount)?;

        self.repository.add(events).await
    }

    /// Moves `amount` from one account to another.
    ///
    /// The debit and the credit are versioned independently, each against
    /// its own account, and persisted through a single repository call.
    #[instrument(skip(self, reference), fields(%amount))]
    pub async fn transfer(
        &self,
        source_account_id: Uuid,
        destination_account_id: Uuid,
        reference: impl Into<String> + Send,
        amount: Decimal,
    ) -> Result<()> {
        if source_account_id == destination_account_id {
            return Err(Error::Validation(format!(
                "cannot transfer from account {source_account_id} to itself"
            )));
        }

        let source = self.account(source_account_id).await?;
        let destination = self.account(destination_account_id).await?;

        let reference = reference.into();
        let mut events =
            self.debit_events(source_account_id, &source, reference.clone(), amount)?;
        events.extend(destination.credit(reference, amount)?);

        self.repository.add(events).await
    }

    fn debit_events(
        &self,
        account_id: Uuid,
        account: &Account,
        reference: String,
        amount: Decimal,
    ) -> Result<Vec<AccountEvent>> {
        let events = account.debit(reference, amount)?;

        if !self.allow_overdraft && account.balance() < amount {
            warn!(%account_id, balance = %account.balance(), %amount, "insufficient funds");
            return Err(Error::InsufficientFunds {
                account_id,
                balance: account.balance(),
                amount,
            });
        }

        Ok(events)
    }
}
