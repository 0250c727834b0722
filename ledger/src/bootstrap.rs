//! Wires an in-memory ledger together.
use std::sync::Arc;

use tracing::info;

use crate::{
    Account, AccountEvent, Aggregate, EventStore, LedgerConfig,
    read_model::AccountReadModel,
    repository::GenericRepository,
    service::AccountService,
    store::in_memory::InMemoryEventStore,
};

/// The in-memory account store.
pub type InMemoryAccountStore = InMemoryEventStore<AccountEvent>;

/// A repository for accounts backed by the in-memory store.
pub type InMemoryAccountRepository = GenericRepository<Account, InMemoryAccountStore>;

/// An owned event store, read model and account service.
///
/// The read model is subscribed to the `account` topic before any event is
/// written, so it sees the full history. Dropping the ledger releases the
/// store and everything registered on it.
pub struct Ledger {
    store: Arc<InMemoryAccountStore>,
    read_model: Arc<AccountReadModel>,
    service: AccountService<InMemoryAccountRepository>,
}

impl Ledger {
    /// Builds a ledger according to `config`.
    pub fn new(config: &LedgerConfig) -> Self {
        info!(
            conflict_detection = ?config.conflict_detection,
            allow_overdraft = config.allow_overdraft,
            "starting ledger"
        );

        let store = Arc::new(
            InMemoryAccountStore::new().with_conflict_detection(config.conflict_detection),
        );

        let read_model = Arc::new(AccountReadModel::new());
        store.register(Account::TOPIC, read_model.clone());

        let repository = GenericRepository::new(Arc::clone(&store));
        let service = AccountService::new(repository).with_overdraft(config.allow_overdraft);

        Self {
            store,
            read_model,
            service,
        }
    }

    /// Returns the event store.
    pub fn store(&self) -> &Arc<InMemoryAccountStore> {
        &self.store
    }

    /// Returns the account read model.
    pub fn read_model(&self) -> &AccountReadModel {
        &self.read_model
    }

    /// Returns the account service.
    pub fn service(&self) -> &AccountService<InMemoryAccountRepository> {
        &self.service
    }
}

impl Default for Ledger {
    fn default() -> Self {
        Self::new(&LedgerConfig::default())
    }
}
