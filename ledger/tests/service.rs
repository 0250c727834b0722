//! Integration tests for account operations and the read model.

use std::{sync::Arc, thread, time::Duration};

use futures::executor::block_on;
use rstest::rstest;
use rust_decimal::Decimal;
use uuid::Uuid;

use ledger::{
    Account, AccountChange, AccountEvent, AccountFactory, Aggregate, ConflictDetection, Error,
    EventStore, Ledger, LedgerConfig,
    bootstrap::InMemoryAccountStore,
    read_model::{AccountReadModel, TransactionKind},
    repository::{GenericRepository, Repository},
    service::AccountService,
};

fn dec(value: i64) -> Decimal {
    Decimal::from(value)
}

fn history(ledger: &Ledger, id: Uuid) -> Vec<AccountEvent> {
    block_on(ledger.store().get(Account::TOPIC, &id)).expect("get")
}

#[test_log::test]
fn create_credit_transfer_scenario() {
    let ledger = Ledger::default();
    let service = ledger.service();
    let (a, b) = (Uuid::new_v4(), Uuid::new_v4());

    block_on(service.create(a)).expect("create a");
    block_on(service.credit(a, "opening", dec(10))).expect("credit a");
    block_on(service.create(b)).expect("create b");
    block_on(service.transfer(a, b, "rent", dec(3))).expect("transfer");

    let source = AccountFactory::replay(&history(&ledger, a)).expect("replay a");
    assert_eq!(source.balance(), dec(7));
    assert_eq!(source.version(), 3);

    let destination = AccountFactory::replay(&history(&ledger, b)).expect("replay b");
    assert_eq!(destination.balance(), dec(3));
    assert_eq!(destination.version(), 2);

    let source_view = ledger.read_model().get(&a).expect("view a");
    let destination_view = ledger.read_model().get(&b).expect("view b");
    assert_eq!(source_view.balance, source.balance());
    assert_eq!(destination_view.balance, destination.balance());
    assert_eq!(source_view.transactions.len(), 2);
    assert_eq!(source_view.transactions[1].kind, TransactionKind::Debit);
    assert_eq!(source_view.transactions[1].reference, "rent");
    assert_eq!(destination_view.transactions[0].kind, TransactionKind::Credit);
}

#[test_log::test]
fn transfer_events_are_versioned_per_account() {
    let ledger = Ledger::default();
    let service = ledger.service();
    let (a, b) = (Uuid::new_v4(), Uuid::new_v4());

    block_on(service.create(a)).expect("create a");
    block_on(service.create(b)).expect("create b");
    block_on(service.credit(a, "salary", dec(10))).expect("credit");
    block_on(service.credit(a, "bonus", dec(5))).expect("credit");
    block_on(service.transfer(a, b, "gift", dec(4))).expect("transfer");

    let debit = history(&ledger, a).pop().expect("debit stored");
    let credit = history(&ledger, b).pop().expect("credit stored");
    assert_eq!(
        debit,
        AccountEvent::new(
            a,
            4,
            AccountChange::Debited {
                reference: "gift".to_string(),
                amount: dec(4),
            }
        )
    );
    assert_eq!(
        credit,
        AccountEvent::new(
            b,
            2,
            AccountChange::Credited {
                reference: "gift".to_string(),
                amount: dec(4),
            }
        )
    );
}

#[test_log::test]
fn creating_an_account_twice_fails() {
    let ledger = Ledger::default();
    let id = Uuid::new_v4();

    block_on(ledger.service().create(id)).expect("first create");
    let err = block_on(ledger.service().create(id)).expect_err("second create");

    assert_eq!(err, Error::AccountAlreadyExists(id));
    assert_eq!(history(&ledger, id), vec![AccountEvent::created(id)]);
    assert_eq!(ledger.read_model().len(), 1);
}

#[test_log::test]
fn operations_on_missing_accounts_fail_without_writing() {
    let ledger = Ledger::default();
    let service = ledger.service();
    let (known, missing) = (Uuid::new_v4(), Uuid::new_v4());
    block_on(service.create(known)).expect("create");

    assert_eq!(
        block_on(service.credit(missing, "ref", dec(1))).expect_err("credit"),
        Error::AccountNotFound(missing)
    );
    assert_eq!(
        block_on(service.debit(missing, "ref", dec(1))).expect_err("debit"),
        Error::AccountNotFound(missing)
    );
    assert_eq!(
        block_on(service.transfer(known, missing, "ref", dec(1))).expect_err("transfer"),
        Error::AccountNotFound(missing)
    );
    assert_eq!(
        block_on(service.transfer(missing, known, "ref", dec(1))).expect_err("transfer"),
        Error::AccountNotFound(missing)
    );

    assert!(history(&ledger, missing).is_empty());
    assert_eq!(history(&ledger, known).len(), 1);
    assert!(!block_on(service.repository().exists(&missing)).expect("exists"));
}

#[rstest]
#[case::zero(dec(0))]
#[case::negative(dec(-5))]
fn non_positive_amounts_are_rejected(#[case] amount: Decimal) {
    let ledger = Ledger::default();
    let service = ledger.service();
    let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
    block_on(service.create(a)).expect("create a");
    block_on(service.create(b)).expect("create b");

    assert!(matches!(
        block_on(service.credit(a, "ref", amount)),
        Err(Error::Validation(_))
    ));
    assert!(matches!(
        block_on(service.debit(a, "ref", amount)),
        Err(Error::Validation(_))
    ));
    assert!(matches!(
        block_on(service.transfer(a, b, "ref", amount)),
        Err(Error::Validation(_))
    ));
    assert_eq!(history(&ledger, a).len(), 1);
    assert_eq!(history(&ledger, b).len(), 1);
}

#[test_log::test]
fn transfer_to_self_is_rejected() {
    let ledger = Ledger::default();
    let id = Uuid::new_v4();
    block_on(ledger.service().create(id)).expect("create");
    block_on(ledger.service().credit(id, "ref", dec(5))).expect("credit");

    let err = block_on(ledger.service().transfer(id, id, "loop", dec(1))).expect_err("self");
    assert!(matches!(err, Error::Validation(_)));
    assert_eq!(history(&ledger, id).len(), 2);
}

#[test_log::test]
fn overdraft_is_allowed_by_default() {
    let ledger = Ledger::default();
    let id = Uuid::new_v4();
    block_on(ledger.service().create(id)).expect("create");
    block_on(ledger.service().debit(id, "ref", dec(5))).expect("debit");

    let account = block_on(ledger.service().account(id)).expect("account");
    assert_eq!(account.balance(), dec(-5));
    assert_eq!(ledger.read_model().get(&id).expect("view").balance, dec(-5));
}

#[rstest]
#[case::debit(false)]
#[case::transfer(true)]
fn overdraft_can_be_disabled(#[case] via_transfer: bool) {
    let config = LedgerConfig {
        allow_overdraft: false,
        ..LedgerConfig::default()
    };
    let ledger = Ledger::new(&config);
    let service = ledger.service();
    let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
    block_on(service.create(a)).expect("create a");
    block_on(service.create(b)).expect("create b");
    block_on(service.credit(a, "ref", dec(5))).expect("credit");

    let result = match via_transfer {
        true => block_on(service.transfer(a, b, "ref", dec(6))),
        false => block_on(service.debit(a, "ref", dec(6))),
    };
    assert_eq!(
        result.expect_err("insufficient funds"),
        Error::InsufficientFunds {
            account_id: a,
            balance: dec(5),
            amount: dec(6),
        }
    );
    assert_eq!(history(&ledger, a).len(), 2);
    assert_eq!(history(&ledger, b).len(), 1);

    // The exact balance may still be withdrawn.
    block_on(service.debit(a, "ref", dec(5))).expect("debit to zero");
    assert_eq!(block_on(service.account(a)).expect("account").balance(), dec(0));
}

#[test_log::test]
fn lazy_ledger_surfaces_lost_updates_on_next_operation() {
    let ledger = Ledger::default();
    let id = Uuid::new_v4();
    block_on(ledger.service().create(id)).expect("create");

    // A second producer writes behind the service's back with a stale version.
    let account = block_on(ledger.service().account(id)).expect("account");
    let stale = account.credit("racer", dec(1)).expect("events");
    block_on(ledger.service().credit(id, "winner", dec(2))).expect("credit");
    block_on(ledger.service().repository().add(stale)).expect("lazy store accepts");

    let err = block_on(ledger.service().credit(id, "next", dec(1))).expect_err("conflict");
    assert!(matches!(err, Error::VersionConflict { expected: 2, actual: 2, .. }));
}

#[test_log::test]
fn eager_ledger_rejects_lost_updates_at_write_time() {
    let config = LedgerConfig {
        conflict_detection: ConflictDetection::Eager,
        ..LedgerConfig::default()
    };
    let ledger = Ledger::new(&config);
    let id = Uuid::new_v4();
    block_on(ledger.service().create(id)).expect("create");

    let account = block_on(ledger.service().account(id)).expect("account");
    let stale = account.credit("racer", dec(1)).expect("events");
    block_on(ledger.service().credit(id, "winner", dec(2))).expect("credit");

    let err = block_on(ledger.service().repository().add(stale)).expect_err("stale write");
    assert!(matches!(err, Error::VersionConflict { expected: 2, actual: 2, .. }));

    let account = block_on(ledger.service().account(id)).expect("history stays consistent");
    assert_eq!(account.balance(), dec(2));
    assert_eq!(ledger.read_model().get(&id).expect("view").transactions.len(), 1);
}

#[test_log::test]
fn read_model_ignores_movements_on_unknown_accounts() {
    let ledger = Ledger::default();
    let id = Uuid::new_v4();

    ledger.read_model().handle_event(&AccountEvent::new(
        id,
        2,
        AccountChange::Credited {
            reference: "orphan".to_string(),
            amount: dec(1),
        },
    ));

    assert!(ledger.read_model().is_empty());
    assert!(matches!(
        ledger.read_model().get(&id),
        Err(Error::DoesNotExist(_))
    ));
}

#[test_log::test]
fn read_model_follows_stored_order_when_appends_race() {
    let store = Arc::new(InMemoryAccountStore::new());
    // A slow subscriber ahead of the read model keeps the creation in flight
    // while the credit is stored.
    store.register(
        Account::TOPIC,
        Arc::new(|event: &AccountEvent| {
            if matches!(event.change(), AccountChange::Created) {
                thread::sleep(Duration::from_millis(300));
            }
        }),
    );
    let read_model = Arc::new(AccountReadModel::new());
    store.register(Account::TOPIC, read_model.clone());
    let repository = GenericRepository::<Account, _>::new(Arc::clone(&store));
    let service = AccountService::new(repository);
    let id = Uuid::new_v4();

    thread::scope(|scope| {
        scope.spawn(|| block_on(service.create(id)).expect("create"));
        scope.spawn(|| {
            thread::sleep(Duration::from_millis(50));
            block_on(service.credit(id, "pay", dec(10))).expect("credit");
        });
    });

    let stored = block_on(service.account(id)).expect("account");
    let view = read_model.get(&id).expect("view");
    assert_eq!(stored.balance(), dec(10));
    assert_eq!(view.balance, stored.balance());
    assert_eq!(view.transactions.len(), 1);
}
