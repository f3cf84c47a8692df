/// Transaction tests
///
/// Tests for commit, rollback, failed commits, timeouts, isolation between
/// entity managers and optimistic version checks.
/// Run with: cargo test --test transaction_tests
mod common;

use common::fixtures::*;
use managedb::core::{Row, StoreResult};
use managedb::tutorial;
use managedb::{
    CascadeSet, EntityManager, EntityManagerFactory, ErrorKind, InMemoryRowStore, LifecycleState,
    PersistenceConfig, PersistenceError, RowStore, StoreError, TransactionState, UnitOfWork, Value,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Row store whose commits can be made to fail.
struct FlakyStore {
    inner: InMemoryRowStore,
    fail_commit: AtomicBool,
}

impl FlakyStore {
    fn new() -> Self {
        Self {
            inner: InMemoryRowStore::new(),
            fail_commit: AtomicBool::new(false),
        }
    }

    fn fail_next_commits(&self, fail: bool) {
        self.fail_commit.store(fail, Ordering::SeqCst);
    }
}

impl RowStore for FlakyStore {
    fn begin(&self) -> StoreResult<UnitOfWork> {
        self.inner.begin()
    }

    fn commit(&self, uow: UnitOfWork) -> StoreResult<()> {
        if self.fail_commit.load(Ordering::SeqCst) {
            return Err(StoreError::Rejected("disk full".to_string()));
        }
        self.inner.commit(uow)
    }

    fn rollback(&self, uow: UnitOfWork) -> StoreResult<()> {
        self.inner.rollback(uow)
    }

    fn insert_row(
        &self,
        uow: UnitOfWork,
        kind: &str,
        key: Option<&Value>,
        row: Row,
    ) -> StoreResult<Value> {
        self.inner.insert_row(uow, kind, key, row)
    }

    fn update_row(&self, uow: UnitOfWork, kind: &str, key: &Value, row: Row) -> StoreResult<()> {
        self.inner.update_row(uow, kind, key, row)
    }

    fn delete_row(&self, uow: UnitOfWork, kind: &str, key: &Value) -> StoreResult<()> {
        self.inner.delete_row(uow, kind, key)
    }

    fn select_row(
        &self,
        uow: Option<UnitOfWork>,
        kind: &str,
        key: &Value,
    ) -> StoreResult<Option<Row>> {
        self.inner.select_row(uow, kind, key)
    }
}

fn flaky_manager() -> (EntityManager, Arc<FlakyStore>) {
    let store = Arc::new(FlakyStore::new());
    let catalog = tutorial::catalog(CascadeSet::NONE).unwrap();
    let factory =
        EntityManagerFactory::new(catalog, store.clone(), PersistenceConfig::default()).unwrap();
    (factory.create_entity_manager(), store)
}

fn account(em: &mut EntityManager, owner: &str, balance: i64) -> managedb::EntityHandle {
    let account = em.new_entity("Account").unwrap();
    em.set(account, "owner", owner).unwrap();
    em.set(account, "balance", balance).unwrap();
    account
}

#[test]
fn test_begin_twice_fails() {
    let (factory, _store) = factory(CascadeSet::NONE);
    let mut em = factory.create_entity_manager();

    em.begin().unwrap();
    assert!(em.is_active());
    assert_eq!(em.begin().unwrap_err().kind(), ErrorKind::IllegalState);
    em.commit().unwrap();
    assert!(!em.is_active());
    assert_eq!(em.transaction_state(), TransactionState::Inactive);
}

#[test]
fn test_failed_commit_leaves_objects_untouched() {
    let (mut em, store) = flaky_manager();
    let customer = antony(&mut em);

    em.begin().unwrap();
    em.persist(customer).unwrap();
    store.fail_next_commits(true);
    let err = em.commit().unwrap_err();
    assert!(matches!(err, PersistenceError::Store(StoreError::Rejected(_))));

    assert_eq!(em.transaction_state(), TransactionState::RollingBack);
    assert_eq!(em.key(customer).unwrap(), None);
    assert_eq!(em.state(customer).unwrap(), LifecycleState::Managed);
    assert_eq!(em.persist(customer).unwrap_err().kind(), ErrorKind::IllegalState);
    assert_eq!(em.begin().unwrap_err().kind(), ErrorKind::IllegalState);

    em.rollback().unwrap();
    assert_eq!(em.state(customer).unwrap(), LifecycleState::New);
    assert_eq!(store.inner.row_count("Customer").unwrap(), 0);
    assert_eq!(store.inner.open_units().unwrap(), 0);
}

#[test]
fn test_update_is_retried_after_failed_commit() {
    let (mut em, store) = flaky_manager();
    let customer = antony(&mut em);
    em.begin().unwrap();
    em.persist(customer).unwrap();
    em.commit().unwrap();
    let id = em.key(customer).unwrap().unwrap();

    em.begin().unwrap();
    em.set(customer, "firstName", "William").unwrap();
    store.fail_next_commits(true);
    assert!(em.commit().is_err());
    em.rollback().unwrap();

    store.fail_next_commits(false);
    em.begin().unwrap();
    assert_eq!(em.commit().unwrap().updated, 1);

    let row = store.inner.select_row(None, "Customer", &id).unwrap().unwrap();
    assert_eq!(row[0], Value::from("William"));
}

#[test]
fn test_commit_after_timeout_fails() {
    let config = PersistenceConfig::new().transaction_timeout(Duration::from_millis(1));
    let (factory, store) = factory_with(CascadeSet::NONE, config);
    let mut em = factory.create_entity_manager();
    let customer = antony(&mut em);

    em.begin().unwrap();
    em.persist(customer).unwrap();
    std::thread::sleep(Duration::from_millis(20));
    let err = em.commit().unwrap_err();
    assert!(matches!(err, PersistenceError::Store(StoreError::Timeout(..))));
    assert_eq!(em.transaction_state(), TransactionState::RollingBack);

    em.rollback().unwrap();
    assert_eq!(store.row_count("Customer").unwrap(), 0);
}

#[test]
fn test_uncommitted_rows_are_invisible_to_other_managers() {
    let (factory, _store) = factory(CascadeSet::NONE);
    let mut writer = factory.create_entity_manager();
    let mut reader = factory.create_entity_manager();

    let customer = antony(&mut writer);
    writer.begin().unwrap();
    writer.persist(customer).unwrap();
    writer.flush().unwrap();
    let id = writer.key(customer).unwrap().unwrap();

    assert_eq!(reader.find("Customer", id.clone()).unwrap(), None);
    writer.commit().unwrap();
    assert!(reader.find("Customer", id).unwrap().is_some());
}

#[test]
fn test_failed_flush_marks_rollback() {
    let (factory, _store) = factory(CascadeSet::NONE);
    let mut em = factory.create_entity_manager();

    let book = em.new_entity("Book").unwrap();
    em.set_key(book, 1).unwrap();
    em.begin().unwrap();
    em.persist(book).unwrap();
    assert!(em.flush().is_err());
    assert_eq!(em.transaction_state(), TransactionState::RollingBack);
    assert_eq!(em.commit().unwrap_err().kind(), ErrorKind::IllegalState);
    em.rollback().unwrap();
    assert_eq!(em.state(book).unwrap(), LifecycleState::New);
}

#[test]
fn test_versions_increment_on_update() {
    let (factory, _store) = company(PersistenceConfig::default());
    let mut em = factory.create_entity_manager();
    let savings = account(&mut em, "Ada", 10);

    em.begin().unwrap();
    em.persist(savings).unwrap();
    em.commit().unwrap();
    assert_eq!(em.get(savings, "version").unwrap(), Value::from(1));

    em.begin().unwrap();
    em.set(savings, "balance", 25).unwrap();
    em.commit().unwrap();
    assert_eq!(em.get(savings, "version").unwrap(), Value::from(2));

    em.begin().unwrap();
    assert!(em.commit().unwrap().is_empty());
    assert_eq!(em.get(savings, "version").unwrap(), Value::from(2));

    let err = em.set(savings, "version", 9).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::IllegalArgument);
}

#[test]
fn test_stale_update_is_an_optimistic_conflict() {
    let (factory, _store) = company(PersistenceConfig::default());
    let mut first = factory.create_entity_manager();
    let savings = account(&mut first, "Ada", 10);
    first.begin().unwrap();
    first.persist(savings).unwrap();
    first.commit().unwrap();
    let id = first.key(savings).unwrap().unwrap();

    let mut second = factory.create_entity_manager();
    let copy = second.find("Account", id).unwrap().unwrap();
    second.begin().unwrap();
    second.set(copy, "balance", 20).unwrap();
    second.commit().unwrap();

    first.begin().unwrap();
    first.set(savings, "balance", 30).unwrap();
    let err = first.commit().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::OptimisticConflict);
    first.rollback().unwrap();

    first.refresh(savings).unwrap();
    assert_eq!(first.get(savings, "balance").unwrap(), Value::from(20));
    assert_eq!(first.get(savings, "version").unwrap(), Value::from(2));

    first.begin().unwrap();
    first.set(savings, "balance", 30).unwrap();
    first.commit().unwrap();
    assert_eq!(first.get(savings, "version").unwrap(), Value::from(3));
}

#[test]
fn test_stale_delete_is_an_optimistic_conflict() {
    let (factory, store) = company(PersistenceConfig::default());
    let mut first = factory.create_entity_manager();
    let savings = account(&mut first, "Ada", 10);
    first.begin().unwrap();
    first.persist(savings).unwrap();
    first.commit().unwrap();
    let id = first.key(savings).unwrap().unwrap();

    let mut second = factory.create_entity_manager();
    let copy = second.find("Account", id).unwrap().unwrap();
    second.begin().unwrap();
    second.set(copy, "owner", "Grace").unwrap();
    second.commit().unwrap();

    first.begin().unwrap();
    first.remove(savings).unwrap();
    assert_eq!(first.commit().unwrap_err().kind(), ErrorKind::OptimisticConflict);
    first.rollback().unwrap();
    assert_eq!(store.row_count("Account").unwrap(), 1);
    assert!(first.contains(savings));
}

#[test]
fn test_stale_merge_is_an_optimistic_conflict() {
    let (factory, _store) = company(PersistenceConfig::default());
    let mut first = factory.create_entity_manager();
    let savings = account(&mut first, "Ada", 10);
    first.begin().unwrap();
    first.persist(savings).unwrap();
    first.commit().unwrap();
    let id = first.key(savings).unwrap().unwrap();
    first.detach(savings).unwrap();

    let mut second = factory.create_entity_manager();
    let copy = second.find("Account", id).unwrap().unwrap();
    second.begin().unwrap();
    second.set(copy, "balance", 20).unwrap();
    second.commit().unwrap();

    first.begin().unwrap();
    let err = first.merge(savings).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::OptimisticConflict);
    assert_eq!(first.managed_count(), 0);
    first.rollback().unwrap();
}

#[test]
fn test_version_checks_can_be_disabled() {
    let (factory, _store) = company(PersistenceConfig::new().check_versions(false));
    let mut first = factory.create_entity_manager();
    let savings = account(&mut first, "Ada", 10);
    first.begin().unwrap();
    first.persist(savings).unwrap();
    first.commit().unwrap();
    let id = first.key(savings).unwrap().unwrap();

    let mut second = factory.create_entity_manager();
    let copy = second.find("Account", id.clone()).unwrap().unwrap();
    second.begin().unwrap();
    second.set(copy, "balance", 20).unwrap();
    second.commit().unwrap();

    first.begin().unwrap();
    first.set(savings, "balance", 30).unwrap();
    first.commit().unwrap();

    let mut reader = factory.create_entity_manager();
    let stored = reader.find("Account", id).unwrap().unwrap();
    assert_eq!(reader.get(stored, "balance").unwrap(), Value::from(30));
}

#[test]
fn test_concurrent_insert_of_same_key_fails_second_commit() {
    let (factory, store) = factory(CascadeSet::NONE);
    let mut first = factory.create_entity_manager();
    let mut second = factory.create_entity_manager();

    let dune = tutorial::new_book(&mut first, 7, "Dune", 9.5).unwrap();
    let emma = tutorial::new_book(&mut second, 7, "Emma", 7.0).unwrap();
    first.begin().unwrap();
    first.persist(dune).unwrap();
    second.begin().unwrap();
    second.persist(emma).unwrap();
    first.flush().unwrap();
    second.flush().unwrap();

    first.commit().unwrap();
    let err = second.commit().unwrap_err();
    assert!(matches!(err, PersistenceError::Store(StoreError::RowExists(..))));
    assert_eq!(second.transaction_state(), TransactionState::RollingBack);
    second.rollback().unwrap();
    assert_eq!(store.open_units().unwrap(), 0);

    let mut reader = factory.create_entity_manager();
    let stored = reader.find("Book", 7).unwrap().unwrap();
    assert_eq!(reader.get(stored, "title").unwrap(), Value::from("Dune"));
}

#[test]
fn test_update_of_concurrently_deleted_row_fails() {
    let (factory, store) = factory(CascadeSet::NONE);
    let mut first = factory.create_entity_manager();
    let (customer, id) = committed_customer(&mut first);

    let mut second = factory.create_entity_manager();
    let copy = second.find("Customer", id).unwrap().unwrap();

    first.begin().unwrap();
    first.set(customer, "firstName", "William").unwrap();
    first.flush().unwrap();

    second.begin().unwrap();
    second.remove(copy).unwrap();
    second.commit().unwrap();

    let err = first.commit().unwrap_err();
    assert!(matches!(err, PersistenceError::Store(StoreError::RowNotFound(..))));
    first.rollback().unwrap();
    assert_eq!(store.row_count("Customer").unwrap(), 0);
}
