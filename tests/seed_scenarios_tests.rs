/// Entity manager scenarios
///
/// The six basic persistence context walkthroughs: persist, cascade,
/// removal, refresh, detach and merge.
/// Run with: cargo test --test seed_scenarios_tests
mod common;

use common::fixtures::*;
use managedb::{CascadeOp, CascadeSet, LifecycleState, Value};

#[test]
fn test_persist_and_commit_assigns_keys() {
    let (factory, _store) = factory(CascadeSet::NONE);
    let mut em = factory.create_entity_manager();

    let (customer, address) = committed_pair(&mut em);
    let customer_id = em.key(customer).unwrap().expect("customer id");
    let address_id = em.key(address).unwrap().expect("address id");

    em.clear();
    let found = em.find("Customer", customer_id.clone()).unwrap().unwrap();
    assert_ne!(found, customer);
    assert_eq!(em.get(found, "firstName").unwrap(), text("Antony"));
    assert_eq!(em.get(found, "lastName").unwrap(), text("Balla"));
    assert_eq!(em.get(found, "email").unwrap(), text("tballa@mail.com"));
    assert_eq!(em.get(found, "id").unwrap(), customer_id);

    let found_address = em.linked(found, "address").unwrap().unwrap();
    assert_eq!(em.key(found_address).unwrap(), Some(address_id.clone()));
    assert_eq!(em.get(found_address, "city").unwrap(), text("London"));
    assert_eq!(em.find("Address", address_id).unwrap(), Some(found_address));
}

#[test]
fn test_persist_cascades_to_address() {
    let (factory, store) = factory(cascade(&[CascadeOp::Persist]));
    let mut em = factory.create_entity_manager();

    let customer = antony(&mut em);
    let address = ritherdon(&mut em);
    em.link(customer, "address", Some(address)).unwrap();

    em.begin().unwrap();
    em.persist(customer).unwrap();
    assert!(em.contains(address));
    let stats = em.commit().unwrap();

    assert_eq!(stats.inserted, 2);
    assert!(em.key(customer).unwrap().is_some());
    assert!(em.key(address).unwrap().is_some());
    assert_eq!(store.row_count("Customer").unwrap(), 1);
    assert_eq!(store.row_count("Address").unwrap(), 1);
}

#[test]
fn test_removing_customer_leaves_address() {
    let (factory, store) = factory(CascadeSet::NONE);
    let mut em = factory.create_entity_manager();

    let (customer, address) = committed_pair(&mut em);
    let customer_id = em.key(customer).unwrap().unwrap();
    let address_id = em.key(address).unwrap().unwrap();

    em.begin().unwrap();
    em.remove(customer).unwrap();
    em.commit().unwrap();

    assert_eq!(em.find("Customer", customer_id).unwrap(), None);
    assert_eq!(em.find("Address", address_id).unwrap(), Some(address));
    assert_eq!(store.row_count("Address").unwrap(), 1);
}

#[test]
fn test_refresh_discards_in_memory_change() {
    let (factory, _store) = factory(CascadeSet::NONE);
    let mut em = factory.create_entity_manager();

    let (customer, id) = committed_customer(&mut em);
    let found = em.find("Customer", id).unwrap().unwrap();
    assert_eq!(found, customer);

    em.set(found, "firstName", "William").unwrap();
    assert_eq!(em.get(customer, "firstName").unwrap(), text("William"));

    em.refresh(found).unwrap();
    assert_eq!(em.get(found, "firstName").unwrap(), text("Antony"));
}

#[test]
fn test_detach_then_contains() {
    let (factory, store) = factory(CascadeSet::NONE);
    let mut em = factory.create_entity_manager();

    let (customer, id) = committed_customer(&mut em);
    assert!(em.contains(customer));

    em.detach(customer).unwrap();
    assert!(!em.contains(customer));
    assert_eq!(em.state(customer).unwrap(), LifecycleState::Detached);
    assert_eq!(store.keys("Customer").unwrap(), vec![id]);
}

#[test]
fn test_clear_then_merge() {
    let (factory, _store) = factory(CascadeSet::NONE);
    let mut em = factory.create_entity_manager();

    let (customer, id) = committed_customer(&mut em);
    em.clear();
    assert!(!em.contains(customer));

    em.set(customer, "firstName", "William").unwrap();
    em.begin().unwrap();
    let merged = em.merge(customer).unwrap();
    assert!(em.contains(merged));
    let stats = em.commit().unwrap();
    assert_eq!(stats.updated, 1);

    em.clear();
    let found = em.find("Customer", id).unwrap().unwrap();
    assert_eq!(em.get(found, "firstName").unwrap(), text("William"));
    assert_eq!(em.get(found, "lastName").unwrap(), Value::from("Balla"));
}

#[test]
fn test_changes_to_managed_objects_are_flushed_at_commit() {
    let (factory, _store) = factory(CascadeSet::NONE);
    let mut em = factory.create_entity_manager();

    let customer = antony(&mut em);
    em.begin().unwrap();
    em.persist(customer).unwrap();
    em.set(customer, "firstName", "Williman").unwrap();
    em.commit().unwrap();
    let id = em.key(customer).unwrap().unwrap();

    em.begin().unwrap();
    em.set(customer, "lastName", "Smith").unwrap();
    let stats = em.commit().unwrap();
    assert_eq!(stats.updated, 1);

    let mut reader = factory.create_entity_manager();
    let found = reader.find("Customer", id).unwrap().unwrap();
    assert_eq!(reader.get(found, "firstName").unwrap(), text("Williman"));
    assert_eq!(reader.get(found, "lastName").unwrap(), text("Smith"));
}
