/// Cascade tests
///
/// Tests for operations travelling along associations: cyclic graphs,
/// to-many edges, orphan removal, persist-on-flush and transient references.
/// Run with: cargo test --test cascade_tests
mod common;

use common::fixtures::*;
use managedb::{EntityHandle, EntityManager, ErrorKind, LifecycleState, PersistenceConfig, TransactionState};

fn employee(em: &mut EntityManager, name: &str) -> EntityHandle {
    let employee = em.new_entity("Employee").unwrap();
    em.set(employee, "name", name).unwrap();
    employee
}

/// Department with two employees pointing back at it, committed.
fn committed_department(em: &mut EntityManager) -> (EntityHandle, EntityHandle, EntityHandle) {
    let department = em.new_entity("Department").unwrap();
    em.set(department, "name", "Research").unwrap();
    let ada = employee(em, "Ada");
    let alan = employee(em, "Alan");
    for member in [ada, alan] {
        em.add_member(department, "employees", member).unwrap();
        em.link(member, "department", Some(department)).unwrap();
    }

    em.begin().unwrap();
    em.persist(department).unwrap();
    em.commit().unwrap();
    (department, ada, alan)
}

#[test]
fn test_persist_cascades_through_cycle() {
    let (factory, store) = company(PersistenceConfig::default());
    let mut em = factory.create_entity_manager();

    let department = em.new_entity("Department").unwrap();
    let ada = employee(&mut em, "Ada");
    let alan = employee(&mut em, "Alan");
    for member in [ada, alan] {
        em.add_member(department, "employees", member).unwrap();
        em.link(member, "department", Some(department)).unwrap();
    }

    em.begin().unwrap();
    em.persist(ada).unwrap();
    assert!(em.contains(department));
    assert!(em.contains(alan));
    let stats = em.commit().unwrap();

    assert_eq!(stats.inserted, 3);
    assert!(stats.updated >= 1);
    assert_eq!(store.row_count("Department").unwrap(), 1);
    assert_eq!(store.row_count("Employee").unwrap(), 2);

    let department_id = em.key(department).unwrap().unwrap();
    let mut reader = factory.create_entity_manager();
    let stored = reader.find("Department", department_id.clone()).unwrap().unwrap();
    let members = reader.members(stored, "employees").unwrap();
    assert_eq!(members.len(), 2);
    for member in members {
        let back = reader.linked(member, "department").unwrap().unwrap();
        assert_eq!(back, stored);
        assert_eq!(reader.key(back).unwrap(), Some(department_id.clone()));
    }
}

#[test]
fn test_to_many_members_load_lazily() {
    let (factory, _store) = company(PersistenceConfig::default());
    let mut em = factory.create_entity_manager();
    let (department, ada, _) = committed_department(&mut em);
    let department_id = em.key(department).unwrap().unwrap();
    let ada_id = em.key(ada).unwrap().unwrap();

    let mut reader = factory.create_entity_manager();
    let stored = reader.find("Department", department_id).unwrap().unwrap();
    assert_eq!(reader.managed_count(), 3);

    let stored_ada = reader.find("Employee", ada_id).unwrap().unwrap();
    assert!(reader.members(stored, "employees").unwrap().contains(&stored_ada));
    assert_eq!(reader.get(stored_ada, "name").unwrap(), text("Ada"));
}

#[test]
fn test_remove_cascades_to_members() {
    let (factory, store) = company(PersistenceConfig::default());
    let mut em = factory.create_entity_manager();
    let (department, ada, alan) = committed_department(&mut em);

    em.begin().unwrap();
    em.remove(department).unwrap();
    assert_eq!(em.state(ada).unwrap(), LifecycleState::Removed);
    assert_eq!(em.state(alan).unwrap(), LifecycleState::Removed);
    let stats = em.commit().unwrap();

    assert_eq!(stats.deleted, 3);
    assert_eq!(store.row_count("Department").unwrap(), 0);
    assert_eq!(store.row_count("Employee").unwrap(), 0);
}

#[test]
fn test_orphan_removal_on_flush() {
    let (factory, store) = company(PersistenceConfig::default());
    let mut em = factory.create_entity_manager();
    let (department, ada, alan) = committed_department(&mut em);
    let ada_id = em.key(ada).unwrap().unwrap();

    em.begin().unwrap();
    assert!(em.remove_member(department, "employees", ada).unwrap());
    let stats = em.commit().unwrap();

    assert_eq!(stats.deleted, 1);
    assert_eq!(stats.updated, 1);
    assert_eq!(em.state(ada).unwrap(), LifecycleState::Removed);
    assert!(em.contains(alan));
    assert_eq!(store.row_count("Employee").unwrap(), 1);
    assert_eq!(em.find("Employee", ada_id).unwrap(), None);
}

#[test]
fn test_to_one_orphan_removal_on_flush() {
    let (factory, store) = company(PersistenceConfig::default());
    let mut em = factory.create_entity_manager();
    let ada = employee(&mut em, "Ada");
    let badge = em.new_entity("Badge").unwrap();
    em.set(badge, "code", "B-17").unwrap();
    em.link(ada, "badge", Some(badge)).unwrap();

    em.begin().unwrap();
    em.persist(ada).unwrap();
    assert_eq!(em.commit().unwrap().inserted, 2);
    let badge_id = em.key(badge).unwrap().unwrap();

    em.begin().unwrap();
    em.link(ada, "badge", None).unwrap();
    let stats = em.commit().unwrap();

    assert_eq!(stats.updated, 1);
    assert_eq!(stats.deleted, 1);
    assert_eq!(em.state(badge).unwrap(), LifecycleState::Removed);
    assert!(em.contains(ada));
    assert_eq!(store.row_count("Badge").unwrap(), 0);

    let mut reader = factory.create_entity_manager();
    assert_eq!(reader.find("Badge", badge_id).unwrap(), None);
}

#[test]
fn test_persist_on_flush_reaches_new_members() {
    let (factory, store) = company(PersistenceConfig::default());
    let mut em = factory.create_entity_manager();
    let (department, _, _) = committed_department(&mut em);

    let grace = employee(&mut em, "Grace");
    em.begin().unwrap();
    em.add_member(department, "employees", grace).unwrap();
    let stats = em.commit().unwrap();

    assert_eq!(stats.inserted, 1);
    assert_eq!(stats.updated, 1);
    assert!(em.contains(grace));
    assert!(em.key(grace).unwrap().is_some());
    assert_eq!(store.row_count("Employee").unwrap(), 3);
}

#[test]
fn test_transient_reference_fails_flush() {
    let (factory, store) = company(PersistenceConfig::default());
    let mut em = factory.create_entity_manager();
    let (department, _, _) = committed_department(&mut em);
    let department_id = em.key(department).unwrap().unwrap();

    let boss = employee(&mut em, "Boss");
    em.begin().unwrap();
    em.link(department, "manager", Some(boss)).unwrap();
    let err = em.commit().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::IllegalState);
    assert_eq!(em.transaction_state(), TransactionState::RollingBack);
    em.rollback().unwrap();

    assert_eq!(em.state(boss).unwrap(), LifecycleState::New);
    assert_eq!(em.linked(department, "manager").unwrap(), Some(boss));
    assert_eq!(store.row_count("Employee").unwrap(), 2);

    let mut reader = factory.create_entity_manager();
    let stored = reader.find("Department", department_id).unwrap().unwrap();
    assert_eq!(reader.linked(stored, "manager").unwrap(), None);
}

#[test]
fn test_reassigning_to_one_updates_owner() {
    let (factory, _store) = company(PersistenceConfig::default());
    let mut em = factory.create_entity_manager();
    let (department, ada, _) = committed_department(&mut em);
    let department_id = em.key(department).unwrap().unwrap();
    let ada_id = em.key(ada).unwrap().unwrap();

    em.begin().unwrap();
    em.link(department, "manager", Some(ada)).unwrap();
    assert_eq!(em.commit().unwrap().updated, 1);

    let mut reader = factory.create_entity_manager();
    let stored = reader.find("Department", department_id).unwrap().unwrap();
    let manager = reader.linked(stored, "manager").unwrap().unwrap();
    assert_eq!(reader.key(manager).unwrap(), Some(ada_id));
}

#[test]
fn test_detach_and_refresh_cascade() {
    let (factory, _store) = company(PersistenceConfig::default());
    let mut em = factory.create_entity_manager();
    let (department, ada, alan) = committed_department(&mut em);

    em.set(department, "name", "Sales").unwrap();
    em.set(ada, "name", "Grace").unwrap();
    em.refresh(department).unwrap();
    assert_eq!(em.get(department, "name").unwrap(), text("Research"));
    assert_eq!(em.get(ada, "name").unwrap(), text("Ada"));

    em.detach(department).unwrap();
    for handle in [department, ada, alan] {
        assert!(!em.contains(handle));
        assert_eq!(em.state(handle).unwrap(), LifecycleState::Detached);
    }
    assert_eq!(em.managed_count(), 0);
}

#[test]
fn test_merge_cascades_to_members() {
    let (factory, _store) = company(PersistenceConfig::default());
    let mut em = factory.create_entity_manager();
    let (department, ada, _) = committed_department(&mut em);
    let ada_id = em.key(ada).unwrap().unwrap();
    em.clear();

    em.set(ada, "name", "Ada Lovelace").unwrap();
    em.begin().unwrap();
    let merged = em.merge(department).unwrap();
    let members = em.members(merged, "employees").unwrap();
    assert!(!members.contains(&ada));
    let stats = em.commit().unwrap();
    assert_eq!(stats.updated, 1);

    let mut reader = factory.create_entity_manager();
    let stored = reader.find("Employee", ada_id).unwrap().unwrap();
    assert_eq!(reader.get(stored, "name").unwrap(), text("Ada Lovelace"));
}
