//! The tutorial domain: customers with an address, books and countries, and
//! the entity manager listings that exercise them.

use crate::config::PersistenceConfig;
use crate::context::{EntityHandle, LifecycleState};
use crate::core::{DataType, PersistenceError, Result, Value};
use crate::facade::{EntityManager, EntityManagerFactory};
use crate::metadata::{Association, CascadeOp, CascadeSet, Catalog, EntityKind, KeyStrategy};
use crate::storage::RowStore;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::info;

pub fn customer_kind(address_cascade: CascadeSet) -> EntityKind {
    EntityKind::new("Customer")
        .attribute("firstName", DataType::Text)
        .attribute("lastName", DataType::Text)
        .attribute("email", DataType::Text)
        .association(Association::to_one("address", "Address").cascade(address_cascade))
}

pub fn address_kind() -> EntityKind {
    EntityKind::new("Address")
        .attribute("street1", DataType::Text)
        .attribute("city", DataType::Text)
        .attribute("zipcode", DataType::Text)
        .attribute("country", DataType::Text)
}

/// Books carry an application-assigned key.
pub fn book_kind() -> EntityKind {
    EntityKind::new("Book")
        .key("id", KeyStrategy::Assigned)
        .required_attribute("title", DataType::Text)
        .attribute("price", DataType::Float)
        .attribute("description", DataType::Text)
        .attribute("isbn", DataType::Text)
        .attribute("nbOfPage", DataType::Integer)
        .attribute("illustrations", DataType::Boolean)
}

pub fn country_kind() -> EntityKind {
    EntityKind::new("Country").attribute("code", DataType::Text)
}

/// Catalog of all four kinds; `address_cascade` applies to `Customer.address`.
pub fn catalog(address_cascade: CascadeSet) -> Result<Catalog> {
    let catalog = Catalog::new()
        .with_kind(customer_kind(address_cascade))?
        .with_kind(address_kind())?
        .with_kind(book_kind())?
        .with_kind(country_kind())?;
    catalog.validate()?;
    Ok(catalog)
}

pub fn new_customer(
    em: &mut EntityManager,
    first_name: &str,
    last_name: &str,
    email: &str,
) -> Result<EntityHandle> {
    let customer = em.new_entity("Customer")?;
    em.set(customer, "firstName", first_name)?;
    em.set(customer, "lastName", last_name)?;
    em.set(customer, "email", email)?;
    Ok(customer)
}

pub fn new_address(
    em: &mut EntityManager,
    street1: &str,
    city: &str,
    zipcode: &str,
    country: &str,
) -> Result<EntityHandle> {
    let address = em.new_entity("Address")?;
    em.set(address, "street1", street1)?;
    em.set(address, "city", city)?;
    em.set(address, "zipcode", zipcode)?;
    em.set(address, "country", country)?;
    Ok(address)
}

pub fn new_book(em: &mut EntityManager, id: i64, title: &str, price: f64) -> Result<EntityHandle> {
    let book = em.new_entity("Book")?;
    em.set_key(book, id)?;
    em.set(book, "title", title)?;
    em.set(book, "price", price)?;
    Ok(book)
}

pub fn new_country(em: &mut EntityManager, code: &str) -> Result<EntityHandle> {
    let country = em.new_entity("Country")?;
    em.set(country, "code", code)?;
    Ok(country)
}

/// One of the runnable entity manager listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Listing {
    Persist,
    Find,
    Reference,
    Remove,
    Orphan,
    Refresh,
    Contains,
    Detach,
    Merge,
    Update,
    Cascade,
    Book,
    Country,
}

impl Listing {
    pub const ALL: [Listing; 13] = [
        Listing::Persist,
        Listing::Find,
        Listing::Reference,
        Listing::Remove,
        Listing::Orphan,
        Listing::Refresh,
        Listing::Contains,
        Listing::Detach,
        Listing::Merge,
        Listing::Update,
        Listing::Cascade,
        Listing::Book,
        Listing::Country,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Listing::Persist => "persist",
            Listing::Find => "find",
            Listing::Reference => "reference",
            Listing::Remove => "remove",
            Listing::Orphan => "orphan",
            Listing::Refresh => "refresh",
            Listing::Contains => "contains",
            Listing::Detach => "detach",
            Listing::Merge => "merge",
            Listing::Update => "update",
            Listing::Cascade => "cascade",
            Listing::Book => "book",
            Listing::Country => "country",
        }
    }

    /// Cascade set the listing declares on `Customer.address`.
    pub fn address_cascade(self) -> CascadeSet {
        match self {
            Listing::Cascade => CascadeSet::of(&[CascadeOp::Persist]),
            _ => CascadeSet::NONE,
        }
    }
}

impl fmt::Display for Listing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Listing {
    type Err = PersistenceError;

    fn from_str(s: &str) -> Result<Self> {
        Listing::ALL
            .into_iter()
            .find(|listing| listing.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| PersistenceError::IllegalArgument(format!("Unknown listing '{}'", s)))
    }
}

/// Lines describing what a listing did.
pub type Report = Vec<String>;

fn check(condition: bool, what: &str) -> Result<()> {
    if condition {
        Ok(())
    } else {
        Err(PersistenceError::IllegalState(format!("Listing check failed: {}", what)))
    }
}

fn required_key(em: &EntityManager, entity: EntityHandle) -> Result<Value> {
    em.key(entity)?.ok_or_else(|| {
        PersistenceError::IllegalState(format!("Entity {} has no key after commit", entity))
    })
}

/// Runs `listing` against `store` with a fresh entity manager.
pub fn run(listing: Listing, store: Arc<dyn RowStore>, config: &PersistenceConfig) -> Result<Report> {
    run_with_cascade(listing, listing.address_cascade(), store, config)
}

/// Like [`run`], with `address_cascade` on `Customer.address` in place of the
/// listing's own.
pub fn run_with_cascade(
    listing: Listing,
    address_cascade: CascadeSet,
    store: Arc<dyn RowStore>,
    config: &PersistenceConfig,
) -> Result<Report> {
    let factory = EntityManagerFactory::new(catalog(address_cascade)?, store, config.clone())?;
    let mut em = factory.create_entity_manager();
    let mut report = Report::new();

    info!(%listing, %address_cascade, "running listing");
    match listing {
        Listing::Persist => persist(&mut em, &mut report)?,
        Listing::Find => find(&mut em, &mut report)?,
        Listing::Reference => reference(&mut em, &mut report)?,
        Listing::Remove => remove(&mut em, &mut report)?,
        Listing::Orphan => orphan(&mut em, &mut report)?,
        Listing::Refresh => refresh(&mut em, &mut report)?,
        Listing::Contains => contains(&mut em, &mut report)?,
        Listing::Detach => detach(&mut em, &mut report)?,
        Listing::Merge => merge(&mut em, &mut report)?,
        Listing::Update => update(&mut em, &mut report)?,
        Listing::Cascade => cascade(&mut em, &mut report)?,
        Listing::Book => book(&mut em, &mut report)?,
        Listing::Country => country(&mut em, &mut report)?,
    }
    Ok(report)
}

fn antony(em: &mut EntityManager) -> Result<EntityHandle> {
    new_customer(em, "Antony", "Balla", "tballa@mail.com")
}

fn ritherdon(em: &mut EntityManager) -> Result<EntityHandle> {
    new_address(em, "Ritherdon Rd", "London", "8QE", "UK")
}

/// Customer and address, each persisted explicitly and committed.
fn persisted_pair(em: &mut EntityManager) -> Result<(EntityHandle, EntityHandle)> {
    let customer = antony(em)?;
    let address = ritherdon(em)?;
    em.link(customer, "address", Some(address))?;

    em.begin()?;
    em.persist(customer)?;
    em.persist(address)?;
    em.commit()?;
    Ok((customer, address))
}

fn persist(em: &mut EntityManager, report: &mut Report) -> Result<()> {
    let (customer, address) = persisted_pair(em)?;
    report.push(format!("customer id = {}", required_key(em, customer)?));
    report.push(format!("address id = {}", required_key(em, address)?));
    Ok(())
}

fn find(em: &mut EntityManager, report: &mut Report) -> Result<()> {
    let (customer, _) = persisted_pair(em)?;
    let id = required_key(em, customer)?;
    em.clear();

    let found = em.find_required("Customer", id.clone())?;
    report.push(format!("found customer {}: {}", id, em.describe(found)?));
    Ok(())
}

fn reference(em: &mut EntityManager, report: &mut Report) -> Result<()> {
    let (customer, _) = persisted_pair(em)?;
    let id = required_key(em, customer)?;
    em.clear();

    let reference = em.get_reference("Customer", id.clone())?;
    report.push(format!("reference to customer {} taken without loading", id));
    report.push(format!("first name on access = {}", em.get(reference, "firstName")?));

    let missing = em.get_reference("Customer", 9_999_999)?;
    match em.get(missing, "firstName") {
        Err(PersistenceError::EntityNotFound { .. }) => {
            report.push("reference to customer 9999999 fails on access".to_string());
            Ok(())
        }
        Ok(_) => check(false, "missing customer resolved"),
        Err(err) => Err(err),
    }
}

fn remove(em: &mut EntityManager, report: &mut Report) -> Result<()> {
    let (customer, address) = persisted_pair(em)?;
    let customer_id = required_key(em, customer)?;
    let address_id = required_key(em, address)?;

    em.begin()?;
    em.remove(customer)?;
    em.remove(address)?;
    em.commit()?;

    check(em.get(customer, "firstName")? == Value::from("Antony"), "removed customer readable")?;
    check(em.get(address, "city")? == Value::from("London"), "removed address readable")?;
    check(em.find("Customer", customer_id)?.is_none(), "customer deleted")?;
    check(em.find("Address", address_id)?.is_none(), "address deleted")?;
    report.push("customer and address removed from the store".to_string());
    Ok(())
}

fn orphan(em: &mut EntityManager, report: &mut Report) -> Result<()> {
    let (customer, address) = persisted_pair(em)?;
    let customer_id = required_key(em, customer)?;
    let address_id = required_key(em, address)?;

    em.begin()?;
    em.remove(customer)?;
    em.commit()?;

    check(em.find("Customer", customer_id)?.is_none(), "customer deleted")?;
    check(em.find("Address", address_id.clone())?.is_some(), "address kept")?;
    report.push(format!("customer removed, address {} left behind", address_id));
    Ok(())
}

fn refresh(em: &mut EntityManager, report: &mut Report) -> Result<()> {
    let (created, _) = persisted_pair(em)?;
    let id = required_key(em, created)?;

    let customer = em.find_required("Customer", id)?;
    check(customer == created, "find returns the managed instance")?;
    em.set(customer, "firstName", "William")?;
    report.push(format!("first name changed to {}", em.get(customer, "firstName")?));

    em.refresh(created)?;
    let first_name = em.get(customer, "firstName")?;
    check(first_name == Value::from("Antony"), "refresh restores the stored name")?;
    report.push(format!("first name after refresh = {}", first_name));
    Ok(())
}

fn contains(em: &mut EntityManager, report: &mut Report) -> Result<()> {
    let customer = antony(em)?;
    em.begin()?;
    em.persist(customer)?;
    em.commit()?;
    check(em.contains(customer), "persisted customer is managed")?;

    em.begin()?;
    em.remove(customer)?;
    em.commit()?;
    check(!em.contains(customer), "removed customer is not managed")?;
    report.push("contains: true after persist, false after remove".to_string());
    Ok(())
}

fn detach(em: &mut EntityManager, report: &mut Report) -> Result<()> {
    let customer = antony(em)?;
    em.begin()?;
    em.persist(customer)?;
    em.commit()?;
    check(em.contains(customer), "persisted customer is managed")?;

    em.detach(customer)?;
    check(!em.contains(customer), "detached customer is not managed")?;
    check(em.state(customer)? == LifecycleState::Detached, "state is DETACHED")?;
    report.push(format!("customer {} detached", required_key(em, customer)?));
    Ok(())
}

fn merge(em: &mut EntityManager, report: &mut Report) -> Result<()> {
    let customer = antony(em)?;
    em.begin()?;
    em.persist(customer)?;
    em.commit()?;
    let id = required_key(em, customer)?;

    em.clear();
    check(!em.contains(customer), "cleared customer is not managed")?;

    em.set(customer, "firstName", "William")?;
    em.begin()?;
    let managed = em.merge(customer)?;
    em.commit()?;
    em.clear();
    check(!em.contains(managed), "cleared again")?;

    let found = em.find_required("Customer", id)?;
    let first_name = em.get(found, "firstName")?;
    check(first_name == Value::from("William"), "merged name stored")?;
    check(em.contains(found), "found customer is managed")?;
    report.push(format!("first name after merge = {}", first_name));
    Ok(())
}

fn update(em: &mut EntityManager, report: &mut Report) -> Result<()> {
    let customer = antony(em)?;
    em.begin()?;
    em.persist(customer)?;
    em.set(customer, "firstName", "Williman")?;
    let stats = em.commit()?;
    let id = required_key(em, customer)?;

    em.clear();
    let found = em.find_required("Customer", id)?;
    check(em.get(found, "firstName")? == Value::from("Williman"), "update committed")?;
    report.push(format!(
        "managed change flushed at commit ({} inserted, {} updated)",
        stats.inserted, stats.updated
    ));
    Ok(())
}

fn cascade(em: &mut EntityManager, report: &mut Report) -> Result<()> {
    let customer = antony(em)?;
    let address = ritherdon(em)?;
    em.link(customer, "address", Some(address))?;

    em.begin()?;
    em.persist(customer)?;
    em.commit()?;

    let address_id = required_key(em, address)?;
    report.push(format!(
        "customer {} persisted, address {} followed by cascade",
        required_key(em, customer)?,
        address_id
    ));
    Ok(())
}

fn book(em: &mut EntityManager, report: &mut Report) -> Result<()> {
    let book = new_book(em, 1001, "H2G2", 12.5)?;
    em.set(book, "isbn", "1-84023-742-2")?;
    em.set(book, "nbOfPage", 354)?;
    em.set(book, "illustrations", false)?;

    em.begin()?;
    em.persist(book)?;
    em.commit()?;
    em.clear();

    let found = em.find_required("Book", 1001)?;
    report.push(format!("book: {}", em.describe(found)?));
    Ok(())
}

fn country(em: &mut EntityManager, report: &mut Report) -> Result<()> {
    em.begin()?;
    for code in ["UK", "FR", "PT"] {
        let country = new_country(em, code)?;
        em.persist(country)?;
    }
    let stats = em.commit()?;
    report.push(format!("{} countries inserted", stats.inserted));
    Ok(())
}
