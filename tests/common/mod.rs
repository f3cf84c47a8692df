/// Shared fixtures for the integration tests
///
/// Builds entity managers over a shared in-memory store and creates the
/// Customer/Address sample objects.
#[allow(dead_code)]
pub mod fixtures {
    use managedb::tutorial;
    use managedb::{
        Association, CascadeOp, CascadeSet, Catalog, DataType, EntityHandle, EntityKind,
        EntityManager, EntityManagerFactory, InMemoryRowStore, PersistenceConfig, Value,
    };
    use std::sync::Arc;

    pub fn factory(address_cascade: CascadeSet) -> (EntityManagerFactory, Arc<InMemoryRowStore>) {
        factory_with(address_cascade, PersistenceConfig::default())
    }

    pub fn factory_with(
        address_cascade: CascadeSet,
        config: PersistenceConfig,
    ) -> (EntityManagerFactory, Arc<InMemoryRowStore>) {
        let store = Arc::new(InMemoryRowStore::new());
        let catalog = tutorial::catalog(address_cascade).unwrap();
        let factory = EntityManagerFactory::new(catalog, store.clone(), config).unwrap();
        (factory, store)
    }

    pub fn cascade(ops: &[CascadeOp]) -> CascadeSet {
        CascadeSet::of(ops)
    }

    pub fn antony(em: &mut EntityManager) -> EntityHandle {
        tutorial::new_customer(em, "Antony", "Balla", "tballa@mail.com").unwrap()
    }

    pub fn ritherdon(em: &mut EntityManager) -> EntityHandle {
        tutorial::new_address(em, "Ritherdon Rd", "London", "8QE", "UK").unwrap()
    }

    /// Customer linked to an address, both persisted explicitly and committed.
    pub fn committed_pair(em: &mut EntityManager) -> (EntityHandle, EntityHandle) {
        let customer = antony(em);
        let address = ritherdon(em);
        em.link(customer, "address", Some(address)).unwrap();

        em.begin().unwrap();
        em.persist(customer).unwrap();
        em.persist(address).unwrap();
        em.commit().unwrap();
        (customer, address)
    }

    /// Customer alone, persisted and committed. Returns the object and its key.
    pub fn committed_customer(em: &mut EntityManager) -> (EntityHandle, Value) {
        let customer = antony(em);
        em.begin().unwrap();
        em.persist(customer).unwrap();
        em.commit().unwrap();
        let key = em.key(customer).unwrap().unwrap();
        (customer, key)
    }

    pub fn text(value: &str) -> Value {
        Value::from(value)
    }

    /// Versioned accounts, and a department owning employees over a to-many
    /// edge with orphan removal and a cyclic `manager` edge back. Each
    /// employee owns an optional badge, also with orphan removal.
    pub fn company_catalog() -> Catalog {
        Catalog::new()
            .with_kind(
                EntityKind::new("Account")
                    .required_attribute("owner", DataType::Text)
                    .attribute("balance", DataType::Integer)
                    .version("version"),
            )
            .unwrap()
            .with_kind(
                EntityKind::new("Department")
                    .attribute("name", DataType::Text)
                    .association(
                        Association::to_many("employees", "Employee")
                            .cascade(CascadeSet::ALL)
                            .orphan_removal(),
                    )
                    .association(Association::to_one("manager", "Employee")),
            )
            .unwrap()
            .with_kind(
                EntityKind::new("Employee")
                    .attribute("name", DataType::Text)
                    .association(
                        Association::to_one("department", "Department")
                            .cascade(CascadeSet::of(&[CascadeOp::Persist])),
                    )
                    .association(
                        Association::to_one("badge", "Badge")
                            .cascade(CascadeSet::ALL)
                            .orphan_removal(),
                    ),
            )
            .unwrap()
            .with_kind(EntityKind::new("Badge").attribute("code", DataType::Text))
            .unwrap()
    }

    pub fn company(config: PersistenceConfig) -> (EntityManagerFactory, Arc<InMemoryRowStore>) {
        let store = Arc::new(InMemoryRowStore::new());
        let factory = EntityManagerFactory::new(company_catalog(), store.clone(), config).unwrap();
        (factory, store)
    }
}
