use crate::config::{DetachedPersistPolicy, PersistenceConfig};
use crate::context::{EntityHandle, FlushStats, LifecycleState, PersistenceContext, StoreView};
use crate::core::{PersistenceError, Result, Value};
use crate::metadata::Catalog;
use crate::storage::RowStore;
use crate::transaction::{TransactionCoordinator, TransactionId, TransactionInfo, TransactionState};
use std::sync::Arc;
use tracing::{debug, info_span};

/// The application's entry point to one persistence context.
///
/// An entity manager owns the entity objects it hands out (addressed by
/// [`EntityHandle`]), tracks their lifecycle, and writes their changes to the
/// shared [`RowStore`] at flush. It is meant for one thread of execution.
///
/// # Examples
///
/// ```
/// use managedb::{CascadeSet, EntityManager, InMemoryRowStore, PersistenceConfig, Value};
/// use managedb::tutorial;
/// use std::sync::Arc;
///
/// # fn main() -> managedb::Result<()> {
/// let catalog = tutorial::catalog(CascadeSet::NONE)?;
/// let store = Arc::new(InMemoryRowStore::new());
/// let mut em = EntityManager::new(catalog, store, PersistenceConfig::default());
///
/// let customer = em.new_entity("Customer")?;
/// em.set(customer, "firstName", "Antony")?;
///
/// em.begin()?;
/// em.persist(customer)?;
/// em.commit()?;
///
/// let id = em.key(customer)?.unwrap();
/// em.clear();
/// let found = em.find("Customer", id)?.unwrap();
/// assert_eq!(em.get(found, "firstName")?, Value::from("Antony"));
/// # Ok(())
/// # }
/// ```
pub struct EntityManager {
    context: PersistenceContext,
    store: Arc<dyn RowStore>,
    coordinator: TransactionCoordinator,
}

fn view<'a>(store: &'a Arc<dyn RowStore>, coordinator: &TransactionCoordinator) -> StoreView<'a> {
    StoreView::new(
        store.as_ref(),
        coordinator.current().map(|txn| txn.unit_of_work()),
    )
}

impl EntityManager {
    pub fn new(catalog: Catalog, store: Arc<dyn RowStore>, config: PersistenceConfig) -> Self {
        let coordinator = TransactionCoordinator::new(config.transaction_timeout);
        Self {
            context: PersistenceContext::new(catalog, config),
            store,
            coordinator,
        }
    }

    pub fn catalog(&self) -> &Catalog {
        self.context.catalog()
    }

    pub fn config(&self) -> &PersistenceConfig {
        self.context.config()
    }

    // ------------------------------------------------------------------
    // Transactions
    // ------------------------------------------------------------------

    pub fn begin(&mut self) -> Result<TransactionId> {
        self.coordinator.begin(self.store.as_ref())
    }

    /// Flushes pending changes and commits the store unit of work.
    ///
    /// On failure the store is rolled back, the in-memory objects are left as
    /// they were, and the transaction stays in `RollingBack` until
    /// [`rollback`](Self::rollback) is called.
    pub fn commit(&mut self) -> Result<FlushStats> {
        let span = info_span!("commit");
        let _enter = span.enter();

        let store = self.store.as_ref();
        let context = &mut self.context;
        let effects = self
            .coordinator
            .commit(store, |txn| context.flush(store, txn.unit_of_work()))?;

        let stats = effects.stats;
        self.context.apply_flush(effects);
        Ok(stats)
    }

    /// Rolls back the transaction. Attribute values set on objects are kept;
    /// objects scheduled for insert return to NEW and scheduled removals are
    /// cancelled. When the transaction had flushed, the context is cleared.
    pub fn rollback(&mut self) -> Result<()> {
        let flushed = self.coordinator.rollback(self.store.as_ref())?;
        self.context.discard_pending(flushed);
        debug!(flushed, "rolled back");
        Ok(())
    }

    pub fn is_active(&self) -> bool {
        self.coordinator.is_active()
    }

    pub fn transaction_state(&self) -> TransactionState {
        self.coordinator.state()
    }

    pub fn transaction_info(&self) -> Option<TransactionInfo> {
        self.coordinator.info()
    }

    /// Writes pending changes through the open unit of work without
    /// committing. A failure marks the transaction for rollback.
    pub fn flush(&mut self) -> Result<FlushStats> {
        let uow = self.coordinator.require_active("flush")?.unit_of_work();
        let span = info_span!("explicit_flush");
        let _enter = span.enter();

        match self.context.flush(self.store.as_ref(), uow) {
            Ok(effects) => {
                let stats = effects.stats;
                self.context.apply_flush(effects);
                self.coordinator.require_active_mut("flush")?.mark_flushed();
                Ok(stats)
            }
            Err(err) => {
                self.coordinator.abort(self.store.as_ref());
                Err(err)
            }
        }
    }

    // ------------------------------------------------------------------
    // Persistence context operations
    // ------------------------------------------------------------------

    /// Makes a NEW object (and objects reached over PERSIST cascades)
    /// managed. Returns the managed handle, which is `entity` itself unless
    /// the configuration merges detached objects.
    pub fn persist(&mut self, entity: EntityHandle) -> Result<EntityHandle> {
        self.coordinator.require_active("persist")?;
        if self.context.state(entity)? == LifecycleState::Detached
            && self.config().detached_persist == DetachedPersistPolicy::Merge
        {
            return self.merge(entity);
        }
        self.context.persist(entity)?;
        Ok(entity)
    }

    pub fn find(&mut self, kind: &str, key: impl Into<Value>) -> Result<Option<EntityHandle>> {
        let view = view(&self.store, &self.coordinator);
        self.context.find(&view, kind, key.into())
    }

    /// Like [`find`](Self::find) but fails with `EntityNotFound` when absent.
    pub fn find_required(&mut self, kind: &str, key: impl Into<Value>) -> Result<EntityHandle> {
        let key = key.into();
        self.find(kind, key.clone())?
            .ok_or_else(|| PersistenceError::not_found(kind, &key))
    }

    /// A managed reference that is loaded on first attribute access.
    pub fn get_reference(&mut self, kind: &str, key: impl Into<Value>) -> Result<EntityHandle> {
        self.context.get_reference(kind, key.into())
    }

    pub fn remove(&mut self, entity: EntityHandle) -> Result<()> {
        self.coordinator.require_active("remove")?;
        let view = view(&self.store, &self.coordinator);
        self.context.remove(&view, entity)
    }

    pub fn refresh(&mut self, entity: EntityHandle) -> Result<()> {
        if self.config().require_transaction_for_refresh {
            self.coordinator.require_active("refresh")?;
        }
        let view = view(&self.store, &self.coordinator);
        self.context.refresh(&view, entity)
    }

    pub fn detach(&mut self, entity: EntityHandle) -> Result<()> {
        self.context.detach(entity)
    }

    pub fn contains(&self, entity: EntityHandle) -> bool {
        self.context.contains(entity)
    }

    pub fn merge(&mut self, entity: EntityHandle) -> Result<EntityHandle> {
        self.coordinator.require_active("merge")?;
        let view = view(&self.store, &self.coordinator);
        self.context.merge(&view, entity)
    }

    /// Detaches every managed object and drops all pending actions.
    ///
    /// Detached objects stay alive so they can be read or merged later.
    /// Every object the manager has handed out, including those loaded by
    /// `find`, `get_reference` and association access, keeps its slot until
    /// [`release`](Self::release) is called for it. A long-lived manager
    /// should release the objects it no longer needs after a `clear`.
    pub fn clear(&mut self) {
        self.context.clear();
    }

    // ------------------------------------------------------------------
    // Entity objects
    // ------------------------------------------------------------------

    pub fn new_entity(&mut self, kind: &str) -> Result<EntityHandle> {
        self.context.new_entity(kind)
    }

    /// Frees an object this manager does not track. Its handle goes stale,
    /// as does any association from another object that still points at it.
    pub fn release(&mut self, entity: EntityHandle) -> Result<()> {
        self.context.release(entity)
    }

    pub fn state(&self, entity: EntityHandle) -> Result<LifecycleState> {
        self.context.state(entity)
    }

    pub fn kind_of(&self, entity: EntityHandle) -> Result<&str> {
        self.context.kind_of(entity)
    }

    pub fn key(&self, entity: EntityHandle) -> Result<Option<Value>> {
        self.context.key(entity)
    }

    /// Assigns the key of a NEW object.
    pub fn set_key(&mut self, entity: EntityHandle, key: impl Into<Value>) -> Result<()> {
        self.context.set_key(entity, key.into())
    }

    pub fn get(&mut self, entity: EntityHandle, attribute: &str) -> Result<Value> {
        let view = view(&self.store, &self.coordinator);
        self.context.get(&view, entity, attribute)
    }

    pub fn set(
        &mut self,
        entity: EntityHandle,
        attribute: &str,
        value: impl Into<Value>,
    ) -> Result<()> {
        let view = view(&self.store, &self.coordinator);
        self.context.set(&view, entity, attribute, value.into())
    }

    pub fn link(
        &mut self,
        entity: EntityHandle,
        association: &str,
        target: Option<EntityHandle>,
    ) -> Result<()> {
        let view = view(&self.store, &self.coordinator);
        self.context.link(&view, entity, association, target)
    }

    pub fn linked(&mut self, entity: EntityHandle, association: &str) -> Result<Option<EntityHandle>> {
        let view = view(&self.store, &self.coordinator);
        self.context.linked(&view, entity, association)
    }

    pub fn add_member(
        &mut self,
        entity: EntityHandle,
        association: &str,
        member: EntityHandle,
    ) -> Result<()> {
        let view = view(&self.store, &self.coordinator);
        self.context.add_member(&view, entity, association, member)
    }

    pub fn remove_member(
        &mut self,
        entity: EntityHandle,
        association: &str,
        member: EntityHandle,
    ) -> Result<bool> {
        let view = view(&self.store, &self.coordinator);
        self.context.remove_member(&view, entity, association, member)
    }

    pub fn members(&mut self, entity: EntityHandle, association: &str) -> Result<Vec<EntityHandle>> {
        let view = view(&self.store, &self.coordinator);
        self.context.members(&view, entity, association)
    }

    /// JSON view of an object, loading it first if it is a managed reference.
    pub fn describe(&mut self, entity: EntityHandle) -> Result<serde_json::Value> {
        let view = view(&self.store, &self.coordinator);
        self.context.describe(&view, entity)
    }

    /// Keyed managed objects of one kind.
    pub fn managed(&self, kind: &str) -> Result<Vec<EntityHandle>> {
        self.context.managed_of_kind(kind)
    }

    pub fn managed_count(&self) -> usize {
        self.context.managed_count()
    }

    pub fn pending_actions(&self) -> usize {
        self.context.pending_actions()
    }

    /// Objects this manager still owns, managed or not.
    pub fn live_objects(&self) -> usize {
        self.context.live_objects()
    }
}

impl std::fmt::Debug for EntityManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityManager")
            .field("managed", &self.context.managed_count())
            .field("pending_actions", &self.context.pending_actions())
            .field("transaction", &self.coordinator.state())
            .finish()
    }
}
