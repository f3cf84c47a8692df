// ============================================================================
// Persistence Context
// ============================================================================
//
// Owns every entity object handed out by an entity manager together with the
// identity map, the state tracker and the pending-action queue. All
// navigation between objects goes through handles into the arena.
//
// Operations run in two phases: the cascade is collected and validated (and
// any rows read) first, then the context is changed in one step, so a failed
// call leaves no trace.
//
// ============================================================================

mod actions;
mod cascade;
mod flush;
mod hydrate;
mod identity;
mod merge;
pub mod record;
pub mod tracker;

pub use flush::FlushStats;
pub use record::EntityHandle;
pub use tracker::{LifecycleOp, LifecycleState};

pub(crate) use flush::FlushEffects;

use crate::config::PersistenceConfig;
use crate::core::{EntityKey, PersistenceError, Result, Row, Value};
use crate::metadata::{Cardinality, CascadeOp, Catalog, EntityKind, KeyStrategy};
use crate::storage::{RowStore, UnitOfWork};
use actions::{ActionQueue, PendingAction};
use cascade::cascading_endpoints;
use hydrate::LoadedRow;
use identity::IdentityMap;
use record::{Arena, EntityBody, EntityData, EntityRecord, Link};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, trace};
use tracker::StateTracker;

/// Read access to the store, through the open unit of work when there is one.
#[derive(Clone, Copy)]
pub(crate) struct StoreView<'a> {
    store: &'a dyn RowStore,
    uow: Option<UnitOfWork>,
}

impl<'a> StoreView<'a> {
    pub(crate) fn new(store: &'a dyn RowStore, uow: Option<UnitOfWork>) -> Self {
        Self { store, uow }
    }

    pub(crate) fn select(&self, kind: &str, key: &Value) -> Result<Option<Row>> {
        Ok(self.store.select_row(self.uow, kind, key)?)
    }
}

fn identity_key(record: &EntityRecord) -> Option<EntityKey> {
    record
        .key
        .as_ref()
        .map(|key| EntityKey::new(record.kind_name(), key.clone()))
}

pub(crate) struct PersistenceContext {
    catalog: Catalog,
    config: PersistenceConfig,
    arena: Arena,
    identity: IdentityMap,
    tracker: StateTracker,
    actions: ActionQueue,
}

impl PersistenceContext {
    pub(crate) fn new(catalog: Catalog, config: PersistenceConfig) -> Self {
        Self {
            catalog,
            config,
            arena: Arena::default(),
            identity: IdentityMap::default(),
            tracker: StateTracker::default(),
            actions: ActionQueue::default(),
        }
    }

    pub(crate) fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub(crate) fn config(&self) -> &PersistenceConfig {
        &self.config
    }

    pub(crate) fn managed_count(&self) -> usize {
        self.tracker.len()
    }

    pub(crate) fn pending_actions(&self) -> usize {
        self.actions.len()
    }

    pub(crate) fn live_objects(&self) -> usize {
        self.arena.len()
    }

    // ------------------------------------------------------------------
    // Objects and attributes
    // ------------------------------------------------------------------

    pub(crate) fn new_entity(&mut self, kind: &str) -> Result<EntityHandle> {
        let kind = self.catalog.get(kind)?.clone();
        Ok(self.arena.insert(EntityRecord::new(kind)))
    }

    /// Frees an object the context does not track.
    pub(crate) fn release(&mut self, handle: EntityHandle) -> Result<()> {
        if self.tracker.state(handle).is_some() {
            return Err(PersistenceError::IllegalArgument(format!(
                "Entity {} is still managed; detach it before releasing",
                handle
            )));
        }
        self.arena.release(handle)?;
        Ok(())
    }

    pub(crate) fn state(&self, handle: EntityHandle) -> Result<LifecycleState> {
        let record = self.arena.get(handle)?;
        Ok(self.tracker.state(handle).unwrap_or(record.untracked))
    }

    pub(crate) fn contains(&self, handle: EntityHandle) -> bool {
        self.arena.get(handle).is_ok()
            && self.tracker.state(handle) == Some(LifecycleState::Managed)
    }

    pub(crate) fn kind_of(&self, handle: EntityHandle) -> Result<&str> {
        Ok(self.arena.get(handle)?.kind_name())
    }

    /// The key, without loading a deferred reference.
    pub(crate) fn key(&self, handle: EntityHandle) -> Result<Option<Value>> {
        Ok(self.arena.get(handle)?.key.clone())
    }

    /// Keyed managed objects of one kind, in handle order.
    pub(crate) fn managed_of_kind(&self, kind: &str) -> Result<Vec<EntityHandle>> {
        let kind = self.catalog.get(kind)?;
        let mut handles: Vec<EntityHandle> = self
            .identity
            .iter_kind(kind.name())
            .filter(|h| self.tracker.state(*h) == Some(LifecycleState::Managed))
            .collect();
        handles.sort();
        Ok(handles)
    }

    pub(crate) fn set_key(&mut self, handle: EntityHandle, key: Value) -> Result<()> {
        let state = self.state(handle)?;
        if state != LifecycleState::New {
            return Err(PersistenceError::IllegalArgument(format!(
                "The key of a {} entity cannot change",
                state
            )));
        }
        if key.is_null() || matches!(key, Value::List(_)) {
            return Err(PersistenceError::IllegalArgument(format!(
                "{} is not a valid key",
                key
            )));
        }
        self.arena.get_mut(handle)?.key = Some(key);
        Ok(())
    }

    pub(crate) fn get(
        &mut self,
        view: &StoreView<'_>,
        handle: EntityHandle,
        name: &str,
    ) -> Result<Value> {
        let record = self.arena.get(handle)?;
        if name == record.kind.key_attribute() {
            return Ok(record.key_or_null());
        }
        let slot = record.kind.attribute_slot(name)?;
        self.ensure_loaded(view, handle)?;
        Ok(self.data(handle)?.values[slot].clone())
    }

    pub(crate) fn set(
        &mut self,
        view: &StoreView<'_>,
        handle: EntityHandle,
        name: &str,
        value: Value,
    ) -> Result<()> {
        let kind = self.arena.get(handle)?.kind.clone();
        if name == kind.key_attribute() {
            return self.set_key(handle, value);
        }

        let slot = kind.attribute_slot(name)?;
        if kind.version_slot() == Some(slot) {
            return Err(PersistenceError::IllegalArgument(format!(
                "Version attribute '{}.{}' is maintained by the persistence context",
                kind.name(),
                name
            )));
        }
        kind.attributes()[slot].check_type(&value)?;

        self.ensure_loaded(view, handle)?;
        self.data_mut(handle)?.values[slot] = value;
        Ok(())
    }

    pub(crate) fn link(
        &mut self,
        view: &StoreView<'_>,
        handle: EntityHandle,
        name: &str,
        target: Option<EntityHandle>,
    ) -> Result<()> {
        let slot = self.association(handle, name, Cardinality::ToOne)?;
        if let Some(target) = target {
            self.check_endpoint(handle, slot, target)?;
        }
        self.ensure_loaded(view, handle)?;
        self.data_mut(handle)?.links[slot] = Link::One(target);
        Ok(())
    }

    pub(crate) fn linked(
        &mut self,
        view: &StoreView<'_>,
        handle: EntityHandle,
        name: &str,
    ) -> Result<Option<EntityHandle>> {
        let slot = self.association(handle, name, Cardinality::ToOne)?;
        self.ensure_loaded(view, handle)?;
        Ok(self.data(handle)?.links[slot].endpoints().first().copied())
    }

    pub(crate) fn add_member(
        &mut self,
        view: &StoreView<'_>,
        handle: EntityHandle,
        name: &str,
        member: EntityHandle,
    ) -> Result<()> {
        let slot = self.association(handle, name, Cardinality::ToMany)?;
        self.check_endpoint(handle, slot, member)?;
        self.ensure_loaded(view, handle)?;
        if let Link::Many(members) = &mut self.data_mut(handle)?.links[slot]
            && !members.contains(&member)
        {
            members.push(member);
        }
        Ok(())
    }

    pub(crate) fn remove_member(
        &mut self,
        view: &StoreView<'_>,
        handle: EntityHandle,
        name: &str,
        member: EntityHandle,
    ) -> Result<bool> {
        let slot = self.association(handle, name, Cardinality::ToMany)?;
        self.ensure_loaded(view, handle)?;
        if let Link::Many(members) = &mut self.data_mut(handle)?.links[slot]
            && let Some(position) = members.iter().position(|m| *m == member)
        {
            members.remove(position);
            return Ok(true);
        }
        Ok(false)
    }

    pub(crate) fn members(
        &mut self,
        view: &StoreView<'_>,
        handle: EntityHandle,
        name: &str,
    ) -> Result<Vec<EntityHandle>> {
        let slot = self.association(handle, name, Cardinality::ToMany)?;
        self.ensure_loaded(view, handle)?;
        Ok(self.data(handle)?.links[slot].endpoints())
    }

    /// JSON view of an object: key, lifecycle state, attributes, and the
    /// keys of associated objects (null while an endpoint has none).
    pub(crate) fn describe(
        &mut self,
        view: &StoreView<'_>,
        handle: EntityHandle,
    ) -> Result<serde_json::Value> {
        let state = self.state(handle)?;
        if state.is_tracked() {
            self.ensure_loaded(view, handle)?;
        }

        let record = self.arena.get(handle)?;
        let mut object = serde_json::Map::new();
        object.insert("kind".into(), record.kind_name().into());
        object.insert(
            record.kind.key_attribute().to_string(),
            record.key_or_null().to_json(),
        );
        object.insert("state".into(), state.to_string().into());

        let Some(data) = record.data() else {
            object.insert("loaded".into(), false.into());
            return Ok(serde_json::Value::Object(object));
        };
        if state.is_tracked() {
            object.insert("dirty".into(), self.tracker.is_dirty(handle, data).into());
        }

        for (attribute, value) in record.kind.attributes().iter().zip(&data.values) {
            object.insert(attribute.name.clone(), value.to_json());
        }
        for (association, link) in record.kind.associations().iter().zip(&data.links) {
            let endpoint_key = |h: &EntityHandle| {
                self.arena
                    .get(*h)
                    .map(|r| r.key_or_null().to_json())
                    .unwrap_or(serde_json::Value::Null)
            };
            let json = match link {
                Link::One(endpoint) => endpoint
                    .as_ref()
                    .map(endpoint_key)
                    .unwrap_or(serde_json::Value::Null),
                Link::Many(members) => {
                    serde_json::Value::Array(members.iter().map(endpoint_key).collect())
                }
            };
            object.insert(association.name.clone(), json);
        }

        Ok(serde_json::Value::Object(object))
    }

    fn data(&self, handle: EntityHandle) -> Result<&EntityData> {
        self.arena
            .get(handle)?
            .data()
            .ok_or_else(|| PersistenceError::IllegalState(format!("Entity {} is not loaded", handle)))
    }

    fn data_mut(&mut self, handle: EntityHandle) -> Result<&mut EntityData> {
        self.arena
            .get_mut(handle)?
            .data_mut()
            .ok_or_else(|| PersistenceError::IllegalState(format!("Entity {} is not loaded", handle)))
    }

    fn association(&self, handle: EntityHandle, name: &str, expected: Cardinality) -> Result<usize> {
        let kind = &self.arena.get(handle)?.kind;
        let slot = kind.association_slot(name)?;
        if kind.associations()[slot].cardinality != expected {
            return Err(PersistenceError::IllegalArgument(format!(
                "Association '{}.{}' is not {:?}",
                kind.name(),
                name,
                expected
            )));
        }
        Ok(slot)
    }

    fn check_endpoint(&self, owner: EntityHandle, slot: usize, endpoint: EntityHandle) -> Result<()> {
        let association = &self.arena.get(owner)?.kind.associations()[slot];
        let endpoint_kind = self.arena.get(endpoint)?.kind_name();
        if endpoint_kind != association.target {
            return Err(PersistenceError::IllegalArgument(format!(
                "Association '{}' expects '{}', got '{}'",
                association.name, association.target, endpoint_kind
            )));
        }
        Ok(())
    }

    /// Rejects objects whose row a flush already deleted.
    fn live(&self, handle: EntityHandle, operation: &str) -> Result<&EntityRecord> {
        let record = self.arena.get(handle)?;
        if record.deleted {
            return Err(PersistenceError::IllegalArgument(format!(
                "Cannot {} {} {}: the entity was deleted",
                operation,
                record.kind_name(),
                record.key_or_null()
            )));
        }
        Ok(record)
    }

    // ------------------------------------------------------------------
    // Loading
    // ------------------------------------------------------------------

    /// Loads a deferred reference on first access.
    pub(crate) fn ensure_loaded(&mut self, view: &StoreView<'_>, handle: EntityHandle) -> Result<()> {
        let record = self.arena.get(handle)?;
        if !record.is_pending() {
            return Ok(());
        }
        if !self.tracker.state(handle).is_some_and(LifecycleState::is_tracked) {
            return Err(PersistenceError::IllegalState(format!(
                "Reference to {} {} cannot be loaded once detached",
                record.kind_name(),
                record.key_or_null()
            )));
        }

        let kind = record.kind.clone();
        let key = record.key_or_null();
        let row = view
            .select(kind.name(), &key)?
            .ok_or_else(|| PersistenceError::not_found(kind.name(), &key))?;
        let loaded = LoadedRow::decode(&self.catalog, &kind, row)?;
        self.install(handle, loaded);
        debug!(kind = kind.name(), %key, "reference loaded");
        Ok(())
    }

    /// Makes `loaded` the state and baseline of `handle`.
    fn install(&mut self, handle: EntityHandle, loaded: LoadedRow) {
        let data = loaded.attach(|target, key| self.reference_for(target, key));
        if let Ok(record) = self.arena.get_mut(handle) {
            record.body = EntityBody::Resolved(data.clone());
        }
        self.tracker.replace_snapshot(handle, data);
    }

    /// The managed object for (kind, key), or a new managed reference to it.
    fn reference_for(&mut self, kind: &Arc<EntityKind>, key: Value) -> EntityHandle {
        let entity_key = EntityKey::new(kind.name(), key.clone());
        if let Some(handle) = self.identity.get(&entity_key) {
            return handle;
        }
        let handle = self.arena.insert(EntityRecord::reference(kind.clone(), key));
        self.identity.bind(handle, entity_key);
        self.tracker.register(handle, LifecycleState::Managed, None);
        handle
    }

    fn materialize(&mut self, kind: &Arc<EntityKind>, key: Value, loaded: LoadedRow) -> EntityHandle {
        let handle = self.reference_for(kind, key);
        self.install(handle, loaded);
        handle
    }

    // ------------------------------------------------------------------
    // Context operations
    // ------------------------------------------------------------------

    pub(crate) fn find(
        &mut self,
        view: &StoreView<'_>,
        kind: &str,
        key: Value,
    ) -> Result<Option<EntityHandle>> {
        let kind = self.catalog.get(kind)?.clone();
        check_lookup_key(&key)?;

        let entity_key = EntityKey::new(kind.name(), key.clone());
        if let Some(handle) = self.identity.get(&entity_key) {
            if self.tracker.state(handle) == Some(LifecycleState::Removed) {
                return Ok(None);
            }
            return match self.ensure_loaded(view, handle) {
                Ok(()) => Ok(Some(handle)),
                Err(PersistenceError::EntityNotFound { .. }) => Ok(None),
                Err(err) => Err(err),
            };
        }

        let Some(row) = view.select(kind.name(), &key)? else {
            trace!(%entity_key, "find: no row");
            return Ok(None);
        };
        let loaded = LoadedRow::decode(&self.catalog, &kind, row)?;
        let handle = self.materialize(&kind, key, loaded);
        debug!(%entity_key, %handle, "find: loaded");
        Ok(Some(handle))
    }

    pub(crate) fn get_reference(&mut self, kind: &str, key: Value) -> Result<EntityHandle> {
        let kind = self.catalog.get(kind)?.clone();
        check_lookup_key(&key)?;
        Ok(self.reference_for(&kind, key))
    }

    pub(crate) fn persist(&mut self, root: EntityHandle) -> Result<()> {
        let members = cascade::traverse(root, |handle| {
            let record = self.live(handle, "persist")?;
            let state = self.tracker.state(handle).unwrap_or(record.untracked);
            state.transition(LifecycleOp::Persist)?;
            Ok(cascading_endpoints(record, CascadeOp::Persist))
        })?;

        let mut claimed = HashSet::new();
        for &handle in &members {
            if self.tracker.state(handle).is_some() {
                continue;
            }
            let record = self.arena.get(handle)?;
            if record.key.is_none() && record.kind.key_strategy() == KeyStrategy::Assigned {
                return Err(PersistenceError::IllegalArgument(format!(
                    "{} needs its key '{}' assigned before persist",
                    record.kind_name(),
                    record.kind.key_attribute()
                )));
            }
            if let Some(entity_key) = identity_key(record)
                && (self.identity.contains_key(&entity_key) || !claimed.insert(entity_key.clone()))
            {
                return Err(PersistenceError::IllegalArgument(format!(
                    "Another instance of {} is already managed",
                    entity_key
                )));
            }
        }

        for handle in members {
            self.make_managed(handle)?;
        }
        Ok(())
    }

    fn make_managed(&mut self, handle: EntityHandle) -> Result<()> {
        match self.tracker.state(handle) {
            Some(LifecycleState::Managed) => {}
            Some(LifecycleState::Removed) => {
                let cancelled = self.actions.cancel(handle);
                self.tracker.set_state(handle, LifecycleState::Managed);
                if let Some(PendingAction::Delete { stored: false, .. }) = cancelled {
                    self.actions.enqueue_insert(handle);
                }
                trace!(%handle, "removal cancelled");
            }
            _ => {
                let record = self.arena.get_mut(handle)?;
                if record.key.is_none() && record.kind.key_strategy() == KeyStrategy::Uuid {
                    record.key = Some(Value::from(uuid::Uuid::new_v4()));
                }
                let snapshot = record.data().cloned();
                match identity_key(record) {
                    Some(entity_key) => self.identity.put(entity_key, handle)?,
                    None => self.identity.add_unkeyed(handle),
                }
                self.tracker
                    .register(handle, LifecycleState::Managed, snapshot);
                self.actions.enqueue_insert(handle);
                trace!(%handle, "persisted");
            }
        }
        Ok(())
    }

    pub(crate) fn remove(&mut self, view: &StoreView<'_>, root: EntityHandle) -> Result<()> {
        let record = self.live(root, "remove")?;
        let state = self.tracker.state(root).unwrap_or(record.untracked);
        state.transition(LifecycleOp::Remove)?;
        if state == LifecycleState::Removed {
            return Ok(());
        }

        let members = cascade::traverse(root, |handle| {
            let record = self.arena.get(handle)?;
            if record.deleted {
                return Ok(Vec::new());
            }
            match self.tracker.state(handle) {
                Some(_) => {}
                None if record.untracked == LifecycleState::New => return Ok(Vec::new()),
                None => {
                    return Err(PersistenceError::IllegalArgument(format!(
                        "Cannot remove detached {} {}",
                        record.kind_name(),
                        record.key_or_null()
                    )));
                }
            }
            self.ensure_loaded(view, handle)?;
            Ok(cascading_endpoints(self.arena.get(handle)?, CascadeOp::Remove))
        })?;

        for handle in members {
            if self.tracker.state(handle) != Some(LifecycleState::Managed) {
                continue;
            }
            let stored = !self.actions.has_insert(handle);
            self.actions.enqueue_delete(handle, stored);
            self.tracker.set_state(handle, LifecycleState::Removed);
            trace!(%handle, stored, "removed");
        }
        Ok(())
    }

    pub(crate) fn refresh(&mut self, view: &StoreView<'_>, root: EntityHandle) -> Result<()> {
        let members = cascade::traverse(root, |handle| {
            let record = self.live(handle, "refresh")?;
            let state = self.tracker.state(handle).unwrap_or(record.untracked);
            state.transition(LifecycleOp::Refresh)?;
            Ok(cascading_endpoints(record, CascadeOp::Refresh))
        })?;

        let mut rows = Vec::with_capacity(members.len());
        for handle in members {
            let record = self.arena.get(handle)?;
            let key = record.key_or_null();
            let row = match &record.key {
                Some(key) => view.select(record.kind_name(), key)?,
                None => None,
            }
            .ok_or_else(|| PersistenceError::not_found(record.kind_name(), &key))?;
            rows.push((handle, LoadedRow::decode(&self.catalog, &record.kind, row)?));
        }

        for (handle, loaded) in rows {
            self.install(handle, loaded);
            trace!(%handle, "refreshed");
        }
        Ok(())
    }

    pub(crate) fn detach(&mut self, root: EntityHandle) -> Result<()> {
        self.live(root, "detach")?;
        let members = cascade::traverse(root, |handle| {
            let record = self.arena.get(handle)?;
            if record.deleted || self.tracker.state(handle).is_none() {
                return Ok(Vec::new());
            }
            Ok(cascading_endpoints(record, CascadeOp::Detach))
        })?;

        for handle in members {
            self.evict(handle);
        }
        Ok(())
    }

    pub(crate) fn clear(&mut self) {
        let fresh: HashSet<EntityHandle> = self
            .actions
            .drain()
            .into_iter()
            .filter_map(|action| match action {
                PendingAction::Insert(handle)
                | PendingAction::Delete {
                    handle,
                    stored: false,
                } => Some(handle),
                _ => None,
            })
            .collect();
        let handles = self.tracker.drop_all();
        let count = handles.len();
        for handle in handles {
            if let Ok(record) = self.arena.get_mut(handle) {
                record.untracked = if fresh.contains(&handle) {
                    LifecycleState::New
                } else {
                    LifecycleState::Detached
                };
            }
        }
        self.identity.clear();
        debug!(detached = count, "persistence context cleared");
    }

    /// Undo the scheduling of a rolled back transaction. When its changes
    /// already reached the store through an explicit flush, baselines no
    /// longer match the store and the whole context is cleared instead.
    pub(crate) fn discard_pending(&mut self, flushed: bool) {
        if flushed {
            self.clear();
            return;
        }
        for action in self.actions.drain() {
            match action {
                PendingAction::Insert(handle)
                | PendingAction::Delete {
                    handle,
                    stored: false,
                } => self.untrack(handle, LifecycleState::New),
                PendingAction::Delete {
                    handle,
                    stored: true,
                } => {
                    self.tracker.set_state(handle, LifecycleState::Managed);
                }
            }
        }
    }

    /// Stops tracking `handle`. An object whose insert never reached the
    /// store goes back to NEW; anything else becomes DETACHED.
    fn evict(&mut self, handle: EntityHandle) {
        if self.tracker.state(handle).is_none() {
            return;
        }
        let becomes = match self.actions.cancel(handle) {
            Some(PendingAction::Insert(_)) | Some(PendingAction::Delete { stored: false, .. }) => {
                LifecycleState::New
            }
            _ => LifecycleState::Detached,
        };
        self.untrack(handle, becomes);
    }

    fn untrack(&mut self, handle: EntityHandle, becomes: LifecycleState) {
        self.tracker.drop_entry(handle);
        if let Ok(record) = self.arena.get_mut(handle) {
            let key = identity_key(record);
            self.identity.remove(handle, key.as_ref());
            record.untracked = becomes;
        }
    }
}

fn check_lookup_key(key: &Value) -> Result<()> {
    if key.is_null() || matches!(key, Value::List(_)) {
        return Err(PersistenceError::IllegalArgument(format!(
            "{} is not a valid key",
            key
        )));
    }
    Ok(())
}
