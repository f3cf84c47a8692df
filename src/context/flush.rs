// ============================================================================
// Flush
// ============================================================================
//
// Writes the context's pending changes through one unit of work:
//
//   1. persist-on-flush and orphan removal
//   2. INSERTs, endpoints before the objects that reference them
//   3. UPDATEs for every managed object that differs from its baseline
//   4. DELETEs, referencing objects before their endpoints
//
// Keys, versions and new baselines are collected in `FlushEffects` and only
// applied to the context once the caller knows the writes will stand.
//
// ============================================================================

use super::cascade::dependency_order;
use super::hydrate::encode;
use super::record::{EntityData, EntityHandle};
use super::{LifecycleState, PersistenceContext, StoreView};
use crate::core::{EntityKey, PersistenceError, Result, Value};
use crate::metadata::EntityKind;
use crate::storage::{RowStore, UnitOfWork};
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, info_span, trace};

/// Row counts written by one flush.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushStats {
    pub inserted: usize,
    pub updated: usize,
    pub deleted: usize,
}

impl FlushStats {
    pub fn is_empty(&self) -> bool {
        self.inserted + self.updated + self.deleted == 0
    }
}

/// Context changes produced by a flush, applied after the writes succeeded.
#[derive(Debug, Default)]
pub(crate) struct FlushEffects {
    keys: HashMap<EntityHandle, Value>,
    versions: HashMap<EntityHandle, Value>,
    snapshots: HashMap<EntityHandle, EntityData>,
    inserted: HashSet<EntityHandle>,
    deleted: Vec<EntityHandle>,
    pub(crate) stats: FlushStats,
}

impl PersistenceContext {
    pub(crate) fn flush(&mut self, store: &dyn RowStore, uow: UnitOfWork) -> Result<FlushEffects> {
        let span = info_span!("flush", uow = uow.0);
        let _enter = span.enter();

        let view = StoreView::new(store, Some(uow));
        self.cascade_on_flush(&view)?;

        let pending: HashSet<EntityHandle> = self.actions.inserts().into_iter().collect();
        let mut effects = FlushEffects::default();

        self.write_inserts(store, uow, &pending, &mut effects)?;
        self.write_updates(store, uow, &view, &pending, &mut effects)?;
        self.write_deletes(store, uow, &view, &mut effects)?;

        let stats = effects.stats;
        info!(
            inserted = stats.inserted,
            updated = stats.updated,
            deleted = stats.deleted,
            "flush complete"
        );
        Ok(effects)
    }

    /// Applies what a flush staged: generated keys, versions, baselines and
    /// the retirement of deleted objects. Clears the action queue.
    pub(crate) fn apply_flush(&mut self, effects: FlushEffects) {
        let FlushEffects {
            keys,
            versions,
            snapshots,
            deleted,
            ..
        } = effects;

        for (handle, key) in keys {
            if let Ok(record) = self.arena.get_mut(handle) {
                self.identity
                    .bind(handle, EntityKey::new(record.kind_name(), key.clone()));
                record.key = Some(key);
            }
        }

        for (handle, version) in versions {
            if let Ok(record) = self.arena.get_mut(handle)
                && let Some(slot) = record.kind.version_slot()
                && let Some(data) = record.data_mut()
            {
                data.values[slot] = version;
            }
        }

        for (handle, snapshot) in snapshots {
            self.tracker.replace_snapshot(handle, snapshot);
        }

        for handle in deleted {
            self.untrack(handle, LifecycleState::Removed);
            if let Ok(record) = self.arena.get_mut(handle) {
                record.deleted = true;
            }
        }

        self.actions.clear();
    }

    fn cascade_on_flush(&mut self, view: &StoreView<'_>) -> Result<()> {
        for handle in self.tracker.handles(Some(LifecycleState::Managed)) {
            if !self.arena.get(handle)?.is_pending() {
                self.persist(handle)?;
            }
        }

        for handle in self.tracker.handles(Some(LifecycleState::Managed)) {
            let record = self.arena.get(handle)?;
            let (Some(current), Some(baseline)) = (record.data(), self.tracker.snapshot(handle))
            else {
                continue;
            };

            let mut orphans = Vec::new();
            for (slot, association) in record.kind.associations().iter().enumerate() {
                if !association.orphan_removal {
                    continue;
                }
                let kept = current.links[slot].endpoints();
                orphans.extend(
                    baseline.links[slot]
                        .endpoints()
                        .into_iter()
                        .filter(|endpoint| !kept.contains(endpoint)),
                );
            }

            for orphan in orphans {
                if self.tracker.state(orphan) == Some(LifecycleState::Managed) {
                    debug!(owner = %handle, %orphan, "removing orphan");
                    self.remove(view, orphan)?;
                }
            }
        }
        Ok(())
    }

    /// Key to store for `endpoint`, or `None` while its insert is still to
    /// come in this flush.
    fn endpoint_key(
        &self,
        endpoint: EntityHandle,
        pending: &HashSet<EntityHandle>,
        effects: &FlushEffects,
    ) -> Result<Option<Value>> {
        if let Some(key) = effects.keys.get(&endpoint) {
            return Ok(Some(key.clone()));
        }

        let record = self.arena.get(endpoint)?;
        let state = self.tracker.state(endpoint);
        if record.deleted || state == Some(LifecycleState::Removed) {
            return Err(PersistenceError::IllegalState(format!(
                "A managed entity references removed {} {}",
                record.kind_name(),
                record.key_or_null()
            )));
        }
        if pending.contains(&endpoint) && !effects.inserted.contains(&endpoint) {
            return Ok(None);
        }
        if state.is_none() && record.untracked == LifecycleState::New {
            return Err(PersistenceError::IllegalState(format!(
                "A managed entity references a transient {}; persist it first",
                record.kind_name()
            )));
        }

        record.key.clone().map(Some).ok_or_else(|| {
            PersistenceError::IllegalState(format!(
                "Referenced {} {} has no key",
                record.kind_name(),
                endpoint
            ))
        })
    }

    fn write_inserts(
        &self,
        store: &dyn RowStore,
        uow: UnitOfWork,
        pending: &HashSet<EntityHandle>,
        effects: &mut FlushEffects,
    ) -> Result<()> {
        let queued = self.actions.inserts();
        let order = dependency_order(&queued, |handle| {
            self.arena
                .get(handle)
                .ok()
                .and_then(|record| record.data())
                .map(EntityData::endpoints)
                .unwrap_or_default()
        });

        for handle in order {
            let record = self.arena.get(handle)?;
            let kind = &record.kind;
            let mut data = record.data().cloned().ok_or_else(|| {
                PersistenceError::IllegalState(format!("Entity {} is not loaded", handle))
            })?;
            if let Some(slot) = kind.version_slot() {
                data.values[slot] = Value::Integer(1);
            }

            let (row, written) = encode(kind, &data, |endpoint| {
                self.endpoint_key(endpoint, pending, effects)
            })?;
            let key = store.insert_row(uow, kind.name(), record.key.as_ref(), row)?;

            if record.key.is_none() {
                let entity_key = EntityKey::new(kind.name(), key.clone());
                if self.identity.get(&entity_key).is_some_and(|other| other != handle) {
                    return Err(PersistenceError::IllegalState(format!(
                        "Generated key {} is already used by another managed instance",
                        entity_key
                    )));
                }
                effects.keys.insert(handle, key.clone());
            }
            if kind.version_slot().is_some() {
                effects.versions.insert(handle, Value::Integer(1));
            }
            effects.inserted.insert(handle);
            effects.snapshots.insert(handle, written);
            effects.stats.inserted += 1;
            trace!(kind = kind.name(), %key, "row inserted");
        }
        Ok(())
    }

    fn write_updates(
        &self,
        store: &dyn RowStore,
        uow: UnitOfWork,
        view: &StoreView<'_>,
        pending: &HashSet<EntityHandle>,
        effects: &mut FlushEffects,
    ) -> Result<()> {
        for handle in self.tracker.handles(Some(LifecycleState::Managed)) {
            let record = self.arena.get(handle)?;
            let Some(current) = record.data() else {
                continue;
            };
            let Some(baseline) = effects
                .snapshots
                .get(&handle)
                .or_else(|| self.tracker.snapshot(handle))
                .cloned()
            else {
                continue;
            };

            let kind = &record.kind;
            let mut current = current.clone();
            if let Some(slot) = kind.version_slot() {
                current.values[slot] = baseline.values[slot].clone();
            }
            if current == baseline {
                continue;
            }

            let key = effects
                .keys
                .get(&handle)
                .or(record.key.as_ref())
                .cloned()
                .ok_or_else(|| {
                    PersistenceError::IllegalState(format!("Managed entity {} has no key", handle))
                })?;

            let mut new_version = None;
            if let Some(slot) = kind.version_slot()
                && !effects.inserted.contains(&handle)
            {
                let expected = baseline.values[slot].clone();
                if self.config.check_versions {
                    check_version(view, kind, &key, &expected)?;
                }
                let next = Value::Integer(expected.as_i64().unwrap_or(0) + 1);
                current.values[slot] = next.clone();
                new_version = Some(next);
            }

            let (row, written) = encode(kind, &current, |endpoint| {
                self.endpoint_key(endpoint, pending, effects)
            })?;
            store.update_row(uow, kind.name(), &key, row)?;

            if let Some(version) = new_version {
                effects.versions.insert(handle, version);
            }
            effects.snapshots.insert(handle, written);
            effects.stats.updated += 1;
            trace!(kind = kind.name(), %key, "row updated");
        }
        Ok(())
    }

    fn write_deletes(
        &self,
        store: &dyn RowStore,
        uow: UnitOfWork,
        view: &StoreView<'_>,
        effects: &mut FlushEffects,
    ) -> Result<()> {
        let deletes = self.actions.deletes();
        let stored: Vec<EntityHandle> = deletes
            .iter()
            .filter(|(_, stored)| *stored)
            .map(|(handle, _)| *handle)
            .collect();

        let order = dependency_order(&stored, |handle| {
            self.arena
                .get(handle)
                .ok()
                .and_then(|record| record.data())
                .map(EntityData::endpoints)
                .unwrap_or_default()
        });

        for handle in order.into_iter().rev() {
            let record = self.arena.get(handle)?;
            let kind = &record.kind;
            let key = record.key.clone().ok_or_else(|| {
                PersistenceError::IllegalState(format!("Removed entity {} has no key", handle))
            })?;

            if let Some(slot) = kind.version_slot()
                && self.config.check_versions
            {
                let expected = self
                    .tracker
                    .snapshot(handle)
                    .map(|snapshot| snapshot.values[slot].clone())
                    .unwrap_or(Value::Null);
                check_version(view, kind, &key, &expected)?;
            }

            store.delete_row(uow, kind.name(), &key)?;
            effects.stats.deleted += 1;
            trace!(kind = kind.name(), %key, "row deleted");
        }

        effects.deleted = deletes.into_iter().map(|(handle, _)| handle).collect();
        Ok(())
    }
}

fn check_version(view: &StoreView<'_>, kind: &EntityKind, key: &Value, expected: &Value) -> Result<()> {
    let found = view
        .select(kind.name(), key)?
        .and_then(|row| kind.version_slot().and_then(|slot| row.get(slot).cloned()))
        .unwrap_or(Value::Null);

    if &found != expected {
        return Err(PersistenceError::OptimisticConflict {
            kind: kind.name().to_string(),
            key: key.clone(),
            expected: expected.clone(),
            found,
        });
    }
    Ok(())
}
