use super::cascade::{self, cascading_endpoints};
use super::hydrate::LoadedRow;
use super::record::{EntityHandle, EntityRecord};
use super::{LifecycleOp, LifecycleState, PersistenceContext, StoreView};
use crate::core::{EntityKey, PersistenceError, Result, Value};
use crate::metadata::{CascadeOp, EntityKind, KeyStrategy};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::debug;

/// Where the state of one merged object ends up.
enum MergeTarget {
    /// The source is managed already; only its associations are remapped.
    Itself,
    /// A loaded managed instance with the same identity.
    Existing(EntityHandle),
    /// An unloaded managed reference with the same identity, and its row.
    Resolve(EntityHandle, LoadedRow),
    /// A new managed instance built from the stored row.
    Load(Value, LoadedRow),
    /// A new managed instance that will be inserted.
    Fresh(Option<Value>),
    /// A never-loaded reference; maps onto the managed reference for its key.
    Reference(Value),
}

struct MergeStep {
    source: EntityHandle,
    kind: Arc<EntityKind>,
    target: MergeTarget,
}

impl PersistenceContext {
    /// Copies the state of `root` (and of objects reached over MERGE
    /// cascades) onto managed instances and returns the managed counterpart
    /// of `root`.
    pub(crate) fn merge(&mut self, view: &StoreView<'_>, root: EntityHandle) -> Result<EntityHandle> {
        let steps = self.plan_merge(view, root)?;
        let merged = self.apply_merge(steps);
        let target = merged.get(&root).copied().unwrap_or(root);
        debug!(source = %root, %target, objects = merged.len(), "merged");
        Ok(target)
    }

    fn plan_merge(&self, view: &StoreView<'_>, root: EntityHandle) -> Result<Vec<MergeStep>> {
        let mut steps = Vec::new();
        let mut claimed = HashSet::new();

        cascade::traverse(root, |source| {
            let record = self.live(source, "merge")?;
            let state = self.tracker.state(source).unwrap_or(record.untracked);
            state.transition(LifecycleOp::Merge)?;

            let target = if state == LifecycleState::Managed {
                MergeTarget::Itself
            } else {
                self.merge_target(view, record, &mut claimed)?
            };
            let next = match target {
                MergeTarget::Reference(_) => Vec::new(),
                _ => cascading_endpoints(record, CascadeOp::Merge),
            };
            steps.push(MergeStep {
                source,
                kind: record.kind.clone(),
                target,
            });
            Ok(next)
        })?;

        Ok(steps)
    }

    fn merge_target(
        &self,
        view: &StoreView<'_>,
        source: &EntityRecord,
        claimed: &mut HashSet<EntityKey>,
    ) -> Result<MergeTarget> {
        let kind = &source.kind;
        let Some(key) = source.key.clone() else {
            if kind.key_strategy() == KeyStrategy::Assigned {
                return Err(PersistenceError::IllegalArgument(format!(
                    "{} needs its key '{}' assigned before merge",
                    kind.name(),
                    kind.key_attribute()
                )));
            }
            return Ok(MergeTarget::Fresh(None));
        };

        let entity_key = EntityKey::new(kind.name(), key.clone());
        if !claimed.insert(entity_key.clone()) {
            return Err(PersistenceError::IllegalArgument(format!(
                "Two instances of {} in one merge",
                entity_key
            )));
        }

        let managed = self.identity.get(&entity_key);
        if let Some(managed) = managed
            && self.tracker.state(managed) == Some(LifecycleState::Removed)
        {
            return Err(PersistenceError::IllegalArgument(format!(
                "Cannot merge into removed {}",
                entity_key
            )));
        }

        if source.is_pending() {
            return Ok(MergeTarget::Reference(key));
        }

        if let Some(managed) = managed
            && let Some(data) = self.arena.get(managed)?.data()
        {
            let found = kind
                .version_slot()
                .map(|slot| data.values[slot].clone())
                .unwrap_or(Value::Null);
            self.check_merge_version(source, &key, found)?;
            return Ok(MergeTarget::Existing(managed));
        }

        let loaded = match view.select(kind.name(), &key)? {
            Some(row) => LoadedRow::decode(&self.catalog, kind, row)?,
            None if managed.is_some() || source.untracked == LifecycleState::Detached => {
                return Err(PersistenceError::not_found(kind.name(), &key));
            }
            None => return Ok(MergeTarget::Fresh(Some(key))),
        };
        self.check_merge_version(source, &key, loaded.version(kind))?;

        Ok(match managed {
            Some(managed) => MergeTarget::Resolve(managed, loaded),
            None => MergeTarget::Load(key, loaded),
        })
    }

    fn check_merge_version(&self, source: &EntityRecord, key: &Value, found: Value) -> Result<()> {
        let kind = &source.kind;
        let (Some(slot), Some(data)) = (kind.version_slot(), source.data()) else {
            return Ok(());
        };
        let expected = &data.values[slot];
        if !self.config.check_versions || expected.is_null() || *expected == found {
            return Ok(());
        }
        Err(PersistenceError::OptimisticConflict {
            kind: kind.name().to_string(),
            key: key.clone(),
            expected: expected.clone(),
            found,
        })
    }

    /// Creates the targets, then copies values and remapped associations.
    /// Everything that could fail was checked while planning.
    fn apply_merge(&mut self, steps: Vec<MergeStep>) -> HashMap<EntityHandle, EntityHandle> {
        let mut mapping = HashMap::with_capacity(steps.len());
        let mut copies = Vec::new();

        for MergeStep {
            source,
            kind,
            target,
        } in steps
        {
            let (target, copy_values, fresh) = match target {
                MergeTarget::Itself => (source, false, false),
                MergeTarget::Existing(managed) => (managed, true, false),
                MergeTarget::Resolve(managed, loaded) => {
                    self.install(managed, loaded);
                    (managed, true, false)
                }
                MergeTarget::Load(key, loaded) => (self.materialize(&kind, key, loaded), true, false),
                MergeTarget::Fresh(key) => (self.adopt(&kind, key), true, true),
                MergeTarget::Reference(key) => {
                    let reference = self.reference_for(&kind, key);
                    mapping.insert(source, reference);
                    continue;
                }
            };
            mapping.insert(source, target);
            copies.push((source, target, copy_values, fresh));
        }

        for (source, target, copy_values, fresh) in copies {
            let Some(source_data) = self
                .arena
                .get(source)
                .ok()
                .and_then(|record| record.data())
                .cloned()
            else {
                continue;
            };

            let links: Vec<_> = source_data
                .links
                .iter()
                .map(|link| link.map(|endpoint| self.merged_endpoint(endpoint, &mapping)))
                .collect();

            let Ok(record) = self.arena.get_mut(target) else {
                continue;
            };
            let version_slot = record.kind.version_slot();
            let Some(data) = record.data_mut() else {
                continue;
            };
            if copy_values {
                for (slot, value) in source_data.values.into_iter().enumerate() {
                    if Some(slot) != version_slot {
                        data.values[slot] = value;
                    }
                }
            }
            data.links = links;

            if fresh {
                let snapshot = data.clone();
                self.tracker.replace_snapshot(target, snapshot);
            }
        }

        mapping
    }

    /// A new managed instance scheduled for insert.
    fn adopt(&mut self, kind: &Arc<EntityKind>, key: Option<Value>) -> EntityHandle {
        let mut record = EntityRecord::new(kind.clone());
        record.key = match key {
            Some(key) => Some(key),
            None if kind.key_strategy() == KeyStrategy::Uuid => {
                Some(Value::from(uuid::Uuid::new_v4()))
            }
            None => None,
        };
        let entity_key = record
            .key
            .as_ref()
            .map(|key| EntityKey::new(kind.name(), key.clone()));
        let snapshot = record.data().cloned();

        let handle = self.arena.insert(record);
        match entity_key {
            Some(entity_key) => self.identity.bind(handle, entity_key),
            None => self.identity.add_unkeyed(handle),
        }
        self.tracker
            .register(handle, LifecycleState::Managed, snapshot);
        self.actions.enqueue_insert(handle);
        handle
    }

    /// Endpoint to use in a merged copy for an association of the source.
    fn merged_endpoint(
        &mut self,
        endpoint: EntityHandle,
        mapping: &HashMap<EntityHandle, EntityHandle>,
    ) -> EntityHandle {
        if let Some(target) = mapping.get(&endpoint) {
            return *target;
        }
        let Ok(record) = self.arena.get(endpoint) else {
            return endpoint;
        };
        if record.deleted
            || self.tracker.state(endpoint).is_some()
            || record.untracked != LifecycleState::Detached
        {
            return endpoint;
        }
        match record.key.clone() {
            Some(key) => {
                let kind = record.kind.clone();
                self.reference_for(&kind, key)
            }
            None => endpoint,
        }
    }
}
