use super::tracker::LifecycleState;
use crate::core::{PersistenceError, Result, Row, Value};
use crate::metadata::{Cardinality, EntityKind};
use std::fmt;
use std::sync::Arc;

/// Application-side handle of an entity object owned by an entity manager.
///
/// Handles are cheap to copy and only meaningful for the manager that
/// created them. A handle becomes stale once its object is released.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityHandle {
    index: u32,
    generation: u32,
}

impl fmt::Display for EntityHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}.{}", self.index, self.generation)
    }
}

/// Endpoint slot(s) of one association.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Link {
    One(Option<EntityHandle>),
    Many(Vec<EntityHandle>),
}

impl Link {
    pub(crate) fn empty(cardinality: Cardinality) -> Self {
        match cardinality {
            Cardinality::ToOne => Link::One(None),
            Cardinality::ToMany => Link::Many(Vec::new()),
        }
    }

    pub(crate) fn endpoints(&self) -> Vec<EntityHandle> {
        match self {
            Link::One(endpoint) => endpoint.iter().copied().collect(),
            Link::Many(members) => members.clone(),
        }
    }

    pub(crate) fn map(&self, mut f: impl FnMut(EntityHandle) -> EntityHandle) -> Link {
        match self {
            Link::One(endpoint) => Link::One(endpoint.map(&mut f)),
            Link::Many(members) => Link::Many(members.iter().map(|h| f(*h)).collect()),
        }
    }
}

/// Persistent state of a loaded object: scalar values in attribute order and
/// one link per association. Snapshots are plain copies of this.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct EntityData {
    pub(crate) values: Row,
    pub(crate) links: Vec<Link>,
}

impl EntityData {
    pub(crate) fn empty(kind: &EntityKind) -> Self {
        Self {
            values: vec![Value::Null; kind.attributes().len()],
            links: kind
                .associations()
                .iter()
                .map(|a| Link::empty(a.cardinality))
                .collect(),
        }
    }

    pub(crate) fn endpoints(&self) -> Vec<EntityHandle> {
        self.links.iter().flat_map(Link::endpoints).collect()
    }
}

/// Either loaded state or a deferred reference that loads on first access.
#[derive(Debug, Clone)]
pub(crate) enum EntityBody {
    Pending,
    Resolved(EntityData),
}

#[derive(Debug, Clone)]
pub(crate) struct EntityRecord {
    pub(crate) kind: Arc<EntityKind>,
    pub(crate) key: Option<Value>,
    pub(crate) body: EntityBody,
    /// Lifecycle while the context does not track the object (NEW or DETACHED).
    pub(crate) untracked: LifecycleState,
    /// Set once the object's row was deleted by a flush.
    pub(crate) deleted: bool,
}

impl EntityRecord {
    pub(crate) fn new(kind: Arc<EntityKind>) -> Self {
        let data = EntityData::empty(&kind);
        Self {
            kind,
            key: None,
            body: EntityBody::Resolved(data),
            untracked: LifecycleState::New,
            deleted: false,
        }
    }

    pub(crate) fn reference(kind: Arc<EntityKind>, key: Value) -> Self {
        Self {
            kind,
            key: Some(key),
            body: EntityBody::Pending,
            untracked: LifecycleState::Detached,
            deleted: false,
        }
    }

    pub(crate) fn kind_name(&self) -> &str {
        self.kind.name()
    }

    pub(crate) fn data(&self) -> Option<&EntityData> {
        match &self.body {
            EntityBody::Resolved(data) => Some(data),
            EntityBody::Pending => None,
        }
    }

    pub(crate) fn data_mut(&mut self) -> Option<&mut EntityData> {
        match &mut self.body {
            EntityBody::Resolved(data) => Some(data),
            EntityBody::Pending => None,
        }
    }

    pub(crate) fn is_pending(&self) -> bool {
        matches!(self.body, EntityBody::Pending)
    }

    pub(crate) fn key_or_null(&self) -> Value {
        self.key.clone().unwrap_or(Value::Null)
    }
}

struct Slot {
    generation: u32,
    record: Option<EntityRecord>,
}

/// Owner of every entity object handed out by one entity manager.
#[derive(Default)]
pub(crate) struct Arena {
    slots: Vec<Slot>,
    free: Vec<u32>,
}

impl Arena {
    pub(crate) fn insert(&mut self, record: EntityRecord) -> EntityHandle {
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.generation += 1;
            slot.record = Some(record);
            return EntityHandle {
                index,
                generation: slot.generation,
            };
        }

        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 0,
            record: Some(record),
        });
        EntityHandle {
            index,
            generation: 0,
        }
    }

    pub(crate) fn get(&self, handle: EntityHandle) -> Result<&EntityRecord> {
        self.slots
            .get(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.record.as_ref())
            .ok_or_else(|| stale(handle))
    }

    pub(crate) fn get_mut(&mut self, handle: EntityHandle) -> Result<&mut EntityRecord> {
        self.slots
            .get_mut(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.record.as_mut())
            .ok_or_else(|| stale(handle))
    }

    pub(crate) fn release(&mut self, handle: EntityHandle) -> Result<EntityRecord> {
        let slot = self
            .slots
            .get_mut(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .ok_or_else(|| stale(handle))?;
        let record = slot.record.take().ok_or_else(|| stale(handle))?;
        self.free.push(handle.index);
        Ok(record)
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.len() - self.free.len()
    }
}

fn stale(handle: EntityHandle) -> PersistenceError {
    PersistenceError::IllegalArgument(format!("Entity handle {} is stale", handle))
}
