use super::record::EntityHandle;
use crate::core::{EntityKey, PersistenceError, Result};
use std::collections::HashMap;

/// Unique managed representation per (kind, key).
///
/// Objects whose key is generated by the store are kept in `unkeyed` until
/// the flush that inserts them assigns a key.
#[derive(Debug, Default)]
pub(crate) struct IdentityMap {
    keyed: HashMap<EntityKey, EntityHandle>,
    unkeyed: Vec<EntityHandle>,
}

impl IdentityMap {
    pub(crate) fn put(&mut self, key: EntityKey, handle: EntityHandle) -> Result<()> {
        match self.keyed.get(&key) {
            Some(existing) if *existing != handle => Err(PersistenceError::IllegalArgument(
                format!("Another instance of {} is already managed", key),
            )),
            _ => {
                self.keyed.insert(key, handle);
                Ok(())
            }
        }
    }

    pub(crate) fn get(&self, key: &EntityKey) -> Option<EntityHandle> {
        self.keyed.get(key).copied()
    }

    pub(crate) fn contains_key(&self, key: &EntityKey) -> bool {
        self.keyed.contains_key(key)
    }

    pub(crate) fn add_unkeyed(&mut self, handle: EntityHandle) {
        if !self.unkeyed.contains(&handle) {
            self.unkeyed.push(handle);
        }
    }

    /// Registers `handle` under `key`, dropping it from the unkeyed list.
    pub(crate) fn bind(&mut self, handle: EntityHandle, key: EntityKey) {
        self.unkeyed.retain(|h| *h != handle);
        self.keyed.insert(key, handle);
    }

    /// Drops `handle`, whether it is registered under `key` or unkeyed.
    pub(crate) fn remove(&mut self, handle: EntityHandle, key: Option<&EntityKey>) {
        if let Some(key) = key
            && self.keyed.get(key) == Some(&handle)
        {
            self.keyed.remove(key);
        }
        self.unkeyed.retain(|h| *h != handle);
    }

    /// Keyed objects of one kind, in no particular order.
    pub(crate) fn iter_kind<'a>(&'a self, kind: &'a str) -> impl Iterator<Item = EntityHandle> + 'a {
        self.keyed
            .iter()
            .filter(move |(key, _)| key.kind == kind)
            .map(|(_, handle)| *handle)
    }

    pub(crate) fn clear(&mut self) {
        self.keyed.clear();
        self.unkeyed.clear();
    }
}
