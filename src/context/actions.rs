// ============================================================================
// Pending Action Queue
// ============================================================================
//
// Store writes scheduled by persist/remove, drained by flush. Updates are not
// queued: they are computed from the dirty check at flush time.
//
// ============================================================================

use super::record::EntityHandle;

/// A scheduled write for one managed object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PendingAction {
    /// Insert the object's row.
    Insert(EntityHandle),
    /// Delete the object's row. `stored` is false when the object was
    /// removed before its own insert reached the store, in which case the
    /// flush only retires it.
    Delete { handle: EntityHandle, stored: bool },
}

impl PendingAction {
    pub(crate) fn handle(&self) -> EntityHandle {
        match self {
            PendingAction::Insert(handle) => *handle,
            PendingAction::Delete { handle, .. } => *handle,
        }
    }
}

/// Ordered queue with at most one action per object.
#[derive(Debug, Default)]
pub(crate) struct ActionQueue {
    actions: Vec<PendingAction>,
}

impl ActionQueue {
    pub(crate) fn enqueue_insert(&mut self, handle: EntityHandle) {
        self.cancel(handle);
        self.actions.push(PendingAction::Insert(handle));
    }

    pub(crate) fn enqueue_delete(&mut self, handle: EntityHandle, stored: bool) {
        self.cancel(handle);
        self.actions.push(PendingAction::Delete { handle, stored });
    }

    /// Removes and returns whatever is scheduled for `handle`.
    pub(crate) fn cancel(&mut self, handle: EntityHandle) -> Option<PendingAction> {
        let position = self.actions.iter().position(|a| a.handle() == handle)?;
        Some(self.actions.remove(position))
    }

    pub(crate) fn pending_for(&self, handle: EntityHandle) -> Option<PendingAction> {
        self.actions.iter().find(|a| a.handle() == handle).copied()
    }

    pub(crate) fn has_insert(&self, handle: EntityHandle) -> bool {
        self.pending_for(handle) == Some(PendingAction::Insert(handle))
    }

    /// Objects awaiting insert, in scheduling order.
    pub(crate) fn inserts(&self) -> Vec<EntityHandle> {
        self.actions
            .iter()
            .filter_map(|a| match a {
                PendingAction::Insert(handle) => Some(*handle),
                PendingAction::Delete { .. } => None,
            })
            .collect()
    }

    /// Objects awaiting delete, in scheduling order.
    pub(crate) fn deletes(&self) -> Vec<(EntityHandle, bool)> {
        self.actions
            .iter()
            .filter_map(|a| match a {
                PendingAction::Delete { handle, stored } => Some((*handle, *stored)),
                PendingAction::Insert(_) => None,
            })
            .collect()
    }

    pub(crate) fn drain(&mut self) -> Vec<PendingAction> {
        std::mem::take(&mut self.actions)
    }

    pub(crate) fn clear(&mut self) {
        self.actions.clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.actions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::record::{Arena, EntityRecord};
    use crate::metadata::EntityKind;
    use std::sync::Arc;

    #[test]
    fn test_one_action_per_object() {
        let kind = Arc::new(EntityKind::new("Book"));
        let mut arena = Arena::default();
        let a = arena.insert(EntityRecord::new(kind.clone()));
        let b = arena.insert(EntityRecord::new(kind));

        let mut queue = ActionQueue::default();
        queue.enqueue_insert(a);
        queue.enqueue_insert(b);
        queue.enqueue_delete(a, false);

        assert_eq!(queue.len(), 2);
        assert_eq!(queue.inserts(), vec![b]);
        assert_eq!(queue.deletes(), vec![(a, false)]);
        assert!(queue.has_insert(b));
        assert!(!queue.has_insert(a));

        assert_eq!(queue.cancel(b), Some(PendingAction::Insert(b)));
        assert_eq!(queue.cancel(b), None);

        queue.clear();
        assert_eq!(queue.len(), 0);
    }
}
