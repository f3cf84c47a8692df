use super::record::{EntityData, EntityHandle};
use crate::core::{PersistenceError, Result};
use std::collections::BTreeMap;
use std::fmt;

/// Lifecycle of an entity object relative to one persistence context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleState {
    /// Created in memory, unknown to the context.
    New,
    /// Registered; changes are tracked and flushed.
    Managed,
    /// Previously managed, no longer tracked.
    Detached,
    /// Scheduled for deletion at the next flush (or deleted by one).
    Removed,
}

/// Context operations that move an object between lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleOp {
    Persist,
    Remove,
    Refresh,
    Detach,
    Merge,
}

impl LifecycleState {
    /// Transition table for the operations applied directly to an object.
    ///
    /// ```text
    /// NEW      --persist--> MANAGED     MANAGED --remove--> REMOVED
    /// MANAGED  --persist--> MANAGED     REMOVED --remove--> REMOVED
    /// REMOVED  --persist--> MANAGED     MANAGED --detach--> DETACHED
    /// DETACHED --merge----> MANAGED (copy)
    /// ```
    pub fn transition(self, op: LifecycleOp) -> Result<LifecycleState> {
        use LifecycleOp as Op;
        use LifecycleState as S;

        match (self, op) {
            (S::New, Op::Persist) | (S::Managed, Op::Persist) | (S::Removed, Op::Persist) => {
                Ok(S::Managed)
            }
            (S::Managed, Op::Remove) | (S::Removed, Op::Remove) => Ok(S::Removed),
            (S::Managed, Op::Refresh) => Ok(S::Managed),
            (S::Managed, Op::Detach) | (S::Removed, Op::Detach) | (S::Detached, Op::Detach) => {
                Ok(S::Detached)
            }
            (S::New, Op::Detach) => Ok(S::New),
            (S::New, Op::Merge) | (S::Detached, Op::Merge) | (S::Managed, Op::Merge) => {
                Ok(S::Managed)
            }
            (state, op) => Err(PersistenceError::IllegalArgument(format!(
                "Cannot {:?} an entity that is {}",
                op, state
            ))),
        }
    }

    pub fn is_tracked(self) -> bool {
        matches!(self, LifecycleState::Managed | LifecycleState::Removed)
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LifecycleState::New => write!(f, "NEW"),
            LifecycleState::Managed => write!(f, "MANAGED"),
            LifecycleState::Detached => write!(f, "DETACHED"),
            LifecycleState::Removed => write!(f, "REMOVED"),
        }
    }
}

#[derive(Debug, Clone)]
struct TrackedEntry {
    state: LifecycleState,
    snapshot: Option<EntityData>,
}

/// Lifecycle state and baseline snapshot of every tracked object.
///
/// Snapshots are shallow: scalar values plus the endpoint handles of each
/// association, as last synchronized with the store. An unresolved deferred
/// reference has no snapshot until it is loaded.
#[derive(Debug, Default)]
pub(crate) struct StateTracker {
    entries: BTreeMap<EntityHandle, TrackedEntry>,
}

impl StateTracker {
    pub(crate) fn register(
        &mut self,
        handle: EntityHandle,
        state: LifecycleState,
        snapshot: Option<EntityData>,
    ) {
        self.entries.insert(handle, TrackedEntry { state, snapshot });
    }

    pub(crate) fn state(&self, handle: EntityHandle) -> Option<LifecycleState> {
        self.entries.get(&handle).map(|entry| entry.state)
    }

    /// Returns false when `handle` is not tracked.
    pub(crate) fn set_state(&mut self, handle: EntityHandle, state: LifecycleState) -> bool {
        match self.entries.get_mut(&handle) {
            Some(entry) => {
                entry.state = state;
                true
            }
            None => false,
        }
    }

    pub(crate) fn snapshot(&self, handle: EntityHandle) -> Option<&EntityData> {
        self.entries.get(&handle).and_then(|entry| entry.snapshot.as_ref())
    }

    pub(crate) fn replace_snapshot(&mut self, handle: EntityHandle, snapshot: EntityData) {
        if let Some(entry) = self.entries.get_mut(&handle) {
            entry.snapshot = Some(snapshot);
        }
    }

    /// True when `current` differs from the baseline. Objects without a
    /// baseline are never dirty.
    pub(crate) fn is_dirty(&self, handle: EntityHandle, current: &EntityData) -> bool {
        self.snapshot(handle)
            .is_some_and(|snapshot| snapshot != current)
    }

    pub(crate) fn drop_entry(&mut self, handle: EntityHandle) -> bool {
        self.entries.remove(&handle).is_some()
    }

    /// Drop everything, returning the handles that were tracked.
    pub(crate) fn drop_all(&mut self) -> Vec<EntityHandle> {
        let handles = self.entries.keys().copied().collect();
        self.entries.clear();
        handles
    }

    /// Tracked handles in a stable order, optionally filtered by state.
    pub(crate) fn handles(&self, state: Option<LifecycleState>) -> Vec<EntityHandle> {
        self.entries
            .iter()
            .filter(|(_, entry)| state.is_none_or(|s| entry.state == s))
            .map(|(handle, _)| *handle)
            .collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}
