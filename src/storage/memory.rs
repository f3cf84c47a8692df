use super::{RowStore, StoredTable, UnitOfWork};
use crate::core::{Row, StoreError, StoreResult, Value};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::{debug, trace, warn};

type RowId = (String, Value);

/// Writes buffered by one open unit of work.
///
/// `None` marks a deleted row. `committed` remembers whether each row was
/// committed when this unit first wrote it; commit fails if that no longer
/// holds. Every entry is applied to the committed tables in one step.
#[derive(Debug, Default)]
struct PendingWork {
    overlay: HashMap<RowId, Option<Row>>,
    committed: HashMap<RowId, bool>,
    order: Vec<RowId>,
}

impl PendingWork {
    fn record(&mut self, id: RowId, row: Option<Row>, committed: bool) {
        if !self.overlay.contains_key(&id) {
            self.order.push(id.clone());
            self.committed.insert(id.clone(), committed);
        }
        self.overlay.insert(id, row);
    }

    /// Checks every buffered write against the committed tables.
    fn validate(&self, tables: &HashMap<String, StoredTable>) -> StoreResult<()> {
        for id in &self.order {
            let was_committed = self.committed.get(id).copied().unwrap_or(false);
            let (kind, key) = id;
            let is_committed = tables.get(kind).is_some_and(|t| t.contains(key));
            match (was_committed, is_committed) {
                (false, true) if self.overlay.get(id).is_some_and(Option::is_some) => {
                    return Err(StoreError::RowExists(kind.clone(), key.clone()));
                }
                (true, false) => {
                    return Err(StoreError::RowNotFound(kind.clone(), key.clone()));
                }
                _ => {}
            }
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub(crate) struct StoreState {
    pub(crate) tables: HashMap<String, StoredTable>,
    open: HashMap<u64, PendingWork>,
    next_uow: u64,
}

impl StoreState {
    fn visible(&self, uow: Option<UnitOfWork>, kind: &str, key: &Value) -> Option<Row> {
        if let Some(uow) = uow
            && let Some(work) = self.open.get(&uow.0)
            && let Some(entry) = work.overlay.get(&(kind.to_string(), key.clone()))
        {
            return entry.clone();
        }
        self.tables.get(kind).and_then(|t| t.get(key)).cloned()
    }

    fn is_committed(&self, kind: &str, key: &Value) -> bool {
        self.tables.get(kind).is_some_and(|t| t.contains(key))
    }

    fn work_mut(&mut self, uow: UnitOfWork) -> StoreResult<&mut PendingWork> {
        self.open
            .get_mut(&uow.0)
            .ok_or(StoreError::UnknownUnitOfWork(uow.0))
    }
}

/// Row store keeping every table in memory.
///
/// Cloning yields another handle onto the same tables, which is how several
/// entity managers share one store.
#[derive(Debug, Clone, Default)]
pub struct InMemoryRowStore {
    pub(crate) state: Arc<RwLock<StoreState>>,
}

impl InMemoryRowStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn from_tables(tables: HashMap<String, StoredTable>) -> Self {
        Self {
            state: Arc::new(RwLock::new(StoreState {
                tables,
                ..StoreState::default()
            })),
        }
    }

    /// Number of committed rows of `kind`.
    pub fn row_count(&self, kind: &str) -> StoreResult<usize> {
        let state = self.state.read()?;
        Ok(state.tables.get(kind).map(|t| t.row_count()).unwrap_or(0))
    }

    /// Committed keys of `kind`, sorted.
    pub fn keys(&self, kind: &str) -> StoreResult<Vec<Value>> {
        let state = self.state.read()?;
        Ok(state.tables.get(kind).map(|t| t.keys()).unwrap_or_default())
    }

    /// Kinds that have a table, sorted.
    pub fn list_tables(&self) -> StoreResult<Vec<String>> {
        let state = self.state.read()?;
        let mut names: Vec<String> = state.tables.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    /// Number of units of work currently open.
    pub fn open_units(&self) -> StoreResult<usize> {
        Ok(self.state.read()?.open.len())
    }
}

impl RowStore for InMemoryRowStore {
    fn begin(&self) -> StoreResult<UnitOfWork> {
        let mut state = self.state.write()?;
        state.next_uow += 1;
        let uow = state.next_uow;
        state.open.insert(uow, PendingWork::default());
        debug!(uow, "unit of work opened");
        Ok(UnitOfWork(uow))
    }

    /// Applies the unit of work. When another unit of work committed a
    /// conflicting write first, nothing is applied and the unit of work
    /// stays open for `rollback`.
    fn commit(&self, uow: UnitOfWork) -> StoreResult<()> {
        let mut state = self.state.write()?;
        let work = state
            .open
            .get(&uow.0)
            .ok_or(StoreError::UnknownUnitOfWork(uow.0))?;
        if let Err(err) = work.validate(&state.tables) {
            warn!(uow = uow.0, error = %err, "write conflict at commit");
            return Err(err);
        }
        let Some(work) = state.open.remove(&uow.0) else {
            return Err(StoreError::UnknownUnitOfWork(uow.0));
        };

        let PendingWork {
            mut overlay,
            committed,
            order,
        } = work;
        let writes = order.len();
        for id in order {
            let Some(entry) = overlay.remove(&id) else {
                continue;
            };
            let was_committed = committed.get(&id).copied().unwrap_or(false);
            let (kind, key) = id;
            match entry {
                Some(row) => state.tables.entry(kind).or_default().put(key, row),
                // A row inserted and deleted by this unit of work never existed.
                None if !was_committed => {}
                None => {
                    if let Some(table) = state.tables.get_mut(&kind) {
                        table.remove(&key);
                    }
                }
            }
        }
        debug!(uow = uow.0, writes, "unit of work committed");
        Ok(())
    }

    fn rollback(&self, uow: UnitOfWork) -> StoreResult<()> {
        let mut state = self.state.write()?;
        state
            .open
            .remove(&uow.0)
            .ok_or(StoreError::UnknownUnitOfWork(uow.0))?;
        debug!(uow = uow.0, "unit of work rolled back");
        Ok(())
    }

    fn insert_row(
        &self,
        uow: UnitOfWork,
        kind: &str,
        key: Option<&Value>,
        row: Row,
    ) -> StoreResult<Value> {
        let mut state = self.state.write()?;
        state.work_mut(uow)?;

        let key = match key {
            Some(key) => {
                if state.visible(Some(uow), kind, key).is_some() {
                    return Err(StoreError::RowExists(kind.to_string(), key.clone()));
                }
                state
                    .tables
                    .entry(kind.to_string())
                    .or_default()
                    .observe_key(key);
                key.clone()
            }
            None => state.tables.entry(kind.to_string()).or_default().next_key(),
        };

        trace!(uow = uow.0, kind, %key, "insert");
        let committed = state.is_committed(kind, &key);
        state
            .work_mut(uow)?
            .record((kind.to_string(), key.clone()), Some(row), committed);
        Ok(key)
    }

    fn update_row(&self, uow: UnitOfWork, kind: &str, key: &Value, row: Row) -> StoreResult<()> {
        let mut state = self.state.write()?;
        state.work_mut(uow)?;
        if state.visible(Some(uow), kind, key).is_none() {
            return Err(StoreError::RowNotFound(kind.to_string(), key.clone()));
        }
        trace!(uow = uow.0, kind, %key, "update");
        let committed = state.is_committed(kind, key);
        state
            .work_mut(uow)?
            .record((kind.to_string(), key.clone()), Some(row), committed);
        Ok(())
    }

    fn delete_row(&self, uow: UnitOfWork, kind: &str, key: &Value) -> StoreResult<()> {
        let mut state = self.state.write()?;
        state.work_mut(uow)?;
        if state.visible(Some(uow), kind, key).is_none() {
            return Err(StoreError::RowNotFound(kind.to_string(), key.clone()));
        }
        trace!(uow = uow.0, kind, %key, "delete");
        let committed = state.is_committed(kind, key);
        state
            .work_mut(uow)?
            .record((kind.to_string(), key.clone()), None, committed);
        Ok(())
    }

    fn select_row(
        &self,
        uow: Option<UnitOfWork>,
        kind: &str,
        key: &Value,
    ) -> StoreResult<Option<Row>> {
        let state = self.state.read()?;
        if let Some(uow) = uow
            && !state.open.contains_key(&uow.0)
        {
            return Err(StoreError::UnknownUnitOfWork(uow.0));
        }
        Ok(state.visible(uow, kind, key))
    }
}
