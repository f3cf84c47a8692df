use crate::core::{Row, StoreResult, Value};
use std::fmt;

/// Handle of a store-level unit of work opened by [`RowStore::begin`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UnitOfWork(pub u64);

impl fmt::Display for UnitOfWork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "uow_{}", self.0)
    }
}

/// Durable store contract consumed by the persistence context.
///
/// Rows are addressed by entity kind name plus primary key only; no querying
/// beyond key lookup is required. Writes go through a unit of work and become
/// visible to other readers at [`commit`](RowStore::commit). Methods take
/// `&self` so a single store can back several entity managers.
pub trait RowStore: Send + Sync {
    /// Open a unit of work.
    fn begin(&self) -> StoreResult<UnitOfWork>;

    /// Make every write of the unit of work durable and visible.
    fn commit(&self, uow: UnitOfWork) -> StoreResult<()>;

    /// Discard every write of the unit of work.
    fn rollback(&self, uow: UnitOfWork) -> StoreResult<()>;

    /// Insert a row. With `key == None` the store generates the key.
    /// Returns the key the row was stored under.
    fn insert_row(
        &self,
        uow: UnitOfWork,
        kind: &str,
        key: Option<&Value>,
        row: Row,
    ) -> StoreResult<Value>;

    /// Replace the row stored under `key`.
    fn update_row(&self, uow: UnitOfWork, kind: &str, key: &Value, row: Row) -> StoreResult<()>;

    /// Delete the row stored under `key`.
    fn delete_row(&self, uow: UnitOfWork, kind: &str, key: &Value) -> StoreResult<()>;

    /// Look a row up by key. Inside a unit of work its own writes are visible;
    /// without one only committed rows are.
    fn select_row(
        &self,
        uow: Option<UnitOfWork>,
        kind: &str,
        key: &Value,
    ) -> StoreResult<Option<Row>>;
}
