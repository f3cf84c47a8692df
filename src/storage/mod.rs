pub mod engine;
pub mod memory;
pub mod persistence;
pub mod table;

pub use engine::{RowStore, UnitOfWork};
pub use memory::InMemoryRowStore;
pub use persistence::{SnapshotManager, StoreSnapshot};
pub use table::StoredTable;
