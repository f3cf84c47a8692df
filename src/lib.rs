// ============================================================================
// ManageDB Library
// ============================================================================
//
// A persistence context for plain entity objects: an identity map per entity
// manager, lifecycle and dirty tracking, cascading persist/remove/refresh/
// detach/merge over declared associations, and transactional flush to a
// pluggable row store.
//
// ============================================================================

pub mod config;
pub mod context;
pub mod core;
pub mod facade;
pub mod metadata;
pub mod storage;
pub mod transaction;
pub mod tutorial;

// Re-export main types for convenience
pub use config::{DetachedPersistPolicy, PersistenceConfig};
pub use context::{EntityHandle, FlushStats, LifecycleOp, LifecycleState};
pub use core::{DataType, EntityKey, ErrorKind, PersistenceError, Result, StoreError, Value};
pub use facade::{EntityManager, EntityManagerFactory};
pub use metadata::{
    Association, Attribute, Cardinality, CascadeOp, CascadeSet, Catalog, EntityKind, KeyStrategy,
};
pub use storage::{InMemoryRowStore, RowStore, SnapshotManager, UnitOfWork};
pub use transaction::{TransactionId, TransactionInfo, TransactionState};
