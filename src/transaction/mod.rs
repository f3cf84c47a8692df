// ============================================================================
// Transaction Management Module
// ============================================================================
//
// Resource-local transactions for an entity manager. `begin` opens a
// store-level unit of work, `commit` flushes the persistence context through
// it and commits the store, `rollback` discards it. In-memory entity state is
// never reverted by a rollback.
//
// ============================================================================

pub mod manager;
pub mod state;

pub use manager::TransactionCoordinator;
pub use state::{Transaction, TransactionId, TransactionInfo, TransactionState};
