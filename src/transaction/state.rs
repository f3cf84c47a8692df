// ============================================================================
// Transaction State Management
// ============================================================================
//
// Each entity manager owns at most one transaction at a time. It moves through
//
//   INACTIVE ──begin──> ACTIVE ──commit──> COMMITTING ──ok──> INACTIVE
//                         │                     │
//                         │                     └──failure──> ROLLING_BACK
//                         └──rollback──> INACTIVE                │
//                                                    rollback ───┘──> INACTIVE
//
// ============================================================================

use crate::storage::UnitOfWork;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Global transaction ID counter
static NEXT_TXN_ID: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransactionId(pub u64);

impl TransactionId {
    /// Generate a new unique transaction ID
    pub fn new() -> Self {
        TransactionId(NEXT_TXN_ID.fetch_add(1, Ordering::SeqCst))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for TransactionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TransactionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "txn_{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// No transaction; `begin` is allowed.
    Inactive,

    /// Operations that change managed state are accepted.
    Active,

    /// Flush and store commit in progress.
    Committing,

    /// A commit failed. Only `rollback` (plus clear/detach on the context)
    /// is accepted until the transaction is rolled back.
    RollingBack,
}

impl TransactionState {
    pub fn is_active(&self) -> bool {
        matches!(self, TransactionState::Active)
    }
}

impl std::fmt::Display for TransactionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransactionState::Inactive => write!(f, "INACTIVE"),
            TransactionState::Active => write!(f, "ACTIVE"),
            TransactionState::Committing => write!(f, "COMMITTING"),
            TransactionState::RollingBack => write!(f, "ROLLING_BACK"),
        }
    }
}

/// One unit of work as seen by the entity manager.
#[derive(Debug)]
pub struct Transaction {
    id: TransactionId,

    /// Store-level unit of work every write of this transaction goes through
    unit_of_work: UnitOfWork,

    /// Set once a flush has written to the store before commit
    flushed: bool,

    start_time: Instant,
}

impl Transaction {
    pub fn new(id: TransactionId, unit_of_work: UnitOfWork) -> Self {
        Self {
            id,
            unit_of_work,
            flushed: false,
            start_time: Instant::now(),
        }
    }

    pub fn id(&self) -> TransactionId {
        self.id
    }

    pub fn unit_of_work(&self) -> UnitOfWork {
        self.unit_of_work
    }

    pub fn has_flushed(&self) -> bool {
        self.flushed
    }

    pub(crate) fn mark_flushed(&mut self) {
        self.flushed = true;
    }

    pub fn duration(&self) -> Duration {
        self.start_time.elapsed()
    }

    pub fn is_expired(&self, timeout: Option<Duration>) -> bool {
        timeout.is_some_and(|limit| self.duration() > limit)
    }
}

/// Diagnostics snapshot of the current transaction.
#[derive(Debug, Clone)]
pub struct TransactionInfo {
    pub id: TransactionId,
    pub state: TransactionState,
    pub unit_of_work: UnitOfWork,
    pub flushed: bool,
    pub duration: Duration,
}
