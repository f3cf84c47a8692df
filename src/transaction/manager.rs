// ============================================================================
// Transaction Coordinator
// ============================================================================

use super::{Transaction, TransactionId, TransactionInfo, TransactionState};
use crate::core::{PersistenceError, Result, StoreError};
use crate::storage::RowStore;
use std::time::Duration;
use tracing::{debug, warn};

/// Drives begin/commit/rollback of the single transaction an entity manager
/// may have open. The flush itself belongs to the persistence context and is
/// handed in by the caller at commit.
#[derive(Debug)]
pub struct TransactionCoordinator {
    state: TransactionState,
    current: Option<Transaction>,
    timeout: Option<Duration>,
}

impl TransactionCoordinator {
    pub fn new(timeout: Option<Duration>) -> Self {
        Self {
            state: TransactionState::Inactive,
            current: None,
            timeout,
        }
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state.is_active()
    }

    pub fn begin(&mut self, store: &dyn RowStore) -> Result<TransactionId> {
        if self.state != TransactionState::Inactive {
            return Err(PersistenceError::IllegalState(format!(
                "Cannot begin: transaction is {}",
                self.state
            )));
        }

        let unit_of_work = store.begin()?;
        let transaction = Transaction::new(TransactionId::new(), unit_of_work);
        let id = transaction.id();
        debug!(txn = %id, uow = %unit_of_work, "transaction begun");

        self.current = Some(transaction);
        self.state = TransactionState::Active;
        Ok(id)
    }

    /// The active transaction, or `IllegalState` naming `operation`.
    pub fn require_active(&self, operation: &str) -> Result<&Transaction> {
        match (&self.current, self.state) {
            (Some(txn), TransactionState::Active) => Ok(txn),
            _ => Err(PersistenceError::IllegalState(format!(
                "{} requires an active transaction (transaction is {})",
                operation, self.state
            ))),
        }
    }

    pub(crate) fn require_active_mut(&mut self, operation: &str) -> Result<&mut Transaction> {
        let state = self.state;
        match (&mut self.current, state) {
            (Some(txn), TransactionState::Active) => Ok(txn),
            _ => Err(PersistenceError::IllegalState(format!(
                "{} requires an active transaction (transaction is {})",
                operation, state
            ))),
        }
    }

    /// The transaction in whichever state, for reads that may join it.
    pub fn current(&self) -> Option<&Transaction> {
        match self.state {
            TransactionState::Active | TransactionState::Committing => self.current.as_ref(),
            _ => None,
        }
    }

    /// Commit the active transaction.
    ///
    /// `flush` receives the transaction and must write every pending change
    /// through its unit of work. Its output is returned only when the store
    /// commit succeeded as well; on any failure the unit of work is rolled
    /// back and the coordinator stays in `RollingBack`.
    pub fn commit<T>(
        &mut self,
        store: &dyn RowStore,
        flush: impl FnOnce(&Transaction) -> Result<T>,
    ) -> Result<T> {
        self.require_active("commit")?;
        self.state = TransactionState::Committing;

        let Some(txn) = self.current.as_ref() else {
            return Err(PersistenceError::IllegalState(
                "commit without a transaction".to_string(),
            ));
        };
        let uow = txn.unit_of_work();

        let outcome = if txn.is_expired(self.timeout) {
            Err(StoreError::Timeout(uow.0, txn.duration()).into())
        } else {
            flush(txn).and_then(|value| {
                store.commit(uow)?;
                Ok(value)
            })
        };

        match outcome {
            Ok(value) => {
                debug!(txn = %txn.id(), "transaction committed");
                self.current = None;
                self.state = TransactionState::Inactive;
                Ok(value)
            }
            Err(err) => {
                warn!(txn = %txn.id(), error = %err, "commit failed, rolling back");
                if let Err(rollback_err) = store.rollback(uow) {
                    debug!(error = %rollback_err, "store rollback after failed commit");
                }
                self.state = TransactionState::RollingBack;
                Err(err)
            }
        }
    }

    /// Fails the active transaction after an error outside `commit`: the
    /// unit of work is discarded and only `rollback` is accepted afterwards.
    pub(crate) fn abort(&mut self, store: &dyn RowStore) {
        if self.state != TransactionState::Active {
            return;
        }
        if let Some(txn) = self.current.as_ref() {
            warn!(txn = %txn.id(), "transaction marked for rollback");
            if let Err(err) = store.rollback(txn.unit_of_work()) {
                debug!(error = %err, "store rollback after failed flush");
            }
        }
        self.state = TransactionState::RollingBack;
    }

    /// Roll back the current transaction. Returns whether the transaction
    /// had already flushed changes to the store.
    pub fn rollback(&mut self, store: &dyn RowStore) -> Result<bool> {
        match self.state {
            TransactionState::Active => {
                let txn = self.current.take().ok_or_else(|| {
                    PersistenceError::IllegalState("rollback without a transaction".to_string())
                })?;
                self.state = TransactionState::Inactive;
                store.rollback(txn.unit_of_work())?;
                debug!(txn = %txn.id(), "transaction rolled back");
                Ok(txn.has_flushed())
            }
            TransactionState::RollingBack => {
                let flushed = self
                    .current
                    .take()
                    .map(|txn| txn.has_flushed())
                    .unwrap_or(false);
                self.state = TransactionState::Inactive;
                Ok(flushed)
            }
            state => Err(PersistenceError::IllegalState(format!(
                "Cannot rollback: transaction is {}",
                state
            ))),
        }
    }

    pub fn info(&self) -> Option<TransactionInfo> {
        self.current.as_ref().map(|txn| TransactionInfo {
            id: txn.id(),
            state: self.state,
            unit_of_work: txn.unit_of_work(),
            flushed: txn.has_flushed(),
            duration: txn.duration(),
        })
    }
}
