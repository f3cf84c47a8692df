use crate::core::Value;
use thiserror::Error;

/// Coarse error taxonomy surfaced by the persistence context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    IllegalArgument,
    IllegalState,
    EntityNotFound,
    OptimisticConflict,
    Store,
}

#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("Illegal argument: {0}")]
    IllegalArgument(String),

    #[error("Illegal state: {0}")]
    IllegalState(String),

    #[error("Entity '{kind}' with key {key} not found")]
    EntityNotFound { kind: String, key: Value },

    #[error("Optimistic conflict on '{kind}' {key}: expected version {expected}, found {found}")]
    OptimisticConflict {
        kind: String,
        key: Value,
        expected: Value,
        found: Value,
    },

    #[error("Unknown entity kind '{0}'")]
    UnknownKind(String),

    #[error("Attribute '{0}' not found on entity kind '{1}'")]
    UnknownAttribute(String, String),

    #[error("Invalid metadata: {0}")]
    InvalidMetadata(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl PersistenceError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::IllegalArgument(_)
            | Self::UnknownKind(_)
            | Self::UnknownAttribute(..)
            | Self::InvalidMetadata(_) => ErrorKind::IllegalArgument,
            Self::IllegalState(_) => ErrorKind::IllegalState,
            Self::EntityNotFound { .. } => ErrorKind::EntityNotFound,
            Self::OptimisticConflict { .. } => ErrorKind::OptimisticConflict,
            Self::Store(_) => ErrorKind::Store,
        }
    }

    pub(crate) fn not_found(kind: &str, key: &Value) -> Self {
        Self::EntityNotFound {
            kind: kind.to_string(),
            key: key.clone(),
        }
    }
}

/// Failures reported by a [`RowStore`](crate::storage::RowStore) adapter.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Row '{0}' {1} already exists")]
    RowExists(String, Value),

    #[error("Row '{0}' {1} not found")]
    RowNotFound(String, Value),

    #[error("Unit of work {0} is not open")]
    UnknownUnitOfWork(u64),

    #[error("Unit of work {0} timed out after {1:?}")]
    Timeout(u64, std::time::Duration),

    #[error("Store rejected the operation: {0}")]
    Rejected(String),

    #[error("Lock error: {0}")]
    Lock(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Codec error: {0}")]
    Codec(String),
}

pub type Result<T> = std::result::Result<T, PersistenceError>;

pub type StoreResult<T> = std::result::Result<T, StoreError>;

impl<T> From<std::sync::PoisonError<T>> for StoreError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Self::Lock(err.to_string())
    }
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
