pub mod error;
pub mod types;
pub mod value;

pub use error::{ErrorKind, PersistenceError, Result, StoreError, StoreResult};
pub use types::{EntityKey, Row};
pub use value::{DataType, Value};
