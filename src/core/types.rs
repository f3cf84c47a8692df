use super::Value;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Column values of one stored entity, laid out by its kind's column layout.
pub type Row = Vec<Value>;

/// Identity of a persistent entity: its kind name plus primary key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityKey {
    pub kind: String,
    pub key: Value,
}

impl EntityKey {
    pub fn new(kind: impl Into<String>, key: impl Into<Value>) -> Self {
        Self {
            kind: kind.into(),
            key: key.into(),
        }
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.kind, self.key)
    }
}
