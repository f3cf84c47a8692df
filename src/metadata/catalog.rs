use super::EntityKind;
use crate::core::{PersistenceError, Result};
use std::collections::HashMap;
use std::sync::Arc;

/// Registry of entity kinds known to a persistence unit.
///
/// Immutable once built, so it can be cloned into every entity manager
/// without locking. Adding a kind produces a new catalog (copy-on-write).
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    kinds: Arc<HashMap<String, Arc<EntityKind>>>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a kind, returning the new catalog. The old one is left untouched.
    pub fn with_kind(self, kind: EntityKind) -> Result<Self> {
        kind.validate()?;
        let name = kind.name().to_string();

        if self.kinds.contains_key(&name) {
            return Err(PersistenceError::InvalidMetadata(format!(
                "Entity kind '{}' already registered",
                name
            )));
        }

        let mut kinds = (*self.kinds).clone();
        kinds.insert(name, Arc::new(kind));

        Ok(Self {
            kinds: Arc::new(kinds),
        })
    }

    pub fn get(&self, name: &str) -> Result<&Arc<EntityKind>> {
        self.kinds
            .get(name)
            .ok_or_else(|| PersistenceError::UnknownKind(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.kinds.contains_key(name)
    }

    pub fn kind_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.kinds.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.kinds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }

    /// Checks that every association points at a registered kind.
    pub fn validate(&self) -> Result<()> {
        for kind in self.kinds.values() {
            for association in kind.associations() {
                if !self.kinds.contains_key(&association.target) {
                    return Err(PersistenceError::InvalidMetadata(format!(
                        "Association '{}.{}' targets unknown kind '{}'",
                        kind.name(),
                        association.name,
                        association.target
                    )));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::DataType;
    use crate::metadata::Association;

    #[test]
    fn test_with_kind_is_copy_on_write() {
        let base = Catalog::new()
            .with_kind(EntityKind::new("Country").attribute("code", DataType::Text))
            .unwrap();
        let extended = base
            .clone()
            .with_kind(EntityKind::new("Book").attribute("title", DataType::Text))
            .unwrap();

        assert_eq!(base.len(), 1);
        assert_eq!(extended.kind_names(), vec!["Book", "Country"]);
        assert!(base.get("Book").is_err());
    }

    #[test]
    fn test_duplicate_kind_rejected() {
        let catalog = Catalog::new().with_kind(EntityKind::new("Book")).unwrap();
        assert!(catalog.with_kind(EntityKind::new("Book")).is_err());
    }

    #[test]
    fn test_validate_association_targets() {
        let catalog = Catalog::new()
            .with_kind(
                EntityKind::new("Customer").association(Association::to_one("address", "Address")),
            )
            .unwrap();
        assert!(catalog.validate().is_err());

        let catalog = catalog.with_kind(EntityKind::new("Address")).unwrap();
        assert!(catalog.validate().is_ok());
    }
}
