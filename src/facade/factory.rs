use super::EntityManager;
use crate::config::PersistenceConfig;
use crate::core::Result;
use crate::metadata::Catalog;
use crate::storage::{InMemoryRowStore, RowStore};
use std::sync::Arc;
use tracing::info;

/// Creates entity managers that share one catalog, store and configuration.
///
/// Each entity manager has its own persistence context; isolation between
/// them is whatever the store's units of work provide.
#[derive(Clone)]
pub struct EntityManagerFactory {
    catalog: Catalog,
    store: Arc<dyn RowStore>,
    config: PersistenceConfig,
}

impl EntityManagerFactory {
    /// Validates the catalog and builds the factory.
    pub fn new(catalog: Catalog, store: Arc<dyn RowStore>, config: PersistenceConfig) -> Result<Self> {
        catalog.validate()?;
        info!(kinds = catalog.len(), "entity manager factory ready");
        Ok(Self {
            catalog,
            store,
            config,
        })
    }

    /// Factory over a fresh in-memory store with the default configuration.
    pub fn in_memory(catalog: Catalog) -> Result<Self> {
        Self::new(
            catalog,
            Arc::new(InMemoryRowStore::new()),
            PersistenceConfig::default(),
        )
    }

    pub fn create_entity_manager(&self) -> EntityManager {
        EntityManager::new(self.catalog.clone(), self.store.clone(), self.config.clone())
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn store(&self) -> &Arc<dyn RowStore> {
        &self.store
    }

    pub fn config(&self) -> &PersistenceConfig {
        &self.config
    }
}

impl std::fmt::Debug for EntityManagerFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityManagerFactory")
            .field("kinds", &self.catalog.kind_names())
            .field("config", &self.config)
            .finish()
    }
}
