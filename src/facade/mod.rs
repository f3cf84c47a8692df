pub mod entity_manager;
pub mod factory;

pub use entity_manager::EntityManager;
pub use factory::EntityManagerFactory;
