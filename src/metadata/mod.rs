// ============================================================================
// Entity Metadata
// ============================================================================
//
// Entity kinds are supplied to the persistence unit up front. Nothing here is
// discovered reflectively: callers describe each kind with the builders in
// `kind`, register them in a `Catalog`, and the context reads slot tables
// from the descriptors at runtime.
//
// ============================================================================

pub mod cascade;
pub mod catalog;
pub mod kind;

pub use cascade::{CascadeOp, CascadeSet};
pub use catalog::Catalog;
pub use kind::{Association, Attribute, Cardinality, EntityKind, KeyStrategy};
