use super::{CascadeOp, CascadeSet};
use crate::core::{DataType, PersistenceError, Result, Value};
use std::collections::HashMap;

/// How the primary key of a kind gets its value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyStrategy {
    /// The application sets the key before `persist`.
    Assigned,
    /// The store hands out the next integer of a per-kind sequence at insert.
    Sequence,
    /// The context assigns a random UUID (as text) at `persist`.
    Uuid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cardinality {
    ToOne,
    ToMany,
}

/// A persistent scalar attribute.
#[derive(Debug, Clone)]
pub struct Attribute {
    pub name: String,
    pub data_type: DataType,
    pub nullable: bool,
}

impl Attribute {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            nullable: true,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    /// Type check performed when the application assigns a value.
    pub fn check_type(&self, value: &Value) -> Result<()> {
        if !self.data_type.is_compatible(value) {
            return Err(PersistenceError::IllegalArgument(format!(
                "Attribute '{}' expects type {}, got {}",
                self.name,
                self.data_type,
                value.type_name()
            )));
        }
        Ok(())
    }

    /// Nullability check performed when a row is written.
    pub fn check_present(&self, value: &Value) -> Result<()> {
        if value.is_null() && !self.nullable {
            return Err(PersistenceError::IllegalArgument(format!(
                "Attribute '{}' cannot be NULL",
                self.name
            )));
        }
        Ok(())
    }
}

/// An association edge from one kind to another.
#[derive(Debug, Clone)]
pub struct Association {
    pub name: String,
    pub target: String,
    pub cardinality: Cardinality,
    pub cascade: CascadeSet,
    pub orphan_removal: bool,
}

impl Association {
    pub fn to_one(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            target: target.into(),
            cardinality: Cardinality::ToOne,
            cascade: CascadeSet::NONE,
            orphan_removal: false,
        }
    }

    pub fn to_many(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            cardinality: Cardinality::ToMany,
            ..Self::to_one(name, target)
        }
    }

    pub fn cascade(mut self, cascade: CascadeSet) -> Self {
        self.cascade = cascade;
        self
    }

    pub fn orphan_removal(mut self) -> Self {
        self.orphan_removal = true;
        self
    }

    /// Whether `op` travels along this edge. Orphan removal implies REMOVE.
    pub fn cascades(&self, op: CascadeOp) -> bool {
        self.cascade.contains(op) || (op == CascadeOp::Remove && self.orphan_removal)
    }
}

/// Metadata describing one persistent type.
///
/// Attribute and association lookups go through name → slot tables built as
/// the descriptor is assembled, so the context never searches by name twice.
#[derive(Debug, Clone)]
pub struct EntityKind {
    name: String,
    key_attribute: String,
    key_strategy: KeyStrategy,
    attributes: Vec<Attribute>,
    associations: Vec<Association>,
    version: Option<usize>,
    attribute_slots: HashMap<String, usize>,
    association_slots: HashMap<String, usize>,
}

impl EntityKind {
    /// New kind keyed by `id` from a store sequence.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            key_attribute: "id".to_string(),
            key_strategy: KeyStrategy::Sequence,
            attributes: Vec::new(),
            associations: Vec::new(),
            version: None,
            attribute_slots: HashMap::new(),
            association_slots: HashMap::new(),
        }
    }

    pub fn key(mut self, name: impl Into<String>, strategy: KeyStrategy) -> Self {
        self.key_attribute = name.into();
        self.key_strategy = strategy;
        self
    }

    pub fn attribute(self, name: impl Into<String>, data_type: DataType) -> Self {
        self.with_attribute(Attribute::new(name, data_type))
    }

    pub fn required_attribute(self, name: impl Into<String>, data_type: DataType) -> Self {
        self.with_attribute(Attribute::new(name, data_type).not_null())
    }

    pub fn with_attribute(mut self, attribute: Attribute) -> Self {
        self.attribute_slots
            .entry(attribute.name.clone())
            .or_insert(self.attributes.len());
        self.attributes.push(attribute);
        self
    }

    /// Adds an integer version attribute used for optimistic checks.
    pub fn version(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        self = self.with_attribute(Attribute::new(name.clone(), DataType::Integer));
        self.version = self.attribute_slots.get(&name).copied();
        self
    }

    pub fn association(mut self, association: Association) -> Self {
        self.association_slots
            .entry(association.name.clone())
            .or_insert(self.associations.len());
        self.associations.push(association);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn key_attribute(&self) -> &str {
        &self.key_attribute
    }

    pub fn key_strategy(&self) -> KeyStrategy {
        self.key_strategy
    }

    pub fn attributes(&self) -> &[Attribute] {
        &self.attributes
    }

    pub fn associations(&self) -> &[Association] {
        &self.associations
    }

    pub fn version_slot(&self) -> Option<usize> {
        self.version
    }

    pub fn attribute_slot(&self, name: &str) -> Result<usize> {
        self.attribute_slots
            .get(name)
            .copied()
            .ok_or_else(|| PersistenceError::UnknownAttribute(name.to_string(), self.name.clone()))
    }

    pub fn association_slot(&self, name: &str) -> Result<usize> {
        self.association_slots
            .get(name)
            .copied()
            .ok_or_else(|| PersistenceError::UnknownAttribute(name.to_string(), self.name.clone()))
    }

    /// Association slots whose cascade set carries `op`.
    pub fn cascading_edges(&self, op: CascadeOp) -> impl Iterator<Item = (usize, &Association)> {
        self.associations
            .iter()
            .enumerate()
            .filter(move |(_, assoc)| assoc.cascades(op))
    }

    /// Number of columns in a stored row: scalars, then one join column per association.
    pub fn column_count(&self) -> usize {
        self.attributes.len() + self.associations.len()
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.attributes
            .iter()
            .map(|a| a.name.as_str())
            .chain(self.associations.iter().map(|a| a.name.as_str()))
            .collect()
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(PersistenceError::InvalidMetadata(
                "Entity kind name cannot be empty".to_string(),
            ));
        }
        if self.attribute_slots.len() != self.attributes.len()
            || self.association_slots.len() != self.associations.len()
        {
            return Err(PersistenceError::InvalidMetadata(format!(
                "Entity kind '{}' declares a member twice",
                self.name
            )));
        }
        for attribute in &self.attributes {
            if attribute.name == self.key_attribute
                || self.association_slots.contains_key(&attribute.name)
            {
                return Err(PersistenceError::InvalidMetadata(format!(
                    "Entity kind '{}' uses '{}' for more than one member",
                    self.name, attribute.name
                )));
            }
        }
        if self.association_slots.contains_key(&self.key_attribute) {
            return Err(PersistenceError::InvalidMetadata(format!(
                "Entity kind '{}' uses key '{}' as an association",
                self.name, self.key_attribute
            )));
        }
        Ok(())
    }
}
