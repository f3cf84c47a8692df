use super::record::{EntityData, EntityHandle, Link};
use crate::core::{PersistenceError, Result, Row, StoreError, Value};
use crate::metadata::{Cardinality, Catalog, EntityKind};
use std::sync::Arc;

/// Join-column content of one association in a loaded row.
#[derive(Debug, Clone)]
pub(crate) enum LoadedLink {
    One(Option<Value>),
    Many(Vec<Value>),
}

/// A stored row split by the kind's column layout, with each association's
/// target kind looked up. Building it touches no context state.
#[derive(Debug, Clone)]
pub(crate) struct LoadedRow {
    pub(crate) values: Row,
    pub(crate) links: Vec<(Arc<EntityKind>, LoadedLink)>,
}

impl LoadedRow {
    pub(crate) fn decode(catalog: &Catalog, kind: &EntityKind, mut row: Row) -> Result<Self> {
        if row.len() != kind.column_count() {
            return Err(StoreError::Codec(format!(
                "Row of '{}' has {} columns, expected {}",
                kind.name(),
                row.len(),
                kind.column_count()
            ))
            .into());
        }

        let joins = row.split_off(kind.attributes().len());
        let mut links = Vec::with_capacity(joins.len());

        for (association, column) in kind.associations().iter().zip(joins) {
            let target = catalog.get(&association.target)?.clone();
            let link = match (association.cardinality, column) {
                (Cardinality::ToOne, Value::Null) => LoadedLink::One(None),
                (Cardinality::ToOne, Value::List(_)) => {
                    return Err(bad_join(kind, &association.name));
                }
                (Cardinality::ToOne, key) => LoadedLink::One(Some(key)),
                (Cardinality::ToMany, Value::Null) => LoadedLink::Many(Vec::new()),
                (Cardinality::ToMany, Value::List(keys)) => LoadedLink::Many(keys),
                (Cardinality::ToMany, _) => {
                    return Err(bad_join(kind, &association.name));
                }
            };
            links.push((target, link));
        }

        Ok(Self { values: row, links })
    }

    /// Turns join keys into handles with `resolve`, which maps a target kind
    /// and key onto the managed (or referenced) endpoint.
    pub(crate) fn attach(
        self,
        mut resolve: impl FnMut(&Arc<EntityKind>, Value) -> EntityHandle,
    ) -> EntityData {
        let links = self
            .links
            .into_iter()
            .map(|(target, link)| match link {
                LoadedLink::One(key) => Link::One(key.map(|k| resolve(&target, k))),
                LoadedLink::Many(keys) => {
                    Link::Many(keys.into_iter().map(|k| resolve(&target, k)).collect())
                }
            })
            .collect();

        EntityData {
            values: self.values,
            links,
        }
    }

    pub(crate) fn version(&self, kind: &EntityKind) -> Value {
        kind.version_slot()
            .and_then(|slot| self.values.get(slot).cloned())
            .unwrap_or(Value::Null)
    }
}

fn bad_join(kind: &EntityKind, association: &str) -> PersistenceError {
    StoreError::Codec(format!(
        "Join column '{}.{}' has the wrong shape",
        kind.name(),
        association
    ))
    .into()
}

/// Writes `data` as a row. `endpoint_key` yields the key to store for an
/// endpoint, or `None` when the endpoint has no row yet; such endpoints are
/// left out of the row and out of the returned written state.
pub(crate) fn encode(
    kind: &EntityKind,
    data: &EntityData,
    mut endpoint_key: impl FnMut(EntityHandle) -> Result<Option<Value>>,
) -> Result<(Row, EntityData)> {
    for (attribute, value) in kind.attributes().iter().zip(&data.values) {
        attribute.check_present(value)?;
    }

    let mut row = data.values.clone();
    let mut written = Vec::with_capacity(data.links.len());

    for link in &data.links {
        match link {
            Link::One(None) => {
                row.push(Value::Null);
                written.push(Link::One(None));
            }
            Link::One(Some(endpoint)) => match endpoint_key(*endpoint)? {
                Some(key) => {
                    row.push(key);
                    written.push(Link::One(Some(*endpoint)));
                }
                None => {
                    row.push(Value::Null);
                    written.push(Link::One(None));
                }
            },
            Link::Many(members) => {
                let mut keys = Vec::with_capacity(members.len());
                let mut kept = Vec::with_capacity(members.len());
                for member in members {
                    if let Some(key) = endpoint_key(*member)? {
                        keys.push(key);
                        kept.push(*member);
                    }
                }
                row.push(Value::List(keys));
                written.push(Link::Many(kept));
            }
        }
    }

    Ok((
        row,
        EntityData {
            values: data.values.clone(),
            links: written,
        },
    ))
}
