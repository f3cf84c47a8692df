use super::record::{EntityHandle, EntityRecord};
use crate::core::Result;
use crate::metadata::CascadeOp;
use std::collections::HashSet;

/// Endpoints reached from `record` over edges that carry `op`.
///
/// Unresolved references have no known endpoints and yield nothing.
pub(crate) fn cascading_endpoints(record: &EntityRecord, op: CascadeOp) -> Vec<EntityHandle> {
    let Some(data) = record.data() else {
        return Vec::new();
    };
    record
        .kind
        .cascading_edges(op)
        .flat_map(|(slot, _)| data.links[slot].endpoints())
        .collect()
}

/// Depth-first walk from `root` with an explicit visited set.
///
/// `next` returns the objects to continue with from a visited object; each
/// object is reported once, root first, in pre-order. Cycles terminate.
pub(crate) fn traverse<F>(root: EntityHandle, mut next: F) -> Result<Vec<EntityHandle>>
where
    F: FnMut(EntityHandle) -> Result<Vec<EntityHandle>>,
{
    let mut visited = HashSet::new();
    let mut order = Vec::new();
    let mut stack = vec![root];

    while let Some(handle) = stack.pop() {
        if !visited.insert(handle) {
            continue;
        }
        order.push(handle);
        let successors = next(handle)?;
        stack.extend(successors.into_iter().rev());
    }

    Ok(order)
}

/// Post-order over `nodes` so that each object follows the objects it
/// depends on. Dependencies outside `nodes` are ignored; on a cycle the
/// object that closes it is emitted before its dependency.
pub(crate) fn dependency_order<F>(nodes: &[EntityHandle], mut depends_on: F) -> Vec<EntityHandle>
where
    F: FnMut(EntityHandle) -> Vec<EntityHandle>,
{
    let members: HashSet<EntityHandle> = nodes.iter().copied().collect();
    let mut seen = HashSet::new();
    let mut order = Vec::with_capacity(nodes.len());

    for &start in nodes {
        if seen.contains(&start) {
            continue;
        }
        let mut stack = vec![(start, false)];
        while let Some((handle, expanded)) = stack.pop() {
            if expanded {
                order.push(handle);
                continue;
            }
            if !seen.insert(handle) {
                continue;
            }
            stack.push((handle, true));
            for dependency in depends_on(handle).into_iter().rev() {
                if members.contains(&dependency) && !seen.contains(&dependency) {
                    stack.push((dependency, false));
                }
            }
        }
    }

    order
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::record::{Arena, Link};
    use crate::metadata::{Association, CascadeSet, EntityKind};
    use std::sync::Arc;

    fn node_kind() -> Arc<EntityKind> {
        Arc::new(
            EntityKind::new("Node")
                .association(Association::to_one("next", "Node").cascade(CascadeSet::ALL))
                .association(Association::to_many("others", "Node")),
        )
    }

    fn chain(arena: &mut Arena, len: usize) -> Vec<EntityHandle> {
        let kind = node_kind();
        (0..len)
            .map(|_| arena.insert(EntityRecord::new(kind.clone())))
            .collect()
    }

    fn link_next(arena: &mut Arena, from: EntityHandle, to: EntityHandle) {
        let data = arena.get_mut(from).unwrap().data_mut().unwrap();
        data.links[0] = Link::One(Some(to));
    }

    #[test]
    fn test_traverse_terminates_on_cycle() {
        let mut arena = Arena::default();
        let hs = chain(&mut arena, 3);
        link_next(&mut arena, hs[0], hs[1]);
        link_next(&mut arena, hs[1], hs[2]);
        link_next(&mut arena, hs[2], hs[0]);

        let order = traverse(hs[0], |h| {
            Ok(cascading_endpoints(arena.get(h)?, CascadeOp::Persist))
        })
        .unwrap();
        assert_eq!(order, hs);
    }

    #[test]
    fn test_non_cascading_edges_are_not_followed() {
        let mut arena = Arena::default();
        let hs = chain(&mut arena, 2);
        arena.get_mut(hs[0]).unwrap().data_mut().unwrap().links[1] = Link::Many(vec![hs[1]]);

        let order = traverse(hs[0], |h| {
            Ok(cascading_endpoints(arena.get(h)?, CascadeOp::Remove))
        })
        .unwrap();
        assert_eq!(order, vec![hs[0]]);
    }

    #[test]
    fn test_dependency_order_puts_endpoints_first() {
        let mut arena = Arena::default();
        let hs = chain(&mut arena, 3);
        link_next(&mut arena, hs[0], hs[1]);
        link_next(&mut arena, hs[1], hs[2]);

        let order = dependency_order(&hs, |h| arena.get(h).unwrap().data().unwrap().endpoints());
        assert_eq!(order, vec![hs[2], hs[1], hs[0]]);
    }

    #[test]
    fn test_dependency_order_with_cycle_keeps_everything() {
        let mut arena = Arena::default();
        let hs = chain(&mut arena, 2);
        link_next(&mut arena, hs[0], hs[1]);
        link_next(&mut arena, hs[1], hs[0]);

        let order = dependency_order(&hs, |h| arena.get(h).unwrap().data().unwrap().endpoints());
        assert_eq!(order, vec![hs[1], hs[0]]);
    }
}
