//! Ordering of items inside one category so referenced items (a part's base,
//! a package's `alternate_for`) are written before the items referencing them.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct UpdateNode {
    pub uuid: Uuid,
    pub filename: PathBuf,
    pub dependencies: BTreeSet<Uuid>,
}

#[derive(Debug, Default)]
pub struct PoolUpdateGraph {
    nodes: BTreeMap<Uuid, UpdateNode>,
}

/// Result of walking the graph.
#[derive(Debug, Default)]
pub struct Visit<'a> {
    pub order: Vec<&'a UpdateNode>,
    pub not_visited: Vec<&'a UpdateNode>,
}

impl PoolUpdateGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the filename already registered for `uuid` on a clash.
    pub fn add_node(
        &mut self,
        uuid: Uuid,
        filename: PathBuf,
        dependencies: impl IntoIterator<Item = Uuid>,
    ) -> Result<(), PathBuf> {
        if let Some(existing) = self.nodes.get(&uuid) {
            return Err(existing.filename.clone());
        }
        let dependencies = dependencies.into_iter().filter(|d| !d.is_nil() && *d != uuid).collect();
        self.nodes.insert(
            uuid,
            UpdateNode {
                uuid,
                filename,
                dependencies,
            },
        );
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Dependencies that no node in the graph provides.
    pub fn external_dependencies(&self) -> BTreeSet<Uuid> {
        self.nodes
            .values()
            .flat_map(|n| n.dependencies.iter())
            .filter(|d| !self.nodes.contains_key(d))
            .copied()
            .collect()
    }

    /// Topological walk. A node is emitted once all its dependencies were
    /// emitted or are in `satisfied`. Nodes that never become ready (cycles,
    /// or depending on something unsatisfied) end up in `not_visited`.
    pub fn visit(&self, satisfied: &BTreeSet<Uuid>) -> Visit<'_> {
        let mut done: BTreeSet<Uuid> = BTreeSet::new();
        let mut order = Vec::with_capacity(self.nodes.len());
        loop {
            let ready: Vec<&UpdateNode> = self
                .nodes
                .values()
                .filter(|n| !done.contains(&n.uuid))
                .filter(|n| {
                    n.dependencies
                        .iter()
                        .all(|d| done.contains(d) || (satisfied.contains(d) && !self.nodes.contains_key(d)))
                })
                .collect();
            if ready.is_empty() {
                break;
            }
            for node in ready {
                done.insert(node.uuid);
                order.push(node);
            }
        }
        let not_visited = self
            .nodes
            .values()
            .filter(|n| !done.contains(&n.uuid))
            .collect();
        Visit { order, not_visited }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn uu(n: u128) -> Uuid {
        Uuid::from_u128(n)
    }

    fn uuids(nodes: &[&UpdateNode]) -> Vec<Uuid> {
        nodes.iter().map(|n| n.uuid).collect()
    }

    #[test]
    fn test_chain_is_ordered() {
        let mut g = PoolUpdateGraph::new();
        g.add_node(uu(3), "3".into(), [uu(2)]).unwrap();
        g.add_node(uu(2), "2".into(), [uu(1)]).unwrap();
        g.add_node(uu(1), "1".into(), [Uuid::nil()]).unwrap();
        let v = g.visit(&BTreeSet::new());
        assert_eq!(uuids(&v.order), vec![uu(1), uu(2), uu(3)]);
        assert!(v.not_visited.is_empty());
    }

    #[test]
    fn test_duplicate_rejected() {
        let mut g = PoolUpdateGraph::new();
        g.add_node(uu(1), "a".into(), []).unwrap();
        assert_eq!(g.add_node(uu(1), "b".into(), []), Err(PathBuf::from("a")));
        assert_eq!(g.len(), 1);
    }

    #[test]
    fn test_external_and_cycles() {
        let mut g = PoolUpdateGraph::new();
        g.add_node(uu(1), "1".into(), [uu(10)]).unwrap();
        g.add_node(uu(2), "2".into(), [uu(11)]).unwrap();
        g.add_node(uu(3), "3".into(), [uu(4)]).unwrap();
        g.add_node(uu(4), "4".into(), [uu(3)]).unwrap();
        assert_eq!(g.external_dependencies(), [uu(10), uu(11)].into_iter().collect());

        let satisfied = [uu(10)].into_iter().collect();
        let v = g.visit(&satisfied);
        assert_eq!(uuids(&v.order), vec![uu(1)]);
        assert_eq!(uuids(&v.not_visited), vec![uu(2), uu(3), uu(4)]);
    }
}
