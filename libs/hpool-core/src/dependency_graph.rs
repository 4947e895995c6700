//! Include graph over pools, rooted at the pool being updated.

use crate::manager::PoolManager;
use crate::pool_info::PoolInfo;
use crate::{CoreError, Result};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct PoolDependencyNode {
    pub info: PoolInfo,
    /// Included pools in declaration order, resolvable or not.
    pub dependencies: Vec<Uuid>,
}

#[derive(Debug, Clone)]
pub struct PoolDependencyGraph {
    root_uuid: Uuid,
    nodes: BTreeMap<Uuid, PoolDependencyNode>,
    not_found: BTreeSet<Uuid>,
}

impl PoolDependencyGraph {
    pub fn new(root: &PoolInfo, manager: &PoolManager) -> Self {
        let mut graph = Self {
            root_uuid: root.uuid,
            nodes: BTreeMap::new(),
            not_found: BTreeSet::new(),
        };
        graph.add_pool(root.clone(), manager);
        graph
    }

    fn add_pool(&mut self, info: PoolInfo, manager: &PoolManager) {
        if self.nodes.contains_key(&info.uuid) {
            return;
        }
        let uuid = info.uuid;
        let dependencies = info.pools_included.clone();
        self.nodes.insert(
            uuid,
            PoolDependencyNode {
                info,
                dependencies: dependencies.clone(),
            },
        );
        for dep in dependencies {
            if self.nodes.contains_key(&dep) {
                continue;
            }
            match manager.get_by_uuid(dep) {
                Some(pool) => self.add_pool(pool.info, manager),
                None => {
                    debug!("Included pool {} not found", dep);
                    self.not_found.insert(dep);
                }
            }
        }
    }

    pub fn root(&self) -> Option<&PoolDependencyNode> {
        self.nodes.get(&self.root_uuid)
    }

    pub fn get(&self, uuid: Uuid) -> Option<&PoolDependencyNode> {
        self.nodes.get(&uuid)
    }

    pub fn get_not_found(&self) -> &BTreeSet<Uuid> {
        &self.not_found
    }

    /// Pools ordered so each one comes after every pool it includes; the root
    /// is last. Included pools are visited in declaration order.
    pub fn get_sorted(&self) -> Result<Vec<&PoolInfo>> {
        let mut sorted = Vec::with_capacity(self.nodes.len());
        let mut done = BTreeSet::new();
        let mut stack = Vec::new();
        self.visit(self.root_uuid, &mut done, &mut stack, &mut sorted)?;
        Ok(sorted)
    }

    fn visit<'a>(
        &'a self,
        uuid: Uuid,
        done: &mut BTreeSet<Uuid>,
        stack: &mut Vec<Uuid>,
        sorted: &mut Vec<&'a PoolInfo>,
    ) -> Result<()> {
        if done.contains(&uuid) {
            return Ok(());
        }
        if let Some(pos) = stack.iter().position(|u| *u == uuid) {
            let mut cycle = stack[pos..].to_vec();
            cycle.push(uuid);
            return Err(CoreError::PoolCycle(cycle));
        }
        let Some(node) = self.nodes.get(&uuid) else {
            return Ok(());
        };
        stack.push(uuid);
        for dep in &node.dependencies {
            self.visit(*dep, done, stack, sorted)?;
        }
        stack.pop();
        done.insert(uuid);
        sorted.push(&node.info);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manager::write_pool_json;
    use pretty_assertions::assert_eq;
    use std::path::Path;
    use tempfile::TempDir;

    fn uu(n: u128) -> Uuid {
        Uuid::from_u128(n)
    }

    fn register(mgr: &PoolManager, root: &Path, n: u128, included: &[u128]) -> PoolInfo {
        let bp = root.join(format!("pool{}", n));
        let included: Vec<Uuid> = included.iter().map(|i| uu(*i)).collect();
        write_pool_json(&bp, uu(n), &format!("pool{}", n), &included).unwrap();
        mgr.add_pool(&bp).unwrap();
        PoolInfo::load(&bp.canonicalize().unwrap()).unwrap()
    }

    fn sorted_uuids(graph: &PoolDependencyGraph) -> Vec<Uuid> {
        graph.get_sorted().unwrap().iter().map(|p| p.uuid).collect()
    }

    #[test]
    fn test_diamond_is_ordered() {
        let dir = TempDir::new().unwrap();
        let mgr = PoolManager::new(dir.path().join("cfg"));
        register(&mgr, dir.path(), 4, &[]);
        register(&mgr, dir.path(), 2, &[4]);
        register(&mgr, dir.path(), 3, &[4]);
        let root = register(&mgr, dir.path(), 1, &[2, 3]);

        let graph = PoolDependencyGraph::new(&root, &mgr);
        assert_eq!(sorted_uuids(&graph), vec![uu(4), uu(2), uu(3), uu(1)]);
        assert!(graph.get_not_found().is_empty());
    }

    #[test]
    fn test_every_pool_after_its_includes() {
        let dir = TempDir::new().unwrap();
        let mgr = PoolManager::new(dir.path().join("cfg"));
        register(&mgr, dir.path(), 6, &[]);
        register(&mgr, dir.path(), 5, &[6]);
        register(&mgr, dir.path(), 4, &[5]);
        register(&mgr, dir.path(), 3, &[6]);
        register(&mgr, dir.path(), 2, &[3, 4]);
        let root = register(&mgr, dir.path(), 1, &[4, 2]);

        let graph = PoolDependencyGraph::new(&root, &mgr);
        let order = sorted_uuids(&graph);
        assert_eq!(order.len(), 6);
        assert_eq!(*order.last().unwrap(), uu(1));
        let pos = |u: Uuid| order.iter().position(|x| *x == u).unwrap();
        for uuid in &order {
            for dep in &graph.get(*uuid).unwrap().dependencies {
                assert!(pos(*dep) < pos(*uuid));
            }
        }
    }

    #[test]
    fn test_missing_pool_reported() {
        let dir = TempDir::new().unwrap();
        let mgr = PoolManager::new(dir.path().join("cfg"));
        register(&mgr, dir.path(), 2, &[]);
        let root = register(&mgr, dir.path(), 1, &[99, 2]);

        let graph = PoolDependencyGraph::new(&root, &mgr);
        assert!(graph.get_not_found().contains(&uu(99)));
        assert_eq!(sorted_uuids(&graph), vec![uu(2), uu(1)]);
    }

    #[test]
    fn test_disabled_pool_is_not_found() {
        let dir = TempDir::new().unwrap();
        let mgr = PoolManager::new(dir.path().join("cfg"));
        let two = register(&mgr, dir.path(), 2, &[]);
        let root = register(&mgr, dir.path(), 1, &[2]);
        mgr.set_pool_enabled(&two.base_path, false).unwrap();

        let graph = PoolDependencyGraph::new(&root, &mgr);
        assert!(graph.get_not_found().contains(&uu(2)));
        assert_eq!(sorted_uuids(&graph), vec![uu(1)]);
    }

    #[test]
    fn test_cycle_is_rejected() {
        let dir = TempDir::new().unwrap();
        let mgr = PoolManager::new(dir.path().join("cfg"));
        register(&mgr, dir.path(), 3, &[2]);
        register(&mgr, dir.path(), 2, &[3]);
        let root = register(&mgr, dir.path(), 1, &[2]);

        let graph = PoolDependencyGraph::new(&root, &mgr);
        match graph.get_sorted() {
            Err(CoreError::PoolCycle(cycle)) => {
                assert_eq!(cycle, vec![uu(2), uu(3), uu(2)]);
            }
            other => panic!("expected cycle, got {:?}", other.map(|v| v.len())),
        }
    }

    #[test]
    fn test_unregistered_root() {
        let dir = TempDir::new().unwrap();
        let mgr = PoolManager::new(dir.path().join("cfg"));
        let root = PoolInfo::new(dir.path().to_path_buf(), uu(1), "loose");
        let graph = PoolDependencyGraph::new(&root, &mgr);
        assert_eq!(sorted_uuids(&graph), vec![uu(1)]);
    }
}
