//! Per-collection dependency graph and execution-order resolution.
//!
//! Every resource collection (sources, conditions, targets) resolves its own
//! graph: a synthetic root vertex connects to every node so the structure is
//! connected even without any declared dependency, one edge is added per
//! `dependson` reference, and the final order is the deterministic
//! topological walk after transitive reduction — dependencies always run
//! before their dependents.

use std::collections::{BTreeMap, BTreeSet};

/// Synthetic vertex every node is attached to.
pub const ROOT_VERTEX: &str = "root";

/// Errors raised while resolving a collection's dependency graph.
///
/// Both are configuration errors: they abort the owning pipeline but never
/// the engine run.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GraphError {
    /// A `dependson` entry references an identifier absent from the
    /// collection.
    #[error("no valid dependson value: {reference:?} referenced by {node:?} does not exist")]
    InvalidDependsOn { node: String, reference: String },

    /// A `dependson` entry would close a dependency cycle.
    #[error("dependency cycle detected between {node:?} and {reference:?}")]
    CycleDetected { node: String, reference: String },

    /// A node uses the reserved root identifier.
    #[error("resource identifier {0:?} is reserved")]
    ReservedIdentifier(String),
}

/// Directed acyclic graph over stage identifiers.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    nodes: BTreeSet<String>,
    /// `dependency -> {dependent, ...}`
    downstream: BTreeMap<String, BTreeSet<String>>,
    /// `dependent -> {dependency, ...}`
    upstream: BTreeMap<String, BTreeSet<String>>,
}

impl DependencyGraph {
    /// Create a graph holding only the root vertex.
    pub fn new() -> Self {
        let mut graph = Self::default();
        graph.nodes.insert(ROOT_VERTEX.to_string());
        graph
    }

    /// Register a node and attach it to the root vertex.
    pub fn add_node(&mut self, id: &str) -> Result<(), GraphError> {
        if id == ROOT_VERTEX {
            return Err(GraphError::ReservedIdentifier(id.to_string()));
        }
        self.nodes.insert(id.to_string());
        self.insert_edge(ROOT_VERTEX, id);
        Ok(())
    }

    /// Declare that `dependent` depends on `dependency`.
    ///
    /// Fails with [`GraphError::InvalidDependsOn`] when the dependency is
    /// unknown (exact match, no prefix matching) and with
    /// [`GraphError::CycleDetected`] when the edge would close a loop.
    pub fn add_dependency(&mut self, dependent: &str, dependency: &str) -> Result<(), GraphError> {
        if !self.nodes.contains(dependency) || dependency == ROOT_VERTEX {
            return Err(GraphError::InvalidDependsOn {
                node: dependent.to_string(),
                reference: dependency.to_string(),
            });
        }

        // The edge dependency -> dependent closes a loop exactly when the
        // dependency is already reachable from the dependent.
        if self.is_reachable(dependent, dependency) {
            return Err(GraphError::CycleDetected {
                node: dependent.to_string(),
                reference: dependency.to_string(),
            });
        }

        self.insert_edge(dependency, dependent);
        Ok(())
    }

    fn insert_edge(&mut self, dependency: &str, dependent: &str) {
        self.downstream
            .entry(dependency.to_string())
            .or_default()
            .insert(dependent.to_string());
        self.upstream
            .entry(dependent.to_string())
            .or_default()
            .insert(dependency.to_string());
    }

    fn remove_edge(&mut self, dependency: &str, dependent: &str) {
        if let Some(set) = self.downstream.get_mut(dependency) {
            set.remove(dependent);
        }
        if let Some(set) = self.upstream.get_mut(dependent) {
            set.remove(dependency);
        }
    }

    /// DFS over downstream edges, including `from == to`.
    fn is_reachable(&self, from: &str, to: &str) -> bool {
        if from == to {
            return true;
        }
        let mut stack = vec![from];
        let mut visited: BTreeSet<&str> = BTreeSet::new();
        while let Some(current) = stack.pop() {
            if !visited.insert(current) {
                continue;
            }
            if let Some(next) = self.downstream.get(current) {
                for n in next {
                    if n == to {
                        return true;
                    }
                    stack.push(n);
                }
            }
        }
        false
    }

    /// Drop every edge implied by a longer path so the walk order only
    /// reflects direct dependencies.
    pub fn reduce_transitively(&mut self) {
        let edges: Vec<(String, String)> = self
            .downstream
            .iter()
            .flat_map(|(dep, dependents)| {
                dependents
                    .iter()
                    .map(move |d| (dep.clone(), d.clone()))
            })
            .collect();

        for (dependency, dependent) in edges {
            self.remove_edge(&dependency, &dependent);
            if !self.is_reachable(&dependency, &dependent) {
                self.insert_edge(&dependency, &dependent);
            }
        }
    }

    /// Topological walk from the root, lexicographic within a wave.
    ///
    /// The root vertex itself is excluded from the returned order.
    pub fn walk_order(&self) -> Vec<String> {
        let mut in_degree: BTreeMap<&str, usize> = self
            .nodes
            .iter()
            .map(|id| (id.as_str(), self.upstream.get(id).map_or(0, |u| u.len())))
            .collect();

        let mut ready: BTreeSet<&str> = in_degree
            .iter()
            .filter(|&(_, deg)| *deg == 0)
            .map(|(&id, _)| id)
            .collect();

        let mut order = Vec::with_capacity(self.nodes.len());
        while let Some(id) = ready.pop_first() {
            if id != ROOT_VERTEX {
                order.push(id.to_string());
            }
            if let Some(dependents) = self.downstream.get(id) {
                for dependent in dependents {
                    let deg = in_degree.entry(dependent.as_str()).or_default();
                    *deg = deg.saturating_sub(1);
                    if *deg == 0 {
                        ready.insert(dependent.as_str());
                    }
                }
            }
        }
        order
    }

    /// Build the execution order for one collection.
    ///
    /// `nodes` maps each identifier to the identifiers it depends on within
    /// the same collection. An empty collection yields an empty order.
    pub fn resolve(nodes: &BTreeMap<String, Vec<String>>) -> Result<Vec<String>, GraphError> {
        if nodes.is_empty() {
            return Ok(Vec::new());
        }

        let mut graph = DependencyGraph::new();
        for id in nodes.keys() {
            graph.add_node(id)?;
        }
        for (id, deps) in nodes {
            for dep in deps {
                graph.add_dependency(id, dep)?;
            }
        }
        graph.reduce_transitively();
        Ok(graph.walk_order())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nodes(entries: &[(&str, &[&str])]) -> BTreeMap<String, Vec<String>> {
        entries
            .iter()
            .map(|(id, deps)| {
                (
                    id.to_string(),
                    deps.iter().map(|d| d.to_string()).collect(),
                )
            })
            .collect()
    }

    fn position(order: &[String], id: &str) -> usize {
        order.iter().position(|x| x == id).unwrap()
    }

    #[test]
    fn test_chain_resolves_dependencies_first() {
        // 1 depends on 2, 2 depends on 3 -> run 3, 2, 1
        let order =
            DependencyGraph::resolve(&nodes(&[("1", &["2"]), ("2", &["3"]), ("3", &[])])).unwrap();
        assert_eq!(order, vec!["3", "2", "1"]);
    }

    #[test]
    fn test_diamond_is_a_valid_topological_order() {
        let order = DependencyGraph::resolve(&nodes(&[
            ("d", &["b", "c"]),
            ("b", &["a"]),
            ("c", &["a"]),
            ("a", &[]),
        ]))
        .unwrap();
        assert_eq!(order.len(), 4);
        assert!(position(&order, "a") < position(&order, "b"));
        assert!(position(&order, "a") < position(&order, "c"));
        assert!(position(&order, "b") < position(&order, "d"));
        assert!(position(&order, "c") < position(&order, "d"));
    }

    #[test]
    fn test_independent_nodes_order_is_deterministic() {
        let order =
            DependencyGraph::resolve(&nodes(&[("zeta", &[]), ("alpha", &[]), ("mid", &[])]))
                .unwrap();
        assert_eq!(order, vec!["alpha", "mid", "zeta"]);
    }

    #[test]
    fn test_empty_collection_yields_empty_order() {
        let order = DependencyGraph::resolve(&BTreeMap::new()).unwrap();
        assert!(order.is_empty());
    }

    #[test]
    fn test_unknown_reference_is_a_hard_error() {
        let err = DependencyGraph::resolve(&nodes(&[("a", &["ghost"])])).unwrap_err();
        assert_eq!(
            err,
            GraphError::InvalidDependsOn {
                node: "a".to_string(),
                reference: "ghost".to_string(),
            }
        );
    }

    #[test]
    fn test_two_node_cycle_is_rejected() {
        let err = DependencyGraph::resolve(&nodes(&[("a", &["b"]), ("b", &["a"])])).unwrap_err();
        assert!(matches!(err, GraphError::CycleDetected { .. }));
    }

    #[test]
    fn test_self_dependency_is_rejected() {
        let err = DependencyGraph::resolve(&nodes(&[("a", &["a"])])).unwrap_err();
        assert!(matches!(err, GraphError::CycleDetected { .. }));
    }

    #[test]
    fn test_longer_cycle_is_rejected() {
        let err = DependencyGraph::resolve(&nodes(&[
            ("a", &["c"]),
            ("b", &["a"]),
            ("c", &["b"]),
        ]))
        .unwrap_err();
        assert!(matches!(err, GraphError::CycleDetected { .. }));
    }

    #[test]
    fn test_root_identifier_is_reserved() {
        let err = DependencyGraph::resolve(&nodes(&[(ROOT_VERTEX, &[])])).unwrap_err();
        assert!(matches!(err, GraphError::ReservedIdentifier(_)));
    }

    #[test]
    fn test_transitive_reduction_keeps_order_valid() {
        // c depends on both b and a, b depends on a: the direct c -> a edge
        // is redundant and must not disturb the final order.
        let order = DependencyGraph::resolve(&nodes(&[
            ("c", &["b", "a"]),
            ("b", &["a"]),
            ("a", &[]),
        ]))
        .unwrap();
        assert_eq!(order, vec!["a", "b", "c"]);
    }
}
