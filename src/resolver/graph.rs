//! Dependency graph, topological ordering and cycle tracing.

use indexmap::{IndexMap, IndexSet};
use std::collections::BTreeSet;

/// Cycle found while ordering the graph.
///
/// `cycle` lists one concrete dependency loop in traversal order: each
/// entry depends on the next, and the last depends on the first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleError {
    pub cycle: Vec<String>,
}

/// Directed graph where an edge `a -> b` means `a` depends on `b`
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    nodes: IndexMap<String, IndexSet<String>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node; insertion order breaks ties in [`Self::topological_order`]
    pub fn add_node(&mut self, name: &str) {
        self.nodes.entry(name.to_string()).or_default();
    }

    /// Record that `from` depends on `to`. Both nodes are created if needed.
    pub fn add_edge(&mut self, from: &str, to: &str) {
        self.add_node(to);
        self.nodes
            .entry(from.to_string())
            .or_default()
            .insert(to.to_string());
    }

    pub fn dependencies(&self, name: &str) -> Option<&IndexSet<String>> {
        self.nodes.get(name)
    }

    /// Order nodes so every node comes after all of its dependencies.
    ///
    /// Kahn's algorithm; among nodes that are ready at the same time the one
    /// added first wins, so the result is deterministic.
    pub fn topological_order(&self) -> Result<Vec<String>, CycleError> {
        let count = self.nodes.len();
        let mut in_degree = vec![0usize; count];
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); count];

        for (idx, (_, deps)) in self.nodes.iter().enumerate() {
            for dep in deps {
                if let Some(dep_idx) = self.nodes.get_index_of(dep) {
                    in_degree[idx] += 1;
                    dependents[dep_idx].push(idx);
                }
            }
        }

        let mut ready: BTreeSet<usize> = (0..count).filter(|&i| in_degree[i] == 0).collect();
        let mut order = Vec::with_capacity(count);

        while let Some(idx) = ready.pop_first() {
            order.push(idx);
            for &dependent in &dependents[idx] {
                in_degree[dependent] -= 1;
                if in_degree[dependent] == 0 {
                    ready.insert(dependent);
                }
            }
        }

        if order.len() != count {
            let remaining: Vec<usize> = (0..count).filter(|&i| in_degree[i] > 0).collect();
            return Err(CycleError {
                cycle: self.trace_cycle(&remaining),
            });
        }

        Ok(order
            .into_iter()
            .filter_map(|idx| self.nodes.get_index(idx).map(|(name, _)| name.clone()))
            .collect())
    }

    /// Walk unresolved dependencies from the first stuck node until a node
    /// repeats; the walk from that node's first visit is a cycle.
    ///
    /// Every stuck node still has at least one stuck dependency, so the walk
    /// cannot dead-end.
    fn trace_cycle(&self, remaining: &[usize]) -> Vec<String> {
        let stuck: BTreeSet<usize> = remaining.iter().copied().collect();
        let Some(&start) = remaining.first() else {
            return Vec::new();
        };

        let mut path: Vec<usize> = vec![start];
        let mut current = start;
        loop {
            let next = self
                .nodes
                .get_index(current)
                .and_then(|(_, deps)| {
                    deps.iter()
                        .filter_map(|dep| self.nodes.get_index_of(dep))
                        .find(|idx| stuck.contains(idx))
                });

            let Some(next) = next else {
                break;
            };
            if let Some(pos) = path.iter().position(|&idx| idx == next) {
                path.drain(..pos);
                break;
            }
            path.push(next);
            current = next;
        }

        path.into_iter()
            .filter_map(|idx| self.nodes.get_index(idx).map(|(name, _)| name.clone()))
            .collect()
    }
}
