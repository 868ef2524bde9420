//! Graph construction from a composed configuration tree.

use rustc_hash::{FxHashMap, FxHashSet};
use tracing::debug;

use super::topology::topological_sort;
use super::{Graph, GraphError};
use crate::config::ConfigTree;
use crate::materialize::materialize;
use crate::registry::ComponentRegistry;
use crate::types::Destination;

impl Graph {
    /// Build the execution graph from a composed configuration tree.
    ///
    /// Materializes every module entry, wires edges from input-map senders
    /// and declared dependencies, and validates the result: upstream names
    /// must exist, each node's positional destinations must cover `0..n`
    /// exactly once, and the edge relation must be acyclic.
    pub fn build(tree: &ConfigTree, registry: &ComponentRegistry) -> Result<Self, GraphError> {
        let mut nodes = FxHashMap::default();
        for (index, (name, entry)) in tree.modules().enumerate() {
            let node = materialize(name, entry, index, registry)?;
            validate_positional(&node.name, &node.inputs)?;
            nodes.insert(name.to_string(), node);
        }

        let mut edges: FxHashMap<String, Vec<String>> = FxHashMap::default();
        let mut seen: FxHashSet<(String, String)> = FxHashSet::default();
        for node in nodes.values() {
            for upstream in node.upstream() {
                if !nodes.contains_key(upstream) {
                    return Err(GraphError::UnknownUpstream {
                        node: node.name.clone(),
                        upstream: upstream.to_string(),
                    });
                }
                if seen.insert((upstream.to_string(), node.name.clone())) {
                    edges
                        .entry(upstream.to_string())
                        .or_default()
                        .push(node.name.clone());
                }
            }
        }

        let order = topological_sort(&nodes, &edges)?;
        debug!(nodes = nodes.len(), "graph constructed");

        Ok(Self {
            nodes,
            edges,
            order,
        })
    }
}

/// Positional destinations must be collision-free and contiguous from zero,
/// so the flattened argument vector is well defined.
fn validate_positional(
    node: &str,
    inputs: &[crate::materialize::InputBinding],
) -> Result<(), GraphError> {
    let mut indexes = FxHashSet::default();
    for binding in inputs {
        if let Destination::Positional(index) = binding.dest {
            if !indexes.insert(index) {
                return Err(GraphError::PositionalConflict {
                    node: node.to_string(),
                    index,
                });
            }
        }
    }
    for missing in 0..indexes.len() {
        if !indexes.contains(&missing) {
            return Err(GraphError::PositionalGap {
                node: node.to_string(),
                missing,
                bound: indexes.len(),
            });
        }
    }
    Ok(())
}
