//! Deterministic topological ordering.

use rustc_hash::FxHashMap;
use std::cmp::Reverse;
use std::collections::BinaryHeap;

use super::GraphError;
use crate::materialize::GraphNode;

/// Kahn's algorithm with a deterministic tie-break: among ready nodes, the
/// one declared earliest in the configuration runs first. Returns
/// [`GraphError::Cycle`] naming the leftover nodes when the relation is not
/// acyclic.
pub(super) fn topological_sort(
    nodes: &FxHashMap<String, GraphNode>,
    edges: &FxHashMap<String, Vec<String>>,
) -> Result<Vec<String>, GraphError> {
    let mut indegree: FxHashMap<&str, usize> =
        nodes.keys().map(|name| (name.as_str(), 0)).collect();
    for downstream in edges.values().flatten() {
        if let Some(count) = indegree.get_mut(downstream.as_str()) {
            *count += 1;
        }
    }

    // min-heap keyed on declaration index
    let mut ready: BinaryHeap<Reverse<(usize, &str)>> = indegree
        .iter()
        .filter(|&(_, &count)| count == 0)
        .map(|(&name, _)| Reverse((declaration_index(nodes, name), name)))
        .collect();

    let mut order = Vec::with_capacity(nodes.len());
    while let Some(Reverse((_, name))) = ready.pop() {
        order.push(name.to_string());
        if let Some(downstream) = edges.get(name) {
            for next in downstream {
                let Some(count) = indegree.get_mut(next.as_str()) else {
                    continue;
                };
                *count -= 1;
                if *count == 0 {
                    ready.push(Reverse((declaration_index(nodes, next), next.as_str())));
                }
            }
        }
    }

    if order.len() != nodes.len() {
        let mut leftover: Vec<String> = nodes
            .keys()
            .filter(|name| !order.contains(name))
            .cloned()
            .collect();
        leftover.sort_unstable();
        return Err(GraphError::Cycle { nodes: leftover });
    }
    Ok(order)
}

fn declaration_index(nodes: &FxHashMap<String, GraphNode>, name: &str) -> usize {
    nodes.get(name).map_or(usize::MAX, |n| n.declaration_index)
}
