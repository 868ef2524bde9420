//! Graph construction and topology.
//!
//! [`Graph::build`] derives the execution DAG from a composed configuration
//! tree: one node per module entry, edges from input-map senders and declared
//! dependencies, validated and topologically ordered once at construction.
//! After that the structure is frozen; only per-node run-state (outputs,
//! last-run timestamps) mutates during execution.

mod build;
mod topology;

use miette::Diagnostic;
use rustc_hash::FxHashMap;
use thiserror::Error;

use crate::materialize::{GraphNode, MaterializeError};

/// Errors from graph construction.
#[derive(Debug, Error, Diagnostic)]
pub enum GraphError {
    /// A node failed to materialize.
    #[error(transparent)]
    #[diagnostic(transparent)]
    Materialize(#[from] MaterializeError),

    /// An input-map sender or dependency names a module that does not exist.
    #[error("node `{node}` references unknown upstream node `{upstream}`")]
    #[diagnostic(
        code(pipegraph::graph::unknown_upstream),
        help("Every input_map sender and dependency must be a configured module name.")
    )]
    UnknownUpstream { node: String, upstream: String },

    /// Two routed inputs claim the same positional index.
    #[error("node `{node}` routes two inputs to positional index {index}")]
    #[diagnostic(code(pipegraph::graph::positional_conflict))]
    PositionalConflict { node: String, index: usize },

    /// Positional indexes are not contiguous from zero.
    #[error("node `{node}` has a gap in its positional arguments: index {missing} is unbound but {bound} indexes are used")]
    #[diagnostic(
        code(pipegraph::graph::positional_gap),
        help("Positional destinations must cover 0..n with no holes.")
    )]
    PositionalGap {
        node: String,
        missing: usize,
        bound: usize,
    },

    /// The edge relation contains a cycle.
    #[error("the configured graph is not acyclic; nodes in a cycle: {}", nodes.join(", "))]
    #[diagnostic(code(pipegraph::graph::cycle))]
    Cycle { nodes: Vec<String> },
}

/// The executable DAG: materialized nodes, a deduplicated edge relation, and
/// the topological order execution follows.
pub struct Graph {
    nodes: FxHashMap<String, GraphNode>,
    /// upstream name → downstream names, deduplicated.
    edges: FxHashMap<String, Vec<String>>,
    order: Vec<String>,
}

impl std::fmt::Debug for Graph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Graph")
            .field("order", &self.order)
            .field("edges", &self.edges)
            .finish_non_exhaustive()
    }
}

impl Graph {
    #[must_use]
    pub fn node(&self, name: &str) -> Option<&GraphNode> {
        self.nodes.get(name)
    }

    pub(crate) fn node_mut(&mut self, name: &str) -> Option<&mut GraphNode> {
        self.nodes.get_mut(name)
    }

    /// Downstream nodes directly fed or ordered after `name`.
    #[must_use]
    pub fn downstream(&self, name: &str) -> &[String] {
        self.edges.get(name).map_or(&[], Vec::as_slice)
    }

    /// Node names in execution order: a topological order of the DAG with
    /// ties broken by configuration declaration order.
    #[must_use]
    pub fn topological_order(&self) -> &[String] {
        &self.order
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
