//! Node materialization: turning one configured module entry into an
//! executable graph node.
//!
//! Kind precedence when an entry declares several: bypass wins over class,
//! class wins over function. Class factories are invoked exactly once, here,
//! with the entry's constructor parameters; the resulting instance lives for
//! the whole run.

use chrono::{DateTime, Utc};
use miette::Diagnostic;
use std::sync::Arc;
use thiserror::Error;

use crate::config::ModuleEntry;
use crate::node::{BypassNode, FunctionNode, Node, NodeError};
use crate::registry::{ComponentRegistry, ResolveError};
use crate::types::{Destination, StorageSpec};
use crate::value::Outputs;

/// Errors from materializing a module entry.
#[derive(Debug, Error, Diagnostic)]
pub enum MaterializeError {
    /// The entry declares neither `bypass`, `class`, nor `function`.
    #[error("module `{module}` declares no component: expected `bypass`, `class`, or `function`")]
    #[diagnostic(code(pipegraph::materialize::missing_component))]
    MissingComponent { module: String },

    /// Qualified-name resolution failed.
    #[error("module `{module}` references an unresolvable component")]
    #[diagnostic(code(pipegraph::materialize::resolve))]
    Resolve {
        module: String,
        #[source]
        #[diagnostic_source]
        source: ResolveError,
    },

    /// A class factory rejected its constructor parameters.
    #[error("module `{module}` failed to construct its component instance")]
    #[diagnostic(code(pipegraph::materialize::construct))]
    Construct {
        module: String,
        #[source]
        #[diagnostic_source]
        source: NodeError,
    },
}

/// One routed input edge: which upstream slot feeds which call destination.
#[derive(Debug, Clone)]
pub struct InputBinding {
    /// Upstream node the value comes from.
    pub sender: String,
    /// Output slot on the sender.
    pub from_slot: String,
    /// Where the value lands in this node's call.
    pub dest: Destination,
}

/// A materialized node with its wiring and run-state.
///
/// `output` and `last_run` are the node's mutable execution state; everything
/// else is fixed at materialization.
pub struct GraphNode {
    pub name: String,
    pub node: Arc<dyn Node>,
    /// Pure-ordering upstream edges (no data routed).
    pub dependencies: Vec<String>,
    pub inputs: Vec<InputBinding>,
    pub storage: Option<StorageSpec>,
    pub cache_enabled: bool,
    /// Skip on a run-state marker alone, even with no cached outputs.
    pub force_skip_if_run: bool,
    /// Position in configuration declaration order; topological tie-break.
    pub declaration_index: usize,
    pub output: Option<Outputs>,
    pub last_run: Option<DateTime<Utc>>,
}

impl std::fmt::Debug for GraphNode {
    // Arc<dyn Node> is opaque, so derive is unavailable
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphNode")
            .field("name", &self.name)
            .field("dependencies", &self.dependencies)
            .field("inputs", &self.inputs)
            .field("storage", &self.storage)
            .field("cache_enabled", &self.cache_enabled)
            .field("force_skip_if_run", &self.force_skip_if_run)
            .field("declaration_index", &self.declaration_index)
            .field("has_output", &self.output.is_some())
            .field("last_run", &self.last_run)
            .finish_non_exhaustive()
    }
}

impl GraphNode {
    /// Names of all upstream nodes: input-map senders plus declared
    /// dependencies, duplicates included (the graph dedups edges).
    pub fn upstream(&self) -> impl Iterator<Item = &str> {
        self.inputs
            .iter()
            .map(|b| b.sender.as_str())
            .chain(self.dependencies.iter().map(String::as_str))
    }
}

/// Materialize one module entry into an executable node.
pub fn materialize(
    name: &str,
    entry: &ModuleEntry,
    declaration_index: usize,
    registry: &ComponentRegistry,
) -> Result<GraphNode, MaterializeError> {
    let node: Arc<dyn Node> = if entry.bypass {
        Arc::new(BypassNode::from_map(&entry.bypass_inout_map))
    } else if let Some(class) = &entry.class {
        let factory = registry
            .resolve_class(&class.qualified())
            .map_err(|source| MaterializeError::Resolve {
                module: name.to_string(),
                source,
            })?;
        let instance = factory(&entry.parameters).map_err(|source| MaterializeError::Construct {
            module: name.to_string(),
            source,
        })?;
        Arc::from(instance)
    } else if let Some(function) = &entry.function {
        let func = registry
            .resolve_function(&function.qualified())
            .map_err(|source| MaterializeError::Resolve {
                module: name.to_string(),
                source,
            })?;
        Arc::new(FunctionNode::new(func, &entry.parameters))
    } else {
        return Err(MaterializeError::MissingComponent {
            module: name.to_string(),
        });
    };

    let mut inputs = Vec::new();
    for (sender, slots) in &entry.input_map {
        for (from_slot, dest) in slots {
            inputs.push(InputBinding {
                sender: sender.clone(),
                from_slot: from_slot.clone(),
                dest: dest.clone(),
            });
        }
    }

    Ok(GraphNode {
        name: name.to_string(),
        node,
        dependencies: entry.dependencies.clone(),
        inputs,
        storage: entry.output_storage_type.clone(),
        cache_enabled: entry.cache_output,
        force_skip_if_run: entry.force_not_rerun,
        declaration_index,
        output: None,
        last_run: None,
    })
}
