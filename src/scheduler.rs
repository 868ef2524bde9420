//! Sequential graph execution.
//!
//! The scheduler walks the topological order one node at a time and is
//! fail-fast: the first error aborts the run with no partial-result
//! recovery beyond what the store already persisted.
//!
//! Per node the decision is:
//! 1. cached outputs loaded during preload → skip;
//! 2. `force_not_rerun` and a run-state marker exists → skip, outputs stay
//!    absent;
//! 3. otherwise resolve inputs from upstream outputs, execute, and persist
//!    if the node declares a storage spec.

use miette::Diagnostic;
use thiserror::Error;
use tracing::{info, instrument};

use crate::graphs::Graph;
use crate::node::{CallArgs, NodeError};
use crate::store::{OutputStore, StorageError};
use crate::types::Destination;
use crate::value::SlotValue;

/// Errors that abort a run.
#[derive(Debug, Error, Diagnostic)]
pub enum SchedulerError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Storage(#[from] StorageError),

    /// An upstream node completed without producing a routed slot.
    #[error("node `{node}` expects slot `{slot}` from `{sender}`, which produced no such output")]
    #[diagnostic(
        code(pipegraph::scheduler::missing_slot),
        help("Check the input_map slot names against what the sender actually returns.")
    )]
    MissingSlot {
        node: String,
        sender: String,
        slot: String,
    },

    /// An input-map sender has no outputs at resolution time. The
    /// topological order makes this unreachable unless a forced skip
    /// slipped past the pre-run check.
    #[error("node `{node}` needs outputs from `{sender}`, but `{sender}` has none")]
    #[diagnostic(code(pipegraph::scheduler::missing_upstream_output))]
    MissingUpstreamOutput { node: String, sender: String },

    /// A node would skip on its run-state marker alone while a downstream
    /// node routes data from it. Rejected before any node executes.
    #[error("node `{node}` would be skipped without outputs, but `{downstream}` routes data from it")]
    #[diagnostic(
        code(pipegraph::scheduler::forced_skip_feeds_downstream),
        help("Give the node an output_storage_type so its outputs survive, or drop force_not_rerun.")
    )]
    ForcedSkipFeedsDownstream { node: String, downstream: String },

    /// A node's execution failed.
    #[error("node `{node}` failed")]
    #[diagnostic(code(pipegraph::scheduler::node_failed))]
    Node {
        node: String,
        #[source]
        #[diagnostic_source]
        source: NodeError,
    },
}

/// How one node concluded within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeStatus {
    /// Not reached (the run aborted earlier).
    Pending,
    /// Completed without executing: cached outputs or a trusted marker.
    Skipped,
    /// Executed this run.
    Ran,
    /// Executed and persisted to the output store.
    Cached,
}

/// Summary of one completed run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    pub executed: Vec<String>,
    pub skipped: Vec<String>,
    /// Subset of `executed` whose outputs were persisted.
    pub cached: Vec<String>,
}

impl RunReport {
    /// How the named node concluded in this run. Nodes the run never reached
    /// (or that were never part of the graph) report [`NodeStatus::Pending`].
    #[must_use]
    pub fn status(&self, node: &str) -> NodeStatus {
        if self.cached.iter().any(|n| n == node) {
            NodeStatus::Cached
        } else if self.executed.iter().any(|n| n == node) {
            NodeStatus::Ran
        } else if self.skipped.iter().any(|n| n == node) {
            NodeStatus::Skipped
        } else {
            NodeStatus::Pending
        }
    }
}

/// Sequential executor over one output store.
pub struct Scheduler {
    store: OutputStore,
}

impl Scheduler {
    #[must_use]
    pub fn new(store: OutputStore) -> Self {
        Self { store }
    }

    /// Execute the graph to completion.
    ///
    /// Preloads prior state for every cache-enabled node, rejects forced
    /// skips that would starve a downstream input map, then walks the
    /// topological order.
    #[instrument(skip_all)]
    pub async fn run(&self, graph: &mut Graph) -> Result<RunReport, SchedulerError> {
        self.preload(graph)?;
        check_forced_skips(graph)?;

        let order: Vec<String> = graph.topological_order().to_vec();
        let mut report = RunReport::default();

        for name in order {
            if is_complete(graph, &name) {
                info!(node = %name, "skipping: prior run state satisfies this node");
                report.skipped.push(name);
                continue;
            }

            let args = resolve_inputs(graph, &name)?;
            let Some(current) = graph.node(&name) else {
                continue;
            };
            info!(node = %name, "executing");
            let node = std::sync::Arc::clone(&current.node);
            let storage = current.storage.clone();
            let output = node
                .run(args)
                .await
                .map_err(|source| SchedulerError::Node {
                    node: name.clone(),
                    source,
                })?;

            let stamp = match &storage {
                Some(spec) => {
                    let stamp = self.store.save(&name, &output, spec)?;
                    report.cached.push(name.clone());
                    Some(stamp)
                }
                None => None,
            };

            if let Some(current) = graph.node_mut(&name) {
                current.output = Some(output);
                if stamp.is_some() {
                    current.last_run = stamp;
                }
            }
            report.executed.push(name);
        }

        info!(
            executed = report.executed.len(),
            skipped = report.skipped.len(),
            cached = report.cached.len(),
            "run complete"
        );
        Ok(report)
    }

    /// Pull prior state from the store for every cache-enabled node.
    fn preload(&self, graph: &mut Graph) -> Result<(), SchedulerError> {
        let names: Vec<String> = graph.topological_order().to_vec();
        for name in names {
            let Some(node) = graph.node_mut(&name) else {
                continue;
            };
            if !node.cache_enabled {
                continue;
            }
            let cached = self.store.load(&name)?;
            node.output = cached.outputs;
            node.last_run = cached.last_run;
        }
        Ok(())
    }
}

/// A node is complete when it has outputs, or when it trusts its run-state
/// marker alone via `force_not_rerun`.
fn is_complete(graph: &Graph, name: &str) -> bool {
    graph.node(name).is_some_and(|node| {
        node.output.is_some() || (node.force_skip_if_run && node.last_run.is_some())
    })
}

/// Reject runs where a marker-only skip would leave a downstream input map
/// with nothing to read. Checked up front so no node executes first.
fn check_forced_skips(graph: &Graph) -> Result<(), SchedulerError> {
    for name in graph.topological_order() {
        let Some(node) = graph.node(name) else {
            continue;
        };
        let marker_only_skip =
            node.force_skip_if_run && node.last_run.is_some() && node.output.is_none();
        if !marker_only_skip {
            continue;
        }
        for downstream in graph.downstream(name) {
            let routes_data = graph
                .node(downstream)
                .is_some_and(|d| d.inputs.iter().any(|b| b.sender == *name));
            if routes_data {
                return Err(SchedulerError::ForcedSkipFeedsDownstream {
                    node: name.clone(),
                    downstream: downstream.clone(),
                });
            }
        }
    }
    Ok(())
}

/// Assemble a node's call arguments from its senders' outputs.
fn resolve_inputs(graph: &Graph, name: &str) -> Result<CallArgs, SchedulerError> {
    let Some(node) = graph.node(name) else {
        return Ok(CallArgs::new());
    };
    let mut positional: Vec<(usize, SlotValue)> = Vec::new();
    let mut args = CallArgs::new();

    for binding in &node.inputs {
        let sender =
            graph
                .node(&binding.sender)
                .ok_or_else(|| SchedulerError::MissingUpstreamOutput {
                    node: name.to_string(),
                    sender: binding.sender.clone(),
                })?;
        let outputs =
            sender
                .output
                .as_ref()
                .ok_or_else(|| SchedulerError::MissingUpstreamOutput {
                    node: name.to_string(),
                    sender: binding.sender.clone(),
                })?;
        let value = outputs
            .get(&binding.from_slot)
            .cloned()
            .ok_or_else(|| SchedulerError::MissingSlot {
                node: name.to_string(),
                sender: binding.sender.clone(),
                slot: binding.from_slot.clone(),
            })?;
        match &binding.dest {
            Destination::Positional(index) => positional.push((*index, value)),
            Destination::Keyword(key) => {
                args.keyword.insert(key.clone(), value);
            }
        }
    }

    // construction guarantees indexes are exactly 0..n
    positional.sort_by_key(|(index, _)| *index);
    args.positional = positional.into_iter().map(|(_, value)| value).collect();
    Ok(args)
}
