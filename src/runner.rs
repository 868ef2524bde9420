//! High-level pipeline runner.
//!
//! [`PipelineRunner`] ties the layers together: compose configuration, make
//! the declared namespaces known to the registry, build the graph, and hand
//! it to the scheduler. One runner owns one graph; repeated `run` calls
//! re-execute against the same in-memory state (already-complete nodes skip).

use std::path::Path;

use miette::Diagnostic;
use thiserror::Error;
use tracing::info;

use crate::config::{
    compose, load_documents, BaseDefaults, ConfigDocument, ConfigError, ConfigTree, OverrideSet,
};
use crate::graphs::{Graph, GraphError};
use crate::registry::ComponentRegistry;
use crate::scheduler::{RunReport, Scheduler, SchedulerError};
use crate::store::{OutputStore, StorageError};
use crate::value::Outputs;

/// Errors from assembling or executing a pipeline.
#[derive(Debug, Error, Diagnostic)]
pub enum RunnerError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Scheduler(#[from] SchedulerError),
}

/// A fully assembled pipeline, ready to execute.
pub struct PipelineRunner {
    graph: Graph,
    scheduler: Scheduler,
    tree: ConfigTree,
}

impl PipelineRunner {
    /// Assemble a runner from a composed configuration tree.
    ///
    /// Every namespace listed in `general.module_paths` (and the optional
    /// `general.modules_root`) is ensured on the registry before resolution,
    /// so configuration can name namespaces the host registered lazily.
    pub fn new(tree: ConfigTree, registry: &mut ComponentRegistry) -> Result<Self, RunnerError> {
        for namespace in &tree.general.module_paths {
            registry.ensure_namespace(namespace.clone());
        }
        if let Some(root) = &tree.general.modules_root {
            registry.ensure_namespace(root.clone());
        }

        let store = OutputStore::new(&tree.general.save_path, tree.general.field_sep)?;
        let graph = Graph::build(&tree, registry)?;
        info!(
            nodes = graph.len(),
            save_path = %tree.general.save_path.display(),
            "pipeline assembled"
        );
        Ok(Self {
            graph,
            scheduler: Scheduler::new(store),
            tree,
        })
    }

    /// Assemble a runner from YAML documents on disk.
    pub fn from_paths<P: AsRef<Path>>(
        paths: &[P],
        base_defaults: &BaseDefaults,
        overrides: &OverrideSet,
        registry: &mut ComponentRegistry,
    ) -> Result<Self, RunnerError> {
        let documents = load_documents(paths)?;
        Self::from_documents(&documents, base_defaults, overrides, registry)
    }

    /// Assemble a runner from already-parsed documents.
    pub fn from_documents(
        documents: &[ConfigDocument],
        base_defaults: &BaseDefaults,
        overrides: &OverrideSet,
        registry: &mut ComponentRegistry,
    ) -> Result<Self, RunnerError> {
        let tree = compose(base_defaults, documents, overrides)?;
        Self::new(tree, registry)
    }

    /// Execute the pipeline to completion.
    pub async fn run(&mut self) -> Result<RunReport, RunnerError> {
        Ok(self.scheduler.run(&mut self.graph).await?)
    }

    /// In-memory outputs of a node after a run, if it has any.
    #[must_use]
    pub fn output(&self, node: &str) -> Option<&Outputs> {
        self.graph.node(node).and_then(|n| n.output.as_ref())
    }

    /// The composed configuration the pipeline was built from.
    #[must_use]
    pub fn config(&self) -> &ConfigTree {
        &self.tree
    }

    /// The underlying graph.
    #[must_use]
    pub fn graph(&self) -> &Graph {
        &self.graph
    }
}
