//! # pipegraph
//!
//! A declarative pipeline engine: describe a computation as YAML module
//! entries, and pipegraph composes the configuration, wires the entries
//! into a DAG, executes it in topological order, and persists node outputs
//! so finished work is never repeated across runs.
//!
//! ## Layers
//!
//! - [`config`]: document loading and composition — base defaults, ordered
//!   documents, and overrides merge into one [`config::ConfigTree`].
//! - [`registry`]: explicit name → capability resolution; hosts register
//!   functions and class factories under namespaces at startup.
//! - [`node`] / [`materialize`]: the execution interface and the three node
//!   kinds (function, class instance, bypass) built from config entries.
//! - [`graphs`]: DAG construction, validation, and deterministic
//!   topological ordering.
//! - [`store`]: per-node persistent outputs in json/csv/npy/bin formats,
//!   plus the run-state markers the skip logic reads.
//! - [`scheduler`] / [`runner`]: sequential fail-fast execution and the
//!   one-call assembly layer on top.
//!
//! ## Quick start
//!
//! ```no_run
//! use pipegraph::config::{parse_document, BaseDefaults, OverrideSet};
//! use pipegraph::registry::ComponentRegistry;
//! use pipegraph::runner::PipelineRunner;
//! use pipegraph::value::outputs;
//!
//! # #[tokio::main]
//! # async fn main() -> miette::Result<()> {
//! let mut registry = ComponentRegistry::new();
//! registry
//!     .namespace("demo")
//!     .function("six", |_args| Ok(outputs([("value", 6i64)])));
//!
//! let doc = parse_document(
//!     "general:\n  save_path: ./state\nsource:\n  function: {module: demo, function_name: six}\n  output_storage_type: json\n",
//! )?;
//! let mut runner = PipelineRunner::from_documents(
//!     &[doc],
//!     &BaseDefaults::new(),
//!     &OverrideSet::new(),
//!     &mut registry,
//! )?;
//! let report = runner.run().await?;
//! assert_eq!(report.executed, ["source"]);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod graphs;
pub mod materialize;
pub mod node;
pub mod registry;
pub mod runner;
pub mod scheduler;
pub mod store;
pub mod telemetry;
pub mod types;
pub mod value;

pub use config::{BaseDefaults, ConfigTree, OverrideSet};
pub use graphs::Graph;
pub use node::{CallArgs, Node, NodeError};
pub use registry::ComponentRegistry;
pub use runner::{PipelineRunner, RunnerError};
pub use scheduler::{NodeStatus, RunReport, Scheduler};
pub use store::OutputStore;
pub use types::{Destination, StorageFormat, StorageSpec};
pub use value::{outputs, NdArray, Outputs, SlotValue, Table};
