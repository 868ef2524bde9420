//! Node execution primitives.
//!
//! A [`Node`] is one unit of the execution graph behind a single capability:
//! `run(args) -> outputs`. The engine never looks inside a node; function
//! wrappers, stateful component instances, and bypass passthroughs all adapt
//! to this one interface at materialization time.

use async_trait::async_trait;
use miette::Diagnostic;
use rustc_hash::FxHashMap;
use std::sync::Arc;
use thiserror::Error;

use crate::registry::{ComponentFn, Params};
use crate::value::{Outputs, SlotValue};

/// Resolved call arguments for one node invocation.
///
/// Positional arguments are already flattened in index order by the
/// scheduler; keyword arguments are an open mapping.
#[derive(Debug, Clone, Default)]
pub struct CallArgs {
    pub positional: Vec<SlotValue>,
    pub keyword: FxHashMap<String, SlotValue>,
}

impl CallArgs {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_positional(mut self, positional: Vec<SlotValue>) -> Self {
        self.positional = positional;
        self
    }

    #[must_use]
    pub fn with_keyword(mut self, name: impl Into<String>, value: impl Into<SlotValue>) -> Self {
        self.keyword.insert(name.into(), value.into());
        self
    }

    /// Fetch a keyword argument, failing with [`NodeError::MissingInput`]
    /// when absent. The usual entry point for component implementations.
    pub fn require(&self, name: &str) -> Result<&SlotValue, NodeError> {
        self.keyword.get(name).ok_or_else(|| NodeError::MissingInput {
            what: name.to_string(),
        })
    }
}

/// Core trait for executable graph nodes.
///
/// Every node — function wrapper, component instance, or bypass — exposes
/// exactly this capability. Implementations must be deterministic with
/// respect to their inputs for the incremental cache to be meaningful.
#[async_trait]
pub trait Node: Send + Sync {
    /// Execute this node with the resolved arguments, returning its complete
    /// output mapping. Errors abort the entire run.
    async fn run(&self, args: CallArgs) -> Result<Outputs, NodeError>;
}

/// Errors raised inside node execution.
///
/// All of these are fatal at the engine level: the run aborts and the error
/// propagates to the caller unrecovered.
#[derive(Debug, Error, Diagnostic)]
pub enum NodeError {
    /// An expected input value was not provided.
    #[error("missing expected input: {what}")]
    #[diagnostic(
        code(pipegraph::node::missing_input),
        help("Check the node's input_map against the slots its senders produce.")
    )]
    MissingInput { what: String },

    /// An input value had the wrong shape for the component.
    #[error("input `{slot}` has the wrong type: expected {expected}")]
    #[diagnostic(code(pipegraph::node::wrong_type))]
    WrongType { slot: String, expected: &'static str },

    /// An invocation keyword collided with a bound constructor parameter.
    #[error("keyword argument `{name}` is already bound as a constructor parameter")]
    #[diagnostic(
        code(pipegraph::node::duplicate_keyword),
        help("Route the upstream value to a different keyword, or drop the parameter.")
    )]
    DuplicateKeyword { name: String },

    /// A bypass mapping referenced an input that was not supplied.
    #[error("bypass input `{input}` is neither a provided keyword nor an in-range positional index")]
    #[diagnostic(code(pipegraph::node::bypass_input))]
    BypassInput { input: String },

    /// Constructor parameters were rejected by a component factory.
    #[error("invalid parameters: {0}")]
    #[diagnostic(code(pipegraph::node::invalid_parameters))]
    InvalidParameters(String),

    /// JSON conversion failure inside a component.
    #[error(transparent)]
    #[diagnostic(code(pipegraph::node::serde_json))]
    Serde(#[from] serde_json::Error),

    /// Opaque component failure.
    #[error("{0}")]
    #[diagnostic(code(pipegraph::node::failed))]
    Failed(String),
}

/// Function-backed node: a resolved component function plus the constructor
/// parameters bound to it at materialization.
///
/// On invocation the bound parameters are appended to the keyword arguments;
/// a collision with an invocation keyword is an error rather than a silent
/// override.
pub struct FunctionNode {
    func: Arc<ComponentFn>,
    parameters: FxHashMap<String, SlotValue>,
}

impl FunctionNode {
    #[must_use]
    pub fn new(func: Arc<ComponentFn>, parameters: &Params) -> Self {
        let parameters = parameters
            .iter()
            .map(|(k, v)| (k.clone(), SlotValue::Json(v.clone())))
            .collect();
        Self { func, parameters }
    }
}

#[async_trait]
impl Node for FunctionNode {
    async fn run(&self, mut args: CallArgs) -> Result<Outputs, NodeError> {
        for (name, value) in &self.parameters {
            if args.keyword.contains_key(name) {
                return Err(NodeError::DuplicateKeyword { name: name.clone() });
            }
            args.keyword.insert(name.clone(), value.clone());
        }
        (self.func)(args)
    }
}

/// Identifies which invocation input a bypass route reads from.
///
/// Configuration keys that parse as a non-negative integer select a
/// positional argument; everything else names a keyword.
#[derive(Debug, Clone, PartialEq, Eq)]
enum BypassSource {
    Keyword(String),
    Positional(usize),
}

impl BypassSource {
    fn parse(key: &str) -> Self {
        match key.parse::<usize>() {
            Ok(index) => BypassSource::Positional(index),
            Err(_) => BypassSource::Keyword(key.to_string()),
        }
    }
}

/// Passthrough node: copies designated inputs directly to named output slots
/// without any domain logic.
pub struct BypassNode {
    routes: Vec<(BypassSource, String)>,
}

impl BypassNode {
    /// Build from a `bypass_inout_map`: input identifier → output slot name.
    #[must_use]
    pub fn from_map(inout_map: &FxHashMap<String, String>) -> Self {
        let routes = inout_map
            .iter()
            .map(|(input, slot)| (BypassSource::parse(input), slot.clone()))
            .collect();
        Self { routes }
    }
}

#[async_trait]
impl Node for BypassNode {
    async fn run(&self, args: CallArgs) -> Result<Outputs, NodeError> {
        let mut out = Outputs::default();
        for (source, slot) in &self.routes {
            let value = match source {
                BypassSource::Keyword(name) => {
                    args.keyword
                        .get(name)
                        .cloned()
                        .ok_or_else(|| NodeError::BypassInput {
                            input: name.clone(),
                        })?
                }
                BypassSource::Positional(index) => args
                    .positional
                    .get(*index)
                    .cloned()
                    .ok_or_else(|| NodeError::BypassInput {
                        input: index.to_string(),
                    })?,
            };
            out.insert(slot.clone(), value);
        }
        Ok(out)
    }
}
