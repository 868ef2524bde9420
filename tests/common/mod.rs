//! Shared fixtures for integration tests: a small component catalog with
//! call counting, so tests can assert what actually executed.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use pipegraph::node::{CallArgs, Node, NodeError};
use pipegraph::registry::ComponentRegistry;
use pipegraph::value::{outputs, NdArray, Outputs, SlotValue, Table};

/// Per-component execution counters.
#[derive(Default)]
pub struct Calls {
    pub load: AtomicUsize,
    pub mean: AtomicUsize,
    pub scale: AtomicUsize,
}

/// Stateful scaling component: the factor is fixed at construction.
struct Scaler {
    factor: f64,
    calls: Arc<Calls>,
}

#[async_trait]
impl Node for Scaler {
    async fn run(&self, args: CallArgs) -> Result<Outputs, NodeError> {
        self.calls.scale.fetch_add(1, Ordering::SeqCst);
        let array = args
            .positional
            .first()
            .and_then(SlotValue::as_array)
            .ok_or(NodeError::WrongType {
                slot: "positional 0".into(),
                expected: "array",
            })?;
        let scaled = NdArray::vector(array.data.iter().map(|v| v * self.factor).collect());
        Ok(outputs([("scaled", scaled)]))
    }
}

/// Build the demo component catalog used across the integration tests.
pub fn demo_registry(calls: Arc<Calls>) -> ComponentRegistry {
    let mut registry = ComponentRegistry::new();

    let load_calls = Arc::clone(&calls);
    let mean_calls = Arc::clone(&calls);
    registry
        .namespace("demo.data")
        .function("load", move |_args| {
            load_calls.load.fetch_add(1, Ordering::SeqCst);
            let mut frame = Table::new(vec!["id".into(), "score".into()]);
            frame.push_row(["1", "2.0"]);
            frame.push_row(["2", "4.0"]);
            frame.push_row(["3", "6.0"]);
            Ok(outputs([
                ("frame", SlotValue::Table(frame)),
                ("rows", SlotValue::from(3i64)),
            ]))
        })
        .function("mean", move |args: CallArgs| {
            mean_calls.mean.fetch_add(1, Ordering::SeqCst);
            let frame = args
                .positional
                .first()
                .and_then(SlotValue::as_table)
                .ok_or(NodeError::WrongType {
                    slot: "positional 0".into(),
                    expected: "table",
                })?;
            let scores: Vec<f64> = frame
                .rows
                .iter()
                .filter_map(|row| row.get(1).and_then(|cell| cell.parse().ok()))
                .collect();
            let mean = scores.iter().sum::<f64>() / scores.len() as f64;
            Ok(outputs([
                ("mean", SlotValue::from(mean)),
                ("vector", SlotValue::Array(NdArray::vector(scores))),
            ]))
        });

    let scaler_calls = Arc::clone(&calls);
    registry.namespace("demo.transform").class("Scaler", move |params| {
        let factor = params
            .get("factor")
            .and_then(serde_json::Value::as_f64)
            .ok_or_else(|| NodeError::InvalidParameters("Scaler requires `factor`".into()))?;
        Ok(Box::new(Scaler {
            factor,
            calls: Arc::clone(&scaler_calls),
        }) as Box<dyn Node>)
    });

    registry
}

/// YAML document for a save path: loader → stats → scaler → publish (bypass).
pub fn pipeline_yaml(save_path: &std::path::Path) -> String {
    format!(
        r#"general:
  verbose: 0
  save_path: {save}

loader:
  function:
    module: demo.data
    function_name: load
  output_storage_type:
    frame: csv
    rows: json

stats:
  function:
    module: demo.data
    function_name: mean
  input_map:
    loader:
      frame: 0
  output_storage_type:
    mean: json
    vector: npy

scaler:
  class:
    module: demo.transform
    class_name: Scaler
  parameters:
    factor: 10.0
  input_map:
    stats:
      vector: 0
  output_storage_type:
    scaled: bin

publish:
  bypass: true
  input_map:
    stats:
      mean: average
    scaler:
      scaled: 0
  bypass_inout_map:
    average: mean
    0: scaled
"#,
        save = save_path.display()
    )
}
