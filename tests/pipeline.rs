//! End-to-end pipeline assembly and execution.

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;

use pipegraph::config::{parse_document, BaseDefaults, OverrideSet};
use pipegraph::runner::PipelineRunner;
use pipegraph::scheduler::NodeStatus;
use pipegraph::value::SlotValue;

use common::{demo_registry, pipeline_yaml, Calls};

#[tokio::test]
async fn full_pipeline_runs_in_topological_order() {
    let dir = tempfile::tempdir().unwrap();
    let calls = Arc::new(Calls::default());
    let mut registry = demo_registry(Arc::clone(&calls));

    let doc = parse_document(&pipeline_yaml(dir.path())).unwrap();
    let mut runner = PipelineRunner::from_documents(
        &[doc],
        &BaseDefaults::new(),
        &OverrideSet::new(),
        &mut registry,
    )
    .unwrap();

    let report = runner.run().await.unwrap();
    assert_eq!(report.executed, ["loader", "stats", "scaler", "publish"]);
    assert_eq!(report.cached, ["loader", "stats", "scaler"]);
    assert!(report.skipped.is_empty());
    assert_eq!(report.status("loader"), NodeStatus::Cached);
    assert_eq!(report.status("publish"), NodeStatus::Ran);
    assert_eq!(report.status("nonexistent"), NodeStatus::Pending);

    // values flowed: mean of [2, 4, 6] is 4, scaled vector is x10
    let stats = runner.output("stats").unwrap();
    assert_eq!(stats["mean"].as_f64(), Some(4.0));
    let scaled = runner.output("scaler").unwrap()["scaled"]
        .as_array()
        .unwrap();
    assert_eq!(scaled.data, vec![20.0, 40.0, 60.0]);

    // the bypass forwarded both its keyword and positional inputs
    let publish = runner.output("publish").unwrap();
    assert_eq!(publish["mean"].as_f64(), Some(4.0));
    assert!(matches!(publish["scaled"], SlotValue::Array(_)));

    assert_eq!(calls.load.load(Ordering::SeqCst), 1);
    assert_eq!(calls.mean.load(Ordering::SeqCst), 1);
    assert_eq!(calls.scale.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn persisted_layout_matches_the_declared_formats() {
    let dir = tempfile::tempdir().unwrap();
    let calls = Arc::new(Calls::default());
    let mut registry = demo_registry(Arc::clone(&calls));

    let doc = parse_document(&pipeline_yaml(dir.path())).unwrap();
    let mut runner = PipelineRunner::from_documents(
        &[doc],
        &BaseDefaults::new(),
        &OverrideSet::new(),
        &mut registry,
    )
    .unwrap();
    runner.run().await.unwrap();

    let state = dir.path().join("execution_state");
    for (node, files) in [
        ("loader", vec!["frame.csv", "rows.json"]),
        ("stats", vec!["mean.json", "vector.npy"]),
        ("scaler", vec!["scaled.bin"]),
    ] {
        assert!(state.join(node).join("run_state.json").is_file());
        for file in files {
            assert!(
                state.join(node).join("output").join(file).is_file(),
                "missing {node}/output/{file}"
            );
        }
    }
    // publish declares no storage, so nothing is persisted for it
    assert!(!state.join("publish").exists());
}

#[tokio::test]
async fn overrides_reach_into_constructor_parameters() {
    let dir = tempfile::tempdir().unwrap();
    let calls = Arc::new(Calls::default());
    let mut registry = demo_registry(Arc::clone(&calls));

    let doc = parse_document(&pipeline_yaml(dir.path())).unwrap();
    let overrides =
        OverrideSet::from_args(&["--scaler.parameters.factor", "0.5"]).unwrap();
    let mut runner =
        PipelineRunner::from_documents(&[doc], &BaseDefaults::new(), &overrides, &mut registry)
            .unwrap();
    runner.run().await.unwrap();

    let scaled = runner.output("scaler").unwrap()["scaled"]
        .as_array()
        .unwrap();
    assert_eq!(scaled.data, vec![1.0, 2.0, 3.0]);
}

#[tokio::test]
async fn base_defaults_fill_inherited_entries() {
    let dir = tempfile::tempdir().unwrap();
    let calls = Arc::new(Calls::default());
    let mut registry = demo_registry(Arc::clone(&calls));

    let mut bases = BaseDefaults::new();
    bases
        .register_yaml(
            "scaling",
            "class:\n  module: demo.transform\n  class_name: Scaler\nparameters:\n  factor: 2.0\n",
        )
        .unwrap();

    let yaml = format!(
        "general:\n  save_path: {}\nloader:\n  function: {{module: demo.data, function_name: load}}\n\
         stats:\n  function: {{module: demo.data, function_name: mean}}\n  input_map:\n    loader: {{frame: 0}}\n\
         scaler:\n  base_module: scaling\n  input_map:\n    stats: {{vector: 0}}\n",
        dir.path().display()
    );
    let doc = parse_document(&yaml).unwrap();
    let mut runner =
        PipelineRunner::from_documents(&[doc], &bases, &OverrideSet::new(), &mut registry)
            .unwrap();
    runner.run().await.unwrap();

    let scaled = runner.output("scaler").unwrap()["scaled"]
        .as_array()
        .unwrap();
    assert_eq!(scaled.data, vec![4.0, 8.0, 12.0]);
}
