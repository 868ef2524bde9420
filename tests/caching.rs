//! Incremental caching across independent runs against one save path.

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;

use pipegraph::config::{parse_document, BaseDefaults, OverrideSet};
use pipegraph::runner::{PipelineRunner, RunnerError};
use pipegraph::scheduler::SchedulerError;
use pipegraph::store::OutputStore;

use common::{demo_registry, pipeline_yaml, Calls};

async fn run_once(dir: &std::path::Path, calls: Arc<Calls>) -> pipegraph::RunReport {
    let mut registry = demo_registry(calls);
    let doc = parse_document(&pipeline_yaml(dir)).unwrap();
    let mut runner = PipelineRunner::from_documents(
        &[doc],
        &BaseDefaults::new(),
        &OverrideSet::new(),
        &mut registry,
    )
    .unwrap();
    runner.run().await.unwrap()
}

#[tokio::test]
async fn second_run_skips_persisted_nodes() {
    let dir = tempfile::tempdir().unwrap();
    let calls = Arc::new(Calls::default());

    let first = run_once(dir.path(), Arc::clone(&calls)).await;
    assert_eq!(first.executed, ["loader", "stats", "scaler", "publish"]);

    let second = run_once(dir.path(), Arc::clone(&calls)).await;
    // publish declares no storage, so only it re-executes
    assert_eq!(second.skipped, ["loader", "stats", "scaler"]);
    assert_eq!(second.executed, ["publish"]);

    assert_eq!(calls.load.load(Ordering::SeqCst), 1);
    assert_eq!(calls.mean.load(Ordering::SeqCst), 1);
    assert_eq!(calls.scale.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn cached_outputs_still_feed_downstream_nodes() {
    let dir = tempfile::tempdir().unwrap();
    let calls = Arc::new(Calls::default());

    run_once(dir.path(), Arc::clone(&calls)).await;

    // wipe only the scaler's state so it must re-execute from cached inputs
    std::fs::remove_dir_all(dir.path().join("execution_state").join("scaler")).unwrap();

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

    assert_eq!(report.skipped, ["loader", "stats"]);
    assert_eq!(report.executed, ["scaler", "publish"]);
    // the scaler consumed the stats outputs loaded from disk, not a re-run
    assert_eq!(calls.mean.load(Ordering::SeqCst), 1);
    assert_eq!(calls.scale.load(Ordering::SeqCst), 2);
    let scaled = runner.output("scaler").unwrap()["scaled"]
        .as_array()
        .unwrap();
    assert_eq!(scaled.data, vec![20.0, 40.0, 60.0]);
}

#[tokio::test]
async fn disabling_cache_output_forces_re_execution() {
    let dir = tempfile::tempdir().unwrap();
    let calls = Arc::new(Calls::default());
    let yaml = format!(
        "general:\n  save_path: {}\nloader:\n  function: {{module: demo.data, function_name: load}}\n  output_storage_type: {{frame: csv, rows: json}}\n  cache_output: false\n",
        dir.path().display()
    );

    for _ in 0..2 {
        let mut registry = demo_registry(Arc::clone(&calls));
        let doc = parse_document(&yaml).unwrap();
        let mut runner = PipelineRunner::from_documents(
            &[doc],
            &BaseDefaults::new(),
            &OverrideSet::new(),
            &mut registry,
        )
        .unwrap();
        let report = runner.run().await.unwrap();
        assert_eq!(report.executed, ["loader"]);
    }
    // outputs were persisted both times but never used to skip
    assert_eq!(calls.load.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn marker_only_skip_feeding_data_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let calls = Arc::new(Calls::default());

    // a prior run left only a run-state marker for the loader
    let store = OutputStore::new(dir.path(), ',').unwrap();
    store.write_run_state("loader", chrono::Utc::now()).unwrap();

    let yaml = format!(
        "general:\n  save_path: {}\nloader:\n  function: {{module: demo.data, function_name: load}}\n  force_not_rerun: true\n\
         stats:\n  function: {{module: demo.data, function_name: mean}}\n  input_map:\n    loader: {{frame: 0}}\n",
        dir.path().display()
    );
    let mut registry = demo_registry(Arc::clone(&calls));
    let doc = parse_document(&yaml).unwrap();
    let mut runner = PipelineRunner::from_documents(
        &[doc],
        &BaseDefaults::new(),
        &OverrideSet::new(),
        &mut registry,
    )
    .unwrap();

    let err = runner.run().await.unwrap_err();
    assert!(matches!(
        err,
        RunnerError::Scheduler(SchedulerError::ForcedSkipFeedsDownstream { .. })
    ));
    assert_eq!(calls.load.load(Ordering::SeqCst), 0);
    assert_eq!(calls.mean.load(Ordering::SeqCst), 0);
}
