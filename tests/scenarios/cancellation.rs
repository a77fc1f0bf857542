//! Test: Cancellation - an operator aborts the in-flight step

use crate::helpers::*;
use localci::core::{ExecutionStatus, FailureKind};
use localci::execution::CancelHandle;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

const SLOW_BUILD: &str = r#"
name: "Slow build"
jobs:
  build:
    steps:
      - name: Compile
        run: ./compile.sh
      - name: Upload
        uses: actions/upload-artifact@v4
        with:
          name: binary
          path: out/*
"#;

#[tokio::test]
async fn test_cancel_aborts_running_step() {
    let sandbox = Sandbox::new();
    let runner = MockRunner::new()
        .write_when("compile.sh", "out/binary", b"partial")
        .sleep_when("compile.sh", Duration::from_secs(30));

    let cancel = CancelHandle::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        trigger.cancel();
    });

    let started = Instant::now();
    let result = run_with_options(
        &sandbox,
        SLOW_BUILD,
        "main",
        runner,
        BTreeMap::new(),
        Some(cancel),
    )
    .await;

    assert!(started.elapsed() < Duration::from_secs(10));
    assert_failed_at(&result, "build/compile", FailureKind::Cancelled);
    assert_eq!(result.pipeline.state.status, ExecutionStatus::Cancelled);
    assert_not_executed(&result, "build/upload");
    assert!(sandbox
        .store()
        .list(result.pipeline.state.run_id)
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_cancel_before_start_runs_nothing() {
    let sandbox = Sandbox::new();
    let cancel = CancelHandle::new();
    cancel.cancel();

    let result = run_with_options(
        &sandbox,
        SLOW_BUILD,
        "main",
        MockRunner::new(),
        BTreeMap::new(),
        Some(cancel),
    )
    .await;

    assert_failed_at(&result, "build/compile", FailureKind::Cancelled);
    assert!(result.commands.is_empty());
}
