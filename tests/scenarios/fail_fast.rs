//! Test: Fail Fast - the first failing step aborts the run

use crate::helpers::*;
use localci::core::{ExecutionStatus, FailureKind, PipelineError, StepFailureReason, StepState};

const THREE_STEPS: &str = r#"
name: "Three steps"
jobs:
  build:
    steps:
      - name: Lint
        run: make lint
      - name: Test
        run: make test
      - name: Package
        run: make package
"#;

/// Step i fails: steps i+1..n never start
#[tokio::test]
async fn test_later_steps_never_run() {
    let sandbox = Sandbox::new();
    let runner = MockRunner::new().fail_when("make test", 2);
    let result = run_with_mock(&sandbox, THREE_STEPS, "main", runner).await;

    assert_failed_at(&result, "build/test", FailureKind::Build);
    assert_execution_order(&result, &["build/lint", "build/test"]);
    assert_not_executed(&result, "build/package");
    assert!(matches!(
        result.pipeline.step("build/package").unwrap().state(),
        StepState::Skipped { .. }
    ));
    assert_eq!(result.commands.len(), 2);
    assert_eq!(result.pipeline.state.status, ExecutionStatus::Failed);
    assert_eq!(result.pipeline.state.completed_steps, 1);
    assert!(matches!(
        result.outcome,
        Err(PipelineError::BuildFailure {
            reason: StepFailureReason::ExitCode(2),
            ..
        })
    ));
}

/// A failing job stops every later job
#[tokio::test]
async fn test_failure_stops_later_jobs() {
    let yaml = r#"
name: "Two jobs"
jobs:
  prepare:
    steps:
      - name: Fetch
        phase: setup
        run: ./fetch.sh
  build:
    steps:
      - name: Compile
        run: make
"#;
    let sandbox = Sandbox::new();
    let runner = MockRunner::new().fail_when("fetch.sh", 1);
    let result = run_with_mock(&sandbox, yaml, "main", runner).await;

    assert_failed_at(&result, "prepare/fetch", FailureKind::Setup);
    assert_not_executed(&result, "build/compile");
    // The second job never got a workspace
    let run_dir = sandbox
        .workspaces()
        .join(result.pipeline.state.run_id.to_string());
    assert!(run_dir.join("prepare").exists());
    assert!(!run_dir.join("build").exists());
}

/// A step that outlives its timeout fails with the step's phase
#[tokio::test]
async fn test_timeout_fails_the_step() {
    let yaml = r#"
name: "Slow"
jobs:
  build:
    steps:
      - name: Hang
        timeout-secs: 1
        run: ./hang.sh
      - name: After
        run: "true"
"#;
    let sandbox = Sandbox::new();
    let runner = MockRunner::new().sleep_when("hang.sh", std::time::Duration::from_secs(30));
    let started = std::time::Instant::now();
    let result = run_with_mock(&sandbox, yaml, "main", runner).await;

    assert!(started.elapsed() < std::time::Duration::from_secs(10));
    assert_failed_at(&result, "build/hang", FailureKind::Build);
    assert!(matches!(
        result.outcome,
        Err(PipelineError::BuildFailure {
            reason: StepFailureReason::Timeout(1),
            ..
        })
    ));
    assert_not_executed(&result, "build/after");
}

/// `uses` steps fail as setup, `run` steps as build
#[tokio::test]
async fn test_action_failure_is_setup_failure() {
    let sandbox = Sandbox::new();
    let runner = MockRunner::new().fail_when("--version", 127);
    let result = run_with_mock(&sandbox, APK_PIPELINE, "main", runner).await;

    assert_failed_at(&result, "build/set-up-python", FailureKind::Setup);
    assert_execution_order(&result, &["build/checkout", "build/set-up-python"]);
}
