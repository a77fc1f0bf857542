//! Test: Trigger Filter - runs are only scheduled for matching pushes

use crate::helpers::*;
use localci::core::{ExecutionStatus, StepState};
use localci::execution::{ExecutionEvent, RunOutcome};

/// A push to another branch is a no-op, not a failure
#[tokio::test]
async fn test_push_to_feature_branch_is_noop() {
    let sandbox = Sandbox::new();
    let result = run_with_mock(&sandbox, APK_PIPELINE, "feature/login", apk_builder()).await;

    assert!(matches!(result.outcome, Ok(RunOutcome::Skipped)));
    assert_eq!(result.pipeline.state.status, ExecutionStatus::Skipped);
    assert!(result.pipeline.state.status.is_success());
    assert!(result.commands.is_empty());
    assert!(result.pipeline.executed_steps().is_empty());
    assert!(result
        .pipeline
        .steps()
        .all(|s| matches!(s.state(), StepState::Skipped { .. })));

    // No worker was provisioned
    assert!(!sandbox.workspaces().exists());
    assert!(matches!(
        result.events.as_slice(),
        [ExecutionEvent::PipelineSkipped { branch, .. }] if branch == "feature/login"
    ));
}

/// Without an `on:` section only pushes to main trigger a run
#[tokio::test]
async fn test_default_trigger_is_main() {
    let yaml = r#"
name: "Default trigger"
jobs:
  build:
    steps:
      - run: make
"#;
    let sandbox = Sandbox::new();

    let result = run_with_mock(&sandbox, yaml, "develop", MockRunner::new()).await;
    assert!(matches!(result.outcome, Ok(RunOutcome::Skipped)));

    let result = run_with_mock(&sandbox, yaml, "main", MockRunner::new()).await;
    assert_pipeline_completed(&result);
    assert_eq!(result.commands.len(), 1);
}

/// Branch patterns are globs
#[tokio::test]
async fn test_branch_globs() {
    let yaml = r#"
name: "Release builds"
on:
  push:
    branches: ["main", "release/*"]
jobs:
  build:
    steps:
      - run: make dist
"#;
    let sandbox = Sandbox::new();

    let result = run_with_mock(&sandbox, yaml, "release/1.4", MockRunner::new()).await;
    assert_pipeline_completed(&result);

    let result = run_with_mock(&sandbox, yaml, "hotfix/1.4", MockRunner::new()).await;
    assert!(matches!(result.outcome, Ok(RunOutcome::Skipped)));
    assert!(result.commands.is_empty());
}
