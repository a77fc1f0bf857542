//! Test: Variable Substitution - run context and environment layering

use crate::helpers::*;
use localci::core::{FailureKind, PipelineError, StepFailureReason};
use std::collections::BTreeMap;

const TEMPLATED: &str = r#"
name: "Templated"
variables:
  flavor: debug
env:
  SCOPE: pipeline
  GRADLE_OPTS: "-Xmx2g"
actions:
  local/buildozer:
    phase: build
    inputs:
      target: android
    run: "buildozer {{ inputs.target }} {{ inputs.mode }}"
jobs:
  build:
    runs-on: ubuntu-22.04
    env:
      SCOPE: job
    steps:
      - name: Show
        env:
          SCOPE: step
          OUT: "{{ workspace }}/out"
        run: "echo {{ flavor }} {{ trigger.branch }} {{ run.id }}"
      - name: Package
        uses: local/buildozer@v1
        with:
          mode: "{{ flavor }}"
"#;

#[tokio::test]
async fn test_context_variables_are_rendered() {
    let sandbox = Sandbox::new();
    let result = run_with_mock(&sandbox, TEMPLATED, "main", MockRunner::new()).await;
    assert_pipeline_completed(&result);

    let show = &result.commands[0];
    assert_eq!(
        show.script,
        format!("echo debug main {}", result.pipeline.state.run_id)
    );
    assert_eq!(show.env.get("SCOPE").map(String::as_str), Some("step"));
    assert_eq!(show.env.get("GRADLE_OPTS").map(String::as_str), Some("-Xmx2g"));
    assert_eq!(
        show.env.get("OUT").cloned(),
        Some(format!("{}/out", show.workdir.display()))
    );
    assert_eq!(
        show.env.get("LOCALCI_IMAGE").map(String::as_str),
        Some("ubuntu-22.04")
    );
}

#[tokio::test]
async fn test_custom_action_inputs() {
    let sandbox = Sandbox::new();
    let result = run_with_mock(&sandbox, TEMPLATED, "main", MockRunner::new()).await;

    // `with` values are rendered too; action defaults fill the rest
    assert_eq!(result.commands[1].script, "buildozer android debug");
    assert_eq!(result.commands[1].env.get("SCOPE").map(String::as_str), Some("job"));
}

#[tokio::test]
async fn test_overrides_take_precedence() {
    let sandbox = Sandbox::new();
    let mut overrides = BTreeMap::new();
    overrides.insert("flavor".to_string(), "release".to_string());

    let result = run_with_options(
        &sandbox,
        TEMPLATED,
        "main",
        MockRunner::new(),
        overrides,
        None,
    )
    .await;

    assert!(result.commands[0].script.starts_with("echo release main"));
}

#[tokio::test]
async fn test_unknown_variable_fails_the_step() {
    let yaml = r#"
name: "Typo"
jobs:
  build:
    steps:
      - name: Prepare
        phase: setup
        run: "mkdir -p {{ outdir }}"
      - name: Build
        run: make
"#;
    let sandbox = Sandbox::new();
    let result = run_with_mock(&sandbox, yaml, "main", MockRunner::new()).await;

    assert_failed_at(&result, "build/prepare", FailureKind::Setup);
    assert!(matches!(
        &result.outcome,
        Err(PipelineError::SetupFailure {
            reason: StepFailureReason::Render(message),
            ..
        }) if message.contains("outdir")
    ));
    assert!(result.commands.is_empty());
    assert_not_executed(&result, "build/build");
}
