//! Test utility functions for localci scenarios

#![allow(dead_code)]

use async_trait::async_trait;
use localci::artifact::ArtifactStore;
use localci::core::config::PipelineConfig;
use localci::core::{
    ExecutionStatus, FailureKind, Pipeline, PipelineError, StepFailureReason, StepState,
    TriggerEvent,
};
use localci::execution::{
    CancelHandle, ExecutionEngine, ExecutionEvent, OutputSink, ProcessExit, RunOutcome,
    StepCommand, StepRunner,
};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

/// The sample Android pipeline shipped in `demos/`
pub const APK_PIPELINE: &str = include_str!("../../demos/android-apk.yml");

/// Where the build step of the sample pipeline leaves its APK
pub const APK_PATH: &str = "app/build/outputs/apk/debug/loader-0.1-arm64-v8a-debug.apk";

pub const COMMIT: &str = "4b825dc642cb6eb9a060e54bf8d69288fbee4904";

#[derive(Debug, Clone)]
enum Effect {
    Exit(i32),
    Write { path: String, contents: Vec<u8> },
    Sleep(Duration),
}

/// Mock runner that reacts to substrings of the rendered script
///
/// Every rule whose needle occurs in the script applies, in insertion
/// order. Scripts exit 0 unless an `Exit` rule says otherwise.
#[derive(Clone, Default)]
pub struct MockRunner {
    rules: Vec<(String, Effect)>,
    seen: Arc<Mutex<Vec<StepCommand>>>,
}

impl MockRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_when(mut self, needle: &str, code: i32) -> Self {
        self.rules.push((needle.to_string(), Effect::Exit(code)));
        self
    }

    pub fn write_when(mut self, needle: &str, path: &str, contents: &[u8]) -> Self {
        self.rules.push((
            needle.to_string(),
            Effect::Write {
                path: path.to_string(),
                contents: contents.to_vec(),
            },
        ));
        self
    }

    pub fn sleep_when(mut self, needle: &str, duration: Duration) -> Self {
        self.rules.push((needle.to_string(), Effect::Sleep(duration)));
        self
    }

    /// Handle on the commands this runner receives
    pub fn commands(&self) -> Arc<Mutex<Vec<StepCommand>>> {
        self.seen.clone()
    }
}

#[async_trait]
impl StepRunner for MockRunner {
    async fn run(
        &self,
        command: &StepCommand,
        sink: &dyn OutputSink,
    ) -> Result<ProcessExit, StepFailureReason> {
        self.seen.lock().unwrap().push(command.clone());
        if let Some(first) = command.script.lines().next() {
            sink.on_line(&format!("+ {}", first));
        }

        for (needle, effect) in &self.rules {
            if !command.script.contains(needle.as_str()) {
                continue;
            }
            match effect {
                Effect::Exit(code) => {
                    sink.on_line(&format!("mock: exiting with {}", code));
                    return Ok(ProcessExit { code: Some(*code) });
                }
                Effect::Write { path, contents } => {
                    let target = command.workdir.join(path);
                    std::fs::create_dir_all(target.parent().unwrap()).unwrap();
                    std::fs::write(target, contents).unwrap();
                }
                Effect::Sleep(duration) => tokio::time::sleep(*duration).await,
            }
        }

        Ok(ProcessExit { code: Some(0) })
    }
}

/// Runner that builds the sample APK successfully
pub fn apk_builder() -> MockRunner {
    MockRunner::new().write_when("p4a apk", APK_PATH, b"PK\x03\x04 loader apk")
}

/// Scratch directories for one test
pub struct Sandbox {
    pub dir: TempDir,
}

impl Sandbox {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().unwrap(),
        }
    }

    pub fn store(&self) -> ArtifactStore {
        ArtifactStore::new(self.dir.path().join("artifacts"))
    }

    pub fn workspaces(&self) -> PathBuf {
        self.dir.path().join("workspaces")
    }

    pub fn engine<R: StepRunner>(&self, runner: R) -> ExecutionEngine<R> {
        ExecutionEngine::new(runner, self.store())
            .with_workspace_root(self.workspaces())
            .with_source_dir(self.dir.path())
    }
}

/// Test result containing the pipeline and what happened during the run
pub struct TestResult {
    pub pipeline: Pipeline,
    pub outcome: Result<RunOutcome, PipelineError>,
    pub commands: Vec<StepCommand>,
    pub events: Vec<ExecutionEvent>,
}

/// Load a pipeline from YAML
pub fn load(yaml: &str) -> Pipeline {
    PipelineConfig::from_yaml(yaml).unwrap().to_pipeline().unwrap()
}

/// Run `yaml` for a push to `branch` with the mock runner
pub async fn run_with_mock(
    sandbox: &Sandbox,
    yaml: &str,
    branch: &str,
    runner: MockRunner,
) -> TestResult {
    run_with_options(sandbox, yaml, branch, runner, BTreeMap::new(), None).await
}

pub async fn run_with_options(
    sandbox: &Sandbox,
    yaml: &str,
    branch: &str,
    runner: MockRunner,
    overrides: BTreeMap<String, String>,
    cancel: Option<CancelHandle>,
) -> TestResult {
    let mut pipeline = load(yaml);
    let commands = runner.commands();
    let events = Arc::new(Mutex::new(Vec::new()));
    let recorded = events.clone();

    let mut engine = sandbox.engine(runner).with_variables(overrides);
    if let Some(cancel) = cancel {
        engine = engine.with_cancel(cancel);
    }
    engine.add_event_handler(move |event| recorded.lock().unwrap().push(event));

    let outcome = engine
        .execute(&mut pipeline, &TriggerEvent::push(branch, COMMIT))
        .await;

    let commands = commands.lock().unwrap().clone();
    let events = events.lock().unwrap().clone();
    TestResult {
        pipeline,
        outcome,
        commands,
        events,
    }
}

/// Assert the run finished successfully
pub fn assert_pipeline_completed(result: &TestResult) {
    assert!(
        result.outcome.is_ok(),
        "Expected success, got {:?}",
        result.outcome.as_ref().err()
    );
    assert_eq!(result.pipeline.state.status, ExecutionStatus::Completed);
}

/// Assert the run failed with `kind` at `step_id`
pub fn assert_failed_at(result: &TestResult, step_id: &str, kind: FailureKind) {
    let err = result
        .outcome
        .as_ref()
        .err()
        .unwrap_or_else(|| panic!("Expected failure at {}", step_id));
    assert_eq!(err.kind(), kind, "unexpected error: {}", err);
    assert_eq!(err.step(), Some(step_id));
    assert_eq!(result.pipeline.state.failed_step.as_deref(), Some(step_id));
    assert_eq!(result.pipeline.state.failure, Some(kind));

    match result.pipeline.step(step_id).map(|s| s.state()) {
        Some(StepState::Failed { kind: recorded, .. }) => assert_eq!(*recorded, kind),
        other => panic!("Step {} should be failed, is {:?}", step_id, other),
    }
}

/// Assert exactly these steps started, in this order
pub fn assert_execution_order(result: &TestResult, expected: &[&str]) {
    assert_eq!(result.pipeline.executed_steps(), expected);
}

/// Assert a step never started
pub fn assert_not_executed(result: &TestResult, step_id: &str) {
    let step = result
        .pipeline
        .step(step_id)
        .unwrap_or_else(|| panic!("Step {} not found", step_id));
    assert!(
        !step.state().was_executed(),
        "Step {} should not have run, is {:?}",
        step_id,
        step.state()
    );
}
