//! Test: the sample Android pipeline end to end

use crate::helpers::*;
use localci::core::FailureKind;
use localci::execution::{ExecutionEvent, RunOutcome};

/// Push to main, every step exits 0: the APK is published as `loader-apk`
#[tokio::test]
async fn test_push_to_main_publishes_apk() {
    let sandbox = Sandbox::new();
    let result = run_with_mock(&sandbox, APK_PIPELINE, "main", apk_builder()).await;

    assert_pipeline_completed(&result);
    assert_execution_order(
        &result,
        &[
            "build/checkout",
            "build/set-up-python",
            "build/install-dependencies",
            "build/create-distribution",
            "build/build-distribution",
            "build/build-apk",
            "build/upload-apk",
        ],
    );

    let artifacts = match &result.outcome {
        Ok(RunOutcome::Completed { artifacts }) => artifacts,
        other => panic!("Expected completed run, got {:?}", other),
    };
    assert_eq!(artifacts.len(), 1);
    assert_eq!(artifacts[0].name, "loader-apk");
    assert_eq!(artifacts[0].files.len(), 1);
    assert_eq!(artifacts[0].files[0].path, APK_PATH);
    assert_eq!(result.pipeline.state.artifacts, vec!["loader-apk"]);

    let published = sandbox
        .store()
        .manifest(result.pipeline.state.run_id, "loader-apk")
        .unwrap();
    assert_eq!(published.files, artifacts[0].files);
}

/// Six commands are spawned; the upload step is handled in-process
#[tokio::test]
async fn test_rendered_commands() {
    let sandbox = Sandbox::new();
    let result = run_with_mock(&sandbox, APK_PIPELINE, "main", apk_builder()).await;

    assert_eq!(result.commands.len(), 6);

    let checkout = &result.commands[0];
    assert!(checkout.script.contains("git -C"));
    assert!(checkout.script.contains(COMMIT));
    assert_eq!(checkout.shell, "bash");

    assert_eq!(result.commands[1].script, "python3.10 --version");

    let install = &result.commands[2].script;
    for package in [
        "build-essential",
        "libssl-dev",
        "libffi-dev",
        "zlib1g-dev",
        "libreadline-dev",
        "libncurses5-dev",
        "openjdk-17-jdk",
        "install --upgrade pip",
        "python-for-android",
    ] {
        assert!(install.contains(package), "install step lacks {}", package);
    }

    // create, build, apk: same distribution parameters each time
    let parameters = "--private . --dist_name=loader --bootstrap=sdl2 \
        --requirements=python3,kivy,kivymd,certifi --arch=arm64-v8a";
    for (command, subcommand) in result.commands[3..].iter().zip(["create", "build", "apk"]) {
        let expected = format!("cd app\np4a {} {}", subcommand, parameters);
        assert_eq!(command.script.trim_end(), expected);
    }

    for command in &result.commands {
        assert_eq!(command.env.get("CI").map(String::as_str), Some("true"));
        assert_eq!(
            command.env.get("LOCALCI_COMMIT").map(String::as_str),
            Some(COMMIT)
        );
        assert_eq!(
            command.env.get("PIP_DISABLE_PIP_VERSION_CHECK").map(String::as_str),
            Some("1")
        );
    }
}

/// A failing toolchain subcommand is a BuildFailure and stops the run there
#[tokio::test]
async fn test_toolchain_failure_is_build_failure() {
    let sandbox = Sandbox::new();
    let runner = apk_builder().fail_when("p4a build", 1);
    let result = run_with_mock(&sandbox, APK_PIPELINE, "main", runner).await;

    assert_failed_at(&result, "build/build-distribution", FailureKind::Build);
    assert_not_executed(&result, "build/build-apk");
    assert_not_executed(&result, "build/upload-apk");
    assert_eq!(result.commands.len(), 5);
}

/// Dependency installation fails: SetupFailure, later steps never run
#[tokio::test]
async fn test_dependency_failure_is_setup_failure() {
    let sandbox = Sandbox::new();
    let runner = apk_builder().fail_when("apt-get update", 100);
    let result = run_with_mock(&sandbox, APK_PIPELINE, "main", runner).await;

    assert_failed_at(&result, "build/install-dependencies", FailureKind::Setup);
    assert_not_executed(&result, "build/create-distribution");
    assert_not_executed(&result, "build/build-distribution");
    assert_not_executed(&result, "build/build-apk");
    assert_not_executed(&result, "build/upload-apk");
    assert_eq!(result.commands.len(), 3);

    let output = result
        .pipeline
        .step("build/install-dependencies")
        .and_then(|s| s.state().output())
        .unwrap();
    assert!(output.contains("exiting with 100"));

    assert!(result.pipeline.state.artifacts.is_empty());
    assert!(sandbox
        .store()
        .list(result.pipeline.state.run_id)
        .unwrap()
        .is_empty());
}

/// Build steps succeed but leave no APK: ArtifactNotFound on the upload step
#[tokio::test]
async fn test_missing_apk_is_artifact_not_found() {
    let sandbox = Sandbox::new();
    let result = run_with_mock(&sandbox, APK_PIPELINE, "main", MockRunner::new()).await;

    assert_failed_at(&result, "build/upload-apk", FailureKind::ArtifactNotFound);
    for step in [
        "build/checkout",
        "build/set-up-python",
        "build/install-dependencies",
        "build/create-distribution",
        "build/build-distribution",
        "build/build-apk",
    ] {
        assert!(matches!(
            result.pipeline.step(step).unwrap().state(),
            localci::StepState::Completed { .. }
        ));
    }
    assert!(sandbox
        .store()
        .list(result.pipeline.state.run_id)
        .unwrap()
        .is_empty());
}

/// Two runs on the same commit publish identical artifacts
#[tokio::test]
async fn test_rerun_on_same_commit_is_identical() {
    let sandbox = Sandbox::new();
    let first = run_with_mock(&sandbox, APK_PIPELINE, "main", apk_builder()).await;
    let second = run_with_mock(&sandbox, APK_PIPELINE, "main", apk_builder()).await;

    assert_pipeline_completed(&first);
    assert_pipeline_completed(&second);
    assert_ne!(first.pipeline.state.run_id, second.pipeline.state.run_id);

    let store = sandbox.store();
    let a = store.manifest(first.pipeline.state.run_id, "loader-apk").unwrap();
    let b = store.manifest(second.pipeline.state.run_id, "loader-apk").unwrap();
    assert!(a.same_contents(&b));
}

/// Event stream of a successful run ends with the publish and completion
#[tokio::test]
async fn test_artifact_events() {
    let sandbox = Sandbox::new();
    let result = run_with_mock(&sandbox, APK_PIPELINE, "main", apk_builder()).await;

    let staged = result
        .events
        .iter()
        .position(|e| matches!(e, ExecutionEvent::ArtifactStaged { name, .. } if name == "loader-apk"))
        .expect("artifact should be staged");
    let published = result
        .events
        .iter()
        .position(|e| matches!(e, ExecutionEvent::ArtifactPublished { name, files: 1, .. } if name == "loader-apk"))
        .expect("artifact should be published");
    assert!(staged < published);
    assert!(matches!(
        result.events.last(),
        Some(ExecutionEvent::PipelineCompleted { .. })
    ));
}
