//! Test: Artifacts - glob collection, staging and publication

use crate::helpers::*;
use localci::core::FailureKind;
use localci::execution::RunOutcome;

const TWO_ARTIFACTS: &str = r#"
name: "Reports"
jobs:
  build:
    steps:
      - name: Build
        run: ./build.sh
      - name: Upload binaries
        uses: actions/upload-artifact@v4
        with:
          name: binaries
          path: |
            dist/*.tar.gz
            dist/*.zip
      - name: Upload reports
        uses: actions/upload-artifact@v4
        with:
          name: reports
          path: reports
"#;

#[tokio::test]
async fn test_every_match_is_published() {
    let sandbox = Sandbox::new();
    let runner = MockRunner::new()
        .write_when("build.sh", "dist/app.tar.gz", b"tarball")
        .write_when("build.sh", "dist/app.zip", b"zip")
        .write_when("build.sh", "dist/notes.txt", b"not matched")
        .write_when("build.sh", "reports/junit/results.xml", b"<testsuite/>")
        .write_when("build.sh", "reports/coverage.txt", b"97%");
    let result = run_with_mock(&sandbox, TWO_ARTIFACTS, "main", runner).await;

    assert_pipeline_completed(&result);
    let artifacts = match &result.outcome {
        Ok(RunOutcome::Completed { artifacts }) => artifacts.clone(),
        other => panic!("Expected completed run, got {:?}", other),
    };

    let paths = |name: &str| -> Vec<String> {
        artifacts
            .iter()
            .find(|m| m.name == name)
            .unwrap()
            .files
            .iter()
            .map(|f| f.path.clone())
            .collect()
    };
    assert_eq!(paths("binaries"), vec!["dist/app.tar.gz", "dist/app.zip"]);
    assert_eq!(
        paths("reports"),
        vec!["reports/coverage.txt", "reports/junit/results.xml"]
    );

    let dest = sandbox.dir.path().join("download");
    let written = sandbox
        .store()
        .download(result.pipeline.state.run_id, "reports", &dest)
        .unwrap();
    assert_eq!(written.len(), 2);
    assert_eq!(
        std::fs::read(dest.join("reports/junit/results.xml")).unwrap(),
        b"<testsuite/>"
    );
}

/// A later missing artifact discards the ones already staged
#[tokio::test]
async fn test_nothing_published_when_a_later_upload_fails() {
    let sandbox = Sandbox::new();
    let runner = MockRunner::new().write_when("build.sh", "dist/app.zip", b"zip");
    let result = run_with_mock(&sandbox, TWO_ARTIFACTS, "main", runner).await;

    assert_failed_at(&result, "build/upload-reports", FailureKind::ArtifactNotFound);
    let store = sandbox.store();
    assert!(store.list(result.pipeline.state.run_id).unwrap().is_empty());
    assert!(!store
        .root()
        .join(".staging")
        .join(result.pipeline.state.run_id.to_string())
        .exists());
}
