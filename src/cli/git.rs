//! Trigger event details from a local git checkout

use anyhow::{bail, Result};
use std::path::Path;
use tokio::process::Command;
use tracing::debug;

async fn git(source: &Path, args: &[&str]) -> Option<String> {
    let output = Command::new("git")
        .arg("-C")
        .arg(source)
        .args(args)
        .output()
        .await
        .ok()?;

    if !output.status.success() {
        debug!(
            "git {} failed: {}",
            args.join(" "),
            String::from_utf8_lossy(&output.stderr).trim()
        );
        return None;
    }

    let value = String::from_utf8_lossy(&output.stdout).trim().to_string();
    (!value.is_empty()).then_some(value)
}

/// Branch checked out in `source`
///
/// A detached HEAD, a directory outside any repository or a missing `git`
/// is an error: the trigger filter must not see an invented branch.
pub async fn current_branch(source: &Path) -> Result<String> {
    match git(source, &["rev-parse", "--abbrev-ref", "HEAD"]).await {
        Some(branch) if branch != "HEAD" => Ok(branch),
        Some(_) => bail!(
            "{} has a detached HEAD; pass --branch to name the pushed branch",
            source.display()
        ),
        None => bail!(
            "cannot determine the branch checked out in {}; pass --branch",
            source.display()
        ),
    }
}

/// Full SHA for `rev`, or `rev` unchanged outside a repository
pub async fn resolve_commit(source: &Path, rev: &str) -> String {
    let spec = format!("{}^{{commit}}", rev);
    git(source, &["rev-parse", "--verify", &spec])
        .await
        .unwrap_or_else(|| rev.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unknown_branch_requires_flag() {
        let dir = tempfile::tempdir().unwrap();
        let err = current_branch(dir.path()).await.unwrap_err();
        assert!(err.to_string().contains("--branch"));
    }

    #[tokio::test]
    async fn test_outside_repository_keeps_rev() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(resolve_commit(dir.path(), "HEAD").await, "HEAD");
    }
}
