//! Worker image descriptors and per-job workers
//!
//! A worker is provisioned fresh for every job of every run: a new, empty
//! workspace directory plus an explicit image descriptor. Nothing is read
//! from ambient state except the host environment inherited by processes.

use crate::core::TriggerEvent;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Shell used to run step scripts when a job does not name one
pub const DEFAULT_SHELL: &str = "sh";

/// Versioned description of the environment a job runs on
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerImage {
    pub name: String,
    pub version: String,
    pub shell: String,
}

impl WorkerImage {
    /// Resolve a `runs-on` label such as `ubuntu-latest` or `ubuntu-22.04`
    pub fn resolve(runs_on: &str, shell: Option<&str>) -> Self {
        let shell = shell.unwrap_or(DEFAULT_SHELL).to_string();
        match runs_on.rsplit_once('-') {
            Some((name, version)) if !name.is_empty() && !version.is_empty() => Self {
                name: name.to_string(),
                version: version.to_string(),
                shell,
            },
            _ => Self {
                name: runs_on.to_string(),
                version: "host".to_string(),
                shell,
            },
        }
    }

    /// Label as written in the pipeline
    pub fn label(&self) -> String {
        if self.version == "host" {
            self.name.clone()
        } else {
            format!("{}-{}", self.name, self.version)
        }
    }
}

/// An isolated execution environment for one job
#[derive(Debug, Clone)]
pub struct Worker {
    image: WorkerImage,
    workspace: PathBuf,
    source: PathBuf,
}

impl Worker {
    /// Create the workspace `<root>/<run-id>/<job-id>`
    ///
    /// Fails if the directory already exists and is not empty, so a run
    /// never inherits files from another one.
    pub fn provision(
        root: &Path,
        run_id: Uuid,
        job_id: &str,
        image: WorkerImage,
        source: &Path,
    ) -> std::io::Result<Self> {
        let workspace = root.join(run_id.to_string()).join(job_id);
        if workspace.exists() && std::fs::read_dir(&workspace)?.next().is_some() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::AlreadyExists,
                format!("workspace {} is not empty", workspace.display()),
            ));
        }
        std::fs::create_dir_all(&workspace)?;

        let workspace = workspace.canonicalize()?;
        let source = source.canonicalize().unwrap_or_else(|_| source.to_path_buf());

        Ok(Self {
            image,
            workspace,
            source,
        })
    }

    pub fn image(&self) -> &WorkerImage {
        &self.image
    }

    pub fn workspace(&self) -> &Path {
        &self.workspace
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    /// Environment every step process of this worker receives
    pub fn environment(&self, run_id: Uuid, trigger: &TriggerEvent) -> BTreeMap<String, String> {
        let mut env = BTreeMap::new();
        env.insert("CI".to_string(), "true".to_string());
        env.insert("LOCALCI".to_string(), "true".to_string());
        env.insert("LOCALCI_RUN_ID".to_string(), run_id.to_string());
        env.insert("LOCALCI_BRANCH".to_string(), trigger.branch.clone());
        env.insert("LOCALCI_COMMIT".to_string(), trigger.commit.clone());
        env.insert("LOCALCI_WORKSPACE".to_string(), self.workspace.display().to_string());
        env.insert("LOCALCI_IMAGE".to_string(), self.image.label());
        env
    }

    /// Remove the workspace
    pub fn discard(&self) -> std::io::Result<()> {
        std::fs::remove_dir_all(&self.workspace)
    }
}
