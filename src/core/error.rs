//! Failure taxonomy for pipeline runs

use crate::artifact::StoreError;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Why a single step did not succeed
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StepFailureReason {
    #[error("exited with code {0}")]
    ExitCode(i32),

    #[error("terminated by signal")]
    Signal,

    #[error("failed to spawn: {0}")]
    Spawn(String),

    #[error("timed out after {0} seconds")]
    Timeout(u64),

    #[error("{0}")]
    Render(String),
}

/// Error that aborts a pipeline run
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Environment or tool provisioning step failed
    #[error("setup failed at step '{step}': {reason}")]
    SetupFailure {
        step: String,
        reason: StepFailureReason,
    },

    /// Toolchain invocation step failed
    #[error("build failed at step '{step}': {reason}")]
    BuildFailure {
        step: String,
        reason: StepFailureReason,
    },

    /// Upload step matched no files
    #[error("artifact '{artifact}' not found at step '{step}': no files matched {}", .patterns.join(", "))]
    ArtifactNotFound {
        step: String,
        artifact: String,
        patterns: Vec<String>,
    },

    #[error("run cancelled during step '{step}'")]
    Cancelled { step: String },

    /// The worker workspace could not be created
    #[error("failed to provision worker for job '{job}': {source}")]
    Provision {
        job: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to store artifacts: {0}")]
    Store(#[from] StoreError),
}

impl PipelineError {
    /// Classification used in run history and CLI output
    pub fn kind(&self) -> FailureKind {
        match self {
            PipelineError::SetupFailure { .. } | PipelineError::Provision { .. } => FailureKind::Setup,
            PipelineError::BuildFailure { .. } => FailureKind::Build,
            PipelineError::ArtifactNotFound { .. } => FailureKind::ArtifactNotFound,
            PipelineError::Cancelled { .. } => FailureKind::Cancelled,
            PipelineError::Store(_) => FailureKind::Store,
        }
    }

    /// Qualified id of the step that failed, if a step did
    pub fn step(&self) -> Option<&str> {
        match self {
            PipelineError::SetupFailure { step, .. }
            | PipelineError::BuildFailure { step, .. }
            | PipelineError::ArtifactNotFound { step, .. }
            | PipelineError::Cancelled { step } => Some(step),
            PipelineError::Provision { .. } | PipelineError::Store(_) => None,
        }
    }
}

/// Failure classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureKind {
    Setup,
    Build,
    ArtifactNotFound,
    Cancelled,
    Store,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Setup => "SetupFailure",
            FailureKind::Build => "BuildFailure",
            FailureKind::ArtifactNotFound => "ArtifactNotFound",
            FailureKind::Cancelled => "Cancelled",
            FailureKind::Store => "StoreFailure",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "SetupFailure" => Some(FailureKind::Setup),
            "BuildFailure" => Some(FailureKind::Build),
            "ArtifactNotFound" => Some(FailureKind::ArtifactNotFound),
            "Cancelled" => Some(FailureKind::Cancelled),
            "StoreFailure" => Some(FailureKind::Store),
            _ => None,
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
