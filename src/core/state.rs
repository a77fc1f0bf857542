//! Execution state models

use crate::core::error::FailureKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Overall pipeline execution status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionStatus {
    /// Pipeline has not started
    Pending,
    /// Pipeline is currently running
    Running,
    /// Every job succeeded and artifacts were published
    Completed,
    /// A step failed, the run was aborted
    Failed,
    /// The run was aborted by an operator
    Cancelled,
    /// The trigger did not match, nothing ran
    Skipped,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Pending => "Pending",
            ExecutionStatus::Running => "Running",
            ExecutionStatus::Completed => "Completed",
            ExecutionStatus::Failed => "Failed",
            ExecutionStatus::Cancelled => "Cancelled",
            ExecutionStatus::Skipped => "Skipped",
        }
    }

    /// Whether the run ended without a failure (a skipped run is not a failure)
    pub fn is_success(&self) -> bool {
        matches!(self, ExecutionStatus::Completed | ExecutionStatus::Skipped)
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecutionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Pending" => Ok(ExecutionStatus::Pending),
            "Running" => Ok(ExecutionStatus::Running),
            "Completed" => Ok(ExecutionStatus::Completed),
            "Failed" => Ok(ExecutionStatus::Failed),
            "Cancelled" => Ok(ExecutionStatus::Cancelled),
            "Skipped" => Ok(ExecutionStatus::Skipped),
            other => Err(format!("unknown execution status: {}", other)),
        }
    }
}

/// State of a single step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum StepState {
    /// Step has not been reached yet
    Pending,
    /// Step is currently running
    Running {
        started_at: DateTime<Utc>,
    },
    /// Step exited successfully
    Completed {
        output: String,
        started_at: DateTime<Utc>,
        completed_at: DateTime<Utc>,
    },
    /// Step failed and aborted the run
    Failed {
        error: String,
        kind: FailureKind,
        output: String,
        started_at: DateTime<Utc>,
        failed_at: DateTime<Utc>,
    },
    /// Step never ran because an earlier step failed
    Skipped {
        reason: String,
    },
}

impl StepState {
    /// Check if step is in a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StepState::Completed { .. } | StepState::Failed { .. } | StepState::Skipped { .. }
        )
    }

    /// Whether the step's process was ever started
    pub fn was_executed(&self) -> bool {
        matches!(
            self,
            StepState::Running { .. } | StepState::Completed { .. } | StepState::Failed { .. }
        )
    }

    /// Captured output of a finished step
    pub fn output(&self) -> Option<&str> {
        match self {
            StepState::Completed { output, .. } | StepState::Failed { output, .. } => Some(output),
            _ => None,
        }
    }
}

/// Overall pipeline state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineState {
    /// Unique run ID
    pub run_id: Uuid,

    /// Current execution status
    pub status: ExecutionStatus,

    /// Branch of the trigger event
    pub branch: Option<String>,

    /// Commit of the trigger event
    pub commit: Option<String>,

    /// When execution started
    pub started_at: Option<DateTime<Utc>>,

    /// When execution completed/failed
    pub completed_at: Option<DateTime<Utc>>,

    /// Total number of steps across all jobs
    pub total_steps: usize,

    /// Number of completed steps
    pub completed_steps: usize,

    /// Step that aborted the run, as `job/step`
    pub failed_step: Option<String>,

    /// Classification of the failure
    pub failure: Option<FailureKind>,

    /// Names of artifacts published by the run
    pub artifacts: Vec<String>,
}

impl PipelineState {
    /// Create a new pipeline state
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            status: ExecutionStatus::Pending,
            branch: None,
            commit: None,
            started_at: None,
            completed_at: None,
            total_steps: 0,
            completed_steps: 0,
            failed_step: None,
            failure: None,
            artifacts: Vec::new(),
        }
    }

    /// Mark pipeline as started
    pub fn start(&mut self, total_steps: usize, branch: &str, commit: &str) {
        self.status = ExecutionStatus::Running;
        self.started_at = Some(Utc::now());
        self.total_steps = total_steps;
        self.branch = Some(branch.to_string());
        self.commit = Some(commit.to_string());
    }

    /// Mark pipeline as skipped (trigger did not match)
    pub fn skip(&mut self, branch: &str, commit: &str) {
        let now = Utc::now();
        self.status = ExecutionStatus::Skipped;
        self.branch = Some(branch.to_string());
        self.commit = Some(commit.to_string());
        self.started_at = Some(now);
        self.completed_at = Some(now);
    }

    /// Record a finished step
    pub fn step_completed(&mut self) {
        self.completed_steps += 1;
    }

    /// Mark pipeline as completed
    pub fn complete(&mut self, artifacts: Vec<String>) {
        self.status = ExecutionStatus::Completed;
        self.completed_at = Some(Utc::now());
        self.artifacts = artifacts;
    }

    /// Mark pipeline as failed at the given step
    pub fn fail(&mut self, failed_step: Option<String>, kind: FailureKind) {
        self.status = if kind == FailureKind::Cancelled {
            ExecutionStatus::Cancelled
        } else {
            ExecutionStatus::Failed
        };
        self.completed_at = Some(Utc::now());
        self.failed_step = failed_step;
        self.failure = Some(kind);
    }

    /// Calculate progress (0.0 to 1.0)
    pub fn progress(&self) -> f64 {
        if self.total_steps == 0 {
            return 0.0;
        }
        self.completed_steps as f64 / self.total_steps as f64
    }
}

impl Default for PipelineState {
    fn default() -> Self {
        Self::new()
    }
}
