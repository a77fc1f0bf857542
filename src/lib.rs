//! localci - run CI pipelines locally: sequential shell steps, fail-fast, globbed artifacts

pub mod artifact;
pub mod cli;
pub mod core;
pub mod execution;
pub mod persistence;

// Re-export commonly used types
pub use artifact::{ArtifactManifest, ArtifactSpec, ArtifactStore};
pub use core::{
    ExecutionStatus, FailureKind, Pipeline, PipelineError, RunContext, Step, StepState,
    TriggerEvent,
};
pub use execution::{CancelHandle, ExecutionEngine, ExecutionEvent, RunOutcome, ShellRunner};
