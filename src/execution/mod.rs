//! Pipeline execution engine

pub mod cancel;
pub mod engine;
pub mod executor;
pub mod runner;

pub use cancel::CancelHandle;
pub use engine::{EventHandler, ExecutionEngine, ExecutionEvent, RunOutcome};
pub use executor::{ExecutionResult, StepExecutor};
pub use runner::{NullSink, OutputSink, ProcessExit, ShellRunner, StepCommand, StepRunner};
