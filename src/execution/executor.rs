//! Step executor - runs one step command with timeout and cancellation

use crate::{
    core::StepFailureReason,
    execution::{CancelHandle, OutputSink, StepCommand, StepRunner},
};
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{error, info, warn};

/// Result of executing a step
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionResult {
    /// Process exited with status 0
    Success { output: String },
    /// Process failed, could not start, or ran out of time
    Failed {
        reason: StepFailureReason,
        output: String,
    },
    /// Operator cancelled the run while the step was running
    Cancelled { output: String },
}

/// Forwards lines to an inner sink and keeps a copy
struct CapturingSink<'a> {
    inner: &'a dyn OutputSink,
    captured: Mutex<String>,
}

impl<'a> CapturingSink<'a> {
    fn new(inner: &'a dyn OutputSink) -> Self {
        Self {
            inner,
            captured: Mutex::new(String::new()),
        }
    }

    fn take(&self) -> String {
        match self.captured.lock() {
            Ok(mut captured) => std::mem::take(&mut *captured),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        }
    }
}

impl OutputSink for CapturingSink<'_> {
    fn on_line(&self, line: &str) {
        if let Ok(mut captured) = self.captured.lock() {
            captured.push_str(line);
            captured.push('\n');
        }
        self.inner.on_line(line);
    }
}

/// Executes a single step command
pub struct StepExecutor<R> {
    runner: R,
}

impl<R: StepRunner> StepExecutor<R> {
    pub fn new(runner: R) -> Self {
        Self { runner }
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    /// Run `command` to completion
    ///
    /// `limit` bounds the wait; `None` waits as long as the process runs.
    /// A timeout or cancellation drops the runner future, which kills the
    /// process. No retry is attempted.
    pub async fn execute(
        &self,
        command: &StepCommand,
        limit: Option<Duration>,
        sink: &dyn OutputSink,
        cancel: &CancelHandle,
    ) -> ExecutionResult {
        if cancel.is_cancelled() {
            return ExecutionResult::Cancelled {
                output: String::new(),
            };
        }

        info!("Executing step: {}", command.step_id);
        let capture = CapturingSink::new(sink);

        let bounded = async {
            let run = self.runner.run(command, &capture);
            match limit {
                Some(limit) => timeout(limit, run).await.map_err(|_| limit),
                None => Ok(run.await),
            }
        };

        let result = tokio::select! {
            result = bounded => Some(result),
            _ = cancel.cancelled() => None,
        };

        let output = capture.take();
        match result {
            None => {
                warn!("Step {} cancelled", command.step_id);
                ExecutionResult::Cancelled { output }
            }
            Some(Err(limit)) => {
                error!("Timeout for step {} after {}s", command.step_id, limit.as_secs());
                ExecutionResult::Failed {
                    reason: StepFailureReason::Timeout(limit.as_secs()),
                    output,
                }
            }
            Some(Ok(Err(reason))) => {
                error!("Step {} could not run: {}", command.step_id, reason);
                ExecutionResult::Failed { reason, output }
            }
            Some(Ok(Ok(exit))) => match exit.failure_reason() {
                None => {
                    info!("Step {} completed successfully", command.step_id);
                    ExecutionResult::Success { output }
                }
                Some(reason) => {
                    error!("Step {} failed: {}", command.step_id, reason);
                    ExecutionResult::Failed { reason, output }
                }
            },
        }
    }
}
