//! Main execution engine - orchestrates the entire pipeline run

use crate::{
    artifact::{ArtifactManifest, ArtifactSpec, ArtifactStore, StagedArtifact},
    core::{
        ExecutionStatus, FailureKind, Job, Pipeline, PipelineError, RunContext, Step, StepAction,
        StepFailureReason, StepState, TriggerEvent, Worker,
    },
    execution::{
        CancelHandle, ExecutionResult, OutputSink, StepCommand, StepExecutor, StepRunner,
    },
};
use chrono::Utc;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Events that can occur during pipeline execution
#[derive(Debug, Clone)]
pub enum ExecutionEvent {
    PipelineStarted {
        run_id: Uuid,
        pipeline_name: String,
        total_steps: usize,
    },
    /// The trigger event did not match; nothing ran
    PipelineSkipped {
        run_id: Uuid,
        pipeline_name: String,
        branch: String,
    },
    JobStarted {
        job_id: String,
        image: String,
        workspace: PathBuf,
    },
    StepStarted {
        step_id: String,
        name: String,
    },
    StepOutput {
        step_id: String,
        line: String,
    },
    StepCompleted {
        step_id: String,
    },
    StepFailed {
        step_id: String,
        kind: FailureKind,
        error: String,
    },
    ArtifactStaged {
        step_id: String,
        name: String,
        files: usize,
    },
    ArtifactPublished {
        name: String,
        files: usize,
        size: u64,
    },
    PipelineCompleted {
        run_id: Uuid,
        status: ExecutionStatus,
    },
}

/// Type for event handlers
pub type EventHandler = Arc<dyn Fn(ExecutionEvent) + Send + Sync>;

/// How a run ended when it did not fail
#[derive(Debug, Clone)]
pub enum RunOutcome {
    /// Trigger did not match
    Skipped,
    /// Every job succeeded; the published artifacts
    Completed { artifacts: Vec<ArtifactManifest> },
}

/// Turns step output lines into `StepOutput` events
struct EventSink<'a> {
    step_id: &'a str,
    handlers: &'a [EventHandler],
}

impl OutputSink for EventSink<'_> {
    fn on_line(&self, line: &str) {
        for handler in self.handlers {
            handler(ExecutionEvent::StepOutput {
                step_id: self.step_id.to_string(),
                line: line.to_string(),
            });
        }
    }
}

type StepError = (PipelineError, String);

/// Main pipeline execution engine
///
/// Jobs run one after another, each on a freshly provisioned worker, and
/// steps inside a job run strictly in order. The first failing step aborts
/// the whole run. Staged artifacts are only published once every job
/// succeeded.
pub struct ExecutionEngine<R> {
    executor: StepExecutor<R>,
    store: ArtifactStore,
    workspace_root: PathBuf,
    source_dir: PathBuf,
    overrides: BTreeMap<String, String>,
    clean_workspaces: bool,
    cancel: CancelHandle,
    event_handlers: Vec<EventHandler>,
}

impl<R: StepRunner> ExecutionEngine<R> {
    pub fn new(runner: R, store: ArtifactStore) -> Self {
        Self {
            executor: StepExecutor::new(runner),
            store,
            workspace_root: std::env::temp_dir().join("localci").join("workspaces"),
            source_dir: PathBuf::from("."),
            overrides: BTreeMap::new(),
            clean_workspaces: false,
            cancel: CancelHandle::new(),
            event_handlers: Vec::new(),
        }
    }

    /// Directory under which `<run-id>/<job-id>` workspaces are created
    pub fn with_workspace_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.workspace_root = root.into();
        self
    }

    /// Repository the checkout action exports from
    pub fn with_source_dir(mut self, source: impl Into<PathBuf>) -> Self {
        self.source_dir = source.into();
        self
    }

    /// Template variables that take precedence over the pipeline's own
    pub fn with_variables(mut self, overrides: BTreeMap<String, String>) -> Self {
        self.overrides = overrides;
        self
    }

    /// Remove each workspace once its job is done
    pub fn with_clean_workspaces(mut self, clean: bool) -> Self {
        self.clean_workspaces = clean;
        self
    }

    pub fn with_cancel(mut self, cancel: CancelHandle) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Add an event handler
    pub fn add_event_handler<F>(&mut self, handler: F)
    where
        F: Fn(ExecutionEvent) + Send + Sync + 'static,
    {
        self.event_handlers.push(Arc::new(handler));
    }

    /// Emit an event to all handlers
    fn emit(&self, event: ExecutionEvent) {
        for handler in &self.event_handlers {
            handler(event.clone());
        }
    }

    /// Execute the pipeline for `trigger`
    ///
    /// Returns `Skipped` when the trigger filter does not match. Any step
    /// failure is returned as the error after the remaining steps were
    /// marked skipped and staged artifacts discarded; `pipeline.state`
    /// carries the final status either way.
    pub async fn execute(
        &self,
        pipeline: &mut Pipeline,
        trigger: &TriggerEvent,
    ) -> Result<RunOutcome, PipelineError> {
        let run_id = pipeline.state.run_id;

        if !pipeline.trigger().matches(trigger) {
            info!(
                "Pipeline '{}' not triggered by push to '{}' (branches: {})",
                pipeline.name,
                trigger.branch,
                pipeline.trigger().push_branches().join(", ")
            );
            pipeline.state.skip(&trigger.branch, &trigger.commit);
            pipeline.skip_pending("trigger did not match");
            self.emit(ExecutionEvent::PipelineSkipped {
                run_id,
                pipeline_name: pipeline.name.clone(),
                branch: trigger.branch.clone(),
            });
            return Ok(RunOutcome::Skipped);
        }

        for warning in pipeline.lint() {
            warn!("{}", warning);
        }

        info!(
            "Starting pipeline execution: {} ({}) on {}@{}",
            pipeline.name, run_id, trigger.branch, trigger.commit
        );
        let total_steps = pipeline.total_steps();
        pipeline
            .state
            .start(total_steps, &trigger.branch, &trigger.commit);
        self.emit(ExecutionEvent::PipelineStarted {
            run_id,
            pipeline_name: pipeline.name.clone(),
            total_steps,
        });

        let mut staged = Vec::new();
        let result = match self.run_jobs(pipeline, trigger, &mut staged).await {
            Ok(()) => self.publish(run_id, staged),
            Err(e) => Err(e),
        };

        match result {
            Ok(manifests) => {
                let names = manifests.iter().map(|m| m.name.clone()).collect();
                pipeline.state.complete(names);
                info!("Pipeline execution finished: {} - Completed", pipeline.name);
                self.emit(ExecutionEvent::PipelineCompleted {
                    run_id,
                    status: pipeline.state.status,
                });
                Ok(RunOutcome::Completed {
                    artifacts: manifests,
                })
            }
            Err(e) => Err(self.abort(pipeline, e)),
        }
    }

    fn abort(&self, pipeline: &mut Pipeline, error: PipelineError) -> PipelineError {
        let run_id = pipeline.state.run_id;
        error!("Pipeline '{}' aborted: {}", pipeline.name, error);

        pipeline.skip_pending(&format!("run aborted: {}", error.kind()));
        if let Err(e) = self.store.discard(run_id) {
            warn!("Failed to discard staged artifacts for run {}: {}", run_id, e);
        }
        pipeline
            .state
            .fail(error.step().map(str::to_string), error.kind());

        self.emit(ExecutionEvent::PipelineCompleted {
            run_id,
            status: pipeline.state.status,
        });
        error
    }

    async fn run_jobs(
        &self,
        pipeline: &mut Pipeline,
        trigger: &TriggerEvent,
        staged: &mut Vec<StagedArtifact>,
    ) -> Result<(), PipelineError> {
        let run_id = pipeline.state.run_id;

        for job_index in 0..pipeline.jobs().len() {
            let job = pipeline.jobs()[job_index].clone();

            let worker = Worker::provision(
                &self.workspace_root,
                run_id,
                job.id(),
                job.image().clone(),
                &self.source_dir,
            )
            .map_err(|source| PipelineError::Provision {
                job: job.id().to_string(),
                source,
            })?;

            info!(
                "Job '{}' on {} in {}",
                job.id(),
                job.image().label(),
                worker.workspace().display()
            );
            self.emit(ExecutionEvent::JobStarted {
                job_id: job.id().to_string(),
                image: job.image().label(),
                workspace: worker.workspace().to_path_buf(),
            });

            let context = self.job_context(pipeline, &job, &worker, trigger);
            let mut base_env = worker.environment(run_id, trigger);
            base_env.extend(pipeline.env().iter().map(|(k, v)| (k.clone(), v.clone())));
            base_env.extend(job.env().iter().map(|(k, v)| (k.clone(), v.clone())));

            let result = self
                .run_job(pipeline, job_index, &job, &worker, &context, &base_env, staged)
                .await;

            if self.clean_workspaces {
                if let Err(e) = worker.discard() {
                    warn!("Failed to remove workspace {}: {}", worker.workspace().display(), e);
                }
            }

            result?;
        }

        Ok(())
    }

    fn job_context(
        &self,
        pipeline: &Pipeline,
        job: &Job,
        worker: &Worker,
        trigger: &TriggerEvent,
    ) -> RunContext {
        let mut context = RunContext::new();
        for (key, value) in pipeline.variables.iter().chain(self.overrides.iter()) {
            context.set(key.clone(), value.clone());
        }
        context.set("trigger.branch", trigger.branch.clone());
        context.set("trigger.commit", trigger.commit.clone());
        context.set("run.id", pipeline.state.run_id.to_string());
        context.set("job.id", job.id());
        context.set("image", job.image().label());
        context.set("workspace", worker.workspace().display().to_string());
        context.set("source", worker.source().display().to_string());
        context
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_job(
        &self,
        pipeline: &mut Pipeline,
        job_index: usize,
        job: &Job,
        worker: &Worker,
        context: &RunContext,
        base_env: &BTreeMap<String, String>,
        staged: &mut Vec<StagedArtifact>,
    ) -> Result<(), PipelineError> {
        let run_id = pipeline.state.run_id;

        for (step_index, step) in job.steps().iter().enumerate() {
            let step_id = step.qualified_id();
            let started_at = Utc::now();

            pipeline.set_step_state(job_index, step_index, StepState::Running { started_at });
            self.emit(ExecutionEvent::StepStarted {
                step_id: step_id.to_string(),
                name: step.name().to_string(),
            });

            let result = match step.action() {
                StepAction::Upload(spec) => self
                    .upload(run_id, step, spec, worker.workspace())
                    .map(|artifact| {
                        let summary = format!(
                            "staged {} file(s) as '{}'",
                            artifact.manifest.files.len(),
                            artifact.manifest.name
                        );
                        staged.push(artifact);
                        summary
                    }),
                _ => self.run_command(step, worker, context, base_env).await,
            };

            match result {
                Ok(output) => {
                    pipeline.set_step_state(
                        job_index,
                        step_index,
                        StepState::Completed {
                            output,
                            started_at,
                            completed_at: Utc::now(),
                        },
                    );
                    pipeline.state.step_completed();
                    self.emit(ExecutionEvent::StepCompleted {
                        step_id: step_id.to_string(),
                    });
                }
                Err((error, output)) => {
                    error!("Step {} failed: {}", step_id, error);
                    pipeline.set_step_state(
                        job_index,
                        step_index,
                        StepState::Failed {
                            error: error.to_string(),
                            kind: error.kind(),
                            output,
                            started_at,
                            failed_at: Utc::now(),
                        },
                    );
                    self.emit(ExecutionEvent::StepFailed {
                        step_id: step_id.to_string(),
                        kind: error.kind(),
                        error: error.to_string(),
                    });
                    return Err(error);
                }
            }
        }

        Ok(())
    }

    async fn run_command(
        &self,
        step: &Step,
        worker: &Worker,
        context: &RunContext,
        base_env: &BTreeMap<String, String>,
    ) -> Result<String, StepError> {
        let render_failure =
            |e: crate::core::RenderError| (step.failure(StepFailureReason::Render(e.to_string())), String::new());

        let (template, inputs) = match step.command_template() {
            Some(command) => command,
            None => return Ok(String::new()),
        };
        // `with:` values may reference run variables themselves
        let context = match inputs {
            Some(inputs) => context.with_inputs(&context.render_env(inputs).map_err(render_failure)?),
            None => context.clone(),
        };

        let script = context.render(template).map_err(render_failure)?;
        let mut env = context.render_env(base_env).map_err(render_failure)?;
        env.extend(context.render_env(step.env()).map_err(render_failure)?);

        let command = StepCommand {
            step_id: step.qualified_id().to_string(),
            shell: worker.image().shell.clone(),
            script,
            workdir: worker.workspace().to_path_buf(),
            env,
        };
        debug!("Rendered script for {}:\n{}", command.step_id, command.script);

        let sink = EventSink {
            step_id: step.qualified_id(),
            handlers: &self.event_handlers,
        };

        match self
            .executor
            .execute(&command, step.timeout(), &sink, &self.cancel)
            .await
        {
            ExecutionResult::Success { output } => Ok(output),
            ExecutionResult::Failed { reason, output } => Err((step.failure(reason), output)),
            ExecutionResult::Cancelled { output } => Err((
                PipelineError::Cancelled {
                    step: step.qualified_id().to_string(),
                },
                output,
            )),
        }
    }

    fn upload(
        &self,
        run_id: Uuid,
        step: &Step,
        spec: &ArtifactSpec,
        workspace: &Path,
    ) -> Result<StagedArtifact, StepError> {
        if self.cancel.is_cancelled() {
            return Err((
                PipelineError::Cancelled {
                    step: step.qualified_id().to_string(),
                },
                String::new(),
            ));
        }

        let files = spec.collect(workspace);
        if files.is_empty() {
            return Err((
                PipelineError::ArtifactNotFound {
                    step: step.qualified_id().to_string(),
                    artifact: spec.name.clone(),
                    patterns: spec.patterns.clone(),
                },
                String::new(),
            ));
        }

        let artifact = self
            .store
            .stage(run_id, &spec.name, &files)
            .map_err(|e| (PipelineError::from(e), String::new()))?;

        info!("Staged artifact '{}' ({} files)", spec.name, files.len());
        self.emit(ExecutionEvent::ArtifactStaged {
            step_id: step.qualified_id().to_string(),
            name: spec.name.clone(),
            files: files.len(),
        });
        Ok(artifact)
    }

    fn publish(
        &self,
        run_id: Uuid,
        staged: Vec<StagedArtifact>,
    ) -> Result<Vec<ArtifactManifest>, PipelineError> {
        let manifests = self.store.commit_all(staged)?;
        for manifest in &manifests {
            info!("Published artifact '{}' for run {}", manifest.name, run_id);
            self.emit(ExecutionEvent::ArtifactPublished {
                name: manifest.name.clone(),
                files: manifest.files.len(),
                size: manifest.total_size(),
            });
        }
        Ok(manifests)
    }
}
