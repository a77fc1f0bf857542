//! Pipeline domain model

use crate::core::{
    action::ActionCatalog,
    config::{JobConfig, PipelineConfig},
    state::{PipelineState, StepState},
    step::{Step, StepAction},
    trigger::TriggerFilter,
    worker::WorkerImage,
};
use anyhow::{Context, Result};
use std::collections::{BTreeMap, HashSet};

/// A named, ordered group of steps executed on one worker
#[derive(Debug, Clone)]
pub struct Job {
    id: String,
    name: String,
    image: WorkerImage,
    env: BTreeMap<String, String>,
    steps: Vec<Step>,
}

impl Job {
    /// Create a job from configuration, resolving every step
    pub fn from_config(config: &JobConfig, actions: &ActionCatalog) -> Result<Self> {
        let mut steps: Vec<Step> = Vec::with_capacity(config.steps.len());
        let mut step_ids = HashSet::new();
        let mut artifact_names = HashSet::new();

        for (index, step_config) in config.steps.iter().enumerate() {
            let position = index + 1;
            let mut step = Step::from_config(step_config, &config.id, position, actions)
                .map_err(anyhow::Error::msg)
                .with_context(|| format!("Job '{}', step {}", config.id, position))?;

            if !step_ids.insert(step.id().to_string()) {
                if step_config.id.is_some() {
                    anyhow::bail!("Duplicate step ID '{}' in job '{}'", step.id(), config.id);
                }
                // Derived ids collide when names repeat; the position disambiguates
                let unique = Step::from_config(
                    &crate::core::config::StepConfig {
                        id: Some(format!("{}-{}", step.id(), position)),
                        ..step_config.clone()
                    },
                    &config.id,
                    position,
                    actions,
                )
                .map_err(anyhow::Error::msg)?;
                step_ids.insert(unique.id().to_string());
                step = unique;
            }

            if let StepAction::Upload(spec) = step.action() {
                if !artifact_names.insert(spec.name.clone()) {
                    anyhow::bail!(
                        "Artifact '{}' is uploaded more than once in job '{}'",
                        spec.name,
                        config.id
                    );
                }
            }

            steps.push(step);
        }

        Ok(Job {
            id: config.id.clone(),
            name: config.name.clone().unwrap_or_else(|| config.id.clone()),
            image: WorkerImage::resolve(&config.runs_on, config.shell.as_deref()),
            env: config.env.clone(),
            steps,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn image(&self) -> &WorkerImage {
        &self.image
    }

    pub fn env(&self) -> &BTreeMap<String, String> {
        &self.env
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// Get a step by ID
    pub fn step(&self, id: &str) -> Option<&Step> {
        self.steps.iter().find(|s| s.id() == id)
    }
}

/// A pipeline definition plus the state of its current run
#[derive(Debug, Clone)]
pub struct Pipeline {
    /// Pipeline name
    pub name: String,

    /// Template variables available to all steps
    pub variables: BTreeMap<String, String>,

    /// Execution state
    pub state: PipelineState,

    env: BTreeMap<String, String>,
    trigger: TriggerFilter,
    jobs: Vec<Job>,
}

impl Pipeline {
    /// Create a pipeline from configuration
    pub fn from_config(config: &PipelineConfig) -> Result<Self> {
        let actions = ActionCatalog::new(config.actions.clone());
        let jobs = config
            .jobs
            .iter()
            .map(|job| Job::from_config(job, &actions))
            .collect::<Result<Vec<_>>>()?;

        // Artifact names are unique per run, across jobs too
        let mut artifact_names = HashSet::new();
        for step in jobs.iter().flat_map(|job| job.steps.iter()) {
            if let StepAction::Upload(spec) = step.action() {
                if !artifact_names.insert(spec.name.as_str()) {
                    anyhow::bail!(
                        "Artifact '{}' is uploaded by more than one job",
                        spec.name
                    );
                }
            }
        }

        let trigger = TriggerFilter::from_config(config.trigger.as_ref())
            .context("Invalid trigger branch pattern")?;

        Ok(Pipeline {
            name: config.name.clone(),
            variables: config.variables.clone(),
            state: PipelineState::new(),
            env: config.env.clone(),
            trigger,
            jobs,
        })
    }

    pub fn trigger(&self) -> &TriggerFilter {
        &self.trigger
    }

    pub fn env(&self) -> &BTreeMap<String, String> {
        &self.env
    }

    pub fn jobs(&self) -> &[Job] {
        &self.jobs
    }

    /// Get a job by ID
    pub fn job(&self, id: &str) -> Option<&Job> {
        self.jobs.iter().find(|j| j.id() == id)
    }

    /// Get a step by its `job/step` id
    pub fn step(&self, qualified_id: &str) -> Option<&Step> {
        let (job_id, step_id) = qualified_id.split_once('/')?;
        self.job(job_id)?.step(step_id)
    }

    /// All steps in execution order
    pub fn steps(&self) -> impl Iterator<Item = &Step> {
        self.jobs.iter().flat_map(|job| job.steps.iter())
    }

    pub fn total_steps(&self) -> usize {
        self.jobs.iter().map(|job| job.steps.len()).sum()
    }

    pub(crate) fn set_step_state(&mut self, job_index: usize, step_index: usize, state: StepState) {
        if let Some(step) = self
            .jobs
            .get_mut(job_index)
            .and_then(|job| job.steps.get_mut(step_index))
        {
            step.set_state(state);
        }
    }

    /// Mark every step that has not run yet as skipped
    pub(crate) fn skip_pending(&mut self, reason: &str) {
        for job in &mut self.jobs {
            for step in &mut job.steps {
                if matches!(step.state(), StepState::Pending) {
                    step.set_state(StepState::Skipped {
                        reason: reason.to_string(),
                    });
                }
            }
        }
    }

    /// Steps that actually started, in execution order
    pub fn executed_steps(&self) -> Vec<String> {
        self.steps()
            .filter(|s| s.state().was_executed())
            .map(|s| s.qualified_id().to_string())
            .collect()
    }

    /// Check if every step reached a terminal state
    pub fn is_complete(&self) -> bool {
        self.steps().all(|s| s.state().is_terminal())
    }

    /// Warnings an operator should see before running
    ///
    /// Nothing here is an error: unbounded waits and the absence of
    /// retries are the documented defaults, they are only made visible.
    pub fn lint(&self) -> Vec<String> {
        let mut warnings: Vec<String> = self
            .steps()
            .filter(|s| s.spawns_process() && s.timeout_secs().is_none())
            .map(|s| {
                format!(
                    "step '{}' has no timeout configured; it will wait indefinitely (set timeout-secs or timeout-minutes)",
                    s.qualified_id()
                )
            })
            .collect();

        warnings.push(
            "no retry policy is defined: every step runs once and the first failure aborts the run"
                .to_string(),
        );
        warnings
    }
}
